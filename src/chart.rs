//! Speed history chart
//!
//! Renders download/upload throughput against the record dates as a PNG.
//! The font is bundled and registered on first use so rendering does not
//! depend on fonts installed on the host.

use once_cell::sync::Lazy;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};
use std::path::Path;
use tracing::{debug, warn};

use crate::history::SpeedRecord;

const WIDTH: u32 = 1024;
const HEIGHT: u32 = 600;
const FONT_FAMILY: &str = "sans-serif";

const DOWNLOAD_COLOR: RGBColor = RGBColor(0x4C, 0xAF, 0x50);
const UPLOAD_COLOR: RGBColor = RGBColor(0xFF, 0x98, 0x00);

static FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

static FONT_READY: Lazy<bool> = Lazy::new(|| {
    match register_font(FONT_FAMILY, FontStyle::Normal, FONT_BYTES) {
        Ok(()) => true,
        Err(_) => {
            warn!("Bundled chart font could not be loaded");
            false
        }
    }
});

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("no speed records to plot")]
    NoData,

    #[error("chart font unavailable")]
    Font,

    #[error("chart rendering failed: {0}")]
    Render(String),

    #[error("chart output directory: {0}")]
    Io(#[from] std::io::Error),
}

fn render_err<E: std::fmt::Display>(e: E) -> ChartError {
    ChartError::Render(e.to_string())
}

/// Points `(index, value)` of one series, skipping absent values
pub fn series_points(
    records: &[SpeedRecord],
    value: impl Fn(&SpeedRecord) -> Option<f64>,
) -> Vec<(usize, f64)> {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| value(r).map(|v| (i, v)))
        .collect()
}

/// Render `records` to `path`, replacing any previous image
pub fn render_chart(records: &[SpeedRecord], path: &Path) -> Result<(), ChartError> {
    if records.is_empty() {
        return Err(ChartError::NoData);
    }
    if !*FONT_READY {
        return Err(ChartError::Font);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let downloads = series_points(records, |r| r.download);
    let uploads = series_points(records, |r| r.upload);

    let peak = downloads
        .iter()
        .chain(uploads.iter())
        .map(|(_, v)| *v)
        .fold(0.0_f64, f64::max);
    let y_max = if peak > 0.0 { peak * 1.15 } else { 1.0 };

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Speed plot", (FONT_FAMILY, 28))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0..records.len(), 0f64..y_max)
        .map_err(render_err)?;

    let date_label = |i: &usize| records.get(*i).map(|r| r.date.clone()).unwrap_or_default();

    chart
        .configure_mesh()
        .x_labels(records.len().min(10))
        .x_label_formatter(&date_label)
        .x_label_style((FONT_FAMILY, 13))
        .y_label_style((FONT_FAMILY, 13))
        .y_desc("Speed, Mbit/s")
        .axis_desc_style((FONT_FAMILY, 15))
        .draw()
        .map_err(render_err)?;

    let mut drawn = 0;

    if !downloads.is_empty() {
        chart
            .draw_series(
                LineSeries::new(downloads.iter().copied(), DOWNLOAD_COLOR.stroke_width(2))
                    .point_size(4),
            )
            .map_err(render_err)?
            .label("Download")
            .legend(|(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], DOWNLOAD_COLOR.stroke_width(2))
            });
        drawn += 1;
    }

    if !uploads.is_empty() {
        chart
            .draw_series(
                LineSeries::new(uploads.iter().copied(), UPLOAD_COLOR.stroke_width(2))
                    .point_size(4),
            )
            .map_err(render_err)?
            .label("Upload")
            .legend(|(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], UPLOAD_COLOR.stroke_width(2))
            });
        drawn += 1;
    }

    if drawn > 0 {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .label_font((FONT_FAMILY, 14))
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(render_err)?;
    }

    root.present().map_err(render_err)?;

    debug!(
        "Rendered {} records ({} series) to {:?}",
        records.len(),
        drawn,
        path
    );
    Ok(())
}
