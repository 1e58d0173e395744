//! Ookla `speedtest --format=json` output

use serde_json::Value;
use tracing::warn;

/// Download / upload in Mbit/s plus the shareable result page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedTestResult {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub result_url: Option<String>,
}

impl SpeedTestResult {
    /// At least one throughput figure was found
    pub fn has_measurement(&self) -> bool {
        self.download_mbps.is_some() || self.upload_mbps.is_some()
    }
}

/// bytes/s -> Mbit/s
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / 1_000_000.0
}

/// Parse the JSON payload. Never fails: missing pieces come back as `None`.
pub fn parse_speedtest(output: &str) -> SpeedTestResult {
    let Some(json) = parse_json_payload(output) else {
        warn!("Speed test output is not valid JSON");
        return SpeedTestResult::default();
    };

    let download_mbps = bandwidth(&json, "download");
    let upload_mbps = bandwidth(&json, "upload");
    let result_url = json
        .pointer("/result/url")
        .and_then(Value::as_str)
        .map(str::to_string);

    SpeedTestResult {
        download_mbps,
        upload_mbps,
        result_url,
    }
}

/// The whole output, or failing that the outermost `{...}` span
/// (license banners and progress lines can surround the JSON).
fn parse_json_payload(output: &str) -> Option<Value> {
    let trimmed = output.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn bandwidth(json: &Value, direction: &str) -> Option<f64> {
    json.get(direction)?
        .get("bandwidth")?
        .as_f64()
        .map(bytes_per_sec_to_mbps)
}
