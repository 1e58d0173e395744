//! Parsers for remote command output
//!
//! Both parsers are total: malformed input yields absent values, never an error.

pub mod speedtest;
pub mod status;

pub use speedtest::{parse_speedtest, SpeedTestResult};
pub use status::{parse_status, ClientState, ClientStatus, StatusReport, Uptime};
