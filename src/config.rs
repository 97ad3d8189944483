//! Environment-driven configuration
//!
//! | Variable                   | Meaning                                   |
//! |----------------------------|-------------------------------------------|
//! | `GOOSE_SOCKET`             | socket name, `wayland-N` picked if unset  |
//! | `GOOSE_OUTPUTS`            | e.g. `1920x1080@60,1280x720@59.94`        |
//! | `GOOSE_PRESENT_LATENCY_MS` | simulated presentation latency            |
//! | `GOOSE_SEAT`               | seat name                                 |

use std::time::Duration;

use crate::compositor::OutputMode;
use crate::input::seat::DEFAULT_SEAT_NAME;

const DEFAULT_OUTPUTS: &str = "1920x1080@60";
const DEFAULT_LATENCY_MS: u64 = 2;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid output mode {value:?}: {reason}")]
    InvalidOutput { value: String, reason: &'static str },
    #[error("no outputs configured")]
    NoOutputs,
    #[error("invalid presentation latency {0:?}")]
    InvalidLatency(String),
    #[error("seat name must not be empty")]
    EmptySeat,
}

/// Compositor settings
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Listening socket name
    pub socket: Option<String>,
    /// One headless output per mode
    pub outputs: Vec<OutputMode>,
    pub present_latency: Duration,
    pub seat: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: None,
            outputs: vec![OutputMode::new(1920, 1080, 60000)],
            present_latency: Duration::from_millis(DEFAULT_LATENCY_MS),
            seat: DEFAULT_SEAT_NAME.to_string(),
        }
    }
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let socket = lookup("GOOSE_SOCKET").filter(|name| !name.is_empty());

        let outputs = parse_outputs(
            lookup("GOOSE_OUTPUTS")
                .as_deref()
                .unwrap_or(DEFAULT_OUTPUTS),
        )?;

        let present_latency = match lookup("GOOSE_PRESENT_LATENCY_MS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidLatency(value))?,
            None => Duration::from_millis(DEFAULT_LATENCY_MS),
        };

        let seat = lookup("GOOSE_SEAT").unwrap_or_else(|| DEFAULT_SEAT_NAME.to_string());
        if seat.trim().is_empty() {
            return Err(ConfigError::EmptySeat);
        }

        Ok(Self {
            socket,
            outputs,
            present_latency,
            seat,
        })
    }
}

/// Parse a comma separated list of `WIDTHxHEIGHT@HZ` modes
pub fn parse_outputs(list: &str) -> Result<Vec<OutputMode>, ConfigError> {
    let modes = list
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_mode)
        .collect::<Result<Vec<_>, _>>()?;
    if modes.is_empty() {
        return Err(ConfigError::NoOutputs);
    }
    Ok(modes)
}

/// Parse one `WIDTHxHEIGHT@HZ` mode; the refresh part is optional
pub fn parse_mode(value: &str) -> Result<OutputMode, ConfigError> {
    let invalid = |reason| ConfigError::InvalidOutput {
        value: value.to_string(),
        reason,
    };

    let (size, refresh) = match value.split_once('@') {
        Some((size, refresh)) => (size, Some(refresh)),
        None => (value, None),
    };
    let (width, height) = size
        .split_once('x')
        .ok_or_else(|| invalid("expected WIDTHxHEIGHT"))?;
    let width: i32 = width.parse().map_err(|_| invalid("bad width"))?;
    let height: i32 = height.parse().map_err(|_| invalid("bad height"))?;
    if width <= 0 || height <= 0 {
        return Err(invalid("size must be positive"));
    }

    let refresh = match refresh {
        Some(hz) => {
            let hz: f64 = hz.parse().map_err(|_| invalid("bad refresh rate"))?;
            if !hz.is_finite() || hz <= 0.0 {
                return Err(invalid("refresh rate must be positive"));
            }
            (hz * 1000.0).round() as u32
        }
        None => 60000,
    };

    Ok(OutputMode::new(width, height, refresh))
}
