//! Unified error type for the envsense firmware.
//!
//! Each subsystem keeps its own small error enum next to the code that
//! produces it; everything converts into [`Error`] so start-up code can use
//! `?` uniformly.  All variants are `Copy`.

use core::fmt;

use crate::app::ports::StackError;
use crate::config::ConfigError;
use crate::gatt::advertising::PayloadError;
use crate::sensors::SensorError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The wireless stack rejected a request.
    Stack(StackError),
    /// The advertising payload could not be built.
    Advertising(PayloadError),
    /// The environmental sensor failed.
    Sensor(SensorError),
    /// Configuration failed validation.
    Config(ConfigError),
    /// Start-up precondition not met.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stack(e) => write!(f, "stack: {e}"),
            Self::Advertising(e) => write!(f, "advertising: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<StackError> for Error {
    fn from(e: StackError) -> Self {
        Self::Stack(e)
    }
}

impl From<PayloadError> for Error {
    fn from(e: PayloadError) -> Self {
        Self::Advertising(e)
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
