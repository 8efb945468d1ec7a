//! Environmental sensor subsystem.
//!
//! A driver produces one [`Reading`] per poll through the
//! [`SensorPort`](crate::app::ports::SensorPort).  Units are fixed here so
//! the GATT layer can encode them without knowing which chip produced them.

pub mod bme280;

use core::fmt;

/// One compensated sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Degrees Celsius.
    pub temperature_c: f32,
    /// Pascal.
    pub pressure_pa: f32,
    /// Relative humidity, percent.
    pub humidity_pct: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// I²C transaction failed.
    Bus,
    /// Chip-id register returned something other than the expected part.
    UnknownChip(u8),
    /// Calibration data has not been loaded yet.
    NotReady,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "I2C bus error"),
            Self::UnknownChip(id) => write!(f, "unexpected chip id 0x{:02x}", id),
            Self::NotReady => write!(f, "sensor not initialised"),
        }
    }
}

impl core::error::Error for SensorError {}
