//! System configuration parameters
//!
//! All tunable parameters for the envsense peripheral.  Defaults match the
//! shipped device; a JSON document baked in at build time through the
//! `ENVSENSE_CONFIG` environment variable can override any subset of them.

use core::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::gatt::advertising::advertising_payload;
use crate::gatt::service::{APPEARANCE_GENERIC_ENVIRONMENTAL_SENSOR, ENV_SENSE_UUID};

/// Capacity of the device-name buffer.  The advertising payload imposes a
/// tighter limit, checked by [`SystemConfig::validate`].
pub const DEVICE_NAME_CAPACITY: usize = 32;

/// Advertising interval bounds allowed by Bluetooth Core (20 ms .. 10.24 s).
const MIN_ADV_INTERVAL_US: u32 = 20_000;
const MAX_ADV_INTERVAL_US: u32 = 10_240_000;

const BME280_PRIMARY_ADDR: u8 = 0x76;
const BME280_SECONDARY_ADDR: u8 = 0x77;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// JSON override did not parse.
    Parse,
    NameEmpty,
    /// Name does not fit the advertising payload.
    NameTooLong,
    AdvIntervalOutOfRange,
    /// A period or divisor is zero.
    ZeroInterval,
    InvalidSensorAddress,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "configuration JSON invalid"),
            Self::NameEmpty => write!(f, "device name is empty"),
            Self::NameTooLong => write!(f, "device name does not fit the advertising payload"),
            Self::AdvIntervalOutOfRange => write!(
                f,
                "advertising interval outside {}..={} us",
                MIN_ADV_INTERVAL_US, MAX_ADV_INTERVAL_US
            ),
            Self::ZeroInterval => write!(f, "interval must be non-zero"),
            Self::InvalidSensorAddress => write!(f, "sensor address must be 0x76 or 0x77"),
        }
    }
}

impl core::error::Error for ConfigError {}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Advertising ---
    /// Complete local name broadcast while discoverable
    pub device_name: heapless::String<DEVICE_NAME_CAPACITY>,
    /// Advertising interval (microseconds)
    pub adv_interval_us: u32,

    // --- Polling ---
    /// Sleep between polling-loop ticks (milliseconds)
    pub sample_interval_ms: u32,
    /// Notify subscribers on every Nth sample
    pub notify_every: u32,
    /// Also send indications when publishing
    pub indicate: bool,

    // --- Command actions ---
    /// Pulses emitted by the `blink` command
    pub blink_pulses: u8,
    /// On and off time of one pulse (milliseconds)
    pub blink_delay_ms: u32,

    // --- Sensor ---
    /// BME280 7-bit I2C address
    pub sensor_address: u8,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        // Fits: the literal is shorter than DEVICE_NAME_CAPACITY.
        let _ = device_name.push_str("esp32-ble-demo");
        Self {
            device_name,
            adv_interval_us: 500_000,

            sample_interval_ms: 1000,
            notify_every: 10,
            indicate: false,

            blink_pulses: 3,
            blink_delay_ms: 500,

            sensor_address: BME280_PRIMARY_ADDR,
        }
    }
}

impl SystemConfig {
    /// Parse a (possibly partial) JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|_| ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults, or the build-time `ENVSENSE_CONFIG` override if it is valid.
    pub fn load() -> Self {
        Self::load_from(option_env!("ENVSENSE_CONFIG"))
    }

    fn load_from(json: Option<&str>) -> Self {
        let Some(json) = json else {
            return Self::default();
        };
        match Self::from_json(json) {
            Ok(cfg) => {
                info!("CFG: using build-time override");
                cfg
            }
            Err(e) => {
                warn!("CFG: override rejected ({}), using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() {
            return Err(ConfigError::NameEmpty);
        }
        advertising_payload(
            &self.device_name,
            &[ENV_SENSE_UUID],
            APPEARANCE_GENERIC_ENVIRONMENTAL_SENSOR,
        )
        .map_err(|_| ConfigError::NameTooLong)?;
        if !(MIN_ADV_INTERVAL_US..=MAX_ADV_INTERVAL_US).contains(&self.adv_interval_us) {
            return Err(ConfigError::AdvIntervalOutOfRange);
        }
        if self.sample_interval_ms == 0 || self.notify_every == 0 || self.blink_delay_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.sensor_address != BME280_PRIMARY_ADDR && self.sensor_address != BME280_SECONDARY_ADDR {
            return Err(ConfigError::InvalidSensorAddress);
        }
        Ok(())
    }
}
