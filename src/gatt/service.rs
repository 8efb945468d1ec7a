//! Environmental Sensing service definition.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID     | Flags                 | Value                     |
//! |----------------|----------|-----------------------|---------------------------|
//! | Temperature    | `0x2A6E` | Read+Notify+Indicate  | `i32` LE                  |
//! | Pressure       | `0x2A6D` | Read+Notify+Indicate  | `i32` LE                  |
//! | Humidity       | `0x2A6F` | Read+Notify+Indicate  | `i32` LE                  |
//! | Command string | `0x2A3D` | Read+Write            | UTF-8 token / 4 zero bytes|
//!
//! Handles come back from the stack positionally.  [`EnvHandles`] maps
//! them onto named fields by explicit index so reordering the table above
//! cannot silently swap two characteristics.

use core::ops::BitOr;

use crate::app::ports::AttrHandle;
use crate::error::Error;

/// Upper bound on characteristics in one registered service.
pub const MAX_CHARACTERISTICS: usize = 8;

/// org.bluetooth.service.environmental_sensing
pub const ENV_SENSE_UUID: u16 = 0x181A;
/// org.bluetooth.characteristic.temperature
pub const TEMPERATURE_UUID: u16 = 0x2A6E;
/// org.bluetooth.characteristic.pressure
pub const PRESSURE_UUID: u16 = 0x2A6D;
/// org.bluetooth.characteristic.humidity
pub const HUMIDITY_UUID: u16 = 0x2A6F;
/// org.bluetooth.characteristic.string
pub const STRING_UUID: u16 = 0x2A3D;

/// org.bluetooth.characteristic.gap.appearance: Generic Environmental Sensor.
pub const APPEARANCE_GENERIC_ENVIRONMENTAL_SENSOR: u16 = 5696;

// ───────────────────────────────────────────────────────────────
// Characteristic properties
// ───────────────────────────────────────────────────────────────

/// Characteristic property bits (Bluetooth Core v5.x, Vol 3, Part G, 3.3.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharFlags(u8);

impl CharFlags {
    pub const READ: Self = Self(0x02);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for CharFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

const SENSOR_FLAGS: CharFlags = CharFlags::READ.union(CharFlags::NOTIFY).union(CharFlags::INDICATE);
const COMMAND_FLAGS: CharFlags = CharFlags::READ.union(CharFlags::WRITE);

// ───────────────────────────────────────────────────────────────
// Definition types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDef {
    pub uuid: u16,
    pub flags: CharFlags,
}

/// Immutable service table handed to [`BleStack::register_service`](crate::app::ports::BleStack::register_service).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub uuid: u16,
    pub characteristics: &'static [CharacteristicDef],
}

/// Named positions in [`ENVIRONMENTAL_SENSING`].  Must match the table order.
const TEMPERATURE_INDEX: usize = 0;
const PRESSURE_INDEX: usize = 1;
const HUMIDITY_INDEX: usize = 2;
const COMMAND_INDEX: usize = 3;

pub const ENVIRONMENTAL_SENSING: ServiceDefinition = ServiceDefinition {
    uuid: ENV_SENSE_UUID,
    characteristics: &[
        CharacteristicDef {
            uuid: TEMPERATURE_UUID,
            flags: SENSOR_FLAGS,
        },
        CharacteristicDef {
            uuid: PRESSURE_UUID,
            flags: SENSOR_FLAGS,
        },
        CharacteristicDef {
            uuid: HUMIDITY_UUID,
            flags: SENSOR_FLAGS,
        },
        CharacteristicDef {
            uuid: STRING_UUID,
            flags: COMMAND_FLAGS,
        },
    ],
};

// ───────────────────────────────────────────────────────────────
// Handle record
// ───────────────────────────────────────────────────────────────

/// The four characteristics of the service, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    Temperature,
    Pressure,
    Humidity,
    Command,
}

impl Characteristic {
    /// The three published measurements, in fan-out order.
    pub const MEASUREMENTS: [Self; 3] = [Self::Temperature, Self::Pressure, Self::Humidity];
}

/// Value handles captured once at registration and held for the server's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvHandles {
    pub temperature: AttrHandle,
    pub pressure: AttrHandle,
    pub humidity: AttrHandle,
    pub command: AttrHandle,
}

impl EnvHandles {
    /// Map the registration result onto named fields.
    ///
    /// Fails if the stack returned a different number of handles than
    /// [`ENVIRONMENTAL_SENSING`] declares.
    pub fn from_registered(handles: &[AttrHandle]) -> Result<Self, Error> {
        if handles.len() != ENVIRONMENTAL_SENSING.characteristics.len() {
            return Err(Error::Init("service registration returned wrong handle count"));
        }
        Ok(Self {
            temperature: handles[TEMPERATURE_INDEX],
            pressure: handles[PRESSURE_INDEX],
            humidity: handles[HUMIDITY_INDEX],
            command: handles[COMMAND_INDEX],
        })
    }

    pub fn get(&self, characteristic: Characteristic) -> AttrHandle {
        match characteristic {
            Characteristic::Temperature => self.temperature,
            Characteristic::Pressure => self.pressure,
            Characteristic::Humidity => self.humidity,
            Characteristic::Command => self.command,
        }
    }
}
