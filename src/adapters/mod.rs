//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements | Connects to                          |
//! |--------------|------------|--------------------------------------|
//! | `bluedroid`  | BleStack   | ESP-IDF Bluedroid GATT server        |
//! | `sim_stack`  | BleStack   | In-memory radio for host builds/tests|
//!
//! The sensor port is implemented directly by
//! [`Bme280`](crate::sensors::bme280::Bme280) over any `embedded-hal` bus.

#[cfg(target_os = "espidf")]
pub mod bluedroid;
#[cfg(not(target_os = "espidf"))]
pub mod sim_stack;
