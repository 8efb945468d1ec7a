//! envsense firmware library.
//!
//! A BLE Environmental Sensing peripheral: samples a BME280, publishes
//! temperature, pressure and humidity over GATT and accepts text commands
//! on a writable characteristic.  Everything except
//! [`adapters::bluedroid`] builds and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod gatt;
pub mod pins;
pub mod sensors;

pub use error::{Error, Result};
