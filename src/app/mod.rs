//! Application core — no direct I/O.
//!
//! The polling loop and the port traits it drives.  The wireless stack
//! and the sensor are reached only through [`ports`], so everything here
//! runs against mocks on the host.

pub mod ports;
pub mod service;
