//! Output drivers.

pub mod led;
