//! GPIO / peripheral pin assignments for the ESP32-WROOM-32 dev board.
//!
//! Single source of truth: `main.rs` takes every pin number from here.

// ---------------------------------------------------------------------------
// Command-channel output
// ---------------------------------------------------------------------------

/// Digital output pulsed by the `blink` command (on-board LED header).
pub const LED_GPIO: i32 = 23;

// ---------------------------------------------------------------------------
// BME280 environmental sensor (I2C0)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;
/// Standard-mode bus clock.
pub const I2C_BAUDRATE_HZ: u32 = 100_000;
