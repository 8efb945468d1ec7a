//! envsense firmware — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Adapters (outer ring)                   │
//! │  BluedroidStack (BleStack)     Bme280 (SensorPort)       │
//! │  Blinker (PinDriver + FreeRtos delay)                    │
//! │                                                          │
//! │  ─────────────── Port Trait Boundary ──────────────      │
//! │                                                          │
//! │  EnvironmentServer · CommandChannel · PollingLoop        │
//! └──────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use esp_idf_hal::delay::{Delay, FreeRtos};
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::Hertz;
use log::{info, warn};

use envsense::adapters::bluedroid::BluedroidStack;
use envsense::app::service::PollingLoop;
use envsense::config::SystemConfig;
use envsense::drivers::led::Blinker;
use envsense::gatt::command::{BLINK_TOKEN, CommandChannel};
use envsense::gatt::server::EnvironmentServer;
use envsense::pins;
use envsense::sensors::bme280::Bme280;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("envsense v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Configuration ──────────────────────────────────────
    let config = SystemConfig::load();
    config.validate()?;

    let peripherals = Peripherals::take()?;

    // ── 3. Sensor ─────────────────────────────────────────────
    // SAFETY: pin numbers come from `pins` and are not claimed elsewhere.
    let (sda, scl) = unsafe {
        (
            AnyIOPin::new(pins::I2C_SDA_GPIO),
            AnyIOPin::new(pins::I2C_SCL_GPIO),
        )
    };
    let i2c_config = I2cConfig::new().baudrate(Hertz(pins::I2C_BAUDRATE_HZ));
    let i2c = I2cDriver::new(peripherals.i2c0, sda, scl, &i2c_config)?;
    let mut sensor = Bme280::new(i2c, config.sensor_address);
    if let Err(e) = sensor.init(&mut Delay::new_default()) {
        // Keep serving BLE; each read retries until the chip answers.
        warn!("BME280: init failed: {}", e);
    }

    // ── 4. Command output ─────────────────────────────────────
    // SAFETY: as above.
    let led = PinDriver::output(unsafe { AnyOutputPin::new(pins::LED_GPIO) })?;
    let mut blinker = Blinker::new(led, FreeRtos, config.blink_pulses, config.blink_delay_ms);

    let mut commands = CommandChannel::new();
    commands.register(BLINK_TOKEN, move || {
        blinker.blink();
    })?;

    // ── 5. GATT server ────────────────────────────────────────
    let server = EnvironmentServer::initialize(BluedroidStack::new(), &config)
        .context("BLE bring-up failed")?;

    // ── 6. Polling loop (never returns) ───────────────────────
    let mut polling = PollingLoop::new(server, sensor, commands, &config);
    polling.run(&mut FreeRtos)
}
