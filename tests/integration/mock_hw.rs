//! Mock hardware for integration tests.
//!
//! Records every pin write and delay so tests can assert on the full
//! output history without touching real GPIO, and scripts sensor readings
//! tick by tick.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

use envsense::adapters::sim_stack::SimStack;
use envsense::app::ports::SensorPort;
use envsense::config::SystemConfig;
use envsense::drivers::led::Blinker;
use envsense::gatt::command::{BLINK_TOKEN, CommandChannel};
use envsense::gatt::server::EnvironmentServer;
use envsense::sensors::{Reading, SensorError};

// ── Scripted sensor ───────────────────────────────────────────

/// Returns queued results in order, then repeats `fallback`.
pub struct MockSensor {
    script: VecDeque<Result<Reading, SensorError>>,
    fallback: Reading,
    pub reads: u32,
}

#[allow(dead_code)]
impl MockSensor {
    pub fn constant(temperature_c: f32, pressure_pa: f32, humidity_pct: f32) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Reading {
                temperature_c,
                pressure_pa,
                humidity_pct,
            },
            reads: 0,
        }
    }

    pub fn then(mut self, result: Result<Reading, SensorError>) -> Self {
        self.script.push_back(result);
        self
    }
}

impl SensorPort for MockSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.reads += 1;
        self.script.pop_front().unwrap_or(Ok(self.fallback))
    }
}

// ── Recording output pin ──────────────────────────────────────

/// Pin whose level history stays observable after the pin is moved
/// into a driver.
#[derive(Clone, Default)]
pub struct MockPin {
    pub levels: Arc<Mutex<Vec<bool>>>,
}

#[allow(dead_code)]
impl MockPin {
    pub fn history(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }

    /// Completed on→off cycles.
    pub fn pulses(&self) -> usize {
        self.history()
            .windows(2)
            .filter(|w| w[0] && !w[1])
            .count()
    }
}

impl ErrorType for MockPin {
    type Error = ErrorKind;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.lock().unwrap().push(true);
        Ok(())
    }
}

// ── Recording delay ───────────────────────────────────────────

/// Accumulates requested sleep time instead of sleeping.
#[derive(Clone, Default)]
pub struct MockDelay {
    pub total_ms: Arc<Mutex<u64>>,
}

#[allow(dead_code)]
impl MockDelay {
    pub fn elapsed_ms(&self) -> u64 {
        *self.total_ms.lock().unwrap()
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        *self.total_ms.lock().unwrap() += u64::from(ns) / 1_000_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        *self.total_ms.lock().unwrap() += u64::from(ms);
    }
}

// ── Fixtures ──────────────────────────────────────────────────

#[allow(dead_code)]
pub fn boot() -> Arc<EnvironmentServer<SimStack>> {
    EnvironmentServer::initialize(SimStack::new(), &SystemConfig::default())
        .expect("simulated bring-up succeeds")
}

/// Firmware command table with `blink` wired to a recording pin.
#[allow(dead_code)]
pub fn blink_channel(config: &SystemConfig) -> (CommandChannel, MockPin, MockDelay) {
    let pin = MockPin::default();
    let delay = MockDelay::default();
    let mut blinker = Blinker::new(
        pin.clone(),
        delay.clone(),
        config.blink_pulses,
        config.blink_delay_ms,
    );
    let mut channel = CommandChannel::new();
    channel
        .register(BLINK_TOKEN, move || {
            blinker.blink();
        })
        .unwrap();
    (channel, pin, delay)
}
