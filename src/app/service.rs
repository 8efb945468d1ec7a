//! Polling loop — the single application thread.
//!
//! [`PollingLoop`] owns the sensor and the command table and shares the
//! attribute server with the stack's event context.  Each tick runs, in
//! strict order:
//!
//! ```text
//!  SensorPort::read ──▶ EnvironmentServer::publish ──▶ CommandChannel::process_pending_command
//! ```
//!
//! then [`PollingLoop::run`] sleeps for the configured interval.  Values
//! are refreshed every tick; subscribers are notified only when the
//! cycle counter wraps.

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::config::SystemConfig;
use crate::gatt::command::{CommandChannel, CommandOutcome};
use crate::gatt::server::{EnvironmentSample, EnvironmentServer, PublishMode, PublishReport};

use super::ports::{BleStack, SensorPort};

/// What one [`PollingLoop::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: u64,
    /// Values published this tick, `None` if the sensor read failed.
    pub sample: Option<EnvironmentSample>,
    pub mode: PublishMode,
    pub publish: Option<PublishReport>,
    pub command: CommandOutcome,
}

pub struct PollingLoop<S: BleStack, P: SensorPort> {
    server: Arc<EnvironmentServer<S>>,
    sensor: P,
    commands: CommandChannel,
    notify_every: u32,
    indicate: bool,
    interval_ms: u32,
    cycle: u32,
    ticks: u64,
}

impl<S: BleStack, P: SensorPort> PollingLoop<S, P> {
    pub fn new(
        server: Arc<EnvironmentServer<S>>,
        sensor: P,
        commands: CommandChannel,
        config: &SystemConfig,
    ) -> Self {
        Self {
            server,
            sensor,
            commands,
            notify_every: config.notify_every.max(1),
            indicate: config.indicate,
            interval_ms: config.sample_interval_ms,
            cycle: 0,
            ticks: 0,
        }
    }

    /// One sample → publish → command pass, without sleeping.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        self.cycle = (self.cycle + 1) % self.notify_every;
        let mode = PublishMode {
            notify: self.cycle == 0,
            indicate: self.indicate,
        };

        let (sample, publish) = match self.sensor.read() {
            Ok(reading) => {
                let sample = EnvironmentSample::from(reading);
                let report = self.server.publish(sample, mode);
                debug!(
                    "LOOP: tick {} t={} p={} h={} notified={} dropped={}",
                    self.ticks,
                    sample.temperature,
                    sample.pressure,
                    sample.humidity,
                    report.notified,
                    report.dropped
                );
                (Some(sample), Some(report))
            }
            Err(e) => {
                warn!("LOOP: tick {} sensor read failed: {}", self.ticks, e);
                (None, None)
            }
        };

        let command = self.commands.process_pending_command(self.server.as_ref());

        TickReport {
            tick: self.ticks,
            sample,
            mode,
            publish,
            command,
        }
    }

    /// Tick forever, sleeping the configured interval between passes.
    pub fn run<D: DelayNs>(&mut self, delay: &mut D) -> ! {
        loop {
            self.tick();
            delay.delay_ms(self.interval_ms);
        }
    }

    pub fn server(&self) -> &Arc<EnvironmentServer<S>> {
        &self.server
    }

    pub fn sensor_mut(&mut self) -> &mut P {
        &mut self.sensor
    }
}
