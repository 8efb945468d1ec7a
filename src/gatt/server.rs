//! Environmental Sensing attribute server.
//!
//! Owns the peripheral-role lifecycle on top of any [`BleStack`]:
//!
//! ```text
//!   initialize ──▶ advertising ──connect──▶ tracked ──disconnect──▶ re-advertise
//!                       ▲                                               │
//!                       └───────────────────────────────────────────────┘
//! ```
//!
//! The stack delivers events on its own context through the registered
//! callback while the polling loop calls [`EnvironmentServer::publish`].
//! The connection set is the only state both touch; it sits behind a
//! mutex and publish fans out over a snapshot taken with the lock held
//! only for the copy.
//!
//! Delivery is fire-and-forget.  A notify or indicate to a link that
//! dropped between snapshot and send is counted in [`ServerStats`] and
//! otherwise ignored.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};

use crate::app::ports::{AttrValue, BleStack, ConnHandle, StackError};
use crate::config::SystemConfig;
use crate::error::Result;
use crate::gatt::advertising::{AdvPayload, advertising_payload};
use crate::gatt::connections::{ConnSnapshot, ConnectionSet, InsertOutcome};
use crate::gatt::events::StackEvent;
use crate::gatt::service::{
    APPEARANCE_GENERIC_ENVIRONMENTAL_SENSOR, Characteristic, ENV_SENSE_UUID,
    ENVIRONMENTAL_SENSING, EnvHandles,
};
use crate::sensors::Reading;

/// Value written to the command characteristic once a command is consumed.
pub const COMMAND_SENTINEL: [u8; 4] = [0; 4];

// ───────────────────────────────────────────────────────────────
// Wire encoding
// ───────────────────────────────────────────────────────────────

/// Numeric characteristic encoding: signed 32-bit little-endian.
pub const fn encode_value(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// One set of values ready for the three measurement characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvironmentSample {
    pub temperature: i32,
    pub pressure: i32,
    pub humidity: i32,
}

impl EnvironmentSample {
    pub const fn new(temperature: i32, pressure: i32, humidity: i32) -> Self {
        Self {
            temperature,
            pressure,
            humidity,
        }
    }

    /// Integer conversion of floating readings: truncates toward zero,
    /// saturates at the `i32` range and maps NaN to 0.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_readings(temperature: f32, pressure: f32, humidity: f32) -> Self {
        // `as` already has exactly these semantics for f32 -> i32.
        Self::new(temperature as i32, pressure as i32, humidity as i32)
    }

    pub const fn value(&self, characteristic: Characteristic) -> Option<i32> {
        match characteristic {
            Characteristic::Temperature => Some(self.temperature),
            Characteristic::Pressure => Some(self.pressure),
            Characteristic::Humidity => Some(self.humidity),
            Characteristic::Command => None,
        }
    }
}

impl From<Reading> for EnvironmentSample {
    fn from(r: Reading) -> Self {
        Self::from_readings(r.temperature_c, r.pressure_pa, r.humidity_pct)
    }
}

/// Which pushes [`EnvironmentServer::publish`] sends after refreshing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishMode {
    pub notify: bool,
    pub indicate: bool,
}

impl PublishMode {
    pub const SILENT: Self = Self {
        notify: false,
        indicate: false,
    };
    pub const NOTIFY: Self = Self {
        notify: true,
        indicate: false,
    };
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Characteristic writes that failed (value left stale).
    pub write_failures: u8,
    pub notified: u32,
    pub indicated: u32,
    /// Pushes the stack rejected, typically because the link had gone.
    pub dropped: u32,
}

// ───────────────────────────────────────────────────────────────
// Statistics
// ───────────────────────────────────────────────────────────────

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    pub notifications: u32,
    pub indications: u32,
    pub dropped: u32,
    pub indicate_acks: u32,
    pub adv_starts: u32,
}

#[derive(Debug, Default)]
struct Counters {
    notifications: AtomicU32,
    indications: AtomicU32,
    dropped: AtomicU32,
    indicate_acks: AtomicU32,
    adv_starts: AtomicU32,
}

impl Counters {
    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServerStats {
        ServerStats {
            notifications: self.notifications.load(Ordering::Relaxed),
            indications: self.indications.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            indicate_acks: self.indicate_acks.load(Ordering::Relaxed),
            adv_starts: self.adv_starts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Push {
    Notify,
    Indicate,
}

// ───────────────────────────────────────────────────────────────
// Server
// ───────────────────────────────────────────────────────────────

pub struct EnvironmentServer<S: BleStack> {
    stack: S,
    handles: EnvHandles,
    payload: AdvPayload,
    adv_interval_us: u32,
    connections: Mutex<ConnectionSet>,
    advertising: AtomicBool,
    counters: Counters,
}

impl<S: BleStack + 'static> EnvironmentServer<S> {
    /// Bring the radio up, register the service and start advertising.
    ///
    /// The event callback holds a weak reference, so dropping the last
    /// `Arc` tears the server down even though the stack outlives it.
    pub fn initialize(stack: S, config: &SystemConfig) -> Result<Arc<Self>> {
        stack.activate(true)?;

        let registered = stack.register_service(&ENVIRONMENTAL_SENSING)?;
        let handles = EnvHandles::from_registered(&registered)?;

        let payload = advertising_payload(
            &config.device_name,
            &[ENV_SENSE_UUID],
            APPEARANCE_GENERIC_ENVIRONMENTAL_SENSOR,
        )?;

        let server = Arc::new(Self {
            stack,
            handles,
            payload,
            adv_interval_us: config.adv_interval_us,
            connections: Mutex::new(ConnectionSet::new()),
            advertising: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let weak = Arc::downgrade(&server);
        server.stack.register_callback(Box::new(move |event| {
            if let Some(server) = weak.upgrade() {
                server.on_event(event);
            }
        }))?;

        server.advertise(server.adv_interval_us)?;
        info!(
            "BLE: '{}' up (temp={}, pressure={}, humidity={}, command={})",
            config.device_name,
            handles.temperature,
            handles.pressure,
            handles.humidity,
            handles.command
        );
        Ok(server)
    }
}

impl<S: BleStack> EnvironmentServer<S> {
    /// Single entry point for stack events.  Safe from any context.
    pub fn on_event(&self, event: StackEvent) {
        match event {
            StackEvent::Connect { conn } => match self.lock_connections().insert(conn) {
                InsertOutcome::Added => info!("BLE: {} connected", conn),
                InsertOutcome::AlreadyPresent => debug!("BLE: {} already tracked", conn),
                InsertOutcome::Full => warn!("BLE: connection table full, {} not tracked", conn),
            },
            StackEvent::Disconnect { conn } => {
                let was_tracked = self.lock_connections().remove(conn);
                if was_tracked {
                    info!("BLE: {} disconnected", conn);
                } else {
                    debug!("BLE: disconnect for untracked {}", conn);
                }
                if let Err(e) = self.advertise(self.adv_interval_us) {
                    error!("BLE: failed to restart advertising: {}", e);
                }
            }
            StackEvent::IndicateDone { conn, attr, status } => {
                Counters::bump(&self.counters.indicate_acks);
                debug!("BLE: indicate done {} {} status=0x{:02x}", conn, attr, status);
            }
            StackEvent::Other(code) => debug!("BLE: ignoring event {}", code),
        }
    }

    /// Refresh the three measurement values, then push them to every
    /// tracked connection as `mode` requests.
    pub fn publish(&self, sample: EnvironmentSample, mode: PublishMode) -> PublishReport {
        let mut report = PublishReport::default();

        for characteristic in Characteristic::MEASUREMENTS {
            let Some(value) = sample.value(characteristic) else {
                continue;
            };
            let handle = self.handles.get(characteristic);
            if let Err(e) = self.stack.write_characteristic(handle, &encode_value(value)) {
                warn!("BLE: write {:?} ({}) failed: {}", characteristic, handle, e);
                report.write_failures += 1;
            }
        }

        if !mode.notify && !mode.indicate {
            return report;
        }

        for conn in self.connections() {
            if mode.notify {
                self.push_all(conn, Push::Notify, &mut report);
            }
            if mode.indicate {
                self.push_all(conn, Push::Indicate, &mut report);
            }
        }
        report
    }

    fn push_all(&self, conn: ConnHandle, push: Push, report: &mut PublishReport) {
        for characteristic in Characteristic::MEASUREMENTS {
            let handle = self.handles.get(characteristic);
            let result = match push {
                Push::Notify => self.stack.notify(conn, handle),
                Push::Indicate => self.stack.indicate(conn, handle),
            };
            match (result, push) {
                (Ok(()), Push::Notify) => {
                    report.notified += 1;
                    Counters::bump(&self.counters.notifications);
                }
                (Ok(()), Push::Indicate) => {
                    report.indicated += 1;
                    Counters::bump(&self.counters.indications);
                }
                (Err(e), _) => {
                    report.dropped += 1;
                    Counters::bump(&self.counters.dropped);
                    debug!("BLE: {:?} to {} dropped: {}", push, conn, e);
                }
            }
        }
    }

    /// (Re)start advertising with the stored payload.  Calling while
    /// already advertising re-arms rather than failing.
    pub fn advertise(&self, interval_us: u32) -> core::result::Result<(), StackError> {
        match self.stack.advertise(interval_us, &self.payload) {
            Ok(()) => {
                self.advertising.store(true, Ordering::Release);
                Counters::bump(&self.counters.adv_starts);
                debug!("BLE: advertising every {} us", interval_us);
                Ok(())
            }
            Err(e) => {
                self.advertising.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    pub fn handles(&self) -> &EnvHandles {
        &self.handles
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Copy of the tracked connection handles.
    pub fn connections(&self) -> ConnSnapshot {
        self.lock_connections().snapshot()
    }

    pub fn is_connected(&self, conn: ConnHandle) -> bool {
        self.lock_connections().contains(conn)
    }

    /// Current local value of one characteristic.
    pub fn read_value(&self, characteristic: Characteristic) -> core::result::Result<AttrValue, StackError> {
        self.stack.read_characteristic(self.handles.get(characteristic))
    }

    pub fn read_command(&self) -> core::result::Result<AttrValue, StackError> {
        self.read_value(Characteristic::Command)
    }

    /// Reset the command mailbox to [`COMMAND_SENTINEL`].
    pub fn clear_command(&self) -> core::result::Result<(), StackError> {
        self.stack
            .write_characteristic(self.handles.command, &COMMAND_SENTINEL)
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    // A panic while holding the lock cannot leave the set half-updated:
    // every mutation is a single insert or remove.
    fn lock_connections(&self) -> MutexGuard<'_, ConnectionSet> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
