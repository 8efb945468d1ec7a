//! Port traits — the hexagonal boundary between the GATT core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ EnvironmentServer / PollingLoop (domain)
//! ```
//!
//! Driven adapters (the wireless stack, the environmental sensor) implement
//! these traits.  The [`EnvironmentServer`](crate::gatt::server::EnvironmentServer)
//! and [`PollingLoop`](super::service::PollingLoop) consume them via generics,
//! so the domain core never touches the radio or the I²C bus directly.
//!
//! ## Concurrency notes
//!
//! - **BleStack** is shared between the polling loop and the stack's own
//!   event context.  Every method takes `&self`; implementations use
//!   interior mutability.
//! - Implementations MUST NOT hold an internal lock while invoking the
//!   registered [`EventCallback`] — the callback re-enters the stack when it
//!   re-arms advertising after a disconnect.

use core::fmt;

use crate::gatt::events::StackEvent;
use crate::gatt::service::{MAX_CHARACTERISTICS, ServiceDefinition};
use crate::sensors::{Reading, SensorError};

/// Largest attribute value the core ever reads back from the stack.
pub const MAX_ATTR_LEN: usize = 64;

// ───────────────────────────────────────────────────────────────
// Handles
// ───────────────────────────────────────────────────────────────

/// Opaque identifier for one active link to a central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle(pub u16);

/// Opaque attribute (characteristic value) handle assigned by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrHandle(pub u16);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl fmt::Display for AttrHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attr#{}", self.0)
    }
}

/// Bytes of one attribute value as returned by [`BleStack::read_characteristic`].
pub type AttrValue = heapless::Vec<u8, MAX_ATTR_LEN>;

/// Handles returned by service registration, in declaration order.
pub type RegisteredHandles = heapless::Vec<AttrHandle, MAX_CHARACTERISTICS>;

/// Callback the stack invokes for every decoded event.
pub type EventCallback = Box<dyn Fn(StackEvent) + Send + Sync + 'static>;

// ───────────────────────────────────────────────────────────────
// Wireless stack port (driven adapter: domain ↔ radio)
// ───────────────────────────────────────────────────────────────

/// The eight primitives the attribute server consumes from the underlying
/// BLE stack, plus the event-callback contract.
pub trait BleStack: Send + Sync {
    /// Power the radio on or off.
    fn activate(&self, on: bool) -> Result<(), StackError>;

    /// Install the single event callback.  Replaces any previous one.
    fn register_callback(&self, callback: EventCallback) -> Result<(), StackError>;

    /// Register one service.  Returns one value handle per characteristic,
    /// in the order the characteristics were declared.
    fn register_service(&self, service: &ServiceDefinition)
    -> Result<RegisteredHandles, StackError>;

    /// Overwrite the local value of a characteristic.
    fn write_characteristic(&self, handle: AttrHandle, value: &[u8]) -> Result<(), StackError>;

    /// Read the local value of a characteristic (including peer writes).
    fn read_characteristic(&self, handle: AttrHandle) -> Result<AttrValue, StackError>;

    /// Push the current value of `handle` to `conn` without acknowledgement.
    fn notify(&self, conn: ConnHandle, handle: AttrHandle) -> Result<(), StackError>;

    /// Push the current value of `handle` to `conn`, requesting confirmation.
    fn indicate(&self, conn: ConnHandle, handle: AttrHandle) -> Result<(), StackError>;

    /// (Re)start connectable advertising with `payload` every `interval_us`.
    fn advertise(&self, interval_us: u32, payload: &[u8]) -> Result<(), StackError>;
}

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: the polling loop calls this to obtain one sample.
///
/// Units and compensation are the driver's responsibility.
pub trait SensorPort {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors surfaced by [`BleStack`] implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The radio has not been activated.
    NotActive,
    /// Controller or host bring-up failed (platform return code).
    ActivationFailed(i32),
    /// The service table could not be created (platform return code).
    RegistrationFailed(i32),
    /// The handle does not belong to any registered characteristic.
    InvalidHandle,
    /// The connection is gone (dropped between snapshot and send).
    NotConnected,
    /// Value or advertising payload exceeds what the stack accepts.
    PayloadTooLarge,
    /// The stack did not answer an asynchronous request in time.
    Timeout,
    /// Any other platform error code.
    Platform(i32),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotActive => write!(f, "radio not active"),
            Self::ActivationFailed(rc) => write!(f, "radio activation failed (rc={})", rc),
            Self::RegistrationFailed(rc) => write!(f, "service registration failed (rc={})", rc),
            Self::InvalidHandle => write!(f, "invalid attribute handle"),
            Self::NotConnected => write!(f, "connection not present"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::Timeout => write!(f, "stack request timed out"),
            Self::Platform(rc) => write!(f, "platform error (rc={})", rc),
        }
    }
}

impl core::error::Error for StackError {}
