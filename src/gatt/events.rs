//! Stack events, decoded once at the adapter boundary.
//!
//! The radio hands the adapter an integer event code plus a tuple of
//! integers.  [`StackEvent::from_raw`] turns that pair into a closed enum
//! so the server dispatches with an exhaustive `match` instead of
//! comparing magic numbers.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::app::ports::{AttrHandle, ConnHandle};
use crate::gatt::connections::MAX_CONNECTIONS;

/// Central connected.  Payload: `(conn_handle, addr_type, addr...)`.
pub const IRQ_CENTRAL_CONNECT: u16 = 1;
/// Central disconnected.  Payload: `(conn_handle, addr_type, addr...)`.
pub const IRQ_CENTRAL_DISCONNECT: u16 = 2;
/// Indication delivered.  Payload: `(conn_handle, value_handle, status)`.
pub const IRQ_GATTS_INDICATE_DONE: u16 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Connect { conn: ConnHandle },
    Disconnect { conn: ConnHandle },
    IndicateDone {
        conn: ConnHandle,
        attr: AttrHandle,
        status: u8,
    },
    /// Anything the server does not act on, carrying the raw code.
    Other(u16),
}

impl StackEvent {
    /// Decode a raw `(code, payload)` pair.
    ///
    /// A known code with a payload too short to carry its fields decodes
    /// to [`StackEvent::Other`]; decoding never fails.
    pub fn from_raw(code: u16, payload: &[u16]) -> Self {
        match (code, payload) {
            (IRQ_CENTRAL_CONNECT, [conn, ..]) => Self::Connect {
                conn: ConnHandle(*conn),
            },
            (IRQ_CENTRAL_DISCONNECT, [conn, ..]) => Self::Disconnect {
                conn: ConnHandle(*conn),
            },
            (IRQ_GATTS_INDICATE_DONE, [conn, attr, status, ..]) => Self::IndicateDone {
                conn: ConnHandle(*conn),
                attr: AttrHandle(*attr),
                // Status codes are one byte on every stack we target.
                status: (*status & 0xFF) as u8,
            },
            _ => Self::Other(code),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Indication bookkeeping
// ───────────────────────────────────────────────────────────────

/// Indications sent and not yet confirmed, per connection.
///
/// Some stacks report a completed notification with the same event as an
/// indication confirmation.  Only confirmations matched against this
/// ledger are treated as [`StackEvent::IndicateDone`].  A disconnect
/// drops the link's entry, so its late or missing confirmations never
/// leak onto other traffic.
#[derive(Debug)]
pub struct PendingIndications {
    slots: Mutex<heapless::Vec<(ConnHandle, u32), MAX_CONNECTIONS>>,
}

impl PendingIndications {
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(heapless::Vec::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, heapless::Vec<(ConnHandle, u32), MAX_CONNECTIONS>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one indication to `conn`.  Returns `false` if the ledger
    /// has no room for another link.
    pub fn sent(&self, conn: ConnHandle) -> bool {
        let mut slots = self.slots();
        if let Some((_, n)) = slots.iter_mut().find(|(c, _)| *c == conn) {
            *n = n.saturating_add(1);
            return true;
        }
        slots.push((conn, 1)).is_ok()
    }

    /// Consume one outstanding indication for `conn`.  `false` means the
    /// confirmation belongs to something else (e.g. a notification).
    pub fn confirm(&self, conn: ConnHandle) -> bool {
        let mut slots = self.slots();
        let Some(i) = slots.iter().position(|(c, _)| *c == conn) else {
            return false;
        };
        slots[i].1 -= 1;
        if slots[i].1 == 0 {
            slots.swap_remove(i);
        }
        true
    }

    /// Drop everything outstanding on `conn`, returning how many were lost.
    pub fn forget(&self, conn: ConnHandle) -> u32 {
        let mut slots = self.slots();
        match slots.iter().position(|(c, _)| *c == conn) {
            Some(i) => slots.swap_remove(i).1,
            None => 0,
        }
    }

    pub fn outstanding(&self, conn: ConnHandle) -> u32 {
        self.slots()
            .iter()
            .find(|(c, _)| *c == conn)
            .map_or(0, |(_, n)| *n)
    }
}

impl Default for PendingIndications {
    fn default() -> Self {
        Self::new()
    }
}
