//! Set of live connection handles.
//!
//! A handle is present iff its connect has been seen and its disconnect
//! has not.  Insertion is idempotent and removal of an absent handle is a
//! no-op, so duplicate or out-of-order stack events never surface as
//! errors.

use heapless::FnvIndexSet;

use crate::app::ports::ConnHandle;

/// Concurrent LE links the ESP32 controller can hold
/// (`CONFIG_BTDM_CTRL_BLE_MAX_CONN` tops out at 9).
pub const CONTROLLER_MAX_LINKS: usize = 9;

/// Most simultaneous links the server tracks.  Must be a power of two.
pub const MAX_CONNECTIONS: usize = 16;

const _: () = assert!(MAX_CONNECTIONS.is_power_of_two() && MAX_CONNECTIONS >= CONTROLLER_MAX_LINKS);

pub type ConnSnapshot = heapless::Vec<ConnHandle, MAX_CONNECTIONS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    AlreadyPresent,
    /// The set is at capacity; the handle was not recorded.
    Full,
}

#[derive(Debug, Default)]
pub struct ConnectionSet {
    handles: FnvIndexSet<ConnHandle, MAX_CONNECTIONS>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conn: ConnHandle) -> InsertOutcome {
        match self.handles.insert(conn) {
            Ok(true) => InsertOutcome::Added,
            Ok(false) => InsertOutcome::AlreadyPresent,
            Err(_) => InsertOutcome::Full,
        }
    }

    /// Returns `true` if the handle was present.
    pub fn remove(&mut self, conn: ConnHandle) -> bool {
        self.handles.remove(&conn)
    }

    pub fn contains(&self, conn: ConnHandle) -> bool {
        self.handles.contains(&conn)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Copy of the current handles, for iterating without holding a lock.
    pub fn snapshot(&self) -> ConnSnapshot {
        self.handles.iter().copied().collect()
    }
}
