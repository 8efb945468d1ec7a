//! In-memory wireless stack for host builds.
//!
//! Implements [`BleStack`] with an attribute table, a set of radio-level
//! links and a journal of every primitive called, so tests can assert on
//! exactly what the server asked the radio to do.  Test drivers play the
//! central side through [`SimStack::connect`], [`SimStack::disconnect`],
//! [`SimStack::peer_write`] and friends; the resulting events are
//! delivered synchronously through the registered callback.
//!
//! Like a real controller, establishing a connection stops connectable
//! advertising until it is re-armed.
//!
//! Handle layout mimics Bluedroid: the service declaration takes one
//! handle, each characteristic a declaration plus a value handle, and
//! characteristics with notify or indicate one more for the CCCD.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::app::ports::{
    AttrHandle, AttrValue, BleStack, ConnHandle, EventCallback, MAX_ATTR_LEN, RegisteredHandles,
    StackError,
};
use crate::gatt::advertising::MAX_ADV_LEN;
use crate::gatt::events::StackEvent;
use crate::gatt::service::{CharFlags, ServiceDefinition};

/// First handle handed out, matching the ESP-IDF default GATT table.
const FIRST_HANDLE: u16 = 0x0028;

/// One primitive invocation, recorded whether it succeeded or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    Activate(bool),
    RegisterService { uuid: u16 },
    Write { attr: AttrHandle, value: Vec<u8> },
    Read { attr: AttrHandle },
    Notify { conn: ConnHandle, attr: AttrHandle },
    Indicate { conn: ConnHandle, attr: AttrHandle },
    Advertise { interval_us: u32, payload: Vec<u8> },
}

/// Failures to inject into the next matching primitive(s).
#[derive(Debug, Default, Clone)]
struct Faults {
    activate: Option<i32>,
    register: Option<i32>,
    /// Return one handle fewer than declared.
    short_registration: bool,
    advertise: Option<StackError>,
    write: Option<StackError>,
    read: Option<StackError>,
}

#[derive(Debug, Default)]
struct SimState {
    active: bool,
    next_handle: u16,
    attrs: BTreeMap<AttrHandle, Vec<u8>>,
    links: BTreeSet<ConnHandle>,
    advertising: Option<(u32, Vec<u8>)>,
    journal: Vec<StackCall>,
    faults: Faults,
}

type SharedCallback = Arc<dyn Fn(StackEvent) + Send + Sync>;

#[derive(Default)]
pub struct SimStack {
    state: Mutex<SimState>,
    callback: Mutex<Option<SharedCallback>>,
}

impl SimStack {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Central-side drivers ──────────────────────────────────

    /// A central connects; advertising stops and `Connect` is delivered.
    pub fn connect(&self, conn: ConnHandle) {
        {
            let mut st = self.state();
            st.links.insert(conn);
            st.advertising = None;
        }
        info!("BLE(sim): {} connected", conn);
        self.deliver(StackEvent::Connect { conn });
    }

    /// A central disconnects; `Disconnect` is delivered.
    pub fn disconnect(&self, conn: ConnHandle) {
        self.state().links.remove(&conn);
        info!("BLE(sim): {} disconnected", conn);
        self.deliver(StackEvent::Disconnect { conn });
    }

    /// The link vanishes without the event reaching the server yet.
    pub fn drop_link(&self, conn: ConnHandle) {
        self.state().links.remove(&conn);
        debug!("BLE(sim): {} dropped silently", conn);
    }

    /// Deliver a raw `(code, payload)` pair through the boundary decoder.
    pub fn fire_raw(&self, code: u16, payload: &[u16]) {
        self.deliver(StackEvent::from_raw(code, payload));
    }

    /// A central writes `value` to `attr` (not journaled: it is not a
    /// call made by the server).
    pub fn peer_write(&self, attr: AttrHandle, value: &[u8]) -> Result<(), StackError> {
        let mut st = self.state();
        let slot = st.attrs.get_mut(&attr).ok_or(StackError::InvalidHandle)?;
        slot.clear();
        slot.extend_from_slice(value);
        Ok(())
    }

    // ── Fault injection ───────────────────────────────────────

    pub fn fail_activate(&self, rc: i32) {
        self.state().faults.activate = Some(rc);
    }

    pub fn fail_register(&self, rc: i32) {
        self.state().faults.register = Some(rc);
    }

    pub fn short_registration(&self) {
        self.state().faults.short_registration = true;
    }

    /// Every subsequent advertise fails with `err` until cleared with `None`.
    pub fn fail_advertise(&self, err: Option<StackError>) {
        self.state().faults.advertise = err;
    }

    pub fn fail_writes(&self, err: Option<StackError>) {
        self.state().faults.write = err;
    }

    pub fn fail_reads(&self, err: Option<StackError>) {
        self.state().faults.read = err;
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn calls(&self) -> Vec<StackCall> {
        self.state().journal.clone()
    }

    pub fn clear_calls(&self) {
        self.state().journal.clear();
    }

    pub fn notify_calls(&self) -> Vec<(ConnHandle, AttrHandle)> {
        self.state()
            .journal
            .iter()
            .filter_map(|c| match c {
                StackCall::Notify { conn, attr } => Some((*conn, *attr)),
                _ => None,
            })
            .collect()
    }

    pub fn indicate_calls(&self) -> Vec<(ConnHandle, AttrHandle)> {
        self.state()
            .journal
            .iter()
            .filter_map(|c| match c {
                StackCall::Indicate { conn, attr } => Some((*conn, *attr)),
                _ => None,
            })
            .collect()
    }

    pub fn advertise_count(&self) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|c| matches!(c, StackCall::Advertise { .. }))
            .count()
    }

    /// Current local value of `attr` without journaling a read.
    pub fn value(&self, attr: AttrHandle) -> Option<Vec<u8>> {
        self.state().attrs.get(&attr).cloned()
    }

    /// `(interval_us, payload)` while advertising.
    pub fn advertising(&self) -> Option<(u32, Vec<u8>)> {
        self.state().advertising.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn has_callback(&self) -> bool {
        self.lock_callback().is_some()
    }

    // ── Internals ─────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_callback(&self) -> MutexGuard<'_, Option<SharedCallback>> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke the callback with no lock held; it may re-enter the stack.
    fn deliver(&self, event: StackEvent) {
        let callback = self.lock_callback().clone();
        match callback {
            Some(cb) => cb(event),
            None => debug!("BLE(sim): no callback for {:?}", event),
        }
    }

    fn record(st: &mut SimState, call: StackCall) {
        st.journal.push(call);
    }

    fn push_check(st: &SimState, conn: ConnHandle, attr: AttrHandle) -> Result<(), StackError> {
        if !st.active {
            return Err(StackError::NotActive);
        }
        if !st.attrs.contains_key(&attr) {
            return Err(StackError::InvalidHandle);
        }
        if !st.links.contains(&conn) {
            return Err(StackError::NotConnected);
        }
        Ok(())
    }
}

impl BleStack for SimStack {
    fn activate(&self, on: bool) -> Result<(), StackError> {
        let mut st = self.state();
        Self::record(&mut st, StackCall::Activate(on));
        if on {
            if let Some(rc) = st.faults.activate.take() {
                return Err(StackError::ActivationFailed(rc));
            }
        } else {
            st.links.clear();
            st.advertising = None;
        }
        st.active = on;
        info!("BLE(sim): radio {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn register_callback(&self, callback: EventCallback) -> Result<(), StackError> {
        *self.lock_callback() = Some(Arc::from(callback));
        Ok(())
    }

    fn register_service(
        &self,
        service: &ServiceDefinition,
    ) -> Result<RegisteredHandles, StackError> {
        let mut st = self.state();
        Self::record(
            &mut st,
            StackCall::RegisterService {
                uuid: service.uuid,
            },
        );
        if !st.active {
            return Err(StackError::NotActive);
        }
        if let Some(rc) = st.faults.register.take() {
            return Err(StackError::RegistrationFailed(rc));
        }

        if st.next_handle == 0 {
            st.next_handle = FIRST_HANDLE;
        }
        // Service declaration.
        st.next_handle += 1;

        let mut handles = RegisteredHandles::new();
        for def in service.characteristics {
            let value = AttrHandle(st.next_handle + 1);
            st.next_handle += 2;
            if def.flags.contains(CharFlags::NOTIFY) || def.flags.contains(CharFlags::INDICATE) {
                st.next_handle += 1;
            }
            st.attrs.insert(value, Vec::new());
            handles
                .push(value)
                .map_err(|_| StackError::RegistrationFailed(-1))?;
        }
        if st.faults.short_registration {
            handles.pop();
        }
        info!(
            "BLE(sim): service 0x{:04x} registered ({} characteristics)",
            service.uuid,
            handles.len()
        );
        Ok(handles)
    }

    fn write_characteristic(&self, handle: AttrHandle, value: &[u8]) -> Result<(), StackError> {
        let mut st = self.state();
        Self::record(
            &mut st,
            StackCall::Write {
                attr: handle,
                value: value.to_vec(),
            },
        );
        if let Some(e) = st.faults.write {
            return Err(e);
        }
        if value.len() > MAX_ATTR_LEN {
            return Err(StackError::PayloadTooLarge);
        }
        let slot = st.attrs.get_mut(&handle).ok_or(StackError::InvalidHandle)?;
        slot.clear();
        slot.extend_from_slice(value);
        Ok(())
    }

    fn read_characteristic(&self, handle: AttrHandle) -> Result<AttrValue, StackError> {
        let mut st = self.state();
        Self::record(&mut st, StackCall::Read { attr: handle });
        if let Some(e) = st.faults.read {
            return Err(e);
        }
        let value = st.attrs.get(&handle).ok_or(StackError::InvalidHandle)?;
        AttrValue::from_slice(value).map_err(|()| StackError::PayloadTooLarge)
    }

    fn notify(&self, conn: ConnHandle, handle: AttrHandle) -> Result<(), StackError> {
        let mut st = self.state();
        Self::record(&mut st, StackCall::Notify { conn, attr: handle });
        Self::push_check(&st, conn, handle)
    }

    fn indicate(&self, conn: ConnHandle, handle: AttrHandle) -> Result<(), StackError> {
        let mut st = self.state();
        Self::record(&mut st, StackCall::Indicate { conn, attr: handle });
        Self::push_check(&st, conn, handle)
    }

    fn advertise(&self, interval_us: u32, payload: &[u8]) -> Result<(), StackError> {
        let mut st = self.state();
        Self::record(
            &mut st,
            StackCall::Advertise {
                interval_us,
                payload: payload.to_vec(),
            },
        );
        if !st.active {
            return Err(StackError::NotActive);
        }
        if let Some(e) = st.faults.advertise {
            st.advertising = None;
            return Err(e);
        }
        if payload.len() > MAX_ADV_LEN {
            return Err(StackError::PayloadTooLarge);
        }
        // Re-arming replaces the running advertisement.
        st.advertising = Some((interval_us, payload.to_vec()));
        Ok(())
    }
}
