//! Bluedroid implementation of [`BleStack`] for ESP-IDF targets.
//!
//! Bluedroid callbacks are C function pointers that cannot capture Rust
//! closures, so the adapter bridges them through statics: registration
//! results travel back to the calling task through a `Mutex` + `Condvar`
//! pair, and stack events are decoded into [`StackEvent`] and handed to
//! the registered callback from the Bluedroid task.
//!
//! ## Attribute table
//!
//! Services are created in one shot with `esp_ble_gatts_create_attr_tab`
//! and automatic responses, so peer reads and writes hit the GATT database
//! directly and [`BleStack::read_characteristic`] sees peer writes.
//!
//! ## Blocking
//!
//! Only [`BleStack::activate`] and [`BleStack::register_service`] wait for
//! a completion event, and both run on the boot task.  Everything the
//! event callback can reach (advertising in particular) is
//! fire-and-forget: blocking there would wait on the very task that has
//! to deliver the completion.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use esp_idf_svc::sys::*;
use log::{debug, error, info, warn};

use crate::app::ports::{
    AttrHandle, AttrValue, BleStack, ConnHandle, EventCallback, MAX_ATTR_LEN, RegisteredHandles,
    StackError,
};
use crate::gatt::advertising::AdvPayload;
use crate::gatt::events::{
    IRQ_CENTRAL_CONNECT, IRQ_CENTRAL_DISCONNECT, IRQ_GATTS_INDICATE_DONE, PendingIndications,
    StackEvent,
};
use crate::gatt::service::{CharFlags, ServiceDefinition};

const APP_ID: u16 = 0x55;
const GATTS_IF_NONE: u32 = 0xFF;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest table: service + 3 attributes per characteristic.
const MAX_TABLE_ATTRS: usize = 1 + 3 * crate::gatt::service::MAX_CHARACTERISTICS;

/// Advertising interval unit (0.625 ms) and the controller's legal range.
const ADV_UNIT_US: u32 = 625;
const ADV_INT_MIN: u32 = 0x0020;
const ADV_INT_MAX: u32 = 0x4000;

// ── Static bridge state ───────────────────────────────────────

type SharedCallback = Arc<dyn Fn(StackEvent) + Send + Sync>;

struct Completion {
    app_registered: Option<Result<(), i32>>,
    table: Option<Result<heapless::Vec<u16, MAX_TABLE_ATTRS>, i32>>,
}

static COMPLETION: Mutex<Completion> = Mutex::new(Completion {
    app_registered: None,
    table: None,
});
static COMPLETION_CV: Condvar = Condvar::new();

static CALLBACK: Mutex<Option<SharedCallback>> = Mutex::new(None);

static GATTS_IF: AtomicU32 = AtomicU32::new(GATTS_IF_NONE);
/// Advertising interval in 0.625 ms units, applied when raw data is set.
static ADV_INTERVAL: AtomicU32 = AtomicU32::new(0x0320);
/// CONF_EVT also reports completed notifications; only confirmations
/// matched here count as indicate acks.
static PENDING_INDICATIONS: PendingIndications = PendingIndications::new();

fn completion() -> MutexGuard<'static, Completion> {
    COMPLETION.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch(event: StackEvent) {
    let callback = CALLBACK
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(cb) = callback {
        cb(event);
    }
}

fn check(ret: esp_err_t, map: fn(i32) -> StackError) -> Result<(), StackError> {
    if ret == ESP_OK as i32 { Ok(()) } else { Err(map(ret)) }
}

fn adv_units(interval_us: u32) -> u32 {
    (interval_us / ADV_UNIT_US).clamp(ADV_INT_MIN, ADV_INT_MAX)
}

// ── C callbacks ───────────────────────────────────────────────

unsafe extern "C" fn gap_event_handler(
    event: esp_gap_ble_cb_event_t,
    param: *mut esp_ble_gap_cb_param_t,
) {
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_RAW_SET_COMPLETE_EVT => {
            let units = ADV_INTERVAL.load(Ordering::Relaxed) as u16;
            let mut adv_params = esp_ble_adv_params_t {
                adv_int_min: units,
                adv_int_max: units,
                adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
                own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
                channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
                adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
                ..unsafe { core::mem::zeroed() }
            };
            let ret = unsafe { esp_ble_gap_start_advertising(&mut adv_params) };
            if ret != ESP_OK as i32 {
                error!("BLE GAP: start advertising failed ({})", ret);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let status = unsafe { (*param).adv_start_cmpl.status };
            if status == esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                debug!("BLE GAP: advertising started");
            } else {
                warn!("BLE GAP: advertising start status {}", status);
            }
        }
        _ => {}
    }
}

unsafe extern "C" fn gatts_event_handler(
    event: esp_gatts_cb_event_t,
    gatts_if: esp_gatt_if_t,
    param: *mut esp_ble_gatts_cb_param_t,
) {
    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            let p = unsafe { &(*param).reg };
            let result = if p.status == esp_gatt_status_t_ESP_GATT_OK {
                GATTS_IF.store(u32::from(gatts_if), Ordering::Release);
                Ok(())
            } else {
                Err(p.status as i32)
            };
            completion().app_registered = Some(result);
            COMPLETION_CV.notify_all();
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREAT_ATTR_TAB_EVT => {
            let p = unsafe { &(*param).add_attr_tab };
            let result = if p.status == esp_gatt_status_t_ESP_GATT_OK && !p.handles.is_null() {
                let raw = unsafe { core::slice::from_raw_parts(p.handles, p.num_handle as usize) };
                heapless::Vec::from_slice(raw).map_err(|()| -1)
            } else {
                Err(p.status as i32)
            };
            completion().table = Some(result);
            COMPLETION_CV.notify_all();
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &(*param).connect };
            dispatch(StackEvent::from_raw(
                IRQ_CENTRAL_CONNECT,
                &[p.conn_id, u16::from(p.ble_addr_type as u8)],
            ));
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let p = unsafe { &(*param).disconnect };
            debug!("BLE GATTS: conn {} reason 0x{:x}", p.conn_id, p.reason);
            let lost = PENDING_INDICATIONS.forget(ConnHandle(p.conn_id));
            if lost > 0 {
                debug!("BLE GATTS: conn {} dropped {} unconfirmed indications", p.conn_id, lost);
            }
            dispatch(StackEvent::from_raw(IRQ_CENTRAL_DISCONNECT, &[p.conn_id]));
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
            let p = unsafe { &(*param).conf };
            if PENDING_INDICATIONS.confirm(ConnHandle(p.conn_id)) {
                dispatch(StackEvent::from_raw(
                    IRQ_GATTS_INDICATE_DONE,
                    &[p.conn_id, p.handle, p.status as u16],
                ));
            }
        }
        other => debug!("BLE GATTS: event {}", other),
    }
}

// ── Attribute table construction ──────────────────────────────

/// Backing storage for one attribute table.  Bluedroid keeps the raw
/// pointers until `CREAT_ATTR_TAB_EVT`, so this must outlive the wait.
struct TableStorage {
    uuids: heapless::Vec<[u8; 2], MAX_TABLE_ATTRS>,
    values: heapless::Vec<[u8; MAX_ATTR_LEN], MAX_TABLE_ATTRS>,
    /// `(storage index, perm, max_len, len)` per attribute.
    attrs: heapless::Vec<(usize, u16, u16, u16), MAX_TABLE_ATTRS>,
}

impl TableStorage {
    fn build(service: &ServiceDefinition) -> Result<Self, StackError> {
        let mut t = Self {
            uuids: heapless::Vec::new(),
            values: heapless::Vec::new(),
            attrs: heapless::Vec::new(),
        };
        let read = ESP_GATT_PERM_READ as u16;
        let write = ESP_GATT_PERM_WRITE as u16;

        t.push(ESP_GATT_UUID_PRI_SERVICE as u16, read, &service.uuid.to_le_bytes(), 2)?;
        for def in service.characteristics {
            t.push(ESP_GATT_UUID_CHAR_DECLARE as u16, read, &[def.flags.bits()], 1)?;

            let mut perm = 0;
            if def.flags.contains(CharFlags::READ) {
                perm |= read;
            }
            if def.flags.contains(CharFlags::WRITE) {
                perm |= write;
            }
            t.push(def.uuid, perm, &[0; 4], MAX_ATTR_LEN as u16)?;

            if def.flags.contains(CharFlags::NOTIFY) || def.flags.contains(CharFlags::INDICATE) {
                t.push(ESP_GATT_UUID_CHAR_CLIENT_CONFIG as u16, read | write, &[0, 0], 2)?;
            }
        }
        Ok(t)
    }

    fn push(&mut self, uuid: u16, perm: u16, initial: &[u8], max_len: u16) -> Result<(), StackError> {
        const FULL: StackError = StackError::RegistrationFailed(-1);
        let mut value = [0u8; MAX_ATTR_LEN];
        value[..initial.len()].copy_from_slice(initial);
        let idx = self.uuids.len();
        self.uuids.push(uuid.to_le_bytes()).map_err(|_| FULL)?;
        self.values.push(value).map_err(|_| FULL)?;
        self.attrs
            .push((idx, perm, max_len, initial.len() as u16))
            .map_err(|_| FULL)
    }

    fn descriptors(&mut self) -> heapless::Vec<esp_gatts_attr_db_t, MAX_TABLE_ATTRS> {
        let mut db = heapless::Vec::new();
        for &(idx, perm, max_length, length) in &self.attrs {
            let entry = esp_gatts_attr_db_t {
                attr_control: esp_attr_control_t {
                    auto_rsp: ESP_GATT_AUTO_RSP as u8,
                },
                att_desc: esp_attr_desc_t {
                    uuid_length: ESP_UUID_LEN_16 as u16,
                    uuid_p: self.uuids[idx].as_mut_ptr(),
                    perm,
                    max_length,
                    length,
                    value: self.values[idx].as_mut_ptr(),
                },
            };
            // Capacity equals attrs capacity.
            let _ = db.push(entry);
        }
        db
    }
}

// ── Adapter ───────────────────────────────────────────────────

pub struct BluedroidStack {
    _private: (),
}

impl BluedroidStack {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn gatts_if() -> Result<esp_gatt_if_t, StackError> {
        match GATTS_IF.load(Ordering::Acquire) {
            GATTS_IF_NONE => Err(StackError::NotActive),
            gatts_if => Ok(gatts_if as esp_gatt_if_t),
        }
    }

    fn send(&self, conn: ConnHandle, handle: AttrHandle, confirm: bool) -> Result<(), StackError> {
        let gatts_if = Self::gatts_if()?;
        let mut value = self.read_characteristic(handle)?;
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                gatts_if,
                conn.0,
                handle.0,
                value.len() as u16,
                value.as_mut_ptr(),
                confirm,
            )
        };
        check(ret, StackError::Platform)
    }

    fn start_controller() -> Result<(), StackError> {
        unsafe {
            // BLE only; returns the classic BT memory to the heap.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg), StackError::ActivationFailed)?;
            check(
                esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
                StackError::ActivationFailed,
            )?;
            check(esp_bluedroid_init(), StackError::ActivationFailed)?;
            check(esp_bluedroid_enable(), StackError::ActivationFailed)?;
            check(
                esp_ble_gap_register_callback(Some(gap_event_handler)),
                StackError::ActivationFailed,
            )?;
            check(
                esp_ble_gatts_register_callback(Some(gatts_event_handler)),
                StackError::ActivationFailed,
            )?;

            completion().app_registered = None;
            check(esp_ble_gatts_app_register(APP_ID), StackError::ActivationFailed)?;
        }

        let guard = completion();
        let (mut guard, timeout) = COMPLETION_CV
            .wait_timeout_while(guard, COMPLETION_TIMEOUT, |c| c.app_registered.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() {
            return Err(StackError::Timeout);
        }
        match guard.app_registered.take() {
            Some(Ok(())) => Ok(()),
            Some(Err(status)) => Err(StackError::ActivationFailed(status)),
            None => Err(StackError::Timeout),
        }
    }

    fn stop_controller() {
        unsafe {
            esp_ble_gap_stop_advertising();
            esp_bluedroid_disable();
            esp_bluedroid_deinit();
            esp_bt_controller_disable();
            esp_bt_controller_deinit();
        }
        GATTS_IF.store(GATTS_IF_NONE, Ordering::Release);
        info!("BLE(espidf): stack shut down");
    }
}

impl Default for BluedroidStack {
    fn default() -> Self {
        Self::new()
    }
}

impl BleStack for BluedroidStack {
    fn activate(&self, on: bool) -> Result<(), StackError> {
        if !on {
            Self::stop_controller();
            return Ok(());
        }
        Self::start_controller()?;
        info!("BLE(espidf): Bluedroid up (gatts_if={})", GATTS_IF.load(Ordering::Relaxed));
        Ok(())
    }

    fn register_callback(&self, callback: EventCallback) -> Result<(), StackError> {
        *CALLBACK.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(callback));
        Ok(())
    }

    fn register_service(
        &self,
        service: &ServiceDefinition,
    ) -> Result<RegisteredHandles, StackError> {
        let gatts_if = Self::gatts_if()?;
        let mut storage = TableStorage::build(service)?;
        let db = storage.descriptors();

        completion().table = None;
        let ret = unsafe { esp_ble_gatts_create_attr_tab(db.as_ptr(), gatts_if, db.len() as _, 0) };
        check(ret, StackError::RegistrationFailed)?;

        let guard = completion();
        let (mut guard, timeout) = COMPLETION_CV
            .wait_timeout_while(guard, COMPLETION_TIMEOUT, |c| c.table.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() {
            return Err(StackError::Timeout);
        }
        let table = match guard.table.take() {
            Some(Ok(table)) => table,
            Some(Err(status)) => return Err(StackError::RegistrationFailed(status)),
            None => return Err(StackError::Timeout),
        };
        drop(guard);
        // The storage backing `db` may go now the table exists.
        drop(storage);

        if table.len() != db.len() {
            return Err(StackError::RegistrationFailed(table.len() as i32));
        }
        check(
            unsafe { esp_ble_gatts_start_service(table[0]) },
            StackError::RegistrationFailed,
        )?;

        let mut handles = RegisteredHandles::new();
        for idx in &storage_value_indices(service) {
            let _ = handles.push(AttrHandle(table[*idx]));
        }
        info!(
            "BLE(espidf): service 0x{:04x} started ({} attributes)",
            service.uuid,
            table.len()
        );
        Ok(handles)
    }

    fn write_characteristic(&self, handle: AttrHandle, value: &[u8]) -> Result<(), StackError> {
        if value.len() > MAX_ATTR_LEN {
            return Err(StackError::PayloadTooLarge);
        }
        let ret = unsafe { esp_ble_gatts_set_attr_value(handle.0, value.len() as u16, value.as_ptr()) };
        check(ret, StackError::Platform)
    }

    fn read_characteristic(&self, handle: AttrHandle) -> Result<AttrValue, StackError> {
        let mut len: u16 = 0;
        let mut ptr: *const u8 = core::ptr::null();
        let status = unsafe { esp_ble_gatts_get_attr_value(handle.0, &mut len, &mut ptr) };
        if status != esp_gatt_status_t_ESP_GATT_OK || ptr.is_null() {
            return Err(StackError::InvalidHandle);
        }
        let bytes = unsafe { core::slice::from_raw_parts(ptr, len as usize) };
        AttrValue::from_slice(bytes).map_err(|()| StackError::PayloadTooLarge)
    }

    fn notify(&self, conn: ConnHandle, handle: AttrHandle) -> Result<(), StackError> {
        self.send(conn, handle, false)
    }

    fn indicate(&self, conn: ConnHandle, handle: AttrHandle) -> Result<(), StackError> {
        // Recorded first: the confirmation can race the return of send.
        if !PENDING_INDICATIONS.sent(conn) {
            warn!("BLE: indication ledger full, ack from {} will not be counted", conn);
        }
        self.send(conn, handle, true).inspect_err(|_| {
            PENDING_INDICATIONS.confirm(conn);
        })
    }

    fn advertise(&self, interval_us: u32, payload: &[u8]) -> Result<(), StackError> {
        Self::gatts_if()?;
        ADV_INTERVAL.store(adv_units(interval_us), Ordering::Relaxed);
        let mut raw = AdvPayload::from_slice(payload).map_err(|()| StackError::PayloadTooLarge)?;
        unsafe {
            // Re-arm: stopping an idle advertiser is harmless.
            esp_ble_gap_stop_advertising();
            // Advertising starts from the RAW_SET_COMPLETE event.
            check(
                esp_ble_gap_config_adv_data_raw(raw.as_mut_ptr(), raw.len() as u32),
                StackError::Platform,
            )
        }
    }
}

/// Table index of every characteristic value, in declaration order.
fn storage_value_indices(service: &ServiceDefinition) -> heapless::Vec<usize, MAX_TABLE_ATTRS> {
    let mut out = heapless::Vec::new();
    let mut idx = 1;
    for def in service.characteristics {
        let _ = out.push(idx + 1);
        idx += 2;
        if def.flags.contains(CharFlags::NOTIFY) || def.flags.contains(CharFlags::INDICATE) {
            idx += 1;
        }
    }
    out
}
