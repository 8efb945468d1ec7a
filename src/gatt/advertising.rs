//! Legacy advertising payload builder.
//!
//! Produces the AD structure sequence broadcast while the peripheral is
//! discoverable: flags, complete local name, complete list of 16-bit
//! service UUIDs and the GAP appearance.  Each structure is
//! `[len, type, data...]` where `len` counts the type byte plus data.
//!
//! The payload is built once at start-up and re-sent verbatim every time
//! advertising is re-armed.

use core::fmt;

/// Legacy advertising PDUs carry at most 31 bytes of AD data.
pub const MAX_ADV_LEN: usize = 31;

pub type AdvPayload = heapless::Vec<u8, MAX_ADV_LEN>;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
const AD_TYPE_NAME_COMPLETE: u8 = 0x09;
const AD_TYPE_APPEARANCE: u8 = 0x19;

const FLAG_LE_GENERAL_DISCOVERABLE: u8 = 0x02;
const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// The fields need `needed` bytes, more than [`MAX_ADV_LEN`].
    TooLong { needed: usize },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { needed } => write!(
                f,
                "advertising payload needs {} bytes (max {})",
                needed, MAX_ADV_LEN
            ),
        }
    }
}

impl core::error::Error for PayloadError {}

/// Build the discovery payload for `name`, `services` and `appearance`.
pub fn advertising_payload(
    name: &str,
    services: &[u16],
    appearance: u16,
) -> Result<AdvPayload, PayloadError> {
    let needed = 3 + field_len(name.len()) + field_len(services.len() * 2) + 4;
    if needed > MAX_ADV_LEN {
        return Err(PayloadError::TooLong { needed });
    }

    let mut payload = AdvPayload::new();
    let mut push = |ad_type: u8, data: &[u8]| {
        // Length was checked above; extend cannot fail.
        let _ = payload.push((data.len() + 1) as u8);
        let _ = payload.push(ad_type);
        let _ = payload.extend_from_slice(data);
    };

    push(
        AD_TYPE_FLAGS,
        &[FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED],
    );
    if !name.is_empty() {
        push(AD_TYPE_NAME_COMPLETE, name.as_bytes());
    }
    if !services.is_empty() {
        let mut uuids: heapless::Vec<u8, MAX_ADV_LEN> = heapless::Vec::new();
        for uuid in services {
            let _ = uuids.extend_from_slice(&uuid.to_le_bytes());
        }
        push(AD_TYPE_UUID16_COMPLETE, &uuids);
    }
    push(AD_TYPE_APPEARANCE, &appearance.to_le_bytes());

    Ok(payload)
}

/// Bytes taken by one optional AD structure carrying `data_len` bytes.
fn field_len(data_len: usize) -> usize {
    if data_len == 0 { 0 } else { data_len + 2 }
}
