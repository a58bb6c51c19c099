//! GAP parameters and advertising payload builders.
//!
//! Payloads are AD structure sequences: `[len][type][data...]`, 31 bytes max.
//!
//! ```text
//! adv data:      [02 01 06]                               flags
//! scan response: [len 09 name(<=10)]                       complete local name
//!                [05 12 min_lo min_hi max_lo max_hi]       conn interval range
//!                [02 0A tx_power]                          tx power level
//! ```

use heapless::Vec;

use super::identity::DeviceName;
use crate::config::PeripheralConfig;

pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
pub const AD_TYPE_TX_POWER: u8 = 0x0A;
pub const AD_TYPE_CONN_INTERVAL_RANGE: u8 = 0x12;

pub const FLAG_GENERAL_DISCOVERABLE: u8 = 0x02;
pub const FLAG_BREDR_NOT_SUPPORTED: u8 = 0x04;

/// Legacy advertising payload limit.
pub const MAX_ADV_LEN: usize = 31;
/// Name bytes carried in the scan response.
pub const MAX_SCAN_NAME_LEN: usize = 10;

pub type AdvPayload = Vec<u8, MAX_ADV_LEN>;

/// Connection parameters we ask the central for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParamRequest {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

impl ConnParamRequest {
    pub fn from_config(config: &PeripheralConfig) -> Self {
        Self {
            interval_min: config.conn_interval_min,
            interval_max: config.conn_interval_max,
            latency: config.slave_latency,
            timeout: config.supervision_timeout,
        }
    }
}

/// Everything the engine needs to bring up the peripheral role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapParameters {
    pub device_name: DeviceName,
    pub adv_data: AdvPayload,
    pub scan_response: AdvPayload,
    pub adv_interval_min: u16,
    pub adv_interval_max: u16,
    pub preferred: ConnParamRequest,
}

impl GapParameters {
    pub fn from_config(config: &PeripheralConfig, device_name: &DeviceName) -> Self {
        Self {
            device_name: device_name.clone(),
            adv_data: build_adv_data(),
            scan_response: build_scan_response(device_name, config),
            adv_interval_min: config.adv_interval_min,
            adv_interval_max: config.adv_interval_max,
            preferred: ConnParamRequest::from_config(config),
        }
    }
}

/// Flags only: general discoverable, BR/EDR not supported.
pub fn build_adv_data() -> AdvPayload {
    let mut ad = AdvPayload::new();
    push_ad(
        &mut ad,
        AD_TYPE_FLAGS,
        &[FLAG_GENERAL_DISCOVERABLE | FLAG_BREDR_NOT_SUPPORTED],
    );
    ad
}

/// Name (first 10 bytes), preferred interval range and TX power.
pub fn build_scan_response(name: &str, config: &PeripheralConfig) -> AdvPayload {
    let mut ad = AdvPayload::new();
    let name = &name.as_bytes()[..name.len().min(MAX_SCAN_NAME_LEN)];
    push_ad(&mut ad, AD_TYPE_COMPLETE_NAME, name);

    let [min_lo, min_hi] = config.conn_interval_min.to_le_bytes();
    let [max_lo, max_hi] = config.conn_interval_max.to_le_bytes();
    push_ad(
        &mut ad,
        AD_TYPE_CONN_INTERVAL_RANGE,
        &[min_lo, min_hi, max_lo, max_hi],
    );
    push_ad(&mut ad, AD_TYPE_TX_POWER, &[config.tx_power_dbm as u8]);
    ad
}

/// Append one AD structure.  Returns `false` (payload untouched) if it
/// would not fit.
fn push_ad(ad: &mut AdvPayload, ty: u8, data: &[u8]) -> bool {
    if ad.len() + 2 + data.len() > MAX_ADV_LEN {
        return false;
    }
    let _ = ad.push(data.len() as u8 + 1);
    let _ = ad.push(ty);
    ad.extend_from_slice(data).is_ok()
}

/// Data of the first AD structure of type `ty`.
pub fn find_ad(ad: &[u8], ty: u8) -> Option<&[u8]> {
    let mut i = 0usize;
    while i < ad.len() {
        let len = ad[i] as usize;
        i += 1;
        if len == 0 {
            continue;
        }
        if i + len > ad.len() {
            break;
        }
        if ad[i] == ty {
            return Some(&ad[i + 1..i + len]);
        }
        i += len;
    }
    None
}
