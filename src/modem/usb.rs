/*
 * PCAT Manager - Modem USB Detection
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Enumerates USB devices to recognize a supported cellular modem and
//! decide which dial-helper to launch. Vendor/product ids and the helper
//! binary name come from the reference firmware's
//! `g_pcat_modem_manager_supported_5g_list`.

use log::warn;

use crate::error::{PcatError, Result};
use crate::state::ModemDeviceClass;

/// One entry in the supported-device table.
pub struct SupportedDevice {
    pub id_vendor: u16,
    /// 0 means "any product id for this vendor".
    pub id_product: u16,
    pub device_class: ModemDeviceClass,
    pub dial_helper: &'static str,
}

/// Matches `original_source/src/modem-manager.c`'s compiled-in table. The
/// reference's single entry is `device_type=ALL`, which maps to the
/// `general` device class (no class distinction), not `5g`.
pub const SUPPORTED_DEVICES: &[SupportedDevice] = &[SupportedDevice {
    id_vendor: 0x2C7C,
    id_product: 0,
    device_class: ModemDeviceClass::General,
    dial_helper: "quectel-cm",
}];

/// Scan the USB bus once and return the first matching supported device,
/// if any.
pub fn scan() -> Result<Option<&'static SupportedDevice>> {
    let devices = rusb::devices().map_err(|e| PcatError::Usb(e.to_string()))?;
    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                warn!("failed to read USB device descriptor: {}", e);
                continue;
            }
        };
        if let Some(found) = SUPPORTED_DEVICES.iter().find(|entry| {
            entry.id_vendor == desc.vendor_id()
                && (entry.id_product == 0 || entry.id_product == desc.product_id())
        }) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
