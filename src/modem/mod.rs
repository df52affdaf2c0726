/*
 * PCAT Manager - Modem Manager
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Cellular modem lifecycle: GPIO power sequencing, USB detection, and the
//! dial-helper subprocess.

pub mod gpio;
pub mod helper;
pub mod manager;
pub mod usb;

pub use manager::{spawn, ModemHandle};
