/*
 * PCAT Manager - Route Monitor
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Background probes of WAN/mobile interface status and connectivity;
//! derives the current route mode and drives the net-status LED.

pub mod monitor;

pub use monitor::{spawn, RouteMonitorHandle};
