/*
 * PCAT Manager - Configuration
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Static and user (persisted) configuration, loaded from key-file format
//! text files.

pub mod static_config;
pub mod user_config;

pub use static_config::{GpioDescriptor, StaticConfig};
pub use user_config::{ModemDialConfig, PowerScheduleEntry, UserConfig};
