/*
 * PCAT Manager - PMU Serial Protocol
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Raw TTY link, wire framing, command ids, and the protocol engine that
//! ties them together.

pub mod commands;
pub mod engine;
pub mod frame;
pub mod link;

pub use engine::{EngineCommand, EngineHandle, SerialEngine};
pub use frame::Frame;
