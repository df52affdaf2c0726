/*
 * PCAT Manager - Control Server
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Unix-socket control plane: NUL-delimited JSON request/response, command
//! dispatch table, per-connection buffers.

pub mod commands;
pub mod connection;
pub mod server;

pub use server::{run, Context};
