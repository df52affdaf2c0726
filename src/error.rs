/*
 * PCAT Manager - Error Handling
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum PcatError {
    /// Serial port open/configure failures.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O errors (TTY, Unix socket, files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame: bad CRC, missing SOF/EOF, oversized length.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Static config failed to load (fatal at startup).
    #[error("static config error: {0}")]
    StaticConfig(String),

    /// User config failed to load (recoverable, defaults used).
    #[error("user config error: {0}")]
    UserConfig(String),

    /// GPIO chip/line acquisition failure.
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// USB enumeration failure.
    #[error("USB error: {0}")]
    Usb(String),

    /// Control-plane JSON parse/dispatch failure.
    #[error("control protocol error: {0}")]
    Control(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for convenience.
pub type Result<T> = std::result::Result<T, PcatError>;
