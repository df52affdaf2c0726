/*
 * PCAT Manager - Serial Link
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

use crate::error::{PcatError, Result};
use log::info;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Opens a raw TTY at the configured baud. `SerialStream`
/// already integrates with the Tokio reactor, giving the engine
/// non-blocking `AsyncRead`/`AsyncWrite` and readiness notifications
/// without a hand-rolled epoll loop.
pub fn open(device_path: &str, baud: u32) -> Result<SerialStream> {
    info!("opening PMU serial link {} at {} baud", device_path, baud);

    let stream = tokio_serial::new(device_path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(PcatError::Serial)?;

    Ok(stream)
}
