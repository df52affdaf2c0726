/*
 * PCAT Manager - Control Socket Server
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Accepts control-plane connections on a fixed Unix socket path and
//! dispatches NUL-delimited JSON requests to the command table.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::modem::ModemHandle;
use crate::serial::engine::EngineHandle;
use crate::state::StateStore;

use super::commands;
use super::connection::{ClientConnection, ConnId};

/// Fixed control-socket path.
pub const SOCKET_PATH: &str = "/tmp/pcat-manager.sock";

/// Non-owning references the command handlers need across subsystems,
/// passed as a context struct rather than reached for as globals.
pub struct Context {
    pub state: Arc<StateStore>,
    pub engine: EngineHandle,
    pub modem: ModemHandle,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Removes any stale socket file, binds, and accepts connections until the
/// process exits. Each connection runs on its own task on the same
/// single-threaded reactor as the serial engine.
pub async fn run(ctx: Arc<Context>) -> std::io::Result<()> {
    if Path::new(SOCKET_PATH).exists() {
        std::fs::remove_file(SOCKET_PATH)?;
    }
    let listener = UnixListener::bind(SOCKET_PATH)?;
    info!("control socket listening on {}", SOCKET_PATH);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_connection(stream, id, ctx).await;
        });
    }
}

async fn handle_connection(mut stream: UnixStream, id: ConnId, ctx: Arc<Context>) {
    let mut conn = ClientConnection::new(id);
    let mut read_buf = [0u8; 4096];

    loop {
        let n = match stream.read(&mut read_buf).await {
            Ok(0) => {
                info!("control connection {} closed", id);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("control connection {} read error: {}", id, e);
                break;
            }
        };

        conn.push_input(&read_buf[..n]);
        for message in conn.drain_complete_messages() {
            if let Some(reply) = process_message(&ctx, id, &message) {
                if let Ok(bytes) = serde_json::to_vec(&reply) {
                    conn.push_output(&bytes);
                }
            }
        }

        if conn.has_pending_output() {
            let pending = conn.peek_output(super::connection::BUF_CAP);
            match stream.write_all(&pending).await {
                Ok(()) => conn.consume_output(pending.len()),
                Err(e) => {
                    warn!("control connection {} write error: {}", id, e);
                    break;
                }
            }
        }
    }
}

/// Parses one NUL-delimited request object and runs it through the
/// dispatch table. Unknown commands are logged and ignored.
fn process_message(ctx: &Context, id: ConnId, message: &[u8]) -> Option<Value> {
    let parsed: Value = match serde_json::from_slice(message) {
        Ok(v) => v,
        Err(e) => {
            warn!("control connection {} sent malformed JSON: {}", id, e);
            return None;
        }
    };
    let Some(command) = parsed.get("command").and_then(Value::as_str) else {
        warn!("control connection {} sent an object with no command field", id);
        return None;
    };
    match commands::dispatch(ctx, command, &parsed) {
        Some(reply) => Some(reply),
        None => {
            warn!("control connection {} sent unknown command {:?}", id, command);
            None
        }
    }
}
