/*
 * PCAT Manager - Application Wiring
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Owns `StateStore` and a handle to each subsystem, constructed once at
//! startup and passed down explicitly rather than reached for globally.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{StaticConfig, UserConfig};
use crate::control::{self, Context};
use crate::modem::{self, ModemHandle};
use crate::route;
use crate::serial::engine::{EngineCommand, EngineHandle, SerialEngine, SHUTDOWN_OUTER_BOUND};
use crate::serial::link;
use crate::state::StateStore;

pub const STATIC_CONFIG_PATH: &str = "/etc/pcat-manager.conf";
pub const USER_CONFIG_PATH: &str = "/etc/pcat-manager-userdata.conf";
/// Presence routes SIGTERM to shutdown rather than reboot.
pub const SHUTDOWN_REQUEST_FILE: &str = "/tmp/pcat-shutdown.tmp";

pub struct App {
    pub state: Arc<StateStore>,
    pub engine: EngineHandle,
    pub modem: ModemHandle,
    route_monitor: Option<route::RouteMonitorHandle>,
    watchdog_disabled: bool,
}

impl App {
    /// Loads config and wires up the modem manager and route monitor.
    /// Static config failure is fatal; user config failure logs a warning
    /// and falls back to defaults.
    pub fn init(distro_mode: bool) -> crate::error::Result<(Self, SerialEngine)> {
        let static_config = StaticConfig::load(std::path::Path::new(STATIC_CONFIG_PATH))
            .map_err(crate::error::PcatError::StaticConfig)?;
        let user_config = UserConfig::load(std::path::Path::new(USER_CONFIG_PATH));

        let state = Arc::new(StateStore::new(static_config, user_config));

        let (engine, engine_handle) = SerialEngine::new();

        let (_modem_thread, modem_handle) = modem::spawn(state.clone());

        let route_monitor = route::spawn(state.clone(), distro_mode).map(|(_threads, handle)| handle);
        if distro_mode {
            info!("distro mode: route monitor disabled");
        }

        Ok((
            Self {
                state,
                engine: engine_handle,
                modem: modem_handle,
                route_monitor,
                watchdog_disabled: false,
            },
            engine,
        ))
    }

    pub fn control_context(&self) -> Arc<Context> {
        Arc::new(Context {
            state: self.state.clone(),
            engine: self.engine.clone(),
            modem: self.modem.clone(),
        })
    }

    /// Opens the configured serial device. Failure here is fatal to the
    /// PMU engine specifically; other subsystems keep running.
    pub async fn open_serial(&self) -> crate::error::Result<tokio_serial::SerialStream> {
        let cfg = &self.state.static_config;
        let baud = cfg.effective_baud();
        link::open(&cfg.serial_device, baud)
    }

    /// SIGTERM routing: shutdown if the sentinel file exists or shutdown
    /// was already requested in-process; else reboot; unless the watchdog
    /// was externally disabled via SIGUSR1, in which case just exit.
    pub fn handle_sigterm(&self) {
        let sentinel_present = std::path::Path::new(SHUTDOWN_REQUEST_FILE).is_file();
        if sentinel_present || self.engine.shutdown_requested() {
            info!("SIGTERM: routing to shutdown (sentinel or prior in-process request)");
            self.engine.send(EngineCommand::RequestShutdown);
        } else if !self.watchdog_disabled {
            info!("SIGTERM: requesting reboot");
            self.engine.send(EngineCommand::RequestReboot);
        } else {
            info!("SIGTERM: watchdog disabled, exiting directly");
            std::process::exit(0);
        }
    }

    pub fn handle_sigusr1(&mut self) {
        warn!("SIGUSR1: permanently disabling PMU watchdog");
        self.watchdog_disabled = true;
        self.engine.send(EngineCommand::DisableWatchdog);
    }

    pub fn stop_background_workers(&self) {
        self.modem.stop();
        if let Some(route) = &self.route_monitor {
            route.stop();
        }
    }
}

/// Polls the serial engine's completion flags for up to 30 seconds, then
/// forces process exit unconditionally.
pub async fn supervise_shutdown_or_reboot(completed: impl Fn() -> bool) {
    let start = std::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if completed() || start.elapsed() >= SHUTDOWN_OUTER_BOUND {
            break;
        }
    }
}

pub async fn run_control_server(ctx: Arc<Context>) {
    if let Err(e) = control::run(ctx).await {
        warn!("control server exited: {}", e);
    }
}
