/*
 * PCAT Manager - Supervisor Daemon Entry Point
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 *
 * Maintainer: Alex J Lennon <ajlennon@dynamicdevices.co.uk>
 * Company: Dynamic Devices Ltd
 * Contact: info@dynamicdevices.co.uk
 */

use clap::Parser;
use log::{info, warn};
use nix::sys::signal::{self, SigHandler, Signal};
use tokio::signal::unix::{signal as unix_signal, SignalKind};

use pcat_manager::app::{self, App};

/// `pcat-manager` — PMU/modem/route supervisor for the appliance.
#[derive(Parser, Debug)]
#[command(name = "pcat-manager", version, about = "PMU, modem, and route supervisor daemon")]
struct Cli {
    /// Fork to the background after startup.
    #[arg(short = 'D', long = "daemon")]
    daemon: bool,

    /// Suppress route-monitor and other integrated-platform-only probes.
    #[arg(long = "distro")]
    distro: bool,
}

fn main() {
    let cli = Cli::parse();

    // Static config isn't loaded yet at this point, so the file-logging
    // decision is deferred; start with stderr-only and re-init once the
    // config is in hand would double-init the logger, so instead probe the
    // static config file directly for the one flag that matters here.
    let file_logging = pcat_manager::config::StaticConfig::load(std::path::Path::new(
        app::STATIC_CONFIG_PATH,
    ))
    .map(|c| c.debug_output_log)
    .unwrap_or(false);
    pcat_manager::logging::init(file_logging);

    if cli.daemon {
        if let Err(e) = daemonize::Daemonize::new().start() {
            eprintln!("failed to daemonize: {}", e);
            std::process::exit(1);
        }
    }

    // SIGPIPE must be ignored before any socket/pipe I/O happens, and
    // `signal()` itself isn't async-safe to call after the runtime starts.
    unsafe {
        if let Err(e) = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) {
            warn!("failed to ignore SIGPIPE: {}", e);
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(async_main(cli.distro));
}

async fn async_main(distro_mode: bool) {
    let (mut app, engine) = match App::init(distro_mode) {
        Ok(pair) => pair,
        Err(e) => {
            pcat_manager::logging::fatal(&format!("static config load failed: {}", e));
        }
    };
    info!("pcat-manager starting (distro_mode={})", distro_mode);

    let ctx = app.control_context();
    tokio::spawn(app::run_control_server(ctx));

    tokio::spawn(crate::route_led_tick(app.state.clone(), app.engine.clone()));

    match app.open_serial().await {
        Ok(stream) => {
            let state = app.state.clone();
            tokio::spawn(engine.run(stream, state));
        }
        Err(e) => {
            warn!("failed to open PMU serial link: {}; PMU engine disabled", e);
        }
    }

    let mut sigterm = unix_signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigusr1 = unix_signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                app.handle_sigterm();
                wait_for_handshake(&app).await;
                break;
            }
            _ = sigusr1.recv() => {
                info!("SIGUSR1 received");
                app.handle_sigusr1();
            }
        }
    }

    app.stop_background_workers();
    std::process::exit(0);
}

/// Polls the engine's shutdown/reboot completion flags for up to 30
/// seconds before forcing exit regardless.
async fn wait_for_handshake(app: &App) {
    let engine = app.engine.clone();
    app::supervise_shutdown_or_reboot(move || engine.shutdown_completed() || engine.reboot_completed()).await;
}

async fn route_led_tick(state: std::sync::Arc<pcat_manager::StateStore>, engine: pcat_manager::serial::EngineHandle) {
    pcat_manager::route::monitor::led_tick(state, engine).await;
}
