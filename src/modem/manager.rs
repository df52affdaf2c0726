/*
 * PCAT Manager - Modem Manager
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Owns the modem lifecycle thread: GPIO power-up, USB scan, dial-helper
//! spawn/parse, and the `status_get`/`device_type_get`/`rfkill_mode_set`
//! surface the control server uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc;

use super::gpio::ModemGpio;
use super::helper::{apply_line, HelperProcess};
use super::usb::scan;
use crate::state::{ModemDeviceClass, StateStore};

#[derive(PartialEq, Eq, Clone, Copy)]
enum ManagerState {
    None,
    Ready,
}

/// Handle the rest of the process keeps to talk to the modem worker
/// thread: ask it to stop, or request an RF-kill state change.
///
/// Uses `tokio::sync::mpsc` rather than `std::sync::mpsc` for the rfkill
/// channel even though the receiver is drained from a plain `std::thread`
/// (via `try_recv`, no runtime required): `std::sync::mpsc::Sender` is
/// `!Sync`, which would make this handle, `Context`, and therefore
/// `Arc<Context>` non-`Send` — breaking every `tokio::spawn` call that
/// moves a `Context` into a spawned future. Matches the same choice
/// already made for `EngineHandle` in `serial/engine.rs`.
#[derive(Clone)]
pub struct ModemHandle {
    work_flag: Arc<AtomicBool>,
    rfkill_tx: mpsc::UnboundedSender<bool>,
}

impl ModemHandle {
    pub fn stop(&self) {
        self.work_flag.store(false, Ordering::SeqCst);
    }

    pub fn set_rfkill(&self, blocked: bool) {
        let _ = self.rfkill_tx.send(blocked);
    }
}

/// Runs on its own OS thread for the lifetime of the process.
pub fn spawn(state: Arc<StateStore>) -> (std::thread::JoinHandle<()>, ModemHandle) {
    let work_flag = Arc::new(AtomicBool::new(true));
    let (rfkill_tx, rfkill_rx) = mpsc::unbounded_channel();
    let handle = ModemHandle {
        work_flag: work_flag.clone(),
        rfkill_tx,
    };
    let join = std::thread::spawn(move || run(state, work_flag, rfkill_rx));
    (join, handle)
}

fn run(state: Arc<StateStore>, work_flag: Arc<AtomicBool>, mut rfkill_rx: mpsc::UnboundedReceiver<bool>) {
    let should_continue = || work_flag.load(Ordering::SeqCst);
    let mut manager_state = ManagerState::None;
    let mut gpio: Option<ModemGpio> = None;
    let mut helper: Option<HelperProcess> = None;
    let log_stdout = state.static_config.debug_modem_external_exec_stdout_log;

    while should_continue() {
        match manager_state {
            ManagerState::None => {
                let cfg = &state.static_config;
                match ModemGpio::open(&cfg.gpio_modem_power, &cfg.gpio_modem_rfkill, &cfg.gpio_modem_reset) {
                    Ok(lines) => match lines.power_on_sequence(should_continue) {
                        Ok(()) => {
                            gpio = Some(lines);
                            manager_state = ManagerState::Ready;
                        }
                        Err(e) => {
                            warn!("modem power sequence failed: {}; retrying in 2s", e);
                            sleep_while(should_continue, Duration::from_secs(2));
                        }
                    },
                    Err(e) => {
                        warn!("modem GPIO unavailable: {}; modem manager idling", e);
                        sleep_while(should_continue, Duration::from_secs(2));
                    }
                }
            }
            ManagerState::Ready => {
                while let Ok(blocked) = rfkill_rx.try_recv() {
                    if let Some(lines) = gpio.as_ref() {
                        if let Err(e) = lines.set_rfkill(blocked) {
                            warn!("failed to set RF-kill: {}", e);
                        } else {
                            state.modem.lock().unwrap().rfkill_state = blocked;
                        }
                    }
                }

                if helper.as_mut().map(|h| h.poll_exited()).unwrap_or(false) {
                    info!("modem dial helper exited; will respawn on next scan");
                    helper = None;
                }

                if helper.is_none() {
                    match scan() {
                        Ok(Some(device)) => {
                            state.modem.lock().unwrap().device_class = device.device_class;
                            match HelperProcess::spawn(device.dial_helper, log_stdout) {
                                Ok(child) => helper = Some(child),
                                Err(e) => warn!("failed to spawn {}: {}", device.dial_helper, e),
                            }
                        }
                        Ok(None) => {
                            state.modem.lock().unwrap().device_class = ModemDeviceClass::None;
                        }
                        Err(e) => warn!("USB scan failed: {}", e),
                    }
                }

                if let Some(h) = helper.as_mut() {
                    let state = state.clone();
                    if let Err(e) = h.read_available(|fields| {
                        let mut status = state.modem.lock().unwrap();
                        apply_line(&mut status, fields);
                    }) {
                        warn!("modem helper stdout read error: {}", e);
                    }
                }

                sleep_while(should_continue, Duration::from_secs(1));
            }
        }
    }

    if let Some(mut h) = helper.take() {
        h.terminate();
    }
    drop(gpio);
    info!("modem manager thread exiting");
}

/// Sleeps in small increments so `work_flag` is honored promptly once the
/// rest of the process lowers it to signal the thread to stop.
fn sleep_while(should_continue: impl Fn() -> bool, total: Duration) {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < total && should_continue() {
        std::thread::sleep(step);
        waited += step;
    }
}
