/*
 * PCAT Manager - Route Monitor Workers
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Policy worker, connectivity worker, and LED tick. The first two run on
//! dedicated threads of their own; the LED tick runs as a task on the
//! reactor since it only touches the serial engine's outbound queue through
//! `EngineHandle`.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::serial::engine::{EngineCommand, EngineHandle};
use crate::state::{RouteMode, StateStore};

/// Ordered interface names probed each policy tick.
const IFACE_NAMES: &[&str] = &["wan", "wan6", "wwan_5g", "wwan_5g_v6", "wwan_lte", "wwan_lte_v6"];

const PING_TARGETS: &[&str] = &["1.1.1.1", "8.8.8.8", "114.114.114.114", "223.6.6.6"];

const BOOT_WAIT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const LED_TICK_INTERVAL: Duration = Duration::from_millis(2000);

/// Platform CLIs this crate treats as opaque external collaborators,
/// consumed only through their JSON interface.
const IFACE_STATUS_CLI: &str = "/usr/sbin/pcat-iface-status";
const MWAN_STATUS_CLI: &str = "/usr/sbin/pcat-mwan-status";

/// Lets the rest of the process stop the route-monitor threads.
pub struct RouteMonitorHandle {
    work_flag: Arc<AtomicBool>,
}

impl RouteMonitorHandle {
    pub fn stop(&self) {
        self.work_flag.store(false, Ordering::SeqCst);
    }
}

/// Spawns the policy and connectivity worker threads. Returns `None` (and
/// spawns nothing) when `distro_mode` is set.
pub fn spawn(state: Arc<StateStore>, distro_mode: bool) -> Option<(Vec<std::thread::JoinHandle<()>>, RouteMonitorHandle)> {
    if distro_mode {
        return None;
    }
    let work_flag = Arc::new(AtomicBool::new(true));

    let policy_flag = work_flag.clone();
    let policy_state = state.clone();
    let policy_thread = std::thread::spawn(move || policy_worker(policy_state, policy_flag));

    let conn_flag = work_flag.clone();
    let conn_state = state;
    let conn_thread = std::thread::spawn(move || connectivity_worker(conn_state, conn_flag));

    Some((vec![policy_thread, conn_thread], RouteMonitorHandle { work_flag }))
}

fn sleep_while(should_continue: impl Fn() -> bool, total: Duration) {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < total && should_continue() {
        std::thread::sleep(step);
        waited += step;
    }
}

fn policy_worker(state: Arc<StateStore>, work_flag: Arc<AtomicBool>) {
    let should_continue = || work_flag.load(Ordering::SeqCst);
    sleep_while(should_continue, BOOT_WAIT);

    while should_continue() {
        if let Some(mode) = probe_policy() {
            state.set_route_mode(mode);
        } else if state.route_mode() > RouteMode::Unknown {
            state.set_route_mode(RouteMode::None);
        }
        sleep_while(should_continue, POLL_INTERVAL);
    }
}

/// One up/with-address interface, as surfaced by the interface-status CLI.
struct IfaceStatus {
    up: bool,
    has_address: bool,
}

fn probe_iface(name: &str) -> Option<IfaceStatus> {
    let output = Command::new(IFACE_STATUS_CLI).arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let parsed: Value = serde_json::from_slice(&output.stdout).ok()?;
    let up = parsed.get("up").and_then(Value::as_bool).unwrap_or(false);
    let has_v4 = parsed
        .get("ipv4-address")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    let has_v6 = parsed
        .get("ipv6-address")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    Some(IfaceStatus {
        up,
        has_address: has_v4 || has_v6,
    })
}

fn iface_to_route_mode(name: &str) -> RouteMode {
    match name {
        "wan" | "wan6" => RouteMode::Wired,
        _ => RouteMode::Mobile,
    }
}

/// Walks `policies.ipv4.balanced` then `policies.ipv6.balanced` in the
/// MWAN status JSON, picking the first non-zero-percent rule whose
/// interface is one of `IFACE_NAMES`.
fn probe_policy() -> Option<RouteMode> {
    let up_with_address: Vec<&str> = IFACE_NAMES
        .iter()
        .copied()
        .filter(|name| matches!(probe_iface(name), Some(s) if s.up && s.has_address))
        .collect();

    let output = Command::new(MWAN_STATUS_CLI).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let parsed: Value = serde_json::from_slice(&output.stdout).ok()?;

    for family in ["ipv4", "ipv6"] {
        let Some(balanced) = parsed
            .pointer(&format!("/policies/{}/balanced", family))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for rule in balanced {
            let percent = rule.get("percent").and_then(Value::as_u64).unwrap_or(0);
            let Some(iface) = rule.get("interface").and_then(Value::as_str) else {
                continue;
            };
            if percent > 0 && up_with_address.contains(&iface) {
                return Some(iface_to_route_mode(iface));
            }
        }
    }
    None
}

fn connectivity_worker(state: Arc<StateStore>, work_flag: Arc<AtomicBool>) {
    let should_continue = || work_flag.load(Ordering::SeqCst);
    while should_continue() {
        if state.route_mode() <= RouteMode::Unknown {
            let reachable = PING_TARGETS.iter().any(|addr| ping_once(addr));
            if reachable {
                if state.route_mode() <= RouteMode::Unknown {
                    state.set_route_mode(RouteMode::Unknown);
                }
            } else {
                state.set_route_mode(RouteMode::None);
            }
        }
        sleep_while(should_continue, POLL_INTERVAL);
    }
}

fn ping_once(addr: &str) -> bool {
    match Command::new("ping")
        .args(["-W", "3", "-w", "3", "-c", "1", addr])
        .output()
    {
        Ok(output) => output.status.success(),
        Err(e) => {
            warn!("failed to invoke ping: {}", e);
            false
        }
    }
}

/// LED blink parameters per route mode.
fn led_params(mode: RouteMode) -> (u16, u16, u16) {
    match mode {
        RouteMode::Wired => (50, 50, 0),
        RouteMode::Mobile => (20, 380, 0),
        RouteMode::Unknown => (100, 0, 0),
        RouteMode::None => (0, 100, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_params_match_route_mode_table() {
        assert_eq!(led_params(RouteMode::Wired), (50, 50, 0));
        assert_eq!(led_params(RouteMode::Mobile), (20, 380, 0));
        assert_eq!(led_params(RouteMode::Unknown), (100, 0, 0));
        assert_eq!(led_params(RouteMode::None), (0, 100, 0));
    }

    #[test]
    fn iface_mapping_distinguishes_wired_from_mobile() {
        assert_eq!(iface_to_route_mode("wan"), RouteMode::Wired);
        assert_eq!(iface_to_route_mode("wan6"), RouteMode::Wired);
        assert_eq!(iface_to_route_mode("wwan_lte"), RouteMode::Mobile);
        assert_eq!(iface_to_route_mode("wwan_5g_v6"), RouteMode::Mobile);
    }
}

/// Runs on the reactor: watches for route-mode changes and pushes an LED
/// update through the serial engine.
pub async fn led_tick(state: Arc<StateStore>, engine: EngineHandle) {
    let mut last_mode: Option<RouteMode> = None;
    let mut interval = tokio::time::interval(LED_TICK_INTERVAL);
    loop {
        interval.tick().await;
        let mode = state.route_mode();
        if last_mode != Some(mode) {
            let (on_ms, off_ms, repeat) = led_params(mode);
            engine.send(EngineCommand::LedUpdate { on_ms, off_ms, repeat });
            debug!("route mode changed to {:?}; LED updated", mode);
            last_mode = Some(mode);
        }
    }
}
