/*
 * PCAT Manager - Integration Tests
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! End-to-end scenarios spanning more than one subsystem. Unit-level
//! invariants (CRC, battery math, frame parsing, queue/retry/cap behavior)
//! live alongside their modules instead.

use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};

use pcat_manager::config::StaticConfig;
use pcat_manager::control::{commands, Context};
use pcat_manager::serial::SerialEngine;
use pcat_manager::state::{ModemMode, SimState, StateStore};
use pcat_manager::{config, modem};

/// Minimal valid key-file; every value left at its compiled-in default.
fn write_static_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config");
    writeln!(file, "[Hardware]").unwrap();
    writeln!(file, "[PowerManager]").unwrap();
    writeln!(file, "SerialDevice=/dev/null").unwrap();
    writeln!(file, "[Debug]").unwrap();
    file.flush().unwrap();
    file
}

fn build_context() -> Context {
    let config_file = write_static_config();
    let static_config = StaticConfig::load(config_file.path()).expect("load static config");
    let user_config = config::UserConfig::default();
    let state = Arc::new(StateStore::new(static_config, user_config));

    let (_engine, engine_handle) = SerialEngine::new();
    let (_modem_thread, modem_handle) = modem::spawn(state.clone());

    Context {
        state,
        engine: engine_handle,
        modem: modem_handle,
    }
}

/// A control client asking for `pmu-status` after a status report has
/// already populated the state store.
#[test]
fn control_query_reports_pmu_status() {
    let ctx = build_context();
    {
        let mut pmu = ctx.state.pmu.lock().unwrap();
        pmu.battery_voltage_mv = 4200;
        pmu.charger_voltage_mv = 0;
        pmu.on_battery = true;
        pmu.battery_percentage_x100 = 10000;
        pmu.board_temp_c = 60;
    }

    let request: Value = json!({ "command": "pmu-status" });
    let reply = commands::dispatch(&ctx, "pmu-status", &request).expect("known command");

    assert_eq!(reply["code"], 0);
    assert_eq!(reply["battery-voltage"], 4200);
    assert_eq!(reply["charger-voltage"], 0);
    assert_eq!(reply["on-battery"], 1);
    assert_eq!(reply["charge-percentage"], 10000);
    assert_eq!(reply["board-temperature"], 60);
}

/// SIM reports it needs a PIN; `modem-status-get` surfaces it with
/// `code: 0` once a mode has ever been observed.
#[test]
fn modem_status_reports_need_pin_with_mode_observed() {
    let ctx = build_context();
    {
        let mut modem = ctx.state.modem.lock().unwrap();
        modem.sim_state = SimState::NeedPin;
        modem.mode = ModemMode::Lte;
        modem.mode_ever_observed = true;
    }

    let request: Value = json!({ "command": "modem-status-get" });
    let reply = commands::dispatch(&ctx, "modem-status-get", &request).expect("known command");

    assert_eq!(reply["code"], 0);
    assert_eq!(reply["sim-state"], "need-pin");
}

/// Same scenario before any `SIGNALINFO` line has ever been parsed: the
/// reply falls back to `code: 1`.
#[test]
fn modem_status_reports_code_one_before_mode_observed() {
    let ctx = build_context();
    ctx.state.modem.lock().unwrap().sim_state = SimState::NeedPin;

    let request: Value = json!({ "command": "modem-status-get" });
    let reply = commands::dispatch(&ctx, "modem-status-get", &request).expect("known command");

    assert_eq!(reply["code"], 1);
    assert_eq!(reply["sim-state"], "need-pin");
}

/// An unrecognized command is ignored rather than replied to.
#[test]
fn unknown_command_dispatches_to_none() {
    let ctx = build_context();
    let request: Value = json!({ "command": "not-a-real-command" });
    assert!(commands::dispatch(&ctx, "not-a-real-command", &request).is_none());
}
