/*
 * PCAT Manager - Control Command Handlers
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! The nine JSON commands the control socket answers, plus the dispatch
//! table that routes an incoming `command` string to its handler.

use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike, Utc};
use serde_json::{json, Value};

use crate::config::user_config::enable_bits;
use crate::config::PowerScheduleEntry;
use crate::serial::engine::EngineCommand;

use super::server::Context;

/// A handler receives the context and the parsed request object, and
/// returns the JSON reply body (the `command` field is added by the
/// caller so every handler only needs to supply the rest).
type Handler = fn(&Context, &Value) -> Value;

pub const COMMAND_TABLE: &[(&str, Handler)] = &[
    ("pmu-status", pmu_status),
    ("pmu-fw-version-get", pmu_fw_version_get),
    ("schedule-power-event-set", schedule_power_event_set),
    ("schedule-power-event-get", schedule_power_event_get),
    ("modem-status-get", modem_status_get),
    ("modem-rfkill-mode-set", modem_rfkill_mode_set),
    ("network-route-mode-get", network_route_mode_get),
    ("charger-on-auto-start-set", charger_on_auto_start_set),
    ("charger-on-auto-start-get", charger_on_auto_start_get),
];

pub fn dispatch(ctx: &Context, command: &str, request: &Value) -> Option<Value> {
    let (_, handler) = COMMAND_TABLE.iter().find(|(name, _)| *name == command)?;
    let mut reply = handler(ctx, request);
    reply["command"] = json!(command);
    Some(reply)
}

fn ok(mut body: Value) -> Value {
    body["code"] = json!(0);
    body
}

fn fail() -> Value {
    json!({ "code": 1 })
}

fn pmu_status(ctx: &Context, _req: &Value) -> Value {
    let pmu = ctx.state.pmu.lock().unwrap();
    ok(json!({
        "battery-voltage": pmu.battery_voltage_mv,
        "charger-voltage": pmu.charger_voltage_mv,
        "on-battery": pmu.on_battery as u8,
        "charge-percentage": pmu.battery_percentage_x100,
        "board-temperature": pmu.board_temp_c,
    }))
}

fn pmu_fw_version_get(ctx: &Context, _req: &Value) -> Value {
    let pmu = ctx.state.pmu.lock().unwrap();
    ok(json!({ "version": pmu.pmu_fw_version.clone().unwrap_or_default() }))
}

/// Fallback timestamp used when a local→UTC or UTC→local conversion is
/// out of range.
fn fallback_entry(enable_bits: u8, dow_bits: u8, action: bool) -> PowerScheduleEntry {
    PowerScheduleEntry {
        enabled: true,
        action,
        enable_bits,
        year: 2000,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        dow_bits,
    }
}

fn local_to_utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<(u16, u8, u8, u8, u8)> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    let local = Local.from_local_datetime(&naive).single()?;
    let utc = local.with_timezone(&Utc);
    Some((
        utc.year() as u16,
        utc.month() as u8,
        utc.day() as u8,
        utc.hour() as u8,
        utc.minute() as u8,
    ))
}

fn utc_to_local(year: u16, month: u8, day: u8, hour: u8, minute: u8) -> Option<(u16, u8, u8, u8, u8)> {
    let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
        .and_hms_opt(hour as u32, minute as u32, 0)?;
    let utc = Utc.from_utc_datetime(&naive);
    let local = utc.with_timezone(&Local);
    Some((
        local.year() as u16,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
    ))
}

fn entry_from_request(item: &Value) -> PowerScheduleEntry {
    let get_u8 = |key: &str| item.get(key).and_then(Value::as_u64).unwrap_or(0) as u8;
    let get_bool = |key: &str| item.get(key).and_then(Value::as_u64).unwrap_or(0) != 0;
    let enable_bits = get_u8("enable-bits");
    let action = item.get("action").and_then(Value::as_u64).unwrap_or(0) != 0;
    let year = item.get("year").and_then(Value::as_i64).unwrap_or(2000) as i32;
    let month = item.get("month").and_then(Value::as_u64).unwrap_or(1) as u32;
    let day = item.get("day").and_then(Value::as_u64).unwrap_or(1) as u32;
    let hour = item.get("hour").and_then(Value::as_u64).unwrap_or(0) as u32;
    let minute = item.get("minute").and_then(Value::as_u64).unwrap_or(0) as u32;
    let dow_bits = get_u8("dow-bits");

    match local_to_utc(year, month, day, hour, minute) {
        Some((y, m, d, h, min)) => PowerScheduleEntry {
            enabled: get_bool("enabled"),
            action,
            enable_bits,
            year: y,
            month: m,
            day: d,
            hour: h,
            minute: min,
            dow_bits,
        },
        None => fallback_entry(enable_bits, dow_bits, action),
    }
}

fn entry_to_reply(entry: &PowerScheduleEntry) -> Value {
    let (year, month, day, hour, minute) =
        utc_to_local(entry.year, entry.month, entry.day, entry.hour, entry.minute)
            .unwrap_or((2000, 1, 1, 0, 0));
    json!({
        "enabled": entry.enabled as u8,
        "enable-bits": entry.enable_bits,
        "action": entry.action as u8,
        "year": year,
        "month": month,
        "day": day,
        "hour": hour,
        "minute": minute,
        "dow-bits": entry.dow_bits,
    })
}

fn schedule_power_event_set(ctx: &Context, req: &Value) -> Value {
    let Some(list) = req.get("event-list").and_then(Value::as_array) else {
        return fail();
    };
    let entries: Vec<PowerScheduleEntry> = list.iter().map(entry_from_request).collect();
    {
        let mut cfg = ctx.state.user_config.lock().unwrap();
        cfg.set_schedule(entries);
    }
    if let Err(e) = ctx.state.user_config.lock().unwrap().sync() {
        log::warn!("failed to persist user config: {}", e);
    }
    ctx.engine.send(EngineCommand::ScheduleChanged);
    ok(json!({}))
}

fn schedule_power_event_get(ctx: &Context, _req: &Value) -> Value {
    let entries = ctx.state.user_config.lock().unwrap().power_schedule_data.clone();
    let event_list: Vec<Value> = entries.iter().map(entry_to_reply).collect();
    ok(json!({ "event-list": event_list }))
}

fn modem_status_get(ctx: &Context, _req: &Value) -> Value {
    let modem = ctx.state.modem.lock().unwrap();
    let code = if modem.mode_ever_observed { 0 } else { 1 };
    json!({
        "code": code,
        "mode": modem.mode.as_str(),
        "rfkill-state": modem.rfkill_state as u8,
        "sim-state": modem.sim_state.as_str(),
        "isp-name": modem.isp_name,
        "isp-lpmn": modem.isp_plmn,
        "signal-strength": modem.signal_strength,
    })
}

fn modem_rfkill_mode_set(ctx: &Context, req: &Value) -> Value {
    let Some(state) = req.get("state").and_then(Value::as_u64) else {
        return fail();
    };
    let blocked = state != 0;
    ctx.modem.set_rfkill(blocked);
    ctx.state.modem.lock().unwrap().rfkill_state = blocked;
    ok(json!({}))
}

fn network_route_mode_get(ctx: &Context, _req: &Value) -> Value {
    ok(json!({ "mode": ctx.state.route_mode().as_str() }))
}

fn charger_on_auto_start_set(ctx: &Context, req: &Value) -> Value {
    let (Some(state), Some(timeout)) = (
        req.get("state").and_then(Value::as_u64),
        req.get("timeout").and_then(Value::as_u64),
    ) else {
        return fail();
    };
    {
        let mut cfg = ctx.state.user_config.lock().unwrap();
        cfg.charger_on_auto_start = state != 0;
        cfg.charger_on_auto_start_timeout = timeout as u32;
        cfg.dirty = true;
    }
    if let Err(e) = ctx.state.user_config.lock().unwrap().sync() {
        log::warn!("failed to persist user config: {}", e);
    }
    ctx.engine.send(EngineCommand::ChargerAutoStartChanged);
    ok(json!({}))
}

fn charger_on_auto_start_get(ctx: &Context, _req: &Value) -> Value {
    let cfg = ctx.state.user_config.lock().unwrap();
    let pmu = ctx.state.pmu.lock().unwrap();
    let elapsed = pmu
        .charger_last_seen_monotonic
        .map(|t| t.elapsed().as_secs())
        .unwrap_or(0);
    let countdown = (cfg.charger_on_auto_start_timeout as u64).saturating_sub(elapsed);
    ok(json!({
        "state": cfg.charger_on_auto_start as u8,
        "timeout": cfg.charger_on_auto_start_timeout,
        "countdown": countdown,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_utc_round_trip_is_stable() {
        let (y, m, d, h, min) = local_to_utc(2024, 6, 15, 13, 30).unwrap();
        let (y2, m2, d2, h2, min2) = utc_to_local(y, m, d, h, min).unwrap();
        assert_eq!((y2, m2, d2, h2, min2), (2024, 6, 15, 13, 30));
    }

    #[test]
    fn out_of_range_date_falls_back_to_2000() {
        let entry = entry_from_request(&json!({
            "enabled": 1,
            "enable-bits": enable_bits::MINUTE,
            "action": 1,
            "year": 99999,
            "month": 13,
            "day": 40,
            "hour": 0,
            "minute": 0,
            "dow-bits": 0,
        }));
        assert_eq!((entry.year, entry.month, entry.day), (2000, 1, 1));
    }

    /// A schedule entry submitted in local time reads back with the same
    /// local fields, round-tripped through the entry's UTC on-disk
    /// representation.
    #[test]
    fn schedule_entry_local_time_round_trips_through_set_and_get() {
        let request = json!({
            "enabled": 1,
            "enable-bits": enable_bits::HOUR | enable_bits::MINUTE,
            "action": 1,
            "year": 2025,
            "month": 3,
            "day": 10,
            "hour": 22,
            "minute": 45,
            "dow-bits": 0,
        });

        let entry = entry_from_request(&request);
        let reply = entry_to_reply(&entry);

        assert_eq!(reply["enabled"], json!(1));
        assert_eq!(reply["action"], json!(1));
        assert_eq!(reply["enable-bits"], json!(enable_bits::HOUR | enable_bits::MINUTE));
        assert_eq!(reply["year"], json!(2025));
        assert_eq!(reply["month"], json!(3));
        assert_eq!(reply["day"], json!(10));
        assert_eq!(reply["hour"], json!(22));
        assert_eq!(reply["minute"], json!(45));
        assert_eq!(reply["dow-bits"], json!(0));
    }
}
