/*
 * PCAT Manager - Shared State Store
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Process-wide record of PMU-observed values, modem status, and route
//! mode. Single-writer/many-reader fields are guarded by a coarse `Mutex`
//! per group rather than split into fine-grained atomics.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::{StaticConfig, UserConfig};

/// Modem network-attach mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemMode {
    None,
    TwoG,
    ThreeG,
    Lte,
    FiveG,
}

impl ModemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModemMode::None => "none",
            ModemMode::TwoG => "2g",
            ModemMode::ThreeG => "3g",
            ModemMode::Lte => "lte",
            ModemMode::FiveG => "5g",
        }
    }
}

/// SIM card state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Absent,
    NotReady,
    Ready,
    NeedPin,
    NeedPuk,
    PersonalizedNetwork,
    Bad,
}

impl SimState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimState::Absent => "absent",
            SimState::NotReady => "not-ready",
            SimState::Ready => "ready",
            SimState::NeedPin => "need-pin",
            SimState::NeedPuk => "need-puk",
            SimState::PersonalizedNetwork => "personalized-network",
            SimState::Bad => "bad",
        }
    }
}

/// Modem hardware class, as distinguished by the supported-device table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemDeviceClass {
    None,
    General,
    FiveG,
}

impl ModemDeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModemDeviceClass::None => "none",
            ModemDeviceClass::General => "general",
            ModemDeviceClass::FiveG => "5g",
        }
    }
}

/// Modem-observed values.
#[derive(Debug, Clone)]
pub struct ModemStatus {
    pub mode: ModemMode,
    pub sim_state: SimState,
    pub signal_strength: u8,
    pub isp_name: String,
    pub isp_plmn: String,
    pub rfkill_state: bool,
    pub device_class: ModemDeviceClass,
    /// True once at least one SIGNALINFO line has been observed; used to
    /// decide the `code` on `modem-status-get`.
    pub mode_ever_observed: bool,
}

impl Default for ModemStatus {
    fn default() -> Self {
        Self {
            mode: ModemMode::None,
            sim_state: SimState::NotReady,
            signal_strength: 0,
            isp_name: String::new(),
            isp_plmn: String::new(),
            rfkill_state: false,
            device_class: ModemDeviceClass::None,
            mode_ever_observed: false,
        }
    }
}

/// Route mode, ordered so values strictly greater than `Unknown` mean a
/// known interface was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RouteMode {
    None = 0,
    Unknown = 1,
    Wired = 2,
    Mobile = 3,
}

impl RouteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMode::None => "none",
            RouteMode::Unknown => "unknown",
            RouteMode::Wired => "wired",
            RouteMode::Mobile => "mobile",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => RouteMode::Unknown,
            2 => RouteMode::Wired,
            3 => RouteMode::Mobile,
            _ => RouteMode::None,
        }
    }
}

/// PMU-observed values.
#[derive(Debug, Clone)]
pub struct PmuState {
    pub battery_voltage_mv: u16,
    pub charger_voltage_mv: u16,
    pub on_battery: bool,
    /// Basis points, 0..=10000.
    pub battery_percentage_x100: u32,
    /// Monotonic cap on discharge percentage while on battery, preventing
    /// jitter-induced increases. Reset to 10000 whenever the device leaves
    /// battery.
    pub battery_percentage_cap_x100: u32,
    pub board_temp_c: i32,
    pub pmu_fw_version: Option<String>,
    pub power_on_event: u8,
    pub charger_last_seen_monotonic: Option<Instant>,
    pub system_time_set_from_pmu: bool,
}

impl Default for PmuState {
    fn default() -> Self {
        Self {
            battery_voltage_mv: 0,
            charger_voltage_mv: 0,
            on_battery: true,
            battery_percentage_x100: 0,
            battery_percentage_cap_x100: 10000,
            board_temp_c: 0,
            pmu_fw_version: None,
            power_on_event: 0,
            charger_last_seen_monotonic: None,
            system_time_set_from_pmu: false,
        }
    }
}

/// Process-wide shared state, constructed once in `App` and handed to each
/// subsystem as an explicit reference rather than through a global.
pub struct StateStore {
    pub pmu: Mutex<PmuState>,
    pub modem: Mutex<ModemStatus>,
    route_mode: AtomicU8,
    pub user_config: Mutex<UserConfig>,
    pub static_config: StaticConfig,
    /// Signed board temperature mirrored as an atomic for lock-free reads
    /// from the control server hot path; authoritative copy lives in `pmu`.
    board_temp_fast: AtomicI32,
}

impl StateStore {
    pub fn new(static_config: StaticConfig, user_config: UserConfig) -> Self {
        Self {
            pmu: Mutex::new(PmuState::default()),
            modem: Mutex::new(ModemStatus::default()),
            route_mode: AtomicU8::new(RouteMode::None as u8),
            user_config: Mutex::new(user_config),
            static_config,
            board_temp_fast: AtomicI32::new(0),
        }
    }

    pub fn route_mode(&self) -> RouteMode {
        RouteMode::from_u8(self.route_mode.load(Ordering::Relaxed))
    }

    pub fn set_route_mode(&self, mode: RouteMode) {
        self.route_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn set_board_temp_fast(&self, temp: i32) {
        self.board_temp_fast.store(temp, Ordering::Relaxed);
    }

    pub fn board_temp_fast(&self) -> i32 {
        self.board_temp_fast.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_mode_ordering() {
        assert!(RouteMode::Wired > RouteMode::Unknown);
        assert!(RouteMode::Mobile > RouteMode::Unknown);
        assert!(RouteMode::Unknown > RouteMode::None);
    }

    #[test]
    fn store_round_trips_route_mode() {
        let store = StateStore::new(StaticConfig::default(), UserConfig::default());
        store.set_route_mode(RouteMode::Mobile);
        assert_eq!(store.route_mode(), RouteMode::Mobile);
    }
}
