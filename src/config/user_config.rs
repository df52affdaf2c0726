/*
 * PCAT Manager - User Configuration
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

use ini::Ini;
use log::warn;
use std::path::{Path, PathBuf};

/// Bits of `PowerScheduleEntry::enable_bits` / `dow_bits`.
pub mod enable_bits {
    pub const YEAR: u8 = 1 << 0;
    pub const MONTH: u8 = 1 << 1;
    pub const DAY: u8 = 1 << 2;
    pub const HOUR: u8 = 1 << 3;
    pub const MINUTE: u8 = 1 << 4;
    pub const DOW: u8 = 1 << 5;
}

/// A single scheduled power-on/power-off event. Date/time fields are
/// stored in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerScheduleEntry {
    pub enabled: bool,
    /// true = power-on, false = power-off.
    pub action: bool,
    pub enable_bits: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    /// bit i set => day-of-week i enabled, Sunday = 0.
    pub dow_bits: u8,
}

impl PowerScheduleEntry {
    /// Evaluate the schedule-dispatch cascade against a UTC instant.
    /// Highest-priority set bit dominates: YEAR > MONTH > DAY > DOW > HOUR
    /// > MINUTE-only, preserved verbatim from the reference firmware's
    /// undocumented precedence order. `weekday_sun0` is 0 for Sunday,
    /// matching `dow_bits`.
    #[allow(clippy::too_many_arguments)]
    pub fn matches_utc(
        &self,
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        weekday_sun0: u8,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        if self.enable_bits & enable_bits::MINUTE == 0 {
            return false;
        }
        if self.minute != minute {
            return false;
        }
        if self.enable_bits & enable_bits::YEAR != 0 {
            return self.year == year
                && self.month == month
                && self.day == day
                && self.hour == hour;
        }
        if self.enable_bits & enable_bits::MONTH != 0 {
            return self.month == month && self.day == day && self.hour == hour;
        }
        if self.enable_bits & enable_bits::DAY != 0 {
            return self.day == day && self.hour == hour;
        }
        if self.enable_bits & enable_bits::DOW != 0 {
            return (self.dow_bits & (1 << weekday_sun0)) != 0 && self.hour == hour;
        }
        if self.enable_bits & enable_bits::HOUR != 0 {
            return self.hour == hour;
        }
        // Only MINUTE was set: minute-of-every-hour match.
        true
    }

    fn date_packed(&self) -> u32 {
        self.year as u32 * 10000 + self.month as u32 * 100 + self.day as u32
    }

    fn time_packed(&self) -> u32 {
        self.hour as u32 * 100 + self.minute as u32
    }

    fn from_packed(
        enable_bits: u8,
        date_packed: u32,
        time_packed: u32,
        dow_bits: u8,
        action: bool,
    ) -> Self {
        let year = (date_packed / 10000) as u16;
        let month = ((date_packed / 100) % 100) as u8;
        let day = (date_packed % 100) as u8;
        let hour = (time_packed / 100) as u8;
        let minute = (time_packed % 100) as u8;
        Self {
            enabled: true,
            action,
            enable_bits,
            year,
            month,
            day,
            hour,
            minute,
            dow_bits,
        }
    }
}

/// Dial-up credential/behavior settings, persisted under `[Modem]`.
#[derive(Debug, Clone, Default)]
pub struct ModemDialConfig {
    pub apn: String,
    pub user: String,
    pub password: String,
    pub auth: String,
    pub disable_ipv6: bool,
    pub disable_5g_fail_auto_reset: bool,
    /// Coerced to 600 if configured value is < 60.
    pub fail_5g_timeout: u32,
}

/// Mutable, persisted configuration.
#[derive(Debug, Clone)]
pub struct UserConfig {
    pub power_schedule_data: Vec<PowerScheduleEntry>,
    pub charger_on_auto_start: bool,
    pub charger_on_auto_start_timeout: u32,
    pub modem: ModemDialConfig,
    pub dirty: bool,

    path: Option<PathBuf>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            power_schedule_data: Vec::new(),
            charger_on_auto_start: false,
            charger_on_auto_start_timeout: 60,
            modem: ModemDialConfig {
                fail_5g_timeout: 600,
                ..ModemDialConfig::default()
            },
            dirty: false,
            path: None,
        }
    }
}

/// Maximum schedule index scanned before giving up (generous upper bound;
/// ingest still caps to 6 on + 6 off entries).
const MAX_SCHEDULE_SCAN: u32 = 64;

impl UserConfig {
    /// Load from `path`. On any failure, logs a warning and returns
    /// `UserConfig::default()` — user config failure is recoverable.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("failed to load user config {}: {}; using defaults", path.display(), e);
                let mut cfg = Self::default();
                cfg.path = Some(path.to_path_buf());
                cfg
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, String> {
        let ini = Ini::load_from_file(path).map_err(|e| e.to_string())?;

        let schedule_section = ini.section(Some("Schedule"));
        let mut power_schedule_data = Vec::new();
        if let Some(section) = schedule_section {
            for i in 0..MAX_SCHEDULE_SCAN {
                let Some(enable_bits_raw) = section.get(&format!("EnableBits{i}")) else {
                    continue;
                };
                let Ok(enable_bits) = enable_bits_raw.trim().parse::<u8>() else {
                    continue;
                };
                let date_packed = section
                    .get(&format!("Date{i}"))
                    .and_then(|v| v.trim().parse::<u32>().ok())
                    .unwrap_or(20000101);
                let time_packed = section
                    .get(&format!("Time{i}"))
                    .and_then(|v| v.trim().parse::<u32>().ok())
                    .unwrap_or(0);
                let dow_bits = section
                    .get(&format!("DOWBits{i}"))
                    .and_then(|v| v.trim().parse::<u8>().ok())
                    .unwrap_or(0);
                let action = section
                    .get(&format!("Action{i}"))
                    .map(|v| matches!(v.trim(), "1" | "true" | "True"))
                    .unwrap_or(false);
                power_schedule_data.push(PowerScheduleEntry::from_packed(
                    enable_bits,
                    date_packed,
                    time_packed,
                    dow_bits,
                    action,
                ));
            }
        }
        cap_schedule_entries(&mut power_schedule_data);

        let general = ini.section(Some("General"));
        let charger_on_auto_start = general
            .and_then(|s| s.get("ChargerOnAutoStart"))
            .map(|v| matches!(v.trim(), "1" | "true" | "True"))
            .unwrap_or(false);
        let charger_on_auto_start_timeout = general
            .and_then(|s| s.get("ChargerOnAutoStartTimeout"))
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(60);

        let modem_section = ini.section(Some("Modem"));
        let apn = modem_section
            .and_then(|s| s.get("APN"))
            .unwrap_or("")
            .to_string();
        let user = modem_section
            .and_then(|s| s.get("User"))
            .unwrap_or("")
            .to_string();
        let password = modem_section
            .and_then(|s| s.get("Password"))
            .unwrap_or("")
            .to_string();
        let auth = modem_section
            .and_then(|s| s.get("Auth"))
            .unwrap_or("")
            .to_string();
        let disable_ipv6 = modem_section
            .and_then(|s| s.get("DisableIPv6"))
            .map(|v| matches!(v.trim(), "1" | "true" | "True"))
            .unwrap_or(false);
        let disable_5g_fail_auto_reset = modem_section
            .and_then(|s| s.get("Disable5GFailAutoReset"))
            .map(|v| matches!(v.trim(), "1" | "true" | "True"))
            .unwrap_or(false);
        let fail_5g_timeout_raw = modem_section
            .and_then(|s| s.get("Connection5GFailTimeout"))
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(600);
        let fail_5g_timeout = if fail_5g_timeout_raw < 60 {
            600
        } else {
            fail_5g_timeout_raw
        };

        Ok(Self {
            power_schedule_data,
            charger_on_auto_start,
            charger_on_auto_start_timeout,
            modem: ModemDialConfig {
                apn,
                user,
                password,
                auth,
                disable_ipv6,
                disable_5g_fail_auto_reset,
                fail_5g_timeout,
            },
            dirty: false,
            path: Some(path.to_path_buf()),
        })
    }

    /// Persist to disk if `dirty`, clearing the flag on success.
    pub fn sync(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let mut ini = Ini::new();
        for (i, entry) in self.power_schedule_data.iter().enumerate() {
            ini.with_section(Some("Schedule"))
                .set(format!("EnableBits{i}"), entry.enable_bits.to_string())
                .set(format!("Date{i}"), entry.date_packed().to_string())
                .set(format!("Time{i}"), entry.time_packed().to_string())
                .set(format!("DOWBits{i}"), entry.dow_bits.to_string())
                .set(format!("Action{i}"), if entry.action { "1" } else { "0" });
        }
        ini.with_section(Some("General"))
            .set(
                "ChargerOnAutoStart",
                if self.charger_on_auto_start { "1" } else { "0" },
            )
            .set(
                "ChargerOnAutoStartTimeout",
                self.charger_on_auto_start_timeout.to_string(),
            );
        ini.with_section(Some("Modem"))
            .set("APN", self.modem.apn.clone())
            .set("User", self.modem.user.clone())
            .set("Password", self.modem.password.clone())
            .set("Auth", self.modem.auth.clone())
            .set(
                "DisableIPv6",
                if self.modem.disable_ipv6 { "1" } else { "0" },
            )
            .set(
                "Disable5GFailAutoReset",
                if self.modem.disable_5g_fail_auto_reset { "1" } else { "0" },
            )
            .set(
                "Connection5GFailTimeout",
                self.modem.fail_5g_timeout.to_string(),
            );

        ini.write_to_file(&path)?;
        self.dirty = false;
        Ok(())
    }

    /// Replace the schedule list, enforcing the 6-on/6-off ingest cap,
    /// and mark dirty.
    pub fn set_schedule(&mut self, mut entries: Vec<PowerScheduleEntry>) {
        cap_schedule_entries(&mut entries);
        self.power_schedule_data = entries;
        self.dirty = true;
    }
}

/// At most 6 enabled on-entries and 6 enabled off-entries are honored;
/// excess entries (beyond the first 6 of each kind) are discarded, not an
/// error.
fn cap_schedule_entries(entries: &mut Vec<PowerScheduleEntry>) {
    let mut on_count = 0u32;
    let mut off_count = 0u32;
    entries.retain(|e| {
        if !e.enabled {
            return true;
        }
        if e.action {
            on_count += 1;
            on_count <= 6
        } else {
            off_count += 1;
            off_count <= 6
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(enable_bits: u8, action: bool) -> PowerScheduleEntry {
        PowerScheduleEntry {
            enabled: true,
            action,
            enable_bits,
            year: 2024,
            month: 1,
            day: 1,
            hour: 0,
            minute: 30,
            dow_bits: 0,
        }
    }

    #[test]
    fn cap_limits_on_and_off_independently() {
        let mut entries: Vec<_> = (0..8).map(|_| entry(enable_bits::MINUTE, true)).collect();
        entries.extend((0..8).map(|_| entry(enable_bits::MINUTE, false)));
        cap_schedule_entries(&mut entries);
        let on = entries.iter().filter(|e| e.action).count();
        let off = entries.iter().filter(|e| !e.action).count();
        assert_eq!(on, 6);
        assert_eq!(off, 6);
    }

    #[test]
    fn minute_only_match_requires_minute_bit() {
        let e = entry(0, true);
        assert!(!e.matches_utc(2024, 1, 1, 0, 30, 1));
    }

    #[test]
    fn minute_only_matches_any_hour() {
        let e = entry(enable_bits::MINUTE, true);
        assert!(e.matches_utc(2024, 5, 5, 13, 30, 4));
        assert!(e.matches_utc(1999, 1, 1, 0, 30, 0));
    }

    #[test]
    fn year_bit_dominates_over_dow() {
        let mut e = entry(enable_bits::YEAR | enable_bits::DOW | enable_bits::MINUTE, true);
        e.dow_bits = 0; // would fail DOW check if evaluated
        assert!(e.matches_utc(2024, 1, 1, 0, 30, 3));
    }

    #[test]
    fn dow_bit_checks_weekday() {
        let mut e = entry(enable_bits::DOW | enable_bits::MINUTE, true);
        e.hour = 6;
        e.dow_bits = 1 << 2; // Tuesday
        assert!(e.matches_utc(2030, 1, 1, 6, 30, 2));
        assert!(!e.matches_utc(2030, 1, 1, 6, 30, 3));
    }

    #[test]
    fn packed_roundtrip() {
        let e = entry(enable_bits::YEAR | enable_bits::MINUTE, true);
        let packed_date = e.date_packed();
        let packed_time = e.time_packed();
        let back = PowerScheduleEntry::from_packed(
            e.enable_bits,
            packed_date,
            packed_time,
            e.dow_bits,
            e.action,
        );
        assert_eq!(back.year, e.year);
        assert_eq!(back.month, e.month);
        assert_eq!(back.day, e.day);
        assert_eq!(back.hour, e.hour);
        assert_eq!(back.minute, e.minute);
    }
}
