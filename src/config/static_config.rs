/*
 * PCAT Manager - Static Configuration
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

use ini::Ini;
use log::warn;
use std::path::Path;

/// One of the three modem control GPIO lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpioDescriptor {
    /// GPIO chip device name (e.g. "gpiochip0"); empty means "not configured".
    pub chip: String,
    pub line: u32,
    pub active_low: bool,
}

impl GpioDescriptor {
    pub fn is_configured(&self) -> bool {
        !self.chip.is_empty()
    }
}

/// Compiled-in defaults, matching the reference firmware's discharge/charge
/// tables (original_source/src/pmu-manager.c).
pub const DEFAULT_DISCHARGE_TABLE_NORMAL: [u32; 11] =
    [4200, 4060, 3980, 3920, 3870, 3820, 3790, 3770, 3740, 3680, 3450];
pub const DEFAULT_DISCHARGE_TABLE_5G: [u32; 11] =
    [4200, 4060, 3980, 3920, 3870, 3820, 3790, 3770, 3740, 3680, 3600];
pub const DEFAULT_CHARGE_TABLE: [u32; 11] =
    [4200, 4150, 4100, 4050, 4000, 3950, 3900, 3850, 3800, 3750, 3700];

/// Valid range for auto-shutdown voltages; outside this range the value is
/// rejected back to 0 ("use default").
const AUTO_SHUTDOWN_MIN_MV: u32 = 3000;
const AUTO_SHUTDOWN_MAX_MV: u32 = 3700;

/// Immutable configuration loaded once at startup. Load failure is fatal.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    pub gpio_modem_power: GpioDescriptor,
    pub gpio_modem_rfkill: GpioDescriptor,
    pub gpio_modem_reset: GpioDescriptor,

    pub serial_device: String,
    pub serial_baud: u32,

    pub battery_discharge_table_normal: [u32; 11],
    pub battery_discharge_table_5g: [u32; 11],
    pub battery_charge_table: [u32; 11],

    /// 0 means "use default" (rejected by the [3000,3700) range check).
    pub auto_shutdown_voltage_general: u32,
    pub auto_shutdown_voltage_lte: u32,
    pub auto_shutdown_voltage_5g: u32,

    pub led_high_voltage: u32,
    pub led_medium_voltage: u32,
    pub led_low_voltage: u32,
    pub led_work_low_voltage: u32,

    pub startup_voltage: u32,
    pub charger_limit_voltage: u32,
    pub charger_fast_voltage: u32,
    pub battery_full_threshold: u32,

    pub debug_output_log: bool,
    pub debug_modem_external_exec_stdout_log: bool,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            gpio_modem_power: GpioDescriptor::default(),
            gpio_modem_rfkill: GpioDescriptor::default(),
            gpio_modem_reset: GpioDescriptor::default(),
            serial_device: "/dev/ttyS1".to_string(),
            serial_baud: 115200,
            battery_discharge_table_normal: DEFAULT_DISCHARGE_TABLE_NORMAL,
            battery_discharge_table_5g: DEFAULT_DISCHARGE_TABLE_5G,
            battery_charge_table: DEFAULT_CHARGE_TABLE,
            auto_shutdown_voltage_general: 0,
            auto_shutdown_voltage_lte: 0,
            auto_shutdown_voltage_5g: 0,
            led_high_voltage: 0,
            led_medium_voltage: 0,
            led_low_voltage: 0,
            led_work_low_voltage: 0,
            startup_voltage: 0,
            charger_limit_voltage: 0,
            charger_fast_voltage: 0,
            battery_full_threshold: 0,
            debug_output_log: false,
            debug_modem_external_exec_stdout_log: false,
        }
    }
}

/// Returns true if `table` is strictly decreasing (required invariant).
fn table_is_valid(table: &[u32; 11]) -> bool {
    table.windows(2).all(|w| w[0] > w[1])
}

fn parse_table(value: Option<&str>, default: [u32; 11]) -> [u32; 11] {
    let Some(value) = value else {
        return default;
    };
    let parsed: Vec<u32> = value
        .split(',')
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .collect();
    if parsed.len() != 11 {
        warn!("battery table has {} entries, expected 11; using default", parsed.len());
        return default;
    }
    let mut table = [0u32; 11];
    table.copy_from_slice(&parsed);
    if !table_is_valid(&table) {
        warn!("battery table is not strictly decreasing; using default");
        return default;
    }
    table
}

fn parse_auto_shutdown(value: Option<&str>) -> u32 {
    let v = value.and_then(|s| s.trim().parse::<u32>().ok()).unwrap_or(0);
    if v >= AUTO_SHUTDOWN_MIN_MV && v < AUTO_SHUTDOWN_MAX_MV {
        v
    } else {
        0
    }
}

fn get_u32(section: Option<&ini::Properties>, key: &str, default: u32) -> u32 {
    section
        .and_then(|s| s.get(key))
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn get_bool(section: Option<&ini::Properties>, key: &str, default: bool) -> bool {
    section
        .and_then(|s| s.get(key))
        .map(|v| matches!(v.trim(), "1" | "true" | "True" | "TRUE" | "yes"))
        .unwrap_or(default)
}

fn get_str(section: Option<&ini::Properties>, key: &str, default: &str) -> String {
    section
        .and_then(|s| s.get(key))
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| default.to_string())
}

impl StaticConfig {
    /// Load from a key-file at `path`. Any I/O or parse failure is reported
    /// as an error to the caller, who treats it as fatal.
    pub fn load(path: &Path) -> Result<Self, String> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;

        let hw = ini.section(Some("Hardware"));
        let pm = ini.section(Some("PowerManager"));
        let debug = ini.section(Some("Debug"));

        let gpio_modem_power = GpioDescriptor {
            chip: get_str(hw, "GPIOModemPowerChip", ""),
            line: get_u32(hw, "GPIOModemPowerLine", 0),
            active_low: get_bool(hw, "GPIOModemPowerActiveLow", false),
        };
        let gpio_modem_rfkill = GpioDescriptor {
            chip: get_str(hw, "GPIOModemRFKillChip", ""),
            line: get_u32(hw, "GPIOModemRFKillLine", 0),
            active_low: get_bool(hw, "GPIOModemRFKillActiveLow", false),
        };
        let gpio_modem_reset = GpioDescriptor {
            chip: get_str(hw, "GPIOModemResetChip", ""),
            line: get_u32(hw, "GPIOModemResetLine", 0),
            active_low: get_bool(hw, "GPIOModemResetActiveLow", false),
        };

        let serial_device = get_str(pm, "SerialDevice", "/dev/ttyS1");
        let serial_baud = get_u32(pm, "SerialBaud", 115200);

        let battery_discharge_table_normal = parse_table(
            pm.and_then(|s| s.get("BatteryDischargeTableNormal")),
            DEFAULT_DISCHARGE_TABLE_NORMAL,
        );
        let battery_discharge_table_5g = parse_table(
            pm.and_then(|s| s.get("BatteryDischargeTable5G")),
            DEFAULT_DISCHARGE_TABLE_5G,
        );
        let battery_charge_table = parse_table(
            pm.and_then(|s| s.get("BatteryChargeTable")),
            DEFAULT_CHARGE_TABLE,
        );

        let auto_shutdown_voltage_general =
            parse_auto_shutdown(pm.and_then(|s| s.get("AutoShutdownVoltageGeneral")));
        let auto_shutdown_voltage_lte =
            parse_auto_shutdown(pm.and_then(|s| s.get("AutoShutdownVoltageLTE")));
        let auto_shutdown_voltage_5g =
            parse_auto_shutdown(pm.and_then(|s| s.get("AutoShutdownVoltage5G")));

        Ok(Self {
            gpio_modem_power,
            gpio_modem_rfkill,
            gpio_modem_reset,
            serial_device,
            serial_baud,
            battery_discharge_table_normal,
            battery_discharge_table_5g,
            battery_charge_table,
            auto_shutdown_voltage_general,
            auto_shutdown_voltage_lte,
            auto_shutdown_voltage_5g,
            led_high_voltage: get_u32(pm, "LEDHighVoltage", 0),
            led_medium_voltage: get_u32(pm, "LEDMediumVoltage", 0),
            led_low_voltage: get_u32(pm, "LEDLowVoltage", 0),
            led_work_low_voltage: get_u32(pm, "LEDWorkLowVoltage", 0),
            startup_voltage: get_u32(pm, "StartupVoltage", 0),
            charger_limit_voltage: get_u32(pm, "ChargerLimitVoltage", 0),
            charger_fast_voltage: get_u32(pm, "ChargerFastVoltage", 0),
            battery_full_threshold: get_u32(pm, "BatteryFullThreshold", 0),
            debug_output_log: get_bool(debug, "OutputLog", false),
            debug_modem_external_exec_stdout_log: get_bool(
                debug,
                "ModemExternalExecStdoutLog",
                false,
            ),
        })
    }

    /// The serial baud rate to actually use: the configured value if it is
    /// one of the supported rates, otherwise 115200 with a warning.
    pub fn effective_baud(&self) -> u32 {
        const SUPPORTED: [u32; 6] = [4800, 9600, 19200, 38400, 57600, 115200];
        if SUPPORTED.contains(&self.serial_baud) {
            self.serial_baud
        } else {
            warn!(
                "unsupported serial baud {}; falling back to 115200",
                self.serial_baud
            );
            115200
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tables_are_strictly_decreasing() {
        assert!(table_is_valid(&DEFAULT_DISCHARGE_TABLE_NORMAL));
        assert!(table_is_valid(&DEFAULT_DISCHARGE_TABLE_5G));
        assert!(table_is_valid(&DEFAULT_CHARGE_TABLE));
    }

    #[test]
    fn parse_table_rejects_non_decreasing() {
        let bad = "100,200,90,80,70,60,50,40,30,20,10";
        let result = parse_table(Some(bad), DEFAULT_CHARGE_TABLE);
        assert_eq!(result, DEFAULT_CHARGE_TABLE);
    }

    #[test]
    fn parse_table_rejects_wrong_length() {
        let bad = "100,90,80";
        let result = parse_table(Some(bad), DEFAULT_CHARGE_TABLE);
        assert_eq!(result, DEFAULT_CHARGE_TABLE);
    }

    #[test]
    fn parse_table_accepts_valid() {
        let good = "4200,4060,3980,3920,3870,3820,3790,3770,3740,3680,3450";
        let result = parse_table(Some(good), DEFAULT_CHARGE_TABLE);
        assert_eq!(result, DEFAULT_DISCHARGE_TABLE_NORMAL);
    }

    #[test]
    fn auto_shutdown_out_of_range_rejected() {
        assert_eq!(parse_auto_shutdown(Some("2999")), 0);
        assert_eq!(parse_auto_shutdown(Some("3700")), 0);
        assert_eq!(parse_auto_shutdown(Some("3500")), 3500);
    }

    #[test]
    fn effective_baud_falls_back() {
        let mut cfg = StaticConfig::default();
        cfg.serial_baud = 12345;
        assert_eq!(cfg.effective_baud(), 115200);
        cfg.serial_baud = 57600;
        assert_eq!(cfg.effective_baud(), 57600);
    }
}
