/*
 * PCAT Manager - PMU Command IDs
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! PMU command id table. Every even id is the ACK for the preceding odd id.

pub const HEARTBEAT: u16 = 0x01;
pub const HEARTBEAT_ACK: u16 = 0x02;
pub const PMU_HW_VERSION_GET: u16 = 0x03;
pub const PMU_HW_VERSION_GET_ACK: u16 = 0x04;
pub const PMU_FW_VERSION_GET: u16 = 0x05;
pub const PMU_FW_VERSION_GET_ACK: u16 = 0x06;
pub const STATUS_REPORT: u16 = 0x07;
pub const STATUS_REPORT_ACK: u16 = 0x08;
pub const DATE_TIME_SYNC: u16 = 0x09;
pub const DATE_TIME_SYNC_ACK: u16 = 0x0A;
pub const SCHEDULE_STARTUP_TIME_SET: u16 = 0x0B;
pub const SCHEDULE_STARTUP_TIME_SET_ACK: u16 = 0x0C;
pub const PMU_REQUEST_SHUTDOWN: u16 = 0x0D;
pub const PMU_REQUEST_SHUTDOWN_ACK: u16 = 0x0E;
pub const HOST_REQUEST_SHUTDOWN: u16 = 0x0F;
pub const HOST_REQUEST_SHUTDOWN_ACK: u16 = 0x10;
pub const PMU_REQUEST_FACTORY_RESET: u16 = 0x11;
pub const PMU_REQUEST_FACTORY_RESET_ACK: u16 = 0x12;
pub const WATCHDOG_TIMEOUT_SET: u16 = 0x13;
pub const WATCHDOG_TIMEOUT_SET_ACK: u16 = 0x14;
pub const CHARGER_ON_AUTO_START: u16 = 0x15;
pub const CHARGER_ON_AUTO_START_ACK: u16 = 0x16;
pub const VOLTAGE_THRESHOLD_SET: u16 = 0x17;
pub const VOLTAGE_THRESHOLD_SET_ACK: u16 = 0x18;
pub const NET_STATUS_LED_SETUP: u16 = 0x19;
pub const NET_STATUS_LED_SETUP_ACK: u16 = 0x1A;
pub const POWER_ON_EVENT_GET: u16 = 0x1B;
pub const POWER_ON_EVENT_GET_ACK: u16 = 0x1C;
