/*
 * PCAT Manager - PMU Protocol Engine
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Drives the PMU serial link: outbound queue with ack/retry, inbound frame
//! dispatch, battery percentage bookkeeping, schedule/voltage upload, and
//! shutdown/reboot sequencing.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, Timelike, Utc};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialStream;

use super::commands::*;
use super::frame::{Frame, ParseOutcome, HOST_ADDRESS, PMU_ADDRESS};
use crate::state::{ModemDeviceClass, StateStore};

/// Outbound queue capacity; oldest entry is dropped on overflow.
const QUEUE_CAP: usize = 128;
/// Inbound receive buffer capacity before the oldest half is discarded.
const RECV_BUF_CAP: usize = 128 * 1024;
const RECV_BUF_TRIM: usize = 64 * 1024;
/// Max bytes written to the serial device per write syscall.
const WRITE_CHUNK: usize = 4096;
/// Ack wait / retry spacing.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_RETRIES: u8 = 3;
/// Outer bound the supervisor waits for a shutdown/reboot handshake.
pub const SHUTDOWN_OUTER_BOUND: Duration = Duration::from_secs(30);

/// Voltage thresholds (mV) used when a static-config field is left at 0.
const DEFAULT_LED_HIGH_MV: u32 = 3800;
const DEFAULT_LED_MEDIUM_MV: u32 = 3700;
const DEFAULT_LED_LOW_MV: u32 = 3600;
const DEFAULT_LED_WORK_LOW_MV: u32 = 3500;
const DEFAULT_STARTUP_MV: u32 = 3500;
const DEFAULT_CHARGER_LIMIT_MV: u32 = 4200;
const DEFAULT_CHARGER_FAST_MV: u32 = 4300;
const DEFAULT_BATTERY_FULL_MV: u32 = 4200;
const DEFAULT_SHUTDOWN_MV: u32 = 3400;

/// Requests subsystems outside the reactor thread send to the engine.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    ScheduleChanged,
    ChargerAutoStartChanged,
    LedUpdate { on_ms: u16, off_ms: u16, repeat: u16 },
    RequestShutdown,
    RequestReboot,
    /// SIGUSR1: permanently disable the PMU watchdog.
    DisableWatchdog,
}

/// A sendable, cloneable way to talk to a running `SerialEngine`.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
    shutdown_requested: Arc<AtomicBool>,
    shutdown_completed: Arc<AtomicBool>,
    reboot_completed: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn send(&self, cmd: EngineCommand) {
        // The receiver only ever drops when the engine task has exited, at
        // which point there is nothing useful left to do with the command.
        let _ = self.tx.send(cmd);
    }

    /// True once a shutdown has been requested in-process, whether from a
    /// control-plane/SIGTERM request or from the PMU itself having already
    /// decided to cut power.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// True once the PMU has acked `HOST_REQUEST_SHUTDOWN`.
    pub fn shutdown_completed(&self) -> bool {
        self.shutdown_completed.load(Ordering::SeqCst)
    }

    /// True once the PMU has acked the reboot-arming `WATCHDOG_TIMEOUT_SET`.
    pub fn reboot_completed(&self) -> bool {
        self.reboot_completed.load(Ordering::SeqCst)
    }
}

struct QueuedCommand {
    command: u16,
    frame_num: u16,
    encoded: Vec<u8>,
    need_ack: bool,
    retries_left: u8,
    written: usize,
    /// True until the first byte of this command has ever been written.
    firstrun: bool,
    waiting_since: Option<Instant>,
}

/// Owns the outbound queue, the single in-flight slot, and the inbound
/// receive buffer. Runs on the single-threaded reactor alongside the
/// control server and 1 Hz timers.
pub struct SerialEngine {
    queue: VecDeque<QueuedCommand>,
    in_flight: Option<QueuedCommand>,
    frame_num: u16,
    recv_buf: Vec<u8>,
    prior_frame_last_write: Option<Instant>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,

    shutdown_requested: bool,
    reboot_requested: bool,
    shutdown_requested_flag: Arc<AtomicBool>,
    shutdown_completed: Arc<AtomicBool>,
    reboot_completed: Arc<AtomicBool>,
    shutdown_planned: bool,
    power_on_event: u8,
    last_modem_device_class: Option<ModemDeviceClass>,
}

impl SerialEngine {
    pub fn new() -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown_requested_flag = Arc::new(AtomicBool::new(false));
        let shutdown_completed = Arc::new(AtomicBool::new(false));
        let reboot_completed = Arc::new(AtomicBool::new(false));
        let engine = Self {
            queue: VecDeque::new(),
            in_flight: None,
            frame_num: 0,
            recv_buf: Vec::new(),
            prior_frame_last_write: None,
            cmd_rx: rx,
            shutdown_requested: false,
            reboot_requested: false,
            shutdown_requested_flag: shutdown_requested_flag.clone(),
            shutdown_completed: shutdown_completed.clone(),
            reboot_completed: reboot_completed.clone(),
            shutdown_planned: false,
            power_on_event: 0,
            last_modem_device_class: None,
        };
        let handle = EngineHandle {
            tx,
            shutdown_requested: shutdown_requested_flag,
            shutdown_completed,
            reboot_completed,
        };
        (engine, handle)
    }

    fn next_frame_num(&mut self) -> u16 {
        let n = self.frame_num;
        self.frame_num = self.frame_num.wrapping_add(1);
        n
    }

    /// Queue a command for transmission. Returns the frame number assigned.
    /// On overflow the oldest queued entry is dropped.
    fn submit(&mut self, command: u16, extra: Vec<u8>, need_ack: bool, frame_num: Option<u16>) -> u16 {
        let frame_num = frame_num.unwrap_or_else(|| self.next_frame_num());
        let frame = Frame::new(HOST_ADDRESS, PMU_ADDRESS, frame_num, command, extra, need_ack);
        let encoded = frame.encode();
        if self.queue.len() >= QUEUE_CAP {
            self.queue.pop_front();
        }
        self.queue.push_back(QueuedCommand {
            command,
            frame_num,
            encoded,
            need_ack,
            retries_left: DEFAULT_RETRIES,
            written: 0,
            firstrun: true,
            waiting_since: None,
        });
        frame_num
    }

    /// Reply to an inbound frame that requested an ack. Queued like any
    /// other outbound command, but never itself requires an ack.
    fn reply(&mut self, to_command: u16, frame_num: u16, extra: Vec<u8>) {
        self.submit(to_command + 1, extra, false, Some(frame_num));
    }

    fn handle_request(&mut self, req: EngineCommand, state: &StateStore) {
        match req {
            EngineCommand::ScheduleChanged => self.upload_schedule(state),
            EngineCommand::ChargerAutoStartChanged => self.upload_charger_auto_start(state),
            EngineCommand::LedUpdate { on_ms, off_ms, repeat } => {
                let mut extra = Vec::with_capacity(6);
                extra.extend_from_slice(&on_ms.to_le_bytes());
                extra.extend_from_slice(&off_ms.to_le_bytes());
                extra.extend_from_slice(&repeat.to_le_bytes());
                self.submit(NET_STATUS_LED_SETUP, extra, true, None);
            }
            EngineCommand::RequestShutdown => self.begin_shutdown(),
            EngineCommand::RequestReboot => self.begin_reboot(),
            EngineCommand::DisableWatchdog => {
                self.submit(WATCHDOG_TIMEOUT_SET, vec![60, 60, 0], true, None);
            }
        }
    }

    fn begin_shutdown(&mut self) {
        if self.shutdown_requested {
            return;
        }
        self.shutdown_requested = true;
        self.shutdown_requested_flag.store(true, Ordering::SeqCst);
        self.submit(HOST_REQUEST_SHUTDOWN, Vec::new(), true, None);
        info!("shutdown sequence started");
    }

    fn begin_reboot(&mut self) {
        if self.reboot_requested {
            return;
        }
        self.reboot_requested = true;
        // Arms a 60s watchdog timeout; the PMU will power-cycle the host
        // once it elapses with no further heartbeat.
        self.submit(WATCHDOG_TIMEOUT_SET, vec![60, 60, 60], true, None);
        info!("reboot sequence started");
    }

    fn upload_schedule(&mut self, state: &StateStore) {
        let entries = state.user_config.lock().unwrap().power_schedule_data.clone();
        let mut extra = Vec::with_capacity(entries.len().min(6) * 8);
        for entry in entries.iter().filter(|e| e.enabled && e.action).take(6) {
            extra.extend_from_slice(&entry.year.to_le_bytes());
            extra.push(entry.month);
            extra.push(entry.day);
            extra.push(entry.hour);
            extra.push(entry.minute);
            extra.push(entry.dow_bits);
            extra.push(entry.enable_bits);
        }
        self.submit(SCHEDULE_STARTUP_TIME_SET, extra, true, None);
    }

    fn upload_charger_auto_start(&mut self, state: &StateStore) {
        let on = state.user_config.lock().unwrap().charger_on_auto_start;
        self.submit(CHARGER_ON_AUTO_START, vec![on as u8], true, None);
    }

    fn upload_voltage_thresholds(&mut self, state: &StateStore, shutdown_override: u32) {
        let cfg = &state.static_config;
        let pick = |v: u32, default: u32| if v == 0 { default } else { v };
        let fields = [
            pick(cfg.led_high_voltage, DEFAULT_LED_HIGH_MV),
            pick(cfg.led_medium_voltage, DEFAULT_LED_MEDIUM_MV),
            pick(cfg.led_low_voltage, DEFAULT_LED_LOW_MV),
            pick(cfg.startup_voltage, DEFAULT_STARTUP_MV),
            pick(cfg.charger_limit_voltage, DEFAULT_CHARGER_LIMIT_MV),
            pick(shutdown_override, DEFAULT_SHUTDOWN_MV),
            pick(cfg.led_work_low_voltage, DEFAULT_LED_WORK_LOW_MV),
            pick(cfg.charger_fast_voltage, DEFAULT_CHARGER_FAST_MV),
            pick(cfg.battery_full_threshold, DEFAULT_BATTERY_FULL_MV),
        ];
        let mut extra = Vec::with_capacity(18);
        for v in fields {
            extra.extend_from_slice(&(v as u16).to_le_bytes());
        }
        self.submit(VOLTAGE_THRESHOLD_SET, extra, true, None);
    }

    /// Picks the auto-shutdown voltage for the currently detected modem
    /// device class. Mirrors `original_source/src/pmu-manager.c`'s
    /// `modem_device_type` switch verbatim, including its apparent swap of
    /// the LTE and general cases (the `General` device class consumes the
    /// configured *LTE* voltage, and anything else falls back to
    /// `General`) — preserved rather than "corrected", following the
    /// original firmware on this undocumented detail.
    fn shutdown_voltage_for_class(cfg: &crate::config::StaticConfig, class: ModemDeviceClass) -> u32 {
        match class {
            ModemDeviceClass::FiveG => cfg.auto_shutdown_voltage_5g,
            ModemDeviceClass::General => cfg.auto_shutdown_voltage_lte,
            ModemDeviceClass::None => cfg.auto_shutdown_voltage_general,
        }
    }

    /// Frames to send once, right after the link comes up.
    pub fn on_link_up(&mut self, state: &StateStore) {
        self.submit(PMU_FW_VERSION_GET, Vec::new(), true, None);
        self.submit(POWER_ON_EVENT_GET, Vec::new(), true, None);
        let class = state.modem.lock().unwrap().device_class;
        self.last_modem_device_class = Some(class);
        let shutdown = Self::shutdown_voltage_for_class(&state.static_config, class);
        self.upload_voltage_thresholds(state, shutdown);
        self.upload_schedule(state);
        self.upload_charger_auto_start(state);
    }

    /// Re-sends the shutdown-voltage threshold whenever the detected modem
    /// device class changes, mirroring `original_source/src/pmu-manager.c`'s
    /// `modem_device_type` change check.
    fn check_modem_class_change(&mut self, state: &StateStore) {
        let class = state.modem.lock().unwrap().device_class;
        if self.last_modem_device_class == Some(class) {
            return;
        }
        self.last_modem_device_class = Some(class);
        let shutdown = Self::shutdown_voltage_for_class(&state.static_config, class);
        info!("modem device class changed; re-uploading shutdown voltage {} mV", shutdown);
        self.upload_voltage_thresholds(state, shutdown);
    }

    fn promote_if_needed(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let ready = match self.queue.front() {
            Some(next) if next.firstrun => true,
            Some(_) => self
                .prior_frame_last_write
                .map(|t| t.elapsed() >= ACK_TIMEOUT)
                .unwrap_or(true),
            None => false,
        };
        if ready {
            self.in_flight = self.queue.pop_front();
        }
    }

    async fn drain_write(&mut self, stream: &mut SerialStream) {
        self.promote_if_needed();
        let Some(cmd) = self.in_flight.as_mut() else {
            return;
        };
        if cmd.written >= cmd.encoded.len() {
            return;
        }
        let remaining = &cmd.encoded[cmd.written..];
        let chunk_len = remaining.len().min(WRITE_CHUNK);
        match stream.write(&remaining[..chunk_len]).await {
            Ok(0) => {}
            Ok(n) => {
                cmd.written += n;
                cmd.firstrun = false;
                if cmd.written >= cmd.encoded.len() {
                    let now = Instant::now();
                    self.prior_frame_last_write = Some(now);
                    if cmd.need_ack {
                        cmd.waiting_since = Some(now);
                    } else {
                        self.in_flight = None;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("serial write error: {}", e),
        }
    }

    /// Called once a second: resend or abandon an unacked in-flight command
    /// once it exceeds the retry bound.
    fn check_retry_timeout(&mut self) {
        let Some(cmd) = self.in_flight.as_mut() else {
            return;
        };
        let Some(since) = cmd.waiting_since else {
            return;
        };
        if since.elapsed() < ACK_TIMEOUT {
            return;
        }
        if cmd.retries_left > 0 {
            cmd.retries_left -= 1;
            cmd.written = 0;
            cmd.waiting_since = None;
            debug!("retrying command 0x{:02x}, {} attempts left", cmd.command, cmd.retries_left);
        } else {
            warn!("command 0x{:02x} abandoned after exhausting retries", cmd.command);
            self.in_flight = None;
        }
    }

    fn handle_incoming_bytes(&mut self, bytes: &[u8], state: &StateStore) {
        self.recv_buf.extend_from_slice(bytes);
        if self.recv_buf.len() > RECV_BUF_CAP {
            warn!("serial receive buffer overflow; discarding oldest bytes");
            let drop_to = self.recv_buf.len() - RECV_BUF_TRIM;
            self.recv_buf.drain(..drop_to);
        }

        loop {
            match super::frame::try_parse(&self.recv_buf) {
                ParseOutcome::Incomplete => break,
                ParseOutcome::Invalid => {
                    self.recv_buf.drain(..1);
                }
                ParseOutcome::Complete { frame, consumed } => {
                    self.recv_buf.drain(..consumed);
                    if frame.is_for_host() {
                        self.on_frame(frame, state);
                    }
                }
            }
        }
    }

    fn match_ack(&mut self, frame: &Frame) {
        let matched = self
            .in_flight
            .as_ref()
            .map(|cmd| {
                cmd.waiting_since.is_some()
                    && frame.command == cmd.command + 1
                    && frame.frame_num == cmd.frame_num
            })
            .unwrap_or(false);
        if !matched {
            return;
        }
        let completed_command = self.in_flight.as_ref().unwrap().command;
        self.in_flight = None;
        self.prior_frame_last_write = Some(Instant::now());
        match completed_command {
            HOST_REQUEST_SHUTDOWN => self.shutdown_completed.store(true, Ordering::SeqCst),
            WATCHDOG_TIMEOUT_SET => self.reboot_completed.store(true, Ordering::SeqCst),
            _ => {}
        }
    }

    fn on_frame(&mut self, frame: Frame, state: &StateStore) {
        self.match_ack(&frame);

        let ack_extra = match frame.command {
            STATUS_REPORT => {
                self.handle_status_report(&frame.extra, state);
                Vec::new()
            }
            PMU_FW_VERSION_GET_ACK => {
                let text: String = frame
                    .extra
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| b as char)
                    .collect();
                state.pmu.lock().unwrap().pmu_fw_version = Some(text);
                Vec::new()
            }
            POWER_ON_EVENT_GET_ACK => {
                if let Some(&event) = frame.extra.first() {
                    self.power_on_event = event;
                    state.pmu.lock().unwrap().power_on_event = event;
                }
                Vec::new()
            }
            PMU_REQUEST_SHUTDOWN => {
                // The PMU has already decided to cut power; acknowledge and
                // let the outer supervisor proceed straight to poweroff
                // without a second HOST_REQUEST_SHUTDOWN round-trip.
                self.shutdown_requested = true;
                self.shutdown_requested_flag.store(true, Ordering::SeqCst);
                self.shutdown_completed.store(true, Ordering::SeqCst);
                Vec::new()
            }
            PMU_REQUEST_FACTORY_RESET => {
                if let Err(e) = std::process::Command::new("/usr/sbin/pcat-factory-reset").spawn() {
                    warn!("failed to spawn factory reset helper: {}", e);
                }
                vec![0]
            }
            _ => Vec::new(),
        };

        if frame.need_ack {
            self.reply(frame.command, frame.frame_num, ack_extra);
        }
    }

    fn handle_status_report(&mut self, extra: &[u8], state: &StateStore) {
        if extra.len() < 18 {
            warn!("STATUS_REPORT payload too short ({} bytes)", extra.len());
            return;
        }
        let get_u16 = |i: usize| -> u16 {
            if i + 1 < extra.len() {
                u16::from_le_bytes([extra[i], extra[i + 1]])
            } else {
                0
            }
        };
        let get_u8 = |i: usize| -> u8 { extra.get(i).copied().unwrap_or(0) };

        let battery_voltage_mv = get_u16(0);
        let charger_voltage_mv = get_u16(2);
        let year = get_u16(8);
        let month = get_u8(10);
        let day = get_u8(11);
        let hour = get_u8(12);
        let minute = get_u8(13);
        let second = get_u8(14);
        let board_temp_raw = get_u8(17);
        let board_temp_c = board_temp_raw as i32 - 40;

        let modem_class = state.modem.lock().unwrap().device_class;
        {
            let mut pmu = state.pmu.lock().unwrap();
            pmu.battery_voltage_mv = battery_voltage_mv;
            pmu.charger_voltage_mv = charger_voltage_mv;
            pmu.board_temp_c = board_temp_c;
            compute_battery_percentage(&mut pmu, &state.static_config, modem_class);
            if charger_voltage_mv >= 4200 {
                pmu.charger_last_seen_monotonic = Some(Instant::now());
            }
        }
        state.set_board_temp_fast(board_temp_c);

        write_battery_namespace_files(state);
        self.maybe_sync_clock(year, month, day, hour, minute, second, state);
    }

    fn maybe_sync_clock(
        &mut self,
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        state: &StateStore,
    ) {
        let Some(pmu_time) = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
        else {
            warn!("STATUS_REPORT carried an invalid date/time; ignoring");
            return;
        };

        let mut pmu = state.pmu.lock().unwrap();
        if !pmu.system_time_set_from_pmu {
            match crate::clock::set_system_time(pmu_time) {
                Ok(()) => info!("system clock adopted from PMU: {}", pmu_time),
                Err(e) => warn!("failed to adopt PMU clock: {}", e),
            }
            pmu.system_time_set_from_pmu = true;
            return;
        }
        drop(pmu);

        let host_now = Utc::now().naive_utc();
        let drift = (host_now - pmu_time).num_seconds().abs();
        if drift > 60 {
            let mut extra = Vec::with_capacity(7);
            extra.extend_from_slice(&(host_now.year() as u16).to_le_bytes());
            extra.push(host_now.month() as u8);
            extra.push(host_now.day() as u8);
            extra.push(host_now.hour() as u8);
            extra.push(host_now.minute() as u8);
            extra.push(host_now.second() as u8);
            self.submit(DATE_TIME_SYNC, extra, true, None);
        }
    }

    /// Once-a-second heartbeat, schedule dispatch, and auto-shutdown-on-
    /// charger-timeout check.
    fn tick_1hz(&mut self, state: &StateStore) {
        self.check_retry_timeout();
        self.check_modem_class_change(state);

        if self.shutdown_requested || self.reboot_requested {
            return;
        }

        self.submit(HEARTBEAT, Vec::new(), false, None);

        let now = Utc::now();
        let charger_auto_start = state.user_config.lock().unwrap().charger_on_auto_start;
        let timeout = state.user_config.lock().unwrap().charger_on_auto_start_timeout;
        if charger_auto_start && matches!(self.power_on_event, 3 | 4) {
            let last_seen = state.pmu.lock().unwrap().charger_last_seen_monotonic;
            let elapsed = last_seen.map(|t| t.elapsed().as_secs()).unwrap_or(u64::MAX);
            if elapsed >= timeout as u64 {
                self.begin_shutdown();
                return;
            }
        }

        if self.shutdown_planned {
            return;
        }
        let weekday_sun0 = now.weekday().num_days_from_sunday() as u8;
        let entries = state.user_config.lock().unwrap().power_schedule_data.clone();
        for entry in entries.iter().filter(|e| e.enabled && !e.action) {
            if entry.matches_utc(
                now.year() as u16,
                now.month() as u8,
                now.day() as u8,
                now.hour() as u8,
                now.minute() as u8,
                weekday_sun0,
            ) {
                self.shutdown_planned = true;
                self.begin_shutdown();
                break;
            }
        }
    }

    /// Runs until the reactor is torn down. Reads off the serial link,
    /// drains the outbound queue, and ticks the 1 Hz housekeeping work.
    pub async fn run(mut self, mut stream: SerialStream, state: Arc<StateStore>) {
        self.on_link_up(&state);

        let mut read_buf = [0u8; 4096];
        let mut drain_ticker = tokio::time::interval(Duration::from_millis(100));
        let mut last_second = Instant::now();

        loop {
            while let Ok(req) = self.cmd_rx.try_recv() {
                self.handle_request(req, &state);
            }

            tokio::select! {
                result = stream.read(&mut read_buf) => {
                    match result {
                        Ok(0) => {}
                        Ok(n) => self.handle_incoming_bytes(&read_buf[..n], &state),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                        Err(e) => warn!("serial read error: {}", e),
                    }
                }
                _ = drain_ticker.tick() => {
                    self.drain_write(&mut stream).await;
                    if last_second.elapsed() >= Duration::from_secs(1) {
                        last_second = Instant::now();
                        self.tick_1hz(&state);
                    }
                }
            }
        }
    }
}

fn select_table<'a>(
    cfg: &'a crate::config::StaticConfig,
    on_battery: bool,
    modem_class: ModemDeviceClass,
) -> &'a [u32; 11] {
    if !on_battery {
        &cfg.battery_charge_table
    } else if modem_class == ModemDeviceClass::FiveG {
        &cfg.battery_discharge_table_5g
    } else {
        &cfg.battery_discharge_table_normal
    }
}

/// Piecewise-linear lookup, in basis points.
fn percentage_x100_from_table(table: &[u32; 11], v_mv: u32) -> u32 {
    if v_mv > table[0] {
        return 10000;
    }
    if v_mv <= table[10] {
        return 0;
    }
    for i in 0..10 {
        if table[i] >= v_mv && v_mv >= table[i + 1] {
            let base = 90.0 - 10.0 * i as f64;
            let num = (v_mv as f64 - table[i + 1] as f64) * 10.0;
            let den = (table[i] as f64 - table[i + 1] as f64).max(1.0);
            let percent = base + num / den;
            return (percent * 100.0).round() as u32;
        }
    }
    0
}

fn compute_battery_percentage(
    pmu: &mut crate::state::PmuState,
    cfg: &crate::config::StaticConfig,
    modem_class: ModemDeviceClass,
) {
    let on_battery = pmu.charger_voltage_mv < 4200;
    pmu.on_battery = on_battery;
    let table = select_table(cfg, on_battery, modem_class);
    let raw = percentage_x100_from_table(table, pmu.battery_voltage_mv as u32);
    if !on_battery {
        pmu.battery_percentage_cap_x100 = 10000;
        pmu.battery_percentage_x100 = raw;
    } else {
        let capped = raw.min(pmu.battery_percentage_cap_x100);
        pmu.battery_percentage_cap_x100 = capped;
        pmu.battery_percentage_x100 = capped;
    }
}

fn write_battery_namespace_files(state: &StateStore) {
    let dir = std::path::Path::new("/run/state/namespaces/Battery");
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("failed to create battery namespace dir: {}", e);
        return;
    }
    let pmu = state.pmu.lock().unwrap();
    let percent = pmu.battery_percentage_x100 as f64 / 100.0;
    let voltage_uv = pmu.battery_voltage_mv as u64 * 1000;
    let on_battery = if pmu.on_battery { "1" } else { "0" };
    let _ = std::fs::write(dir.join("ChargePercentage"), format!("{:.2}\n", percent));
    let _ = std::fs::write(dir.join("Voltage"), format!("{}\n", voltage_uv));
    let _ = std::fs::write(dir.join("OnBattery"), format!("{}\n", on_battery));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::state::PmuState;

    #[test]
    fn percentage_full_above_table_top() {
        let table = default_charge_table();
        assert_eq!(percentage_x100_from_table(&table, 5000), 10000);
    }

    #[test]
    fn percentage_zero_below_table_bottom() {
        let table = default_charge_table();
        assert_eq!(percentage_x100_from_table(&table, 1000), 0);
    }

    #[test]
    fn percentage_interpolates_within_segment() {
        let table = [4200, 4060, 3980, 3920, 3870, 3820, 3790, 3770, 3740, 3680, 3450];
        // Exactly at table[0]: falls into the i=0 segment, evaluates to 100%.
        assert_eq!(percentage_x100_from_table(&table, 4200), 10000);
        // Midway between table[1] and table[0]: 90 + 5 = 95%.
        assert_eq!(percentage_x100_from_table(&table, 4130), 9500);
    }

    #[test]
    fn cap_only_decreases_while_on_battery() {
        let cfg = StaticConfig::default();
        let mut pmu = PmuState::default();
        pmu.charger_voltage_mv = 0; // on battery
        pmu.battery_voltage_mv = 4200;
        compute_battery_percentage(&mut pmu, &cfg, ModemDeviceClass::None);
        assert_eq!(pmu.battery_percentage_x100, 10000);

        // Voltage dips: percentage and cap both drop.
        pmu.battery_voltage_mv = 3900;
        compute_battery_percentage(&mut pmu, &cfg, ModemDeviceClass::None);
        let dipped = pmu.battery_percentage_x100;
        assert!(dipped < 10000);

        // Voltage recovers above the dip: reported value must not increase
        // while still on battery (anti-jitter monotonic cap).
        pmu.battery_voltage_mv = 4200;
        compute_battery_percentage(&mut pmu, &cfg, ModemDeviceClass::None);
        assert_eq!(pmu.battery_percentage_x100, dipped);
    }

    #[test]
    fn leaving_battery_resets_cap() {
        let cfg = StaticConfig::default();
        let mut pmu = PmuState::default();
        pmu.charger_voltage_mv = 0;
        pmu.battery_voltage_mv = 3900;
        compute_battery_percentage(&mut pmu, &cfg, ModemDeviceClass::None);
        assert!(pmu.battery_percentage_x100 < 10000);

        pmu.charger_voltage_mv = 4200; // charger attached
        pmu.battery_voltage_mv = 4150;
        compute_battery_percentage(&mut pmu, &cfg, ModemDeviceClass::None);
        assert_eq!(pmu.battery_percentage_cap_x100, 10000);
    }

    #[test]
    fn submit_overflow_drops_oldest() {
        let (mut engine, _handle) = SerialEngine::new();
        for i in 0..QUEUE_CAP + 5 {
            engine.submit(HEARTBEAT, vec![i as u8], false, None);
        }
        assert_eq!(engine.queue.len(), QUEUE_CAP);
    }

    #[test]
    fn at_most_one_in_flight() {
        let (mut engine, _handle) = SerialEngine::new();
        engine.submit(HEARTBEAT, Vec::new(), false, None);
        engine.submit(PMU_FW_VERSION_GET, Vec::new(), true, None);
        engine.promote_if_needed();
        assert!(engine.in_flight.is_some());
        assert_eq!(engine.queue.len(), 1);
        engine.promote_if_needed();
        assert_eq!(engine.queue.len(), 1);
    }

    fn default_charge_table() -> [u32; 11] {
        crate::config::static_config::DEFAULT_CHARGE_TABLE
    }

    fn test_state() -> StateStore {
        StateStore::new(StaticConfig::default(), crate::config::UserConfig::default())
    }

    #[test]
    fn heartbeat_submits_literal_reference_frame() {
        // Within 2s of start the host emits this exact byte sequence.
        // `on_link_up` submits other commands first, so drive
        // `tick_1hz` directly and find the heartbeat in the queue.
        let (mut engine, _handle) = SerialEngine::new();
        let state = test_state();
        engine.tick_1hz(&state);

        let heartbeat = engine
            .queue
            .iter()
            .find(|c| c.command == HEARTBEAT)
            .expect("heartbeat queued");
        assert_eq!(
            heartbeat.encoded,
            [0xA5, 0x01, 0x81, 0x00, 0x00, 0x03, 0x00, 0x01, 0x00, 0x00, 0xC8, 0x44, 0x5A]
        );
    }

    #[test]
    fn status_report_updates_state_store() {
        let (mut engine, _handle) = SerialEngine::new();
        let state = test_state();

        let mut extra = Vec::new();
        extra.extend_from_slice(&4200u16.to_le_bytes()); // battery voltage
        extra.extend_from_slice(&0u16.to_le_bytes()); // charger voltage
        extra.extend_from_slice(&0u16.to_le_bytes()); // gpio_in
        extra.extend_from_slice(&0u16.to_le_bytes()); // gpio_out
        extra.extend_from_slice(&2024u16.to_le_bytes()); // year
        extra.push(1); // month
        extra.push(1); // day
        extra.push(0); // hour
        extra.push(0); // minute
        extra.push(0); // second
        extra.push(0); // reserved
        extra.push(0); // reserved
        extra.push(0x64); // board temp (100 -> 60C)

        engine.handle_status_report(&extra, &state);

        let pmu = state.pmu.lock().unwrap();
        assert_eq!(pmu.battery_voltage_mv, 4200);
        assert!(pmu.on_battery);
        assert_eq!(pmu.battery_percentage_x100, 10000);
        assert_eq!(pmu.board_temp_c, 60);
    }

    #[test]
    fn schedule_upload_omits_disabled_entries() {
        use crate::config::user_config::{enable_bits, PowerScheduleEntry};
        let (mut engine, _handle) = SerialEngine::new();
        let state = test_state();
        state.user_config.lock().unwrap().power_schedule_data = vec![
            PowerScheduleEntry {
                enabled: true,
                action: true,
                enable_bits: enable_bits::MINUTE,
                year: 0,
                month: 0,
                day: 0,
                hour: 0,
                minute: 30,
                dow_bits: 0,
            },
            PowerScheduleEntry {
                enabled: false,
                action: true,
                enable_bits: enable_bits::MINUTE,
                minute: 45,
                ..Default::default()
            },
        ];

        engine.upload_schedule(&state);

        let queued = engine
            .queue
            .iter()
            .find(|c| c.command == SCHEDULE_STARTUP_TIME_SET)
            .expect("schedule upload queued");
        assert_eq!(queued.encoded.len(), 13 + 8); // one entry: 8-byte payload
        let payload = &queued.encoded[9..9 + 8];
        assert_eq!(payload[5], 30); // minute
        assert_eq!(payload[7] & enable_bits::MINUTE, enable_bits::MINUTE);
    }

    #[test]
    fn reboot_arms_watchdog_with_60s_timeout() {
        // begin_reboot() enqueues WATCHDOG_TIMEOUT_SET packed as the 3-byte
        // `{60, 60, timeout_s}` payload.
        let (mut engine, _handle) = SerialEngine::new();
        engine.begin_reboot();
        let queued = engine
            .queue
            .iter()
            .find(|c| c.command == WATCHDOG_TIMEOUT_SET)
            .expect("watchdog timeout set queued");
        let payload = &queued.encoded[9..9 + 3];
        assert_eq!(payload, &[60, 60, 60]);
    }

    #[test]
    fn shutdown_requested_flag_set_before_pmu_acks() {
        let (mut engine, handle) = SerialEngine::new();
        assert!(!handle.shutdown_requested());
        engine.begin_shutdown();
        assert!(handle.shutdown_requested());
        assert!(!handle.shutdown_completed());
    }

    #[test]
    fn pmu_initiated_shutdown_sets_requested_flag_too() {
        // A PMU-initiated shutdown triggers the shutdown path without
        // re-requesting it from the PMU — the in-process flag a SIGTERM
        // handler consults must reflect this just as it would a
        // host-initiated shutdown.
        let (mut engine, handle) = SerialEngine::new();
        let state = test_state();
        let frame = Frame::new(PMU_ADDRESS, HOST_ADDRESS, 0, PMU_REQUEST_SHUTDOWN, Vec::new(), false);
        engine.on_frame(frame, &state);
        assert!(handle.shutdown_requested());
        assert!(handle.shutdown_completed());
    }

    #[test]
    fn shutdown_handshake_completes_on_matching_ack() {
        let (mut engine, handle) = SerialEngine::new();
        engine.begin_shutdown();
        assert!(!handle.shutdown_completed());

        let queued = engine.queue.front().unwrap();
        let frame_num = queued.frame_num;
        engine.promote_if_needed();
        // Simulate the full write completing and the ack wait starting.
        engine.in_flight.as_mut().unwrap().waiting_since = Some(Instant::now());

        let ack = Frame::new(
            PMU_ADDRESS,
            HOST_ADDRESS,
            frame_num,
            HOST_REQUEST_SHUTDOWN_ACK,
            Vec::new(),
            false,
        );
        engine.match_ack(&ack);
        assert!(handle.shutdown_completed());
    }

    #[test]
    fn shutdown_voltage_mapping_swaps_general_and_lte() {
        // original_source/src/pmu-manager.c's modem_device_type switch:
        // FiveG consumes the 5G voltage, General consumes the *LTE*
        // voltage, and None falls back to general, preserved verbatim.
        let mut cfg = StaticConfig::default();
        cfg.auto_shutdown_voltage_general = 3300;
        cfg.auto_shutdown_voltage_lte = 3400;
        cfg.auto_shutdown_voltage_5g = 3500;

        assert_eq!(
            SerialEngine::shutdown_voltage_for_class(&cfg, ModemDeviceClass::FiveG),
            3500
        );
        assert_eq!(
            SerialEngine::shutdown_voltage_for_class(&cfg, ModemDeviceClass::General),
            3400
        );
        assert_eq!(
            SerialEngine::shutdown_voltage_for_class(&cfg, ModemDeviceClass::None),
            3300
        );
    }

    #[test]
    fn modem_class_change_triggers_voltage_reupload() {
        let (mut engine, _handle) = SerialEngine::new();
        let state = test_state();
        engine.last_modem_device_class = Some(ModemDeviceClass::None);
        state.modem.lock().unwrap().device_class = ModemDeviceClass::FiveG;

        engine.check_modem_class_change(&state);

        assert_eq!(engine.last_modem_device_class, Some(ModemDeviceClass::FiveG));
        assert!(engine.queue.iter().any(|c| c.command == VOLTAGE_THRESHOLD_SET));
    }

    #[test]
    fn modem_class_unchanged_does_not_reupload() {
        let (mut engine, _handle) = SerialEngine::new();
        let state = test_state();
        engine.last_modem_device_class = Some(ModemDeviceClass::None);
        state.modem.lock().unwrap().device_class = ModemDeviceClass::None;

        engine.check_modem_class_change(&state);

        assert!(!engine.queue.iter().any(|c| c.command == VOLTAGE_THRESHOLD_SET));
    }
}
