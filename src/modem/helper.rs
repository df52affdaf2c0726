/*
 * PCAT Manager - Modem Dial Helper
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Spawns the external dial-helper (`quectel-cm` by default) and parses its
//! CR/LF-delimited, comma-separated `KEY=VALUE` stdout lines.

use std::collections::HashMap;
use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::process::{Child, Command, Stdio};

use log::{debug, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::state::{ModemMode, ModemStatus, SimState};

const LINE_BUFFER_CAP: usize = 1024 * 1024;

/// A running dial-helper child process plus its stdout line accumulator.
pub struct HelperProcess {
    child: Child,
    stdout: std::process::ChildStdout,
    line_buf: Vec<u8>,
    log_stdout: bool,
}

impl HelperProcess {
    pub fn spawn(binary: &str, log_stdout: bool) -> std::io::Result<Self> {
        let mut child = Command::new(binary)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        set_nonblocking(&stdout)?;
        Ok(Self {
            child,
            stdout,
            line_buf: Vec::new(),
            log_stdout,
        })
    }

    /// True if the child has exited. Reaps the exit status if so.
    pub fn poll_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    pub fn terminate(&mut self) {
        // Soft request first; give it a moment before force-killing.
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM);
        }
        std::thread::sleep(std::time::Duration::from_millis(500));
        if !self.poll_exited() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }

    /// Non-blocking single read: the underlying fd is put in `O_NONBLOCK`
    /// mode at spawn time, so this reads whatever is currently available (if
    /// anything) up to a small chunk and returns immediately either way,
    /// feeding complete lines to `on_line`. Callers loop this at the modem
    /// thread's normal `≤100 ms` polling cadence rather than blocking here,
    /// so `work_flag` and the rfkill channel stay responsive while the
    /// helper is alive but silent.
    pub fn read_available(&mut self, on_line: impl Fn(&HashMap<String, String>)) -> std::io::Result<()> {
        let mut chunk = [0u8; 4096];
        let n = match self.stdout.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(());
        }
        if self.log_stdout {
            debug!("modem helper stdout: {}", String::from_utf8_lossy(&chunk[..n]));
        }
        self.line_buf.extend_from_slice(&chunk[..n]);
        if self.line_buf.len() > LINE_BUFFER_CAP {
            warn!("modem helper stdout line buffer overflow; resetting");
            self.line_buf.clear();
            return Ok(());
        }

        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let fields = parse_kv_line(trimmed);
            on_line(&fields);
        }
        Ok(())
    }
}

/// Sets `O_NONBLOCK` on the helper's stdout pipe so `read_available` never
/// parks the modem thread waiting on helper output.
fn set_nonblocking(stdout: &std::process::ChildStdout) -> std::io::Result<()> {
    let to_io_error = |e: nix::errno::Errno| std::io::Error::from_raw_os_error(e as i32);
    let fd = stdout.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(to_io_error)?;
    let mut oflags = OFlag::from_bits_truncate(flags);
    oflags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(oflags)).map_err(to_io_error)?;
    Ok(())
}

fn parse_kv_line(line: &str) -> HashMap<String, String> {
    line.split(',')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next().unwrap_or("").trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

fn map_mode(value: &str) -> ModemMode {
    match value {
        "NR5G-SA" | "NR5G-NSA" => ModemMode::FiveG,
        "LTE" => ModemMode::Lte,
        "WCDMA" | "TDSCDMA" => ModemMode::ThreeG,
        "GSM" | "HDR" | "CDMA" => ModemMode::TwoG,
        _ => ModemMode::None,
    }
}

fn map_sim_state(value: &str) -> SimState {
    match value {
        "ABSENT" => SimState::Absent,
        "NOT_READY" | "NOTREADY" => SimState::NotReady,
        "READY" => SimState::Ready,
        "NEED_PIN" | "NEEDPIN" => SimState::NeedPin,
        "NEED_PUK" | "NEEDPUK" => SimState::NeedPuk,
        "PERSONALIZED_NETWORK" | "PERSONALIZEDNETWORK" => SimState::PersonalizedNetwork,
        _ => SimState::Bad,
    }
}

fn signal_from_rssi(v: f64) -> u8 {
    if v >= 0.0 {
        100
    } else if v >= -100.0 {
        (v + 100.0).round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn signal_from_rsrq(v: f64) -> u8 {
    if v >= -10.0 {
        100
    } else if v >= -20.0 {
        ((v + 20.0) * 10.0).round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn signal_from_rsrp(v: f64) -> u8 {
    if v >= -80.0 {
        100
    } else if v >= -100.0 {
        ((v + 100.0) * 5.0).round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn signal_from_rscp(v: f64) -> u8 {
    if v >= -60.0 {
        100
    } else if v >= -100.0 {
        ((v + 100.0) * 5.0 / 2.0).round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn signal_strength(fields: &HashMap<String, String>) -> Option<u8> {
    for (key, f) in [
        ("RSSI", signal_from_rssi as fn(f64) -> u8),
        ("RSRQ", signal_from_rsrq),
        ("RSRP", signal_from_rsrp),
        ("RSCP", signal_from_rscp),
    ] {
        if let Some(raw) = fields.get(key).and_then(|v| v.parse::<f64>().ok()) {
            return Some(f(raw));
        }
    }
    None
}

/// Apply one parsed helper line to `status` in place.
pub fn apply_line(status: &mut ModemStatus, fields: &HashMap<String, String>) {
    match fields.get("CMD").map(String::as_str) {
        Some("SIGNALINFO") => {
            if let Some(mode) = fields.get("MODE") {
                status.mode = map_mode(mode);
                status.mode_ever_observed = true;
            }
            if let Some(strength) = signal_strength(fields) {
                status.signal_strength = strength;
            }
        }
        Some("SIMSTATE") => {
            if let Some(state) = fields.get("STATE") {
                status.sim_state = map_sim_state(state);
            }
        }
        Some("ISPINFO") => {
            if let Some(name) = fields.get("ISPNAME") {
                status.isp_name = name.clone();
            }
            if let Some(plmn) = fields.get("PLMN") {
                status.isp_plmn = plmn.clone();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signalinfo_line() {
        let fields = parse_kv_line("CMD=SIGNALINFO,MODE=LTE,RSRP=-90");
        let mut status = ModemStatus::default();
        apply_line(&mut status, &fields);
        assert_eq!(status.mode, ModemMode::Lte);
        assert!(status.mode_ever_observed);
        assert_eq!(status.signal_strength, 50); // (-90+100)*5 = 50
    }

    #[test]
    fn rssi_clamped_at_bounds() {
        assert_eq!(signal_from_rssi(10.0), 100);
        assert_eq!(signal_from_rssi(-150.0), 0);
        assert_eq!(signal_from_rssi(-50.0), 50);
    }

    #[test]
    fn parses_simstate_line() {
        let fields = parse_kv_line("CMD=SIMSTATE,STATE=NEED_PIN");
        let mut status = ModemStatus::default();
        apply_line(&mut status, &fields);
        assert_eq!(status.sim_state, SimState::NeedPin);
    }

    #[test]
    fn parses_simstate_needpin_literal() {
        // Some helper builds emit the run-together spelling.
        let fields = parse_kv_line("CMD=SIMSTATE,STATE=NEEDPIN");
        let mut status = ModemStatus::default();
        apply_line(&mut status, &fields);
        assert_eq!(status.sim_state, SimState::NeedPin);
    }

    #[test]
    fn parses_ispinfo_line() {
        let fields = parse_kv_line("CMD=ISPINFO,ISPNAME=Example Telecom,PLMN=12345");
        let mut status = ModemStatus::default();
        apply_line(&mut status, &fields);
        assert_eq!(status.isp_name, "Example Telecom");
        assert_eq!(status.isp_plmn, "12345");
    }
}
