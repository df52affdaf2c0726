/*
 * PCAT Manager - System Clock Adoption
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Sets the OS realtime clock from a PMU-reported UTC timestamp. A
//! dedicated module keeps the `nix` dependency isolated from the protocol
//! engine's otherwise-pure state transitions.

use chrono::NaiveDateTime;
use nix::sys::time::TimeSpec;
use nix::time::{clock_settime, ClockId};

pub fn set_system_time(utc: NaiveDateTime) -> std::io::Result<()> {
    let spec = TimeSpec::new(utc.and_utc().timestamp(), 0);
    clock_settime(ClockId::CLOCK_REALTIME, spec).map_err(|e| std::io::Error::from_raw_os_error(e as i32))
}
