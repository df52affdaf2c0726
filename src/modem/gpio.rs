/*
 * PCAT Manager - Modem Power GPIO Sequencing
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Power/RF-kill/reset line control for the cellular modem. Timings mirror
//! the reference firmware's `modem-manager.c` power-init
//! sequence: 1s settle, power+rfkill+reset asserted, 3s power-ready wait,
//! reset pulsed low for 1s, then 3s reset-settle.

use std::thread::sleep;
use std::time::Duration;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use log::{info, warn};

use crate::config::GpioDescriptor;
use crate::error::{PcatError, Result};

const POWER_WAIT: Duration = Duration::from_secs(1);
const POWER_READY_WAIT: Duration = Duration::from_secs(3);
const RESET_ON_TIME: Duration = Duration::from_secs(1);
const RESET_WAIT_TIME: Duration = Duration::from_secs(3);

/// A single requested output line, aware of its own active-low polarity.
pub struct GpioLine {
    handle: LineHandle,
    active_low: bool,
}

impl GpioLine {
    pub fn request(descriptor: &GpioDescriptor, consumer: &str, initial_active: bool) -> Result<Self> {
        let chip_path = format!("/dev/{}", descriptor.chip);
        let mut chip = Chip::new(&chip_path).map_err(|e| {
            PcatError::Gpio(format!("failed to open {}: {}", chip_path, e))
        })?;
        let line = chip.get_line(descriptor.line).map_err(|e| {
            PcatError::Gpio(format!(
                "failed to get line {} on {}: {}",
                descriptor.line, chip_path, e
            ))
        })?;
        let wire_value = (initial_active != descriptor.active_low) as u8;
        let handle = line
            .request(LineRequestFlags::OUTPUT, wire_value, consumer)
            .map_err(|e| PcatError::Gpio(format!("failed to request {}: {}", consumer, e)))?;
        Ok(Self {
            handle,
            active_low: descriptor.active_low,
        })
    }

    /// Drive the line to its logical active (`true`) or inactive (`false`)
    /// state, accounting for polarity.
    pub fn set_active(&self, active: bool) -> Result<()> {
        let wire_value = (active != self.active_low) as u8;
        self.handle
            .set_value(wire_value)
            .map_err(|e| PcatError::Gpio(format!("failed to set line value: {}", e)))
    }
}

/// Three lines driving the modem's power sequencing.
pub struct ModemGpio {
    pub power: GpioLine,
    pub rfkill: GpioLine,
    pub reset: GpioLine,
}

impl ModemGpio {
    pub fn open(
        power: &GpioDescriptor,
        rfkill: &GpioDescriptor,
        reset: &GpioDescriptor,
    ) -> Result<Self> {
        if !power.is_configured() || !rfkill.is_configured() || !reset.is_configured() {
            return Err(PcatError::Gpio("modem GPIO lines not fully configured".to_string()));
        }
        // Initial levels: modem powered off, RF-kill asserted, reset
        // asserted. `active` means "on" for the power line and "asserted"
        // for rfkill/reset, per the later calls in `power_on_sequence`.
        Ok(Self {
            power: GpioLine::request(power, "gpio-modem-power", false)?,
            rfkill: GpioLine::request(rfkill, "gpio-modem-rfkill", true)?,
            reset: GpioLine::request(reset, "gpio-modem-reset", true)?,
        })
    }

    /// Runs the full power-on sequence, blocking the calling thread for
    /// around 8 seconds. Returns once the modem should be enumerable over
    /// USB.
    pub fn power_on_sequence(&self, should_continue: impl Fn() -> bool) -> Result<()> {
        info!("starting modem power sequence");
        sleep(POWER_WAIT);
        if !should_continue() {
            return Err(PcatError::Gpio("power sequence aborted".to_string()));
        }

        self.power.set_active(true)?;
        self.rfkill.set_active(false)?;
        self.reset.set_active(true)?;

        sleep(POWER_READY_WAIT);
        if !should_continue() {
            return Err(PcatError::Gpio("power sequence aborted".to_string()));
        }

        self.reset.set_active(false)?;
        sleep(RESET_ON_TIME);
        if !should_continue() {
            return Err(PcatError::Gpio("power sequence aborted".to_string()));
        }

        self.reset.set_active(true)?;
        sleep(RESET_WAIT_TIME);
        if !should_continue() {
            warn!("modem power sequence aborted before completion");
            return Err(PcatError::Gpio("power sequence aborted".to_string()));
        }

        info!("modem power sequence completed");
        Ok(())
    }

    pub fn set_rfkill(&self, blocked: bool) -> Result<()> {
        // `active=true` means RF-kill asserted (radios blocked), matching
        // the convention used throughout `power_on_sequence`.
        self.rfkill.set_active(blocked)
    }
}
