//! Pump relay control via GPIO. The `gpio` feature gates the real rppal
//! driver; without it, a mock keeps the state in memory and logs changes.
//!
//! [`PumpIndicator`] is the separate "last pump status" shown to pollers,
//! written by simulation ticks and manual overrides.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::actuation::PumpStatus;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO relay (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct PumpRelay {
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
    on: bool,
}

#[cfg(feature = "gpio")]
impl PumpRelay {
    pub(crate) fn new(gpio_pin: u8, active_low: bool) -> Result<Self> {
        let pin = Gpio::new()?.get(gpio_pin)?.into_output();
        let mut relay = Self {
            pin,
            active_low,
            on: true,
        };
        // Fail-safe: ensure "OFF" at startup
        relay.set(false);
        Ok(relay)
    }

    pub(crate) fn set(&mut self, on: bool) {
        // active-low relay: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        if self.on != on {
            info!(pin = self.pin.pin(), on, "pump relay switched");
        }
        self.on = on;
    }

    pub(crate) fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development, no hardware, logs state changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct PumpRelay {
    on: bool,
}

#[cfg(not(feature = "gpio"))]
impl PumpRelay {
    pub(crate) fn new(gpio_pin: u8, _active_low: bool) -> Result<Self> {
        info!(gpio_pin, "[mock-gpio] pump relay initialised (no hardware)");
        Ok(Self { on: false })
    }

    pub(crate) fn set(&mut self, on: bool) {
        if self.on != on {
            info!(on, "[mock-gpio] pump relay switched");
        }
        self.on = on;
    }

    pub(crate) fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Last-known pump status
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PumpIndicator {
    tx: Arc<watch::Sender<PumpStatus>>,
}

impl Default for PumpIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl PumpIndicator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PumpStatus::Off);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> PumpStatus {
        *self.tx.borrow()
    }

    pub fn set(&self, status: PumpStatus) {
        self.tx.send_replace(status);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    #[test]
    fn relay_starts_off() {
        let relay = PumpRelay::new(17, true).unwrap();
        assert!(!relay.is_on());
    }

    #[test]
    fn relay_set_on_then_off() {
        let mut relay = PumpRelay::new(17, true).unwrap();
        relay.set(true);
        assert!(relay.is_on());
        relay.set(false);
        assert!(!relay.is_on());
    }

    #[test]
    fn relay_repeated_set_is_idempotent() {
        let mut relay = PumpRelay::new(17, false).unwrap();
        relay.set(true);
        relay.set(true);
        assert!(relay.is_on());
    }

    #[test]
    fn indicator_defaults_off_and_tracks_last_write() {
        let ind = PumpIndicator::new();
        assert_eq!(ind.get(), PumpStatus::Off);
        ind.set(PumpStatus::On);
        assert_eq!(ind.get(), PumpStatus::On);

        let shared = ind.clone();
        shared.set(PumpStatus::Off);
        assert_eq!(ind.get(), PumpStatus::Off);
    }
}
