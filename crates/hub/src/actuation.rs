//! Threshold actuation rule shared by the simulation engine and the
//! hardware ingestion path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PumpStatus {
    On,
    #[default]
    Off,
}

impl PumpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

impl fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse an "ON"/"OFF" action (case-insensitive, trims whitespace).
impl FromStr for PumpStatus {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            other => Err(HubError::InvalidArgument(format!(
                "invalid pump action '{other}' (use ON/OFF)"
            ))),
        }
    }
}

/// The pump runs iff the soil is strictly drier than the threshold.
/// NaN moisture never turns the pump on.
pub fn decide(moisture: f64, threshold: f64) -> PumpStatus {
    if moisture < threshold {
        PumpStatus::On
    } else {
        PumpStatus::Off
    }
}

/// [`decide`] for a reading that may lack moisture; no reading means OFF.
pub fn decide_reading(moisture: Option<f64>, threshold: f64) -> PumpStatus {
    moisture.map_or(PumpStatus::Off, |m| decide(m, threshold))
}

// ===========================================================================
// Tests
// ===========================================================================
