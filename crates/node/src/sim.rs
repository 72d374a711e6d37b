//! Stateful field simulator for local development.
//!
//! Models a single soil probe plus an air temperature/humidity sensor:
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Diurnal (day/night) cycle on temperature and humidity
//! - Closed-loop watering response (moisture rises while the pump runs)
//!
//! Moisture uses the same scale as the recorded datasets: higher is wetter,
//! typical field values sit between 200 and 800.

use std::fmt;

/// Driest value the generator and presets aim for.
pub const MOISTURE_DRY: f64 = 200.0;
/// Wettest value the generator and presets aim for.
pub const MOISTURE_WET: f64 = 800.0;

/// Hard limits of the probe's analog output.
const MOISTURE_FLOOR: f64 = 0.0;
const MOISTURE_CEIL: f64 = 1023.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range, steady drift toward dry.  Crosses the hardware
    /// threshold within a few dozen samples unless watered.
    Drying,
    /// Hovers in the upper half.  Low noise, rare spikes.
    Stable,
    /// High noise, ~10% spike rate.  Exercises flapping around the threshold.
    Flaky,
    /// Starts near the wet end.  Very slow drying; the pump should stay off.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// One published reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
}

pub struct FieldSim {
    /// Current "true" soil moisture.  Evolves each tick.
    moisture: f64,

    // Random walk parameters
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,
    noise_sigma: f64,

    // Spike parameters
    spike_prob: f32,
    spike_sigma: f64,

    // Diurnal cycle
    diurnal_period_s: f64,

    // Watering response
    watering: bool,
    wet_rate: f64,
}

impl FieldSim {
    /// `diurnal_period_s` controls the day/night cycle length.  Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let range = MOISTURE_WET - MOISTURE_DRY;

        // start_frac: 0.0 = driest, 1.0 = wettest
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start_frac, center_frac) =
            match scenario {
                Scenario::Drying => (-4.0, 12.0, 0.01, 6.0, 0.03_f32, 90.0, 0.5, 0.3),
                Scenario::Stable => (-0.5, 4.0, 0.05, 3.0, 0.005, 60.0, 0.6, 0.6),
                Scenario::Flaky => (-2.0, 20.0, 0.02, 15.0, 0.10, 150.0, 0.4, 0.4),
                Scenario::Wet => (-0.5, 6.0, 0.02, 4.0, 0.02, 80.0, 0.85, 0.85),
            };

        let start = MOISTURE_DRY + start_frac * range + gaussian(0.0, range * 0.02);

        Self {
            moisture: start.clamp(MOISTURE_DRY, MOISTURE_WET),
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            center: MOISTURE_DRY + center_frac * range,
            noise_sigma,
            spike_prob,
            spike_sigma,
            diurnal_period_s,
            watering: false,
            wet_rate: 25.0,
        }
    }

    /// Inform the simulator whether the pump is currently running.
    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    /// Produce the next reading.  The internal state evolves with each call.
    pub fn sample(&mut self) -> Sample {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.sample_at(now_s)
    }

    fn sample_at(&mut self, now_s: f64) -> Sample {
        // -- Evolve the moisture base -------------------------------------

        let pull = self.mean_reversion * (self.center - self.moisture);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.watering { self.wet_rate } else { 0.0 };

        self.moisture = (self.moisture + self.drift_per_sample + pull + walk + wet)
            .clamp(MOISTURE_DRY - 100.0, MOISTURE_WET + 100.0);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };
        let soil_moisture = (self.moisture + gaussian(0.0, self.noise_sigma) + spike)
            .round()
            .clamp(MOISTURE_FLOOR, MOISTURE_CEIL);

        // -- Air: sinusoidal, warmest and driest at "afternoon" -------------

        let phase = (2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s).sin();
        let temperature = (27.5 + 6.0 * phase + gaussian(0.0, 0.3)).clamp(20.0, 35.0);
        let humidity = (65.0 - 18.0 * phase + gaussian(0.0, 1.0)).clamp(40.0, 90.0);

        Sample {
            soil_moisture,
            temperature: round2(temperature),
            humidity: round2(humidity),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: collect N moisture samples.
    fn collect_moisture(sim: &mut FieldSim, n: usize) -> Vec<f64> {
        (0..n).map(|_| sim.sample().soil_moisture).collect()
    }

    #[test]
    fn readings_within_physical_range() {
        let mut sim = FieldSim::new(Scenario::Flaky, 600.0);
        for _ in 0..500 {
            let s = sim.sample();
            assert!((MOISTURE_FLOOR..=MOISTURE_CEIL).contains(&s.soil_moisture), "{s:?}");
            assert!((20.0..=35.0).contains(&s.temperature), "{s:?}");
            assert!((40.0..=90.0).contains(&s.humidity), "{s:?}");
        }
    }

    #[test]
    fn moisture_is_whole_and_air_has_two_decimals() {
        let mut sim = FieldSim::new(Scenario::Stable, 600.0);
        for _ in 0..50 {
            let s = sim.sample();
            assert_eq!(s.soil_moisture.fract(), 0.0);
            assert!(((s.temperature * 100.0).round() - s.temperature * 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = FieldSim::new(Scenario::Stable, 600.0);
        let samples = collect_moisture(&mut sim, 100);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f64, f64::max);
        // Allow for rare spikes; the full scale is 600.
        assert!(max_jump < 300.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn drying_without_water_trends_down() {
        let mut sim = FieldSim::new(Scenario::Drying, 600.0);
        let before: f64 = collect_moisture(&mut sim, 10).iter().sum::<f64>() / 10.0;
        for _ in 0..100 {
            sim.sample();
        }
        let after: f64 = collect_moisture(&mut sim, 10).iter().sum::<f64>() / 10.0;
        assert!(after < before, "before={before:.0} after={after:.0}");
    }

    #[test]
    fn watering_increases_moisture() {
        let mut sim = FieldSim::new(Scenario::Drying, 600.0);
        for _ in 0..20 {
            sim.sample();
        }
        let before: f64 = collect_moisture(&mut sim, 20).iter().sum::<f64>() / 20.0;

        sim.set_watering(true);
        for _ in 0..30 {
            sim.sample();
        }
        let after: f64 = collect_moisture(&mut sim, 20).iter().sum::<f64>() / 20.0;

        assert!(
            after > before,
            "watering should raise moisture: before={before:.0} after={after:.0}"
        );
    }

    #[test]
    fn flaky_scenario_has_more_variation() {
        fn variance(sim: &mut FieldSim, n: usize) -> f64 {
            let samples = collect_moisture(sim, n);
            let mean = samples.iter().sum::<f64>() / n as f64;
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
        }

        let mut stable = FieldSim::new(Scenario::Stable, 600.0);
        let mut flaky = FieldSim::new(Scenario::Flaky, 600.0);

        let var_stable = variance(&mut stable, 200);
        let var_flaky = variance(&mut flaky, 200);

        assert!(
            var_flaky > var_stable,
            "flaky variance ({var_flaky:.0}) should exceed stable ({var_stable:.0})"
        );
    }

    #[test]
    fn wet_scenario_starts_high() {
        let mut sim = FieldSim::new(Scenario::Wet, 600.0);
        let avg: f64 = collect_moisture(&mut sim, 10).iter().sum::<f64>() / 10.0;
        let midpoint = (MOISTURE_DRY + MOISTURE_WET) / 2.0;
        assert!(avg > midpoint, "avg={avg:.0} mid={midpoint:.0}");
    }

    #[test]
    fn afternoon_is_warmer_and_drier_than_night() {
        let mut sim = FieldSim::new(Scenario::Stable, 600.0);
        // Quarter period: sin = 1; three quarters: sin = -1.
        let afternoon = sim.sample_at(150.0);
        let night = sim.sample_at(450.0);
        assert!(afternoon.temperature > night.temperature);
        assert!(afternoon.humidity < night.humidity);
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("STABLE"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("wet"), Scenario::Wet);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Drying);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Drying.to_string(), "drying");
        assert_eq!(Scenario::Wet.to_string(), "wet");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal()).sum();
        let mean = sum / n as f64;
        assert!(
            mean.abs() < 0.15,
            "approx_std_normal mean should be near zero: {mean}"
        );
    }
}
