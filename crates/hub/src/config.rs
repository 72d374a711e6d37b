//! TOML config file loading, environment overrides, and validation.
//!
//! Every section is optional; a missing file yields the defaults. A few
//! environment variables (`DB_URL`, `DATASET_PATH`, `WEB_PORT`,
//! `MQTT_HOST`, `MQTT_PORT`) override the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{EngineConfig, LITERS_PER_ON_TICK};
use crate::hardware::HARDWARE_MOISTURE_THRESHOLD;
use crate::settings::SettingsDefaults;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub simulation: SimulationConfig,
    pub hardware: HardwareConfig,
    pub settings: SettingsConfig,
    pub web: WebConfig,
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:irrigation.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub dataset_path: PathBuf,
    pub tick_ms: u64,
    pub liters_per_on_tick: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("data/sample_data.csv"),
            tick_ms: 1000,
            liters_per_on_tick: LITERS_PER_ON_TICK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub moisture_threshold: f64,
    pub relay_gpio_pin: i64,
    /// Many common relay boards are active-low.
    pub relay_active_low: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            moisture_threshold: HARDWARE_MOISTURE_THRESHOLD,
            relay_gpio_pin: 17,
            relay_active_low: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub default_moisture_threshold: f64,
    pub default_auto_mode: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        let d = SettingsDefaults::default();
        Self {
            default_moisture_threshold: d.moisture_threshold,
            default_auto_mode: d.auto_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "irrigation-hub".to_string()
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Derived runtime settings
// ---------------------------------------------------------------------------

impl Config {
    pub fn settings_defaults(&self) -> SettingsDefaults {
        SettingsDefaults {
            moisture_threshold: self.settings.default_moisture_threshold,
            auto_mode: self.settings.default_auto_mode,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tick: Duration::from_millis(self.simulation.tick_ms),
            liters_per_on_tick: self.simulation.liters_per_on_tick,
            settings: self.settings_defaults(),
        }
    }

    /// Only meaningful after `validate()`.
    pub fn relay_gpio_pin(&self) -> u8 {
        u8::try_from(self.hardware.relay_gpio_pin).unwrap_or(17)
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply environment overrides. `lookup` is `std::env::var(..).ok()` in
    /// production and a map in tests.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DB_URL") {
            self.database.url = url;
        }
        if let Some(path) = lookup("DATASET_PATH") {
            self.simulation.dataset_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("WEB_PORT") {
            self.web.port = port
                .trim()
                .parse()
                .with_context(|| format!("WEB_PORT is not a port number: {port:?}"))?;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            let mqtt = self.mqtt.get_or_insert_with(|| MqttConfig {
                host: String::new(),
                port: default_mqtt_port(),
                client_id: default_client_id(),
            });
            mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("MQTT_PORT is not a port number: {port:?}"))?;
            if let Some(mqtt) = self.mqtt.as_mut() {
                mqtt.port = port;
            }
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_simulation(&mut errors);
        self.validate_hardware(&mut errors);
        self.validate_rest(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_simulation(&self, errors: &mut Vec<String>) {
        let s = &self.simulation;
        if s.dataset_path.as_os_str().is_empty() {
            errors.push("simulation: dataset_path is empty".to_string());
        }
        if s.tick_ms == 0 {
            errors.push("simulation: tick_ms must be positive, got 0".to_string());
        }
        if !s.liters_per_on_tick.is_finite() || s.liters_per_on_tick < 0.0 {
            errors.push(format!(
                "simulation: liters_per_on_tick must be a non-negative number, got {}",
                s.liters_per_on_tick
            ));
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        let h = &self.hardware;
        if !h.moisture_threshold.is_finite() {
            errors.push(format!(
                "hardware: moisture_threshold must be finite, got {}",
                h.moisture_threshold
            ));
        }
        if !VALID_GPIO_PINS.contains(&h.relay_gpio_pin) {
            errors.push(format!(
                "hardware: relay_gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                h.relay_gpio_pin
            ));
        }
    }

    fn validate_rest(&self, errors: &mut Vec<String>) {
        if self.database.url.trim().is_empty() {
            errors.push("database: url is empty".to_string());
        }
        if !self.settings.default_moisture_threshold.is_finite() {
            errors.push(format!(
                "settings: default_moisture_threshold must be finite, got {}",
                self.settings.default_moisture_threshold
            ));
        }
        if self.web.port == 0 {
            errors.push("web: port must be non-zero".to_string());
        }
        if let Some(m) = &self.mqtt {
            if m.host.trim().is_empty() {
                errors.push("mqtt: host is empty".to_string());
            }
            if m.port == 0 {
                errors.push("mqtt: port must be non-zero".to_string());
            }
            if m.client_id.trim().is_empty() {
                errors.push("mqtt: client_id is empty".to_string());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file (defaults if it does not exist), apply
/// environment overrides, then validate.
pub fn load<F>(path: &Path, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str::<Config>(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };

    let config = config.with_overrides(lookup)?;
    config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
