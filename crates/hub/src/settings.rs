//! Operator-tunable settings kept in the `settings` table. Read fresh on
//! every use so changes apply on the next tick.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::db::Db;
use crate::error::{HubError, HubResult};

pub const MOISTURE_THRESHOLD_KEY: &str = "moisture_threshold";
pub const AUTO_MODE_KEY: &str = "auto_mode";

/// Fallbacks used when a key is unset or holds garbage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsDefaults {
    pub moisture_threshold: f64,
    pub auto_mode: bool,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            moisture_threshold: 500.0,
            auto_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settings {
    pub moisture_threshold: f64,
    pub auto_mode: bool,
}

/// Partial update as posted by the settings page. Absent keys are left alone.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub moisture_threshold: Option<Value>,
    #[serde(default)]
    pub auto_mode: Option<Value>,
}

/// Finite number, surrounding whitespace allowed.
pub fn parse_threshold(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Current pump threshold. Never fails: storage errors and non-numeric
/// values log a warning and yield the default.
pub async fn moisture_threshold(db: &Db, defaults: &SettingsDefaults) -> f64 {
    let fallback = defaults.moisture_threshold;
    match db
        .get_setting(MOISTURE_THRESHOLD_KEY, &fallback.to_string())
        .await
    {
        Ok(raw) => parse_threshold(&raw).unwrap_or_else(|| {
            warn!(value = %raw, fallback, "moisture_threshold is not numeric, using default");
            fallback
        }),
        Err(e) => {
            warn!(fallback, "moisture_threshold lookup failed: {e:#}");
            fallback
        }
    }
}

pub async fn load(db: &Db, defaults: &SettingsDefaults) -> HubResult<Settings> {
    let auto_default = if defaults.auto_mode { "true" } else { "false" };
    let auto_mode = db.get_setting(AUTO_MODE_KEY, auto_default).await? == "true";
    Ok(Settings {
        moisture_threshold: moisture_threshold(db, defaults).await,
        auto_mode,
    })
}

pub async fn apply(db: &Db, update: &SettingsUpdate) -> HubResult<()> {
    // Validate everything before writing anything.
    let threshold = match &update.moisture_threshold {
        Some(v) => Some(threshold_from_json(v)?),
        None => None,
    };
    let auto_mode = update.auto_mode.as_ref().map(is_truthy);

    if let Some(t) = threshold {
        db.set_setting(MOISTURE_THRESHOLD_KEY, &t.to_string()).await?;
    }
    if let Some(on) = auto_mode {
        db.set_setting(AUTO_MODE_KEY, if on { "true" } else { "false" })
            .await?;
    }
    Ok(())
}

fn threshold_from_json(v: &Value) -> HubResult<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_threshold(s),
        _ => None,
    };
    parsed.ok_or_else(|| {
        HubError::InvalidArgument(format!("moisture_threshold must be a number, got {v}"))
    })
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
