//! Hardware ingestion path: readings pushed by a live sensor node.
//!
//! Keeps its own latest-reading snapshot, independent of the simulation
//! engine. Readings are decided against a fixed threshold and are not
//! persisted; the pump relay follows every decision.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::actuation::{decide_reading, PumpStatus};
use crate::db::now_timestamp;
use crate::error::{HubError, HubResult};
use crate::pump::PumpRelay;

/// Threshold applied to pushed readings. Not read from settings.
pub const HARDWARE_MOISTURE_THRESHOLD: f64 = 400.0;

/// Body of a pushed reading. Any field may be absent or null.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HardwarePayload {
    #[serde(default)]
    pub soil_moisture: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

impl HardwarePayload {
    pub fn from_json(bytes: &[u8]) -> HubResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| HubError::InvalidArgument(format!("invalid reading payload: {e}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HardwareSnapshot {
    pub timestamp: Option<String>,
    pub soil_moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pump_status: PumpStatus,
}

#[derive(Clone)]
pub struct HardwarePath {
    inner: Arc<Inner>,
}

struct Inner {
    snapshot: RwLock<HardwareSnapshot>,
    threshold: f64,
    relay: Mutex<PumpRelay>,
    pump_tx: watch::Sender<PumpStatus>,
}

impl HardwarePath {
    pub(crate) fn new(threshold: f64, relay: PumpRelay) -> Self {
        let (pump_tx, _rx) = watch::channel(PumpStatus::Off);
        Self {
            inner: Arc::new(Inner {
                snapshot: RwLock::new(HardwareSnapshot::default()),
                threshold,
                relay: Mutex::new(relay),
                pump_tx,
            }),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.inner.threshold
    }

    /// Stamp, decide, and replace the snapshot. A reading without moisture
    /// turns the pump off.
    pub async fn ingest(&self, payload: HardwarePayload) -> HardwareSnapshot {
        let pump_status = decide_reading(payload.soil_moisture, self.inner.threshold);

        let snap = HardwareSnapshot {
            timestamp: Some(now_timestamp()),
            soil_moisture: payload.soil_moisture,
            temperature: payload.temperature,
            humidity: payload.humidity,
            pump_status,
        };
        debug!(
            moisture = ?snap.soil_moisture,
            threshold = self.inner.threshold,
            pump = %pump_status,
            "hardware reading"
        );

        // Relay is driven under the snapshot lock.
        let mut guard = self.inner.snapshot.write().await;
        *guard = snap.clone();
        self.drive_relay(pump_status).await;
        drop(guard);

        snap
    }

    pub async fn snapshot(&self) -> HardwareSnapshot {
        self.inner.snapshot.read().await.clone()
    }

    /// Manual override: bypasses the actuation rule, leaves the reading
    /// fields alone.
    pub async fn set_pump(&self, status: PumpStatus) -> HardwareSnapshot {
        let mut guard = self.inner.snapshot.write().await;
        guard.pump_status = status;
        self.drive_relay(status).await;
        info!(pump = %status, "hardware pump override");
        guard.clone()
    }

    /// Force the pump off after losing contact with the sensor node.
    pub async fn fail_safe_off(&self) {
        let mut guard = self.inner.snapshot.write().await;
        if guard.pump_status.is_on() {
            warn!("fail-safe: forcing pump OFF");
        }
        guard.pump_status = PumpStatus::Off;
        self.drive_relay(PumpStatus::Off).await;
    }

    /// Every change of the hardware pump status.
    pub fn subscribe_pump(&self) -> watch::Receiver<PumpStatus> {
        self.inner.pump_tx.subscribe()
    }

    pub async fn relay_on(&self) -> bool {
        self.inner.relay.lock().await.is_on()
    }

    async fn drive_relay(&self, status: PumpStatus) {
        self.inner.relay.lock().await.set(status.is_on());
        self.inner.pump_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
