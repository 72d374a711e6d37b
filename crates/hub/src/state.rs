use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;
use tokio::sync::watch;
use tracing::warn;

use crate::actuation::PumpStatus;
use crate::dataset::DatasetSource;
use crate::db::{Db, SensorReading, Severity};
use crate::engine::{EngineConfig, EnginePhase, SimulationEngine};
use crate::error::HubResult;
use crate::hardware::{HardwarePath, HardwareSnapshot};
use crate::mode::{Mode, ModeController};
use crate::pump::PumpIndicator;
use crate::settings::{self, SettingsDefaults};

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<AppState>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct AppState {
    pub started_at: Instant,
    pub db: Db,
    pub engine: SimulationEngine,
    pub modes: ModeController,
    pub hardware: HardwarePath,
    pub pump: PumpIndicator,
    pub settings: SettingsDefaults,
    pub mqtt_connected: AtomicBool,
}

// ---------------------------------------------------------------------------
// JSON responses (what the API returns)
// ---------------------------------------------------------------------------

/// `/api/simulation/data`: a status word, or the latest processed row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SimulationView {
    Status { status: &'static str },
    Row(SensorReading),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub mode: Mode,
    pub simulation_running: bool,
    pub pump_status: PumpStatus,
    pub water_used: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub backend: &'static str,
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    pub health: Health,
    #[serde(flatten)]
    pub status: StatusResponse,
    pub moisture_threshold: f64,
}

// ---------------------------------------------------------------------------
// Construction & orchestration
// ---------------------------------------------------------------------------

impl AppState {
    pub fn new(
        db: Db,
        source: Arc<dyn DatasetSource>,
        engine_cfg: EngineConfig,
        hardware: HardwarePath,
    ) -> Self {
        let (mode_tx, mode_rx) = watch::channel(Mode::default());
        let pump = PumpIndicator::new();
        let engine = SimulationEngine::new(source, db.clone(), mode_rx, pump.clone(), engine_cfg);
        let modes = ModeController::new(mode_tx, engine.clone());

        Self {
            started_at: Instant::now(),
            db,
            engine,
            modes,
            hardware,
            pump,
            settings: engine_cfg.settings,
            mqtt_connected: AtomicBool::new(false),
        }
    }

    /// Manual pump override from the UI or an MQTT command.
    pub async fn set_pump(&self, status: PumpStatus) -> HardwareSnapshot {
        let snap = self.hardware.set_pump(status).await;
        self.pump.set(status);
        self.notify(&format!("Pump manually turned {status}"), Severity::Info)
            .await;
        snap
    }

    /// Best-effort notification; failures are only logged.
    pub async fn notify(&self, message: &str, severity: Severity) {
        if let Err(e) = self.db.log_notification(message, severity, None).await {
            warn!(message, "notification dropped: {e:#}");
        }
    }

    pub async fn simulation_view(&self) -> SimulationView {
        if self.modes.get() == Mode::Hardware {
            return SimulationView::Status {
                status: "hardware_mode",
            };
        }
        let snap = self.engine.snapshot().await;
        let status = match snap.phase() {
            EnginePhase::Stopped => "stopped",
            EnginePhase::Completed => "completed",
            EnginePhase::Starting => "starting",
            EnginePhase::Running | EnginePhase::Halted => match snap.current_row {
                Some(row) => return SimulationView::Row(row),
                None => "starting",
            },
        };
        SimulationView::Status { status }
    }

    pub async fn status(&self) -> HubResult<StatusResponse> {
        Ok(StatusResponse {
            mode: self.modes.get(),
            simulation_running: self.engine.is_running().await,
            pump_status: self.pump.get(),
            water_used: self.db.water_usage_total().await?,
        })
    }

    pub async fn summary(&self) -> HubResult<SystemSummary> {
        let status = self.status().await?;
        let moisture_threshold = settings::moisture_threshold(&self.db, &self.settings).await;
        Ok(SystemSummary {
            health: self.health(),
            status,
            moisture_threshold,
        })
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    fn health(&self) -> Health {
        let mut sys = System::new();
        sys.refresh_memory();
        Health {
            backend: "ok",
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
            memory_used_mb: sys.used_memory() / (1024 * 1024),
            memory_total_mb: sys.total_memory() / (1024 * 1024),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
