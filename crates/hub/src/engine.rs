//! Simulation engine: replays a recorded dataset one row per tick, applies
//! the actuation rule, meters water, and persists every processed row.
//!
//! Exactly one tick task runs per successful `start()`.  Each run gets a
//! fresh generation number and cancellation token; a task whose generation
//! is no longer current exits without touching shared state, so a quick
//! stop/start cannot leave two tasks writing to the same run.
//!
//! ## Run state machine
//!
//! ```text
//! Stopped ──start()──▶ Starting ──first tick──▶ Running ──cursor == len──▶ Completed
//!                                                  │
//!                                                  └──stop() / hardware mode──▶ Halted
//! ```
//!
//! The tick task is the only writer of `cursor` and `last_row`.  Readers
//! take an [`EngineSnapshot`] under the read lock, never individual fields.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actuation::{decide_reading, PumpStatus};
use crate::dataset::{DatasetRow, DatasetSource};
use crate::db::{Db, SensorReading, Severity};
use crate::error::{HubError, HubResult};
use crate::mode::Mode;
use crate::pump::PumpIndicator;
use crate::settings::{self, SettingsDefaults};

/// Real-time length of one tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Flat-rate charge for every tick that ends with the pump ON.
pub const LITERS_PER_ON_TICK: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub tick: Duration,
    pub liters_per_on_tick: f64,
    pub settings: SettingsDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            liters_per_on_tick: LITERS_PER_ON_TICK,
            settings: SettingsDefaults::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// State + read-only projections
// ---------------------------------------------------------------------------

struct EngineState {
    dataset: Arc<Vec<DatasetRow>>,
    cursor: usize,
    /// Operator intent. Liveness of the tick task is tracked by `generation`.
    running: bool,
    last_row: Option<SensorReading>,
    generation: u64,
    cancel: Option<CancellationToken>,
}

/// Consistent copy of the engine fields a poller may look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub index: usize,
    pub total: usize,
    pub current_row: Option<SensorReading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePhase {
    /// Never started, or stopped before the first row was processed.
    Stopped,
    /// Running, first row not processed yet.
    Starting,
    Running,
    /// Stopped part-way through; the last processed row is still visible.
    Halted,
    /// Ran off the end of a non-empty dataset.
    Completed,
}

impl EngineSnapshot {
    pub fn phase(&self) -> EnginePhase {
        match (self.running, &self.current_row) {
            (false, None) => EnginePhase::Stopped,
            (false, Some(_)) if self.total > 0 && self.index >= self.total => {
                EnginePhase::Completed
            }
            (false, Some(_)) => EnginePhase::Halted,
            (true, None) => EnginePhase::Starting,
            (true, Some(_)) => EnginePhase::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { total_rows: usize },
    AlreadyRunning,
}

// ---------------------------------------------------------------------------
// Engine handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SimulationEngine {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<EngineState>,
    source: Arc<dyn DatasetSource>,
    db: Db,
    mode: watch::Receiver<Mode>,
    pump: PumpIndicator,
    cfg: EngineConfig,
}

impl SimulationEngine {
    pub fn new(
        source: Arc<dyn DatasetSource>,
        db: Db,
        mode: watch::Receiver<Mode>,
        pump: PumpIndicator,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(EngineState {
                    dataset: Arc::new(Vec::new()),
                    cursor: 0,
                    running: false,
                    last_row: None,
                    generation: 0,
                    cancel: None,
                }),
                source,
                db,
                mode,
                pump,
                cfg,
            }),
        }
    }

    /// Load the dataset and spawn the tick task.  Idempotent while running.
    ///
    /// The dataset is parsed on the blocking pool with no lock held; mode and
    /// `running` are checked again before the rows are installed, so
    /// concurrent callers still spawn exactly one task.
    pub async fn start(&self) -> HubResult<StartOutcome> {
        if let Some(outcome) = self.check_startable(&*self.inner.state.read().await)? {
            return Ok(outcome);
        }

        let source = Arc::clone(&self.inner.source);
        let rows = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|e| anyhow::anyhow!("dataset load task failed: {e}"))??;

        let mut st = self.inner.state.write().await;
        if let Some(outcome) = self.check_startable(&st)? {
            return Ok(outcome);
        }

        let total_rows = rows.len();
        let token = CancellationToken::new();

        st.generation += 1;
        st.dataset = Arc::new(rows);
        st.cursor = 0;
        st.last_row = None;
        st.running = true;
        st.cancel = Some(token.clone());
        let generation = st.generation;
        drop(st);

        info!(
            total_rows,
            generation,
            source = %self.inner.source.describe(),
            tick_ms = self.inner.cfg.tick.as_millis() as u64,
            "simulation started"
        );

        tokio::spawn(self.clone().run(generation, token));
        Ok(StartOutcome::Started { total_rows })
    }

    /// `Err` in hardware mode, `Some(AlreadyRunning)` while a run is active.
    fn check_startable(&self, st: &EngineState) -> HubResult<Option<StartOutcome>> {
        if *self.inner.mode.borrow() == Mode::Hardware {
            return Err(HubError::Conflict(
                "Simulation disabled in hardware mode".to_string(),
            ));
        }
        if st.running {
            debug!(generation = st.generation, "start ignored: already running");
            return Ok(Some(StartOutcome::AlreadyRunning));
        }
        Ok(None)
    }

    /// Request the current run to stop.  The tick in flight (if any) still
    /// finishes; no further row is processed.  Returns whether a run was
    /// active.
    pub async fn stop(&self) -> bool {
        let mut st = self.inner.state.write().await;
        let was_running = st.running;
        st.running = false;
        if let Some(token) = st.cancel.take() {
            token.cancel();
        }
        if was_running {
            info!(
                generation = st.generation,
                cursor = st.cursor,
                total = st.dataset.len(),
                "simulation stop requested"
            );
        }
        was_running
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let st = self.inner.state.read().await;
        EngineSnapshot {
            running: st.running,
            index: st.cursor,
            total: st.dataset.len(),
            current_row: st.last_row.clone(),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.running
    }

    // -----------------------------------------------------------------------
    // Tick task
    // -----------------------------------------------------------------------

    async fn run(self, generation: u64, cancel: CancellationToken) {
        loop {
            let row = {
                let st = self.inner.state.read().await;
                if st.generation != generation || !st.running {
                    break;
                }
                match st.dataset.get(st.cursor) {
                    Some(row) => row.clone(),
                    None => break,
                }
            };

            let reading = self.process_row(&row).await;

            {
                let mut st = self.inner.state.write().await;
                if st.generation != generation {
                    debug!(generation, "tick task superseded, discarding row");
                    return;
                }
                st.last_row = Some(reading);
                st.cursor += 1;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.inner.cfg.tick) => {}
            }
        }

        let mut st = self.inner.state.write().await;
        if st.generation != generation {
            return;
        }
        st.running = false;
        st.cancel = None;
        if st.cursor >= st.dataset.len() {
            info!(generation, rows = st.cursor, "simulation completed");
        } else {
            info!(generation, cursor = st.cursor, total = st.dataset.len(), "simulation stopped");
        }
    }

    /// One tick's worth of work for `row`.  Storage failures are logged and
    /// do not abort the run.
    async fn process_row(&self, row: &DatasetRow) -> SensorReading {
        let db = &self.inner.db;
        let threshold = settings::moisture_threshold(db, &self.inner.cfg.settings).await;
        let moisture = row.moisture();
        let pump_status = decide_reading(moisture, threshold);

        let reading = SensorReading {
            timestamp: row.timestamp.clone(),
            soil_moisture: moisture,
            temperature: row.temperature,
            humidity: row.humidity,
            pump_status,
        };

        debug!(
            timestamp = %reading.timestamp,
            moisture = ?moisture,
            threshold,
            pump = %pump_status,
            "tick"
        );

        if pump_status == PumpStatus::On {
            if let Err(e) = db
                .log_water_usage(&reading.timestamp, self.inner.cfg.liters_per_on_tick)
                .await
            {
                error!(timestamp = %reading.timestamp, "engine: log_water_usage failed: {e:#}");
            }
            if let Err(e) = db
                .log_notification(
                    "Pump turned ON by simulation",
                    Severity::Info,
                    Some(&reading.timestamp),
                )
                .await
            {
                warn!("engine: notification dropped: {e:#}");
            }
        }
        self.inner.pump.set(pump_status);

        if let Err(e) = db.insert_reading(&reading).await {
            error!(timestamp = %reading.timestamp, "engine: insert_reading failed: {e:#}");
        }

        reading
    }
}

// ===========================================================================
// Tests
// ===========================================================================
