//! Operating mode: replaying a dataset, or following a live sensor node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::engine::SimulationEngine;
use crate::error::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Simulation,
    Hardware,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::Hardware => "hardware",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact, lowercase names only.
impl FromStr for Mode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulation" => Ok(Self::Simulation),
            "hardware" => Ok(Self::Hardware),
            _ => Err(HubError::InvalidArgument("Invalid mode".to_string())),
        }
    }
}

/// Owns the mode. Switching to hardware stops any running simulation;
/// switching back never auto-starts one.
#[derive(Clone)]
pub struct ModeController {
    tx: Arc<watch::Sender<Mode>>,
    engine: SimulationEngine,
}

impl ModeController {
    /// `tx` must be the sender whose receiver was handed to `engine`.
    pub fn new(tx: watch::Sender<Mode>, engine: SimulationEngine) -> Self {
        Self {
            tx: Arc::new(tx),
            engine,
        }
    }

    pub fn get(&self) -> Mode {
        *self.tx.borrow()
    }

    pub async fn set(&self, mode: Mode) -> Mode {
        let previous = self.tx.send_replace(mode);
        if mode == Mode::Hardware {
            let stopped = self.engine.stop().await;
            if stopped {
                info!("simulation stopped by switch to hardware mode");
            }
        }
        if previous != mode {
            info!(from = %previous, to = %mode, "mode changed");
        }
        mode
    }

    pub async fn set_from_str(&self, raw: &str) -> Result<Mode, HubError> {
        let mode = raw.parse::<Mode>()?;
        Ok(self.set(mode).await)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::memory_db;
    use crate::engine::tests::{rows, StaticDataset};
    use crate::engine::{EngineConfig, EnginePhase};
    use crate::pump::PumpIndicator;
    use std::time::Duration;

    async fn controller(tick_ms: u64) -> (ModeController, SimulationEngine) {
        let db = memory_db().await;
        let (tx, rx) = watch::channel(Mode::Simulation);
        let cfg = EngineConfig {
            tick: Duration::from_millis(tick_ms),
            ..EngineConfig::default()
        };
        let engine = SimulationEngine::new(
            Arc::new(StaticDataset(rows(&[300.0, 300.0, 300.0, 300.0, 300.0]))),
            db,
            rx,
            PumpIndicator::new(),
            cfg,
        );
        (ModeController::new(tx, engine.clone()), engine)
    }

    #[test]
    fn parse_accepts_exact_names_only() {
        assert_eq!("simulation".parse::<Mode>().unwrap(), Mode::Simulation);
        assert_eq!("hardware".parse::<Mode>().unwrap(), Mode::Hardware);

        for bad in ["", "Hardware", "HARDWARE", " hardware", "sim", "manual"] {
            let err = bad.parse::<Mode>().unwrap_err();
            assert!(matches!(err, HubError::InvalidArgument(_)), "{bad:?}");
            assert_eq!(err.to_string(), "Invalid mode");
        }
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Hardware).unwrap(), "\"hardware\"");
    }

    #[tokio::test]
    async fn defaults_to_simulation() {
        let (modes, _engine) = controller(10).await;
        assert_eq!(modes.get(), Mode::Simulation);
    }

    #[tokio::test]
    async fn switching_to_hardware_stops_engine() {
        let (modes, engine) = controller(50).await;
        engine.start().await.unwrap();
        assert!(engine.is_running().await);

        assert_eq!(modes.set(Mode::Hardware).await, Mode::Hardware);
        assert_eq!(modes.get(), Mode::Hardware);
        assert!(!engine.is_running().await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let snap = engine.snapshot().await;
        assert!(!snap.running);
        assert!(matches!(
            snap.phase(),
            EnginePhase::Halted | EnginePhase::Stopped
        ));
    }

    #[tokio::test]
    async fn switching_back_does_not_restart() {
        let (modes, engine) = controller(50).await;
        engine.start().await.unwrap();
        modes.set(Mode::Hardware).await;
        modes.set(Mode::Simulation).await;

        assert_eq!(modes.get(), Mode::Simulation);
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn invalid_mode_leaves_state_untouched() {
        let (modes, engine) = controller(50).await;
        engine.start().await.unwrap();

        let err = modes.set_from_str("manual").await.unwrap_err();
        assert!(matches!(err, HubError::InvalidArgument(_)));
        assert_eq!(modes.get(), Mode::Simulation);
        assert!(engine.is_running().await);
        engine.stop().await;
    }

    #[tokio::test]
    async fn setting_same_mode_is_harmless() {
        let (modes, _engine) = controller(10).await;
        assert_eq!(modes.set_from_str("simulation").await.unwrap(), Mode::Simulation);
        assert_eq!(modes.set_from_str("hardware").await.unwrap(), Mode::Hardware);
        assert_eq!(modes.set_from_str("hardware").await.unwrap(), Mode::Hardware);
    }
}
