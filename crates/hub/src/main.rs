mod actuation;
mod config;
mod dataset;
mod db;
mod engine;
mod error;
mod hardware;
mod mode;
mod mqtt;
mod pump;
mod report;
mod settings;
mod state;
mod web;

use anyhow::Result;
use std::path::PathBuf;
use std::{env, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dataset::CsvDataset;
use db::{Db, Severity};
use hardware::HardwarePath;
use pump::PumpRelay;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config file + env overrides ─────────────────────────────────
    let config_path =
        PathBuf::from(env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string()));
    let cfg = config::load(&config_path, |k| env::var(k).ok())?;

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.database.url).await?;
    db.migrate().await?;
    info!(url = %cfg.database.url, "db ready");

    // ── Pump relay ──────────────────────────────────────────────────
    let relay = PumpRelay::new(cfg.relay_gpio_pin(), cfg.hardware.relay_active_low)?;
    let hardware = HardwarePath::new(cfg.hardware.moisture_threshold, relay);
    info!(
        gpio_pin = cfg.relay_gpio_pin(),
        threshold = hardware.threshold(),
        "hardware path ready"
    );

    // ── Shared state ────────────────────────────────────────────────
    let dataset = CsvDataset::new(cfg.simulation.dataset_path.clone());
    if !dataset.path().is_file() {
        warn!(
            path = %dataset.path().display(),
            "dataset not found; simulation start will fail until it exists"
        );
    }
    let shared = Arc::new(AppState::new(
        db,
        Arc::new(dataset),
        cfg.engine_config(),
        hardware,
    ));
    shared.notify("hub started", Severity::Info).await;

    // ── MQTT (optional) ─────────────────────────────────────────────
    match cfg.mqtt.clone() {
        Some(mqtt_cfg) => {
            info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, "starting mqtt transport");
            tokio::spawn(mqtt::run(mqtt_cfg, Arc::clone(&shared)));
        }
        None => info!("no [mqtt] configured; hardware readings via HTTP only"),
    }

    // ── Web server ──────────────────────────────────────────────────
    web::serve(Arc::clone(&shared), cfg.web.port).await?;

    shared.engine.stop().await;
    shared.hardware.fail_safe_off().await;
    info!("hub stopped");
    Ok(())
}
