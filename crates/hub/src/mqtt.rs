use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::actuation::PumpStatus;
use crate::config::MqttConfig;
use crate::db::Severity;
use crate::hardware::HardwarePayload;
use crate::state::SharedState;

pub(crate) const READING_TOPIC_FILTER: &str = "tele/+/reading";
pub(crate) const PUMP_SET_TOPIC: &str = "pump/set";
pub(crate) const PUMP_STATE_TOPIC: &str = "pump/state";

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract node_id from "tele/<node_id>/reading".
pub(crate) fn extract_node_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "reading" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Parse an "ON"/"OFF" payload (case-insensitive, trims whitespace).
pub(crate) fn parse_pump_command(payload: &[u8]) -> Result<PumpStatus, String> {
    String::from_utf8_lossy(payload)
        .parse::<PumpStatus>()
        .map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Runs forever: feeds readings and pump commands into the hardware path
/// and mirrors hardware pump changes to `pump/state`.
pub async fn run(cfg: MqttConfig, state: SharedState) {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(opts, 20);

    tokio::spawn(publish_pump_state(
        client.clone(),
        state.hardware.subscribe_pump(),
    ));

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handle_publish(&state, &p.topic, &p.payload).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(host = %cfg.host, port = cfg.port, "mqtt connected");
                state.set_mqtt_connected(true);
                // Subscriptions do not survive a clean-session reconnect.
                for topic in [READING_TOPIC_FILTER, PUMP_SET_TOPIC] {
                    if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                        error!(topic, "mqtt subscribe failed: {e}");
                        state
                            .notify(&format!("MQTT subscribe to {topic} failed"), Severity::Error)
                            .await;
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                state.set_mqtt_connected(false);
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                // Best-effort fail-safe: pump off on comms error
                state.hardware.fail_safe_off().await;
                if state.mqtt_connected.swap(false, std::sync::atomic::Ordering::Relaxed) {
                    state
                        .notify(&format!("MQTT connection lost: {e}"), Severity::Warning)
                        .await;
                }
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

async fn handle_publish(state: &SharedState, topic: &str, payload: &[u8]) {
    if let Some(node_id) = extract_node_id(topic) {
        match HardwarePayload::from_json(payload) {
            Ok(reading) => {
                let snap = state.hardware.ingest(reading).await;
                debug!(
                    node_id,
                    moisture = ?snap.soil_moisture,
                    pump = %snap.pump_status,
                    "telemetry"
                );
            }
            Err(e) => warn!(node_id, "dropping telemetry: {e}"),
        }
    } else if topic == PUMP_SET_TOPIC {
        match parse_pump_command(payload) {
            Ok(status) => {
                state.set_pump(status).await;
            }
            Err(msg) => warn!("{msg}"),
        }
    } else {
        debug!(topic, "unhandled topic");
    }
}

async fn publish_pump_state(client: AsyncClient, mut rx: watch::Receiver<PumpStatus>) {
    while rx.changed().await.is_ok() {
        let status = *rx.borrow_and_update();
        if let Err(e) = client
            .publish(PUMP_STATE_TOPIC, QoS::AtLeastOnce, true, status.as_str())
            .await
        {
            error!(pump = %status, "failed to publish pump state: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
