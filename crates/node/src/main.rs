mod generate;
mod sim;

use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::path::PathBuf;
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{FieldSim, Sample, Scenario};

const PUMP_STATE_TOPIC: &str = "pump/state";

/// JSON body published to `tele/<node_id>/reading`.
#[derive(Debug, Serialize)]
struct ReadingMsg {
    soil_moisture: f64,
    temperature: f64,
    humidity: f64,
}

impl From<Sample> for ReadingMsg {
    fn from(s: Sample) -> Self {
        Self {
            soil_moisture: s.soil_moisture,
            temperature: s.temperature,
            humidity: s.humidity,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    lookup_or(|k| env::var(k).ok(), key, default)
}

/// Parsed value of `key`, or `default` when it is unset or does not parse.
fn lookup_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// "ON" → true, "OFF" → false, anything else → None.
fn parse_pump_state(payload: &[u8]) -> Option<bool> {
    match String::from_utf8_lossy(payload).trim().to_ascii_uppercase().as_str() {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match env::var("NODE_MODE").unwrap_or_else(|_| "publish".to_string()).as_str() {
        "generate" => run_generate(),
        "publish" => run_publish().await,
        other => bail!("unknown NODE_MODE '{other}' (use generate/publish)"),
    }
}

fn run_generate() -> Result<()> {
    let rows: usize = env_or("DATASET_ROWS", generate::DEFAULT_ROWS);
    let path = PathBuf::from(
        env::var("DATASET_PATH").unwrap_or_else(|_| generate::DEFAULT_PATH.to_string()),
    );

    let records = generate::generate_rows(rows, OffsetDateTime::now_utc())?;
    generate::write_csv(&path, &records)
        .with_context(|| format!("failed to generate dataset at {}", path.display()))?;
    info!(rows, path = %path.display(), "sample data generated");
    Ok(())
}

async fn run_publish() -> Result<()> {
    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let node_id = env::var("NODE_ID").unwrap_or_else(|_| "node-a".to_string());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 5);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let diurnal_period_s: f64 = env_or("SIM_DIURNAL_PERIOD_S", 600.0);

    let client_id = format!("irrigation-node-{node_id}");

    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // Pump state published (retained) by the hub closes the watering loop.
    let (pump_tx, pump_rx) = watch::channel(false);
    let sub_client = client.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                    if let Err(e) = sub_client
                        .subscribe(PUMP_STATE_TOPIC, QoS::AtLeastOnce)
                        .await
                    {
                        error!("subscribe {PUMP_STATE_TOPIC} failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == PUMP_STATE_TOPIC => {
                    match parse_pump_state(&p.payload) {
                        Some(on) => {
                            pump_tx.send_replace(on);
                        }
                        None => warn!("ignoring pump state payload {:?}", p.payload),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = format!("tele/{node_id}/reading");
    info!(%topic, %scenario, sample_every_s, "publishing simulated readings");

    let mut sim = FieldSim::new(scenario, diurnal_period_s);

    loop {
        sim.set_watering(*pump_rx.borrow());
        let msg = ReadingMsg::from(sim.sample());
        let payload = serde_json::to_vec(&msg)?;

        if let Err(e) = client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            error!("publish error: {e}");
        } else {
            debug!(
                moisture = msg.soil_moisture,
                temperature = msg.temperature,
                humidity = msg.humidity,
                "published reading"
            );
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_msg_serializes_with_hub_field_names() {
        let msg = ReadingMsg::from(Sample {
            soil_moisture: 412.0,
            temperature: 24.75,
            humidity: 61.2,
        });
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["soil_moisture"], 412.0);
        assert_eq!(json["temperature"], 24.75);
        assert_eq!(json["humidity"], 61.2);
        // Should have exactly these three fields, no extras
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn pump_state_payloads() {
        assert_eq!(parse_pump_state(b"ON"), Some(true));
        assert_eq!(parse_pump_state(b" off\n"), Some(false));
        assert_eq!(parse_pump_state(b"1"), None);
        assert_eq!(parse_pump_state(b""), None);
    }

    #[test]
    fn env_or_falls_back_on_missing_or_garbage() {
        assert_eq!(env_or("SMART_IRRIGATION_TEST_UNSET_VAR", 7_u64), 7);

        let lookup = |k: &str| match k {
            "SAMPLE_EVERY_S" => Some(" 12 ".to_string()),
            "MQTT_PORT" => Some("not-a-port".to_string()),
            "SIM_DIURNAL_PERIOD_S" => Some(String::new()),
            _ => None,
        };
        assert_eq!(lookup_or(lookup, "SAMPLE_EVERY_S", 5_u64), 12);
        assert_eq!(lookup_or(lookup, "MQTT_PORT", 1883_u16), 1883);
        assert_eq!(lookup_or(lookup, "SIM_DIURNAL_PERIOD_S", 600.0_f64), 600.0);
        assert_eq!(lookup_or(lookup, "NODE_ID_UNSET", 3_u8), 3);
    }
}
