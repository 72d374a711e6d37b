use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::fmt;
use std::str::FromStr;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::actuation::PumpStatus;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// One processed reading with the pump decision attached. Moisture is
/// `None` when the source row had no reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: String,
    pub soil_moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pump_status: PumpStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingRecord {
    pub id: i64,
    #[serde(flatten)]
    pub reading: SensorReading,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterUsageEntry {
    pub timestamp: String,
    pub liters_used: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: i64,
    pub timestamp: String,
    pub message: String,
    #[serde(rename = "type")]
    pub severity: String,
}

/// Per-bucket averages used by reports.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorBucket {
    pub bucket: String,
    pub avg_soil_moisture: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterBucket {
    pub bucket: String,
    pub liters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorPoint {
    pub timestamp: String,
    pub soil_moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoistureStats {
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_rows: i64,
    pub pump_on: i64,
    pub pump_off: i64,
    pub moisture: MoistureStats,
    pub total_liters: f64,
}

/// `YYYY-MM-DD HH:MM:SS`, the text form every table stores.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    ts.format(&fmt).unwrap_or_default()
}

pub fn now_timestamp() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

fn reading_from_row(r: &SqliteRow) -> Result<ReadingRecord, sqlx::Error> {
    let status: String = r.try_get("pump_status")?;
    Ok(ReadingRecord {
        id: r.try_get("id")?,
        reading: SensorReading {
            timestamp: r.try_get("timestamp")?,
            soil_moisture: r.try_get("soil_moisture")?,
            temperature: r.try_get("temperature")?,
            humidity: r.try_get("humidity")?,
            pump_status: PumpStatus::from_str(&status).unwrap_or_default(),
        },
    })
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/irrigation/irrigation.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to ":memory:" opens its own empty database, so an
        // in-memory pool is pinned to one connection that never expires.
        let pool_opts = if db_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_opts
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Sensor readings
    // ----------------------------

    pub async fn insert_reading(&self, r: &SensorReading) -> Result<i64> {
        let res = sqlx::query(
            r#"
            INSERT INTO sensor_data (timestamp, soil_moisture, temperature, humidity, pump_status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&r.timestamp)
        .bind(r.soil_moisture)
        .bind(r.temperature)
        .bind(r.humidity)
        .bind(r.pump_status.as_str())
        .execute(&self.pool)
        .await
        .context("insert_reading failed")?;
        Ok(res.last_insert_rowid())
    }

    /// Newest first. `None` returns every row.
    pub async fn fetch_readings(&self, limit: Option<i64>) -> Result<Vec<ReadingRecord>> {
        // SQLite treats a negative LIMIT as "no limit".
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, soil_moisture, temperature, humidity, pump_status
            FROM sensor_data
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .context("fetch_readings failed")?;

        rows.iter()
            .map(reading_from_row)
            .collect::<Result<_, _>>()
            .context("fetch_readings: bad row")
    }

    pub async fn latest_reading(&self) -> Result<Option<ReadingRecord>> {
        Ok(self.fetch_readings(Some(1)).await?.into_iter().next())
    }

    // ----------------------------
    // Water usage ledger
    // ----------------------------

    pub async fn log_water_usage(&self, timestamp: &str, liters: f64) -> Result<()> {
        sqlx::query("INSERT INTO water_usage (timestamp, liters_used) VALUES (?, ?)")
            .bind(timestamp)
            .bind(liters)
            .execute(&self.pool)
            .await
            .context("log_water_usage failed")?;
        Ok(())
    }

    pub async fn fetch_water_usage(&self) -> Result<Vec<WaterUsageEntry>> {
        let rows = sqlx::query("SELECT timestamp, liters_used FROM water_usage ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await
            .context("fetch_water_usage failed")?;

        rows.iter()
            .map(|r| -> Result<WaterUsageEntry, sqlx::Error> {
                Ok(WaterUsageEntry {
                    timestamp: r.try_get("timestamp")?,
                    liters_used: r.try_get("liters_used")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("fetch_water_usage: bad row")
    }

    pub async fn water_usage_total(&self) -> Result<f64> {
        let total: Option<f64> = sqlx::query_scalar("SELECT SUM(liters_used) FROM water_usage")
            .fetch_one(&self.pool)
            .await
            .context("water_usage_total failed")?;
        Ok(total.unwrap_or(0.0))
    }

    // ----------------------------
    // Notifications
    // ----------------------------

    /// `timestamp` defaults to now (UTC).
    pub async fn log_notification(
        &self,
        message: &str,
        severity: Severity,
        timestamp: Option<&str>,
    ) -> Result<()> {
        let ts = match timestamp {
            Some(ts) if !ts.is_empty() => ts.to_string(),
            _ => now_timestamp(),
        };
        sqlx::query("INSERT INTO notifications (timestamp, message, type) VALUES (?, ?, ?)")
            .bind(ts)
            .bind(message)
            .bind(severity.as_str())
            .execute(&self.pool)
            .await
            .context("log_notification failed")?;
        Ok(())
    }

    pub async fn fetch_notifications(&self, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, message, type FROM notifications ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("fetch_notifications failed")?;

        rows.iter()
            .map(|r| -> Result<Notification, sqlx::Error> {
                Ok(Notification {
                    id: r.try_get("id")?,
                    timestamp: r.try_get("timestamp")?,
                    message: r.try_get("message")?,
                    severity: r.try_get("type")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("fetch_notifications: bad row")
    }

    // ----------------------------
    // Settings (key -> value)
    // ----------------------------

    pub async fn get_setting(&self, key: &str, default: &str) -> Result<String> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("get_setting '{key}' failed"))?;
        Ok(value.flatten().unwrap_or_else(|| default.to_string()))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("set_setting '{key}' failed"))?;
        Ok(())
    }

    // ----------------------------
    // Aggregation helpers (reports + metrics)
    // ----------------------------

    /// Averages grouped by `strftime(bucket_fmt, timestamp)`, oldest first.
    pub async fn sensor_buckets(&self, bucket_fmt: &str) -> Result<Vec<SensorBucket>> {
        let rows = sqlx::query(
            r#"
            SELECT strftime(?, timestamp) AS bucket,
                   AVG(soil_moisture) AS avg_m,
                   AVG(temperature)   AS avg_t,
                   AVG(humidity)      AS avg_h
            FROM sensor_data
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
        )
        .bind(bucket_fmt)
        .fetch_all(&self.pool)
        .await
        .context("sensor_buckets failed")?;

        rows.iter()
            .map(|r| -> Result<SensorBucket, sqlx::Error> {
                Ok(SensorBucket {
                    bucket: r.try_get::<Option<String>, _>("bucket")?.unwrap_or_default(),
                    avg_soil_moisture: r.try_get("avg_m")?,
                    avg_temperature: r.try_get("avg_t")?,
                    avg_humidity: r.try_get("avg_h")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("sensor_buckets: bad row")
    }

    /// Liters grouped by `strftime(bucket_fmt, timestamp)`, restricted to
    /// entries at or after `since` when given.
    pub async fn water_buckets(&self, bucket_fmt: &str, since: Option<&str>) -> Result<Vec<WaterBucket>> {
        let rows = sqlx::query(
            r#"
            SELECT strftime(?, timestamp) AS bucket,
                   SUM(liters_used) AS liters
            FROM water_usage
            WHERE timestamp >= ?
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
        )
        .bind(bucket_fmt)
        .bind(since.unwrap_or(""))
        .fetch_all(&self.pool)
        .await
        .context("water_buckets failed")?;

        rows.iter()
            .map(|r| -> Result<WaterBucket, sqlx::Error> {
                Ok(WaterBucket {
                    bucket: r.try_get::<Option<String>, _>("bucket")?.unwrap_or_default(),
                    liters: r.try_get::<Option<f64>, _>("liters")?.unwrap_or(0.0),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("water_buckets: bad row")
    }

    pub async fn sensors_since(&self, since: &str) -> Result<Vec<SensorPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, soil_moisture, temperature, humidity
            FROM sensor_data
            WHERE timestamp >= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("sensors_since failed")?;

        rows.iter()
            .map(|r| -> Result<SensorPoint, sqlx::Error> {
                Ok(SensorPoint {
                    timestamp: r.try_get("timestamp")?,
                    soil_moisture: r.try_get("soil_moisture")?,
                    temperature: r.try_get("temperature")?,
                    humidity: r.try_get("humidity")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("sensors_since: bad row")
    }

    pub async fn summary_since(&self, since: &str) -> Result<MetricsSummary> {
        let counts = sqlx::query(
            r#"
            SELECT COUNT(1) AS total,
                   SUM(CASE WHEN pump_status = 'ON' THEN 1 ELSE 0 END) AS pump_on,
                   MIN(soil_moisture) AS m_min,
                   AVG(soil_moisture) AS m_avg,
                   MAX(soil_moisture) AS m_max
            FROM sensor_data
            WHERE timestamp >= ?
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("summary_since: sensor stats failed")?;

        let total_liters: Option<f64> =
            sqlx::query_scalar("SELECT SUM(liters_used) FROM water_usage WHERE timestamp >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .context("summary_since: water total failed")?;

        let total_rows: i64 = counts.try_get("total")?;
        let pump_on: i64 = counts.try_get::<Option<i64>, _>("pump_on")?.unwrap_or(0);

        Ok(MetricsSummary {
            total_rows,
            pump_on,
            pump_off: total_rows - pump_on,
            moisture: MoistureStats {
                min: counts.try_get("m_min")?,
                avg: counts.try_get("m_avg")?,
                max: counts.try_get("m_max")?,
            },
            total_liters: total_liters.unwrap_or(0.0),
        })
    }

    /// Drops `table` so later writes to it fail.
    #[cfg(test)]
    pub(crate) async fn drop_table(&self, table: &str) {
        let sql = format!("DROP TABLE {table}");
        sqlx::query(&sql).execute(&self.pool).await.unwrap();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn memory_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn reading(ts: &str, m: f64, pump: PumpStatus) -> SensorReading {
        SensorReading {
            timestamp: ts.to_string(),
            soil_moisture: Some(m),
            temperature: Some(25.5),
            humidity: Some(60.0),
            pump_status: pump,
        }
    }

    #[test]
    fn timestamp_format_is_sortable_text() {
        let ts = time::macros::datetime!(2024-03-07 04:05:06 UTC);
        assert_eq!(format_timestamp(ts), "2024-03-07 04:05:06");
    }

    #[tokio::test]
    async fn readings_come_back_newest_first() {
        let db = memory_db().await;
        db.insert_reading(&reading("2024-01-01 00:00:00", 300.0, PumpStatus::On))
            .await
            .unwrap();
        db.insert_reading(&reading("2024-01-01 00:01:00", 600.0, PumpStatus::Off))
            .await
            .unwrap();

        let all = db.fetch_readings(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].reading.soil_moisture, Some(600.0));
        assert_eq!(all[1].reading.pump_status, PumpStatus::On);
        assert!(all[0].id > all[1].id);

        let latest = db.latest_reading().await.unwrap().unwrap();
        assert_eq!(latest.reading.timestamp, "2024-01-01 00:01:00");
    }

    #[tokio::test]
    async fn reading_without_moisture_stores_null() {
        let db = memory_db().await;
        let mut r = reading("2024-01-01 00:00:00", 0.0, PumpStatus::Off);
        r.soil_moisture = None;
        db.insert_reading(&r).await.unwrap();

        let stored = db.latest_reading().await.unwrap().unwrap();
        assert_eq!(stored.reading.soil_moisture, None);
        assert_eq!(stored.reading.pump_status, PumpStatus::Off);

        let s = db.summary_since("2024-01-01 00:00:00").await.unwrap();
        assert_eq!(s.total_rows, 1);
        assert_eq!(s.moisture.avg, None);
    }

    #[tokio::test]
    async fn fetch_readings_honours_limit() {
        let db = memory_db().await;
        for i in 0..5 {
            db.insert_reading(&reading(&format!("2024-01-01 00:0{i}:00"), 400.0, PumpStatus::Off))
                .await
                .unwrap();
        }
        assert_eq!(db.fetch_readings(Some(3)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn latest_reading_on_empty_table() {
        let db = memory_db().await;
        assert!(db.latest_reading().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn water_total_sums_ledger() {
        let db = memory_db().await;
        assert_eq!(db.water_usage_total().await.unwrap(), 0.0);

        db.log_water_usage("2024-01-01 00:00:00", 2.0).await.unwrap();
        db.log_water_usage("2024-01-01 00:02:00", 2.0).await.unwrap();

        assert_eq!(db.water_usage_total().await.unwrap(), 4.0);
        let entries = db.fetch_water_usage().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, "2024-01-01 00:02:00");
    }

    #[tokio::test]
    async fn notifications_default_timestamp_and_limit() {
        let db = memory_db().await;
        db.log_notification("first", Severity::Info, Some("2024-01-01 00:00:00"))
            .await
            .unwrap();
        db.log_notification("second", Severity::Warning, None)
            .await
            .unwrap();

        let rows = db.fetch_notifications(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "second");
        assert_eq!(rows[0].severity, "warning");
        assert_eq!(rows[0].timestamp.len(), "2024-01-01 00:00:00".len());

        assert_eq!(db.fetch_notifications(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settings_default_then_upsert() {
        let db = memory_db().await;
        assert_eq!(db.get_setting("moisture_threshold", "500").await.unwrap(), "500");

        db.set_setting("moisture_threshold", "650").await.unwrap();
        assert_eq!(db.get_setting("moisture_threshold", "500").await.unwrap(), "650");

        db.set_setting("moisture_threshold", "700").await.unwrap();
        assert_eq!(db.get_setting("moisture_threshold", "500").await.unwrap(), "700");
    }

    #[tokio::test]
    async fn summary_counts_pump_states_and_liters() {
        let db = memory_db().await;
        db.insert_reading(&reading("2024-01-01 10:00:00", 300.0, PumpStatus::On))
            .await
            .unwrap();
        db.insert_reading(&reading("2024-01-01 10:01:00", 600.0, PumpStatus::Off))
            .await
            .unwrap();
        db.insert_reading(&reading("2023-12-01 10:00:00", 100.0, PumpStatus::On))
            .await
            .unwrap();
        db.log_water_usage("2024-01-01 10:00:00", 2.0).await.unwrap();
        db.log_water_usage("2023-12-01 10:00:00", 2.0).await.unwrap();

        let s = db.summary_since("2024-01-01 00:00:00").await.unwrap();
        assert_eq!(s.total_rows, 2);
        assert_eq!(s.pump_on, 1);
        assert_eq!(s.pump_off, 1);
        assert_eq!(s.moisture.min, Some(300.0));
        assert_eq!(s.moisture.max, Some(600.0));
        assert_eq!(s.total_liters, 2.0);
    }

    #[tokio::test]
    async fn summary_on_empty_tables() {
        let db = memory_db().await;
        let s = db.summary_since("2024-01-01 00:00:00").await.unwrap();
        assert_eq!(s.total_rows, 0);
        assert_eq!(s.pump_on, 0);
        assert_eq!(s.moisture.avg, None);
        assert_eq!(s.total_liters, 0.0);
    }
}
