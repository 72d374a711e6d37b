//! Aggregated reports and chart metrics over the persisted history.

use anyhow::Context;
use serde::Serialize;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};

use crate::db::{format_timestamp, Db, MetricsSummary, SensorPoint, WaterBucket};
use crate::error::HubResult;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportRange {
    #[default]
    Daily,
    Weekly,
}

impl ReportRange {
    /// `weekly` or anything else (daily).
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("weekly") => Self::Weekly,
            _ => Self::Daily,
        }
    }

    /// sqlite `strftime` pattern for the bucket key.
    pub fn bucket_fmt(self) -> &'static str {
        match self {
            Self::Daily => "%Y-%m-%d",
            Self::Weekly => "%Y-%W",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub bucket: String,
    pub avg_soil_moisture: f64,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub total_liters: f64,
}

/// One row per bucket that has sensor data, with that bucket's water total.
pub async fn build_report(db: &Db, range: ReportRange) -> HubResult<Vec<ReportRow>> {
    let fmt = range.bucket_fmt();
    let sensors = db.sensor_buckets(fmt).await?;
    let water: HashMap<String, f64> = db
        .water_buckets(fmt, None)
        .await?
        .into_iter()
        .map(|b| (b.bucket, b.liters))
        .collect();

    Ok(sensors
        .into_iter()
        .map(|s| ReportRow {
            total_liters: water.get(&s.bucket).copied().unwrap_or(0.0),
            bucket: s.bucket,
            avg_soil_moisture: s.avg_soil_moisture.unwrap_or(0.0),
            avg_temperature: s.avg_temperature.unwrap_or(0.0),
            avg_humidity: s.avg_humidity.unwrap_or(0.0),
        })
        .collect())
}

pub fn to_csv(rows: &[ReportRow]) -> HubResult<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    if rows.is_empty() {
        wtr.write_record([
            "bucket",
            "avg_soil_moisture",
            "avg_temperature",
            "avg_humidity",
            "total_liters",
        ])?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr.into_inner().context("flush report csv")?;
    Ok(String::from_utf8(bytes).context("report csv is not utf-8")?)
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricsRange {
    #[default]
    Last24h,
    Last7d,
    Last30d,
    Last90d,
}

impl MetricsRange {
    /// Unknown or missing ranges fall back to 24h.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("7d") => Self::Last7d,
            Some("30d") => Self::Last30d,
            Some("90d") => Self::Last90d,
            _ => Self::Last24h,
        }
    }

    fn span(self) -> Duration {
        match self {
            Self::Last24h => Duration::hours(24),
            Self::Last7d => Duration::days(7),
            Self::Last30d => Duration::days(30),
            Self::Last90d => Duration::days(90),
        }
    }

    /// Lower bound, in the stored timestamp format.
    pub fn since_for(self, now: OffsetDateTime) -> String {
        format_timestamp(now - self.span())
    }

    /// Hourly buckets for the last day, daily otherwise.
    pub fn water_bucket_fmt(self) -> &'static str {
        match self {
            Self::Last24h => "%Y-%m-%d %H:00:00",
            _ => "%Y-%m-%d",
        }
    }
}

pub async fn water_metrics(db: &Db, range: MetricsRange) -> HubResult<Vec<WaterBucket>> {
    let since = range.since_for(OffsetDateTime::now_utc());
    Ok(db.water_buckets(range.water_bucket_fmt(), Some(&since)).await?)
}

pub async fn sensor_metrics(db: &Db, range: MetricsRange) -> HubResult<Vec<SensorPoint>> {
    let since = range.since_for(OffsetDateTime::now_utc());
    Ok(db.sensors_since(&since).await?)
}

pub async fn summary_metrics(db: &Db, range: MetricsRange) -> HubResult<MetricsSummary> {
    let since = range.since_for(OffsetDateTime::now_utc());
    Ok(db.summary_since(&since).await?)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::PumpStatus;
    use crate::db::tests::memory_db;
    use crate::db::SensorReading;
    use time::macros::datetime;

    async fn seed(db: &Db, ts: &str, m: f64, pump: PumpStatus) {
        db.insert_reading(&SensorReading {
            timestamp: ts.to_string(),
            soil_moisture: Some(m),
            temperature: Some(20.0),
            humidity: Some(50.0),
            pump_status: pump,
        })
        .await
        .unwrap();
        if pump.is_on() {
            db.log_water_usage(ts, 2.0).await.unwrap();
        }
    }

    #[test]
    fn range_parsing_falls_back() {
        assert_eq!(ReportRange::parse(Some("weekly")), ReportRange::Weekly);
        assert_eq!(ReportRange::parse(Some("monthly")), ReportRange::Daily);
        assert_eq!(ReportRange::parse(None), ReportRange::Daily);

        assert_eq!(MetricsRange::parse(Some("90d")), MetricsRange::Last90d);
        assert_eq!(MetricsRange::parse(Some("1y")), MetricsRange::Last24h);
        assert_eq!(MetricsRange::parse(None), MetricsRange::Last24h);
    }

    #[test]
    fn since_is_formatted_like_stored_timestamps() {
        let now = datetime!(2024-03-10 12:30:00 UTC);
        assert_eq!(MetricsRange::Last24h.since_for(now), "2024-03-09 12:30:00");
        assert_eq!(MetricsRange::Last7d.since_for(now), "2024-03-03 12:30:00");
        assert_eq!(MetricsRange::Last24h.water_bucket_fmt(), "%Y-%m-%d %H:00:00");
        assert_eq!(MetricsRange::Last30d.water_bucket_fmt(), "%Y-%m-%d");
    }

    #[tokio::test]
    async fn daily_report_merges_water_by_bucket() {
        let db = memory_db().await;
        seed(&db, "2024-01-01 08:00:00", 300.0, PumpStatus::On).await;
        seed(&db, "2024-01-01 09:00:00", 500.0, PumpStatus::Off).await;
        seed(&db, "2024-01-02 08:00:00", 700.0, PumpStatus::Off).await;

        let rows = build_report(&db, ReportRange::Daily).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket, "2024-01-01");
        assert_eq!(rows[0].avg_soil_moisture, 400.0);
        assert_eq!(rows[0].total_liters, 2.0);
        assert_eq!(rows[1].bucket, "2024-01-02");
        assert_eq!(rows[1].total_liters, 0.0);
    }

    #[tokio::test]
    async fn weekly_report_groups_days() {
        let db = memory_db().await;
        seed(&db, "2024-01-02 08:00:00", 300.0, PumpStatus::On).await;
        seed(&db, "2024-01-03 08:00:00", 300.0, PumpStatus::On).await;

        let rows = build_report(&db, ReportRange::Weekly).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket, "2024-01");
        assert_eq!(rows[0].total_liters, 4.0);
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let rows = vec![ReportRow {
            bucket: "2024-01-01".into(),
            avg_soil_moisture: 400.0,
            avg_temperature: 20.5,
            avg_humidity: 50.0,
            total_liters: 2.0,
        }];
        let out = to_csv(&rows).unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some("bucket,avg_soil_moisture,avg_temperature,avg_humidity,total_liters")
        );
        assert_eq!(lines.next(), Some("2024-01-01,400.0,20.5,50.0,2.0"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn csv_export_of_empty_report_is_header_only() {
        let out = to_csv(&[]).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("bucket,"));
    }

    #[tokio::test]
    async fn metrics_only_see_recent_rows() {
        let db = memory_db().await;
        let now = OffsetDateTime::now_utc();
        let recent = format_timestamp(now - Duration::hours(1));
        let old = format_timestamp(now - Duration::days(3));
        seed(&db, &recent, 300.0, PumpStatus::On).await;
        seed(&db, &old, 600.0, PumpStatus::Off).await;

        let day = summary_metrics(&db, MetricsRange::Last24h).await.unwrap();
        assert_eq!(day.total_rows, 1);
        assert_eq!(day.pump_on, 1);
        assert_eq!(day.total_liters, 2.0);

        let week = summary_metrics(&db, MetricsRange::Last7d).await.unwrap();
        assert_eq!(week.total_rows, 2);
        assert_eq!(week.pump_off, 1);

        assert_eq!(sensor_metrics(&db, MetricsRange::Last24h).await.unwrap().len(), 1);
        let water = water_metrics(&db, MetricsRange::Last24h).await.unwrap();
        assert_eq!(water.len(), 1);
        assert!(water[0].bucket.ends_with(":00:00"));
    }
}
