//! Measurement store on SQLite

use std::path::Path;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use vbus_protocol::Readings;

use crate::value::split_value_unit;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One stored measurement
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeasurementRow {
    pub ts: String,
    pub device: String,
    pub field: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
}

/// Handle to the measurements database
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct MeasurementStore {
    pool: SqlitePool,
}

impl MeasurementStore {
    /// Open (or create) the database at `path`
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        tracing::info!(path, "measurement store opened");
        Ok(store)
    }

    /// Open an in-memory database, mainly for tests
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // A pool of one keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS measurements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                device TEXT NOT NULL,
                field TEXT NOT NULL,
                value REAL,
                unit TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_measurements_ts ON measurements(ts)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_measurements_device_field
             ON measurements(device, field)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert one decoded snapshot atomically; returns the row count
    pub async fn insert_snapshot(&self, ts: &str, snapshot: &Readings) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for (device, fields) in snapshot {
            for (field, raw_value) in fields {
                let (value, unit) = split_value_unit(raw_value);
                sqlx::query(
                    "INSERT INTO measurements (ts, device, field, value, unit)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(ts)
                .bind(device)
                .bind(field)
                .bind(value)
                .bind(unit)
                .execute(&mut *tx)
                .await?;
                inserted += 1;
            }
        }

        tx.commit().await?;
        tracing::debug!(ts, rows = inserted, "snapshot stored");
        Ok(inserted)
    }

    /// Most recent measurements, newest first, optionally for one device
    pub async fn recent_measurements(
        &self,
        device: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MeasurementRow>, StoreError> {
        let rows = match device {
            Some(device) => {
                sqlx::query_as::<_, MeasurementRow>(
                    "SELECT ts, device, field, value, unit FROM measurements
                     WHERE device = ?1 ORDER BY id DESC LIMIT ?2",
                )
                .bind(device)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MeasurementRow>(
                    "SELECT ts, device, field, value, unit FROM measurements
                     ORDER BY id DESC LIMIT ?1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// All rows belonging to the most recent snapshot
    pub async fn latest_snapshot(&self) -> Result<Vec<MeasurementRow>, StoreError> {
        let rows = sqlx::query_as::<_, MeasurementRow>(
            "SELECT ts, device, field, value, unit FROM measurements
             WHERE ts = (SELECT MAX(ts) FROM measurements)
             ORDER BY device, field",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct device names seen so far
    pub async fn devices(&self) -> Result<Vec<String>, StoreError> {
        let names =
            sqlx::query_scalar::<_, String>("SELECT DISTINCT device FROM measurements ORDER BY device")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_snapshot() -> Readings {
        let mut fields = BTreeMap::new();
        fields.insert("Temp. Sensor 1".to_string(), "23.4°C".to_string());
        fields.insert("Operating Hours".to_string(), "38".to_string());

        let mut readings = Readings::new();
        readings.insert("DemoDevice".to_string(), fields);
        readings
    }

    #[tokio::test]
    async fn test_insert_and_query_snapshot() {
        let store = MeasurementStore::open_in_memory().await.unwrap();

        let inserted = store
            .insert_snapshot("2025-01-01T00:00:00Z", &sample_snapshot())
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let rows = store.recent_measurements(None, 10).await.unwrap();
        assert_eq!(rows.len(), 2);

        let temp = rows
            .iter()
            .find(|r| r.field == "Temp. Sensor 1")
            .unwrap();
        assert_eq!(temp.device, "DemoDevice");
        assert_eq!(temp.value, Some(23.4));
        assert_eq!(temp.unit.as_deref(), Some("°C"));

        let hours = rows.iter().find(|r| r.field == "Operating Hours").unwrap();
        assert_eq!(hours.value, Some(38.0));
        assert_eq!(hours.unit, None);
    }

    #[tokio::test]
    async fn test_latest_snapshot_picks_newest_ts() {
        let store = MeasurementStore::open_in_memory().await.unwrap();
        store
            .insert_snapshot("2025-01-01T00:00:00Z", &sample_snapshot())
            .await
            .unwrap();
        store
            .insert_snapshot("2025-01-01T00:05:00Z", &sample_snapshot())
            .await
            .unwrap();

        let rows = store.latest_snapshot().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.ts == "2025-01-01T00:05:00Z"));
    }

    #[tokio::test]
    async fn test_device_filter_and_listing() {
        let store = MeasurementStore::open_in_memory().await.unwrap();

        let mut readings = sample_snapshot();
        let mut other = BTreeMap::new();
        other.insert("Power".to_string(), "16W".to_string());
        readings.insert("OtherDevice".to_string(), other);

        store
            .insert_snapshot("2025-01-01T00:00:00Z", &readings)
            .await
            .unwrap();

        let rows = store
            .recent_measurements(Some("OtherDevice"), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "Power");

        let devices = store.devices().await.unwrap();
        assert_eq!(devices, vec!["DemoDevice", "OtherDevice"]);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = MeasurementStore::open_in_memory().await.unwrap();
        assert!(store.latest_snapshot().await.unwrap().is_empty());
        assert!(store.devices().await.unwrap().is_empty());
    }
}
