//! Storage gateway for consolidated readings.
//!
//! Routes only see the [`ReadingStore`] trait. The service runs on
//! [`PgReadingStore`]; tests swap in the in-memory store from [`memory`].

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::IngestError;
use crate::models::{CompletedRecord, StoredRow};

// ---

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert one record atomically and return it with its generated id.
    async fn append(&self, record: &CompletedRecord) -> Result<StoredRow, IngestError>;

    /// Cheap connectivity probe.
    async fn health_check(&self) -> Result<(), IngestError>;

    /// Every stored row, oldest first.
    async fn list_all(&self) -> Result<Vec<StoredRow>, IngestError>;
}

/// [`ReadingStore`] backed by the `device_data` table.
#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    // ---
    async fn append(&self, record: &CompletedRecord) -> Result<StoredRow, IngestError> {
        // ---
        // Dropping an uncommitted transaction rolls it back
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, StoredRow>(
            r#"
            INSERT INTO device_data (
                timestamp, device,
                power_value, current_value, apparent_power_value,
                voltage_value, power_factor_value, energy_value
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING
                id, timestamp, device,
                power_value, current_value, apparent_power_value,
                voltage_value, power_factor_value, energy_value
            "#,
        )
        .bind(record.timestamp)
        .bind(&record.device)
        .bind(record.power)
        .bind(record.current)
        .bind(record.apparent_power)
        .bind(record.voltage)
        .bind(record.power_factor)
        .bind(record.energy)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn health_check(&self) -> Result<(), IngestError> {
        // ---
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredRow>, IngestError> {
        // ---
        let rows = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT
                id, timestamp, device,
                power_value, current_value, apparent_power_value,
                voltage_value, power_factor_value, energy_value
            FROM device_data
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
