//! Database schema management for `sonoff-telemetry`.
//!
//! Ensures the readings table exists before serving requests.
//! Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the `device_data` table and its index (idempotent).
///
/// Safe to call on every startup; existing objects are left untouched, and
/// the table layout is never migrated.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // One row per consolidated reading, served by `/getData`
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS device_data (
            id                   SERIAL PRIMARY KEY,
            timestamp            TIMESTAMPTZ      NOT NULL,
            device               VARCHAR(80)      NOT NULL,
            power_value          DOUBLE PRECISION NOT NULL,
            current_value        DOUBLE PRECISION NOT NULL,
            apparent_power_value DOUBLE PRECISION NOT NULL,
            voltage_value        DOUBLE PRECISION NOT NULL,
            power_factor_value   DOUBLE PRECISION NOT NULL,
            energy_value         DOUBLE PRECISION NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_device_data_device_timestamp
            ON device_data (device, timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
