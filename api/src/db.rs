use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{DeviceId, DeviceProfile, NewTelemetry, TelemetryRecord};
use crate::store::{DeviceStore, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info};

const PROFILE_COLUMNS: &str =
    "id, device_id, first_name, email, password_hash, config, created_at, updated_at";

const TELEMETRY_COLUMNS: &str =
    "id, device_id, date, time, speed, acc_x, acc_y, acc_z, recorded_at, received_at";

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// PostgreSQL-backed profile and telemetry storage.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_failure(err: sqlx::Error) -> sqlx::Error {
    DB_FAILURES_TOTAL.inc();
    error!("Database error: {}", err);
    err
}

/// Unique violations are ordinary conflicts, not database failures.
fn insert_failure(err: sqlx::Error, what: &str) -> Error {
    match Error::from_insert(err, what) {
        Error::Database(err) => Error::Database(record_failure(err)),
        conflict => conflict,
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn find_profile(&self, device_id: DeviceId) -> Result<Option<DeviceProfile>> {
        let query = format!(
            "SELECT {} FROM device_profiles WHERE device_id = $1",
            PROFILE_COLUMNS
        );
        let profile = sqlx::query_as::<_, DeviceProfile>(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(record_failure)?;
        Ok(profile)
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<DeviceProfile>> {
        let query = format!(
            "SELECT {} FROM device_profiles WHERE email = $1",
            PROFILE_COLUMNS
        );
        let profile = sqlx::query_as::<_, DeviceProfile>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(record_failure)?;
        Ok(profile)
    }

    async fn insert_profile(&self, profile: &DeviceProfile) -> Result<()> {
        let query = r#"
            INSERT INTO device_profiles
                (id, device_id, first_name, email, password_hash, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#;

        sqlx::query(query)
            .bind(profile.id)
            .bind(profile.device_id)
            .bind(&profile.first_name)
            .bind(&profile.email)
            .bind(&profile.password_hash)
            .bind(&profile.config)
            .bind(profile.created_at)
            .bind(profile.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_failure(e, "Device ID"))?;

        debug!("Inserted profile for device {}", profile.device_id);
        Ok(())
    }

    async fn update_profile(&self, profile: &DeviceProfile) -> Result<()> {
        let query = r#"
            UPDATE device_profiles
            SET first_name = $2, email = $3, password_hash = $4, config = $5, updated_at = $6
            WHERE device_id = $1
            "#;

        let result = sqlx::query(query)
            .bind(profile.device_id)
            .bind(&profile.first_name)
            .bind(&profile.email)
            .bind(&profile.password_hash)
            .bind(&profile.config)
            .bind(profile.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_failure(e, "Device ID"))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "No profile for device {}",
                profile.device_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn insert_telemetry(&self, batch: &[NewTelemetry]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let device_ids: Vec<Option<i64>> = batch.iter().map(|t| t.device_id.map(|d| d.0)).collect();
        let dates: Vec<Option<&str>> = batch.iter().map(|t| t.date.as_deref()).collect();
        let times: Vec<Option<&str>> = batch.iter().map(|t| t.time.as_deref()).collect();
        let speeds: Vec<Option<f64>> = batch.iter().map(|t| t.speed).collect();
        let acc_xs: Vec<Option<f64>> = batch.iter().map(|t| t.acc_x).collect();
        let acc_ys: Vec<Option<f64>> = batch.iter().map(|t| t.acc_y).collect();
        let acc_zs: Vec<Option<f64>> = batch.iter().map(|t| t.acc_z).collect();
        let recorded: Vec<Option<DateTime<Utc>>> = batch.iter().map(|t| t.recorded_at()).collect();
        let payloads: Vec<Value> = batch.iter().map(|t| t.payload.clone()).collect();

        // One statement, so the batch lands atomically.
        let query = r#"
            INSERT INTO telemetry (device_id, date, time, speed, acc_x, acc_y, acc_z, recorded_at, payload)
            SELECT * FROM UNNEST(
                $1::int8[], $2::text[], $3::text[], $4::float8[], $5::float8[],
                $6::float8[], $7::float8[], $8::timestamptz[], $9::jsonb[]
            )
            "#;

        let result = sqlx::query(query)
            .bind(&device_ids)
            .bind(&dates)
            .bind(&times)
            .bind(&speeds)
            .bind(&acc_xs)
            .bind(&acc_ys)
            .bind(&acc_zs)
            .bind(&recorded)
            .bind(&payloads)
            .execute(&self.pool)
            .await
            .map_err(record_failure)?;

        Ok(result.rows_affected())
    }

    async fn insert_record(&self, record: &NewTelemetry) -> Result<TelemetryRecord> {
        let query = format!(
            "INSERT INTO telemetry (device_id, date, time, speed, acc_x, acc_y, acc_z, recorded_at, payload)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {}",
            TELEMETRY_COLUMNS
        );

        let stored = sqlx::query_as::<_, TelemetryRecord>(&query)
            .bind(record.device_id)
            .bind(&record.date)
            .bind(&record.time)
            .bind(record.speed)
            .bind(record.acc_x)
            .bind(record.acc_y)
            .bind(record.acc_z)
            .bind(record.recorded_at())
            .bind(&record.payload)
            .fetch_one(&self.pool)
            .await
            .map_err(record_failure)?;

        Ok(stored)
    }

    async fn device_telemetry(
        &self,
        device_id: DeviceId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryRecord>> {
        let query = format!(
            "SELECT {}
             FROM telemetry
             WHERE device_id = $1
             ORDER BY recorded_at DESC NULLS LAST, id DESC
             LIMIT $2",
            TELEMETRY_COLUMNS
        );

        // LIMIT NULL means no limit.
        let limit = limit.map(|l| l.min(i64::MAX as usize) as i64);

        let records = sqlx::query_as::<_, TelemetryRecord>(&query)
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(record_failure)?;

        Ok(records)
    }
}
