//! In-process store for tests and local runs without PostgreSQL.

use crate::errors::{Error, Result};
use crate::model::{DeviceId, DeviceProfile, NewTelemetry, TelemetryRecord};
use crate::store::{DeviceStore, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: RwLock<BTreeMap<DeviceId, DeviceProfile>>,
    telemetry: RwLock<Vec<TelemetryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn profile_count(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn telemetry_count(&self) -> usize {
        self.telemetry.read().await.len()
    }
}

fn email_taken(
    profiles: &BTreeMap<DeviceId, DeviceProfile>,
    email: Option<&str>,
    owner: DeviceId,
) -> bool {
    let Some(email) = email else {
        return false;
    };
    profiles
        .values()
        .any(|p| p.device_id != owner && p.email.as_deref() == Some(email))
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn find_profile(&self, device_id: DeviceId) -> Result<Option<DeviceProfile>> {
        Ok(self.profiles.read().await.get(&device_id).cloned())
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<DeviceProfile>> {
        Ok(self
            .profiles
            .read()
            .await
            .values()
            .find(|p| p.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert_profile(&self, profile: &DeviceProfile) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.device_id) {
            return Err(Error::Conflict("Device ID already exists".to_string()));
        }
        if email_taken(&profiles, profile.email.as_deref(), profile.device_id) {
            return Err(Error::Conflict("Email already exists".to_string()));
        }
        profiles.insert(profile.device_id, profile.clone());
        Ok(())
    }

    async fn update_profile(&self, profile: &DeviceProfile) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        if email_taken(&profiles, profile.email.as_deref(), profile.device_id) {
            return Err(Error::Conflict("Email already exists".to_string()));
        }
        match profiles.get_mut(&profile.device_id) {
            Some(stored) => {
                *stored = DeviceProfile {
                    id: stored.id,
                    created_at: stored.created_at,
                    ..profile.clone()
                };
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "No profile for device {}",
                profile.device_id
            ))),
        }
    }
}

fn stored(t: &NewTelemetry, id: i64, received_at: DateTime<Utc>) -> TelemetryRecord {
    TelemetryRecord {
        id,
        device_id: t.device_id,
        date: t.date.clone(),
        time: t.time.clone(),
        speed: t.speed,
        acc_x: t.acc_x,
        acc_y: t.acc_y,
        acc_z: t.acc_z,
        recorded_at: t.recorded_at(),
        received_at,
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_telemetry(&self, batch: &[NewTelemetry]) -> Result<u64> {
        let mut telemetry = self.telemetry.write().await;
        let received_at = Utc::now();
        let first_id = telemetry.len() as i64 + 1;

        telemetry.extend(
            batch
                .iter()
                .zip(first_id..)
                .map(|(t, id)| stored(t, id, received_at)),
        );

        Ok(batch.len() as u64)
    }

    async fn insert_record(&self, record: &NewTelemetry) -> Result<TelemetryRecord> {
        let mut telemetry = self.telemetry.write().await;
        let record = stored(record, telemetry.len() as i64 + 1, Utc::now());
        telemetry.push(record.clone());
        Ok(record)
    }

    async fn device_telemetry(
        &self,
        device_id: DeviceId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryRecord>> {
        let mut records: Vec<TelemetryRecord> = self
            .telemetry
            .read()
            .await
            .iter()
            .filter(|t| t.device_id == Some(device_id))
            .cloned()
            .collect();

        // Newest first, unknown instants last, ties by insertion order.
        records.sort_by(|a, b| match (a.recorded_at, b.recorded_at) {
            (Some(x), Some(y)) => y.cmp(&x).then(b.id.cmp(&a.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.id.cmp(&a.id),
        });

        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
