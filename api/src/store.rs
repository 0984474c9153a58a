//! Storage seams for the two collections the API touches.
//!
//! Profile writes and telemetry writes are never coordinated, so the two
//! traits stay independent.

use crate::errors::Result;
use crate::model::{DeviceId, DeviceProfile, NewTelemetry, TelemetryRecord};
use async_trait::async_trait;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find_profile(&self, device_id: DeviceId) -> Result<Option<DeviceProfile>>;

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<DeviceProfile>>;

    /// Inserts a new profile.
    ///
    /// # Errors
    ///
    /// `Conflict` if the device ID, or a non-empty email, is already taken.
    async fn insert_profile(&self, profile: &DeviceProfile) -> Result<()>;

    /// Overwrites the mutable fields of an existing profile.
    ///
    /// # Errors
    ///
    /// `NotFound` if the device has no profile, `Conflict` if the email is
    /// taken by another device.
    async fn update_profile(&self, profile: &DeviceProfile) -> Result<()>;
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Inserts every record or none. Returns the number inserted.
    async fn insert_telemetry(&self, records: &[NewTelemetry]) -> Result<u64>;

    /// Inserts one record and returns it as stored.
    async fn insert_record(&self, record: &NewTelemetry) -> Result<TelemetryRecord>;

    /// Records for one device, newest first, optionally capped.
    async fn device_telemetry(
        &self,
        device_id: DeviceId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryRecord>>;
}
