use crate::analytics;
use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Numeric identifier of a physical sensor unit.
///
/// Path segments, JSON numbers and numeric JSON strings all convert into this
/// type once, at the edge of the API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(DeviceId)
            .map_err(|_| Error::Validation(format!("Invalid device ID: {:?}", s)))
    }
}

/// Device ID as it arrives in a request body, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DeviceIdInput {
    Number(i64),
    Text(String),
}

impl DeviceIdInput {
    pub fn parse(&self) -> Result<DeviceId> {
        match self {
            DeviceIdInput::Number(n) => Ok(DeviceId(*n)),
            DeviceIdInput::Text(s) => s.parse(),
        }
    }
}

impl From<DeviceId> for DeviceIdInput {
    fn from(id: DeviceId) -> Self {
        DeviceIdInput::Number(id.0)
    }
}

/// One stored telemetry sample.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub id: i64,
    pub device_id: Option<DeviceId>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub speed: Option<f64>,
    pub acc_x: Option<f64>,
    pub acc_y: Option<f64>,
    pub acc_z: Option<f64>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

/// A telemetry document accepted by the upload endpoint, not yet stored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTelemetry {
    #[serde(default, alias = "device_id", deserialize_with = "lenient::device_id")]
    pub device_id: Option<DeviceId>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub acc_x: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub acc_y: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub acc_z: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub timestamp: Option<String>,
    /// The document exactly as the device sent it.
    #[serde(skip)]
    pub payload: Value,
}

impl NewTelemetry {
    pub fn from_value(value: Value) -> Result<Self> {
        let mut record: NewTelemetry = serde_json::from_value(value.clone())?;
        record.payload = value;
        Ok(record)
    }

    /// When the sample was taken: an explicit `timestamp`, else `date` + `time`.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(analytics::parse_datetime)
            .or_else(|| analytics::record_instant(self.date.as_deref(), self.time.as_deref()))
            .map(|dt| dt.and_utc())
    }
}

/// Deserializers that turn whatever a device sent into `None` rather than
/// rejecting the document.
mod lenient {
    use super::DeviceId;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        let number = match value {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Ok(number.filter(|v| v.is_finite()))
    }

    pub fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    /// 2^63 is exactly representable, so the upper bound is exclusive.
    fn is_integral_i64(f: f64) -> bool {
        f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
    }

    pub fn device_id<'de, D>(deserializer: D) -> Result<Option<DeviceId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| is_integral_i64(*f)).map(|f| f as i64))
                .map(DeviceId),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok().map(DeviceId),
            _ => None,
        })
    }
}

/// Stored device profile.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceProfile {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub first_name: String,
    pub email: Option<String>,
    /// Absent for profiles created from a raw device configuration.
    pub password_hash: Option<String>,
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceProfile {
    pub fn to_public(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            first_name: self.first_name.clone(),
            email: self.email.clone(),
            device_id: self.device_id,
            config: self.config.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Profile as returned to clients: never carries the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: Uuid,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub device_id: DeviceId,
    #[serde(skip_serializing_if = "is_empty_object")]
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map_or(true, |o| o.is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: Option<String>,
    pub device_id: Option<DeviceIdInput>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub device_id: Option<DeviceIdInput>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordBody {
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub current_password: Option<String>,
    /// The new password.
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    pub token: Option<String>,
}

/// A single dashboard-entered record: one acceleration figure, no axes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrivingRecordRequest {
    pub date: Option<String>,
    pub time: Option<String>,
    pub speed: Option<Value>,
    pub acceleration: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct DrivingRecordCreated {
    pub message: String,
    pub record: RecordView,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicProfile,
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    pub user: PublicProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub inserted_count: u64,
}

/// REST API response wrapper for raw telemetry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryResponse {
    pub device_id: DeviceId,
    pub data: Vec<TelemetryRecord>,
    pub total: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivingRecordsResponse {
    pub records: DashboardSummary,
    pub all_records: Vec<RecordView>,
    pub device_id: DeviceId,
}

/// A telemetry record reduced to what the dashboard shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordView {
    pub id: i64,
    pub date: String,
    pub time: String,
    pub speed: f64,
    pub acceleration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub overall_score: i32,
    pub rating: ScoreRating,
    pub current_metrics: CurrentMetrics,
    pub recent_records: Vec<RecordView>,
    pub hourly_data: Vec<HourlyBucket>,
    pub stats: DrivingStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentMetrics {
    pub speed: f64,
    pub acceleration: f64,
    pub date: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBucket {
    pub hour: String,
    pub avg_speed: f64,
    pub max_speed: f64,
    pub avg_acceleration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivingStats {
    pub total_records: usize,
    pub avg_speed: f64,
    pub max_speed: f64,
    pub avg_acceleration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreRating {
    Safe,
    Moderate,
    Risky,
}

impl ScoreRating {
    pub fn from_score(score: i32) -> Self {
        if score >= 80 {
            ScoreRating::Safe
        } else if score >= 60 {
            ScoreRating::Moderate
        } else {
            ScoreRating::Risky
        }
    }
}
