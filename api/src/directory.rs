//! Device directory: signup, login, profile updates and token checks.

use crate::auth::{self, Claims, TokenService};
use crate::errors::{Error, Result};
use crate::metrics::LOGIN_FAILURES_TOTAL;
use crate::model::{DeviceId, DeviceProfile, RegisterRequest, UpdateProfileRequest};
use crate::store::DeviceStore;
use crate::validate;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn DeviceStore>,
    tokens: TokenService,
}

impl Directory {
    pub fn new(store: Arc<dyn DeviceStore>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    /// Creates a profile with credentials and returns it with a fresh token.
    pub async fn register(&self, req: &RegisterRequest) -> Result<(DeviceProfile, String)> {
        let reg = validate::registration(req)?;

        if self.store.find_profile(reg.device_id).await?.is_some() {
            return Err(Error::Conflict("Device ID already exists".to_string()));
        }
        if let Some(email) = &reg.email {
            if self.store.find_profile_by_email(email).await?.is_some() {
                return Err(Error::Conflict("Email already exists".to_string()));
            }
        }

        let now = Utc::now();
        let profile = DeviceProfile {
            id: Uuid::new_v4(),
            device_id: reg.device_id,
            first_name: reg.first_name,
            email: reg.email,
            password_hash: Some(auth::hash_password(&reg.password)?),
            config: Value::Object(Map::new()),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_profile(&profile).await?;
        info!("Registered device {}", profile.device_id);

        let token = self.tokens.issue(&profile)?;
        Ok((profile, token))
    }

    /// Stores a raw device configuration. Everything except `deviceId` is
    /// kept as the profile's configuration.
    pub async fn save_device_config(&self, config: Map<String, Value>) -> Result<DeviceProfile> {
        let mut config = config;
        let device_id = match config.remove("deviceId") {
            Some(Value::Number(n)) => n.as_i64().map(DeviceId).ok_or_else(|| {
                Error::Validation(format!("Invalid device ID: {}", n))
            })?,
            Some(Value::String(s)) => s.parse()?,
            _ => return Err(Error::Validation("Device ID is required".to_string())),
        };

        if self.store.find_profile(device_id).await?.is_some() {
            return Err(Error::Conflict("Device ID already exists".to_string()));
        }

        let now = Utc::now();
        let profile = DeviceProfile {
            id: Uuid::new_v4(),
            device_id,
            first_name: String::new(),
            email: None,
            password_hash: None,
            config: Value::Object(config),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_profile(&profile).await?;
        info!("Saved configuration for device {}", device_id);

        Ok(profile)
    }

    pub async fn profile(&self, device_id: DeviceId) -> Result<DeviceProfile> {
        self.store
            .find_profile(device_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No profile for device {}", device_id)))
    }

    /// Checks a device's password and issues a token.
    pub async fn authenticate(
        &self,
        device_id: DeviceId,
        password: &str,
    ) -> Result<(DeviceProfile, String)> {
        let profile = self.store.find_profile(device_id).await?;

        let verified = profile.filter(|p| {
            p.password_hash
                .as_deref()
                .is_some_and(|hash| auth::verify_password(password, hash))
        });

        let Some(profile) = verified else {
            LOGIN_FAILURES_TOTAL.inc();
            warn!("Failed login for device {}", device_id);
            return Err(Error::Unauthorized(INVALID_CREDENTIALS.to_string()));
        };

        let token = self.tokens.issue(&profile)?;
        Ok((profile, token))
    }

    /// Merges an email and/or password change into a profile.
    pub async fn update_profile(
        &self,
        device_id: DeviceId,
        req: &UpdateProfileRequest,
    ) -> Result<DeviceProfile> {
        let mut profile = self.profile(device_id).await?;

        if let Some(new_password) = req.password.as_deref() {
            let Some(current) = req.current_password.as_deref() else {
                return Err(Error::Validation(
                    "Current password is required to set a new password".to_string(),
                ));
            };
            let matches = profile
                .password_hash
                .as_deref()
                .is_some_and(|hash| auth::verify_password(current, hash));
            if !matches {
                LOGIN_FAILURES_TOTAL.inc();
                return Err(Error::Unauthorized(
                    "Current password is incorrect".to_string(),
                ));
            }
            profile.password_hash = Some(auth::hash_password(validate::new_password(new_password)?)?);
        }

        if let Some(email) = req.email.as_deref() {
            profile.email = validate::email(Some(email))?;
        }

        profile.updated_at = Utc::now();
        self.store.update_profile(&profile).await?;
        info!("Updated profile for device {}", device_id);

        Ok(profile)
    }

    /// Validates a token and confirms its device still has a profile.
    pub async fn verify_token(&self, token: &str) -> Result<(Claims, DeviceProfile)> {
        let claims = self.tokens.verify(token)?;
        let profile = self.profile(claims.device_id).await?;
        Ok((claims, profile))
    }
}
