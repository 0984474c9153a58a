use crate::errors::{Error, Result};
use crate::model::{DeviceId, DeviceIdInput, DrivingRecordRequest, NewTelemetry, RegisterRequest};
use serde_json::json;

pub const PASSWORD_MIN_LEN: usize = 6;
const FIRST_NAME_MAX_LEN: usize = 100;
const EMAIL_MAX_LEN: usize = 254;

/// Registration input after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub device_id: DeviceId,
    pub first_name: String,
    pub email: Option<String>,
    pub password: String,
}

/// Validates a signup request
pub fn registration(req: &RegisterRequest) -> Result<Registration> {
    let first_name = req.first_name.as_deref().map(str::trim).unwrap_or_default();
    let password = req.password.as_deref().unwrap_or_default();

    if first_name.is_empty() || req.device_id.is_none() || password.is_empty() {
        return Err(Error::Validation(
            "All fields are required: firstName, deviceId, password".to_string(),
        ));
    }

    if first_name.chars().count() > FIRST_NAME_MAX_LEN {
        return Err(Error::Validation(format!(
            "First name must be at most {} characters long",
            FIRST_NAME_MAX_LEN
        )));
    }

    Ok(Registration {
        device_id: device_id(req.device_id.as_ref())?,
        first_name: first_name.to_string(),
        email: email(req.email.as_deref())?,
        password: new_password(password)?.to_string(),
    })
}

/// Converts a body-supplied device ID into its canonical form.
pub fn device_id(input: Option<&DeviceIdInput>) -> Result<DeviceId> {
    input
        .ok_or_else(|| Error::Validation("Device ID is required".to_string()))?
        .parse()
}

pub fn new_password(password: &str) -> Result<&str> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters long",
            PASSWORD_MIN_LEN
        )));
    }
    Ok(password)
}

/// Normalises an optional email. Blank means "no email".
pub fn email(email: Option<&str>) -> Result<Option<String>> {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };

    if email.len() > EMAIL_MAX_LEN {
        return Err(Error::Validation("Email is too long".to_string()));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if !valid {
        return Err(Error::Validation(format!("Invalid email address: {}", email)));
    }

    Ok(Some(email.to_lowercase()))
}

/// Validates a dashboard-entered record and turns it into a telemetry row
/// owned by `device_id`. The single acceleration figure is stored on the X axis.
pub fn driving_record(device_id: DeviceId, req: &DrivingRecordRequest) -> Result<NewTelemetry> {
    let date = req.date.as_deref().map(str::trim).unwrap_or_default();
    let time = req.time.as_deref().map(str::trim).unwrap_or_default();

    let (Some(speed), Some(acceleration)) = (req.speed.as_ref(), req.acceleration.as_ref()) else {
        return Err(required_record_fields());
    };
    if date.is_empty() || time.is_empty() {
        return Err(required_record_fields());
    }

    let (Some(speed), Some(acceleration)) = (speed.as_f64(), acceleration.as_f64()) else {
        return Err(Error::Validation(
            "Speed and acceleration must be numbers".to_string(),
        ));
    };

    Ok(NewTelemetry {
        device_id: Some(device_id),
        date: Some(date.to_string()),
        time: Some(time.to_string()),
        speed: Some(speed),
        acc_x: Some(acceleration),
        acc_y: None,
        acc_z: None,
        timestamp: None,
        payload: json!({
            "deviceId": device_id,
            "date": date,
            "time": time,
            "speed": speed,
            "acceleration": acceleration,
        }),
    })
}

fn required_record_fields() -> Error {
    Error::Validation("All fields are required: date, time, speed, acceleration".to_string())
}
