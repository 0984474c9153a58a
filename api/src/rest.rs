use crate::directory::Directory;
use crate::errors::Error;
use crate::ingest::Ingest;
use crate::metrics::UPLOAD_REQUESTS_TOTAL;
use crate::model::{
    AuthResponse, DashboardSummary, DeviceId, DrivingRecordCreated, DrivingRecordRequest,
    DrivingRecordsResponse, LoginRequest, PasswordBody, RegisterRequest, TelemetryResponse,
    UpdateProfileRequest, UploadResponse, VerifyRequest, VerifyResponse,
};
use crate::validate;
use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub directory: Directory,
    pub ingest: Ingest,
}

#[derive(Debug, Deserialize)]
pub struct TelemetryQuery {
    limit: Option<usize>,
}

/// Every route is served at the root and again under `/api`.
pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(health))
        .route("/config", post(save_config))
        .route(
            "/config/:device_id",
            get(get_config).post(login_with_config).put(update_config),
        )
        .route("/upload", post(upload))
        .route("/telemetry/:device_id", get(get_telemetry))
        .route("/driving-records", post(create_driving_record))
        .route("/driving-records/:device_id", get(get_driving_records))
        .route("/dashboard", get(dashboard))
        .route("/auth/login", post(login))
        .route("/auth/signup", post(signup))
        .route("/auth/verify", post(verify));

    Router::new()
        .nest("/api", routes.clone())
        .merge(routes)
        .with_state(state)
}

/// `Json` whose rejections (bad syntax, wrong shape, missing content type)
/// render as a 400 `{error}` body like every other validation failure.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

fn parse_device_id(raw: &str) -> Result<DeviceId, AppError> {
    Ok(raw.parse::<DeviceId>()?)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Device the bearer token was issued to.
async fn authorized_device(state: &AppState, headers: &HeaderMap) -> Result<DeviceId, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| Error::Unauthorized("Authorization token required".to_string()))?;
    let (claims, _) = state.directory.verify_token(&token).await?;
    Ok(claims.device_id)
}

async fn health() -> Json<Value> {
    Json(json!({
        "message": "ESP32 telemetry API is running",
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Accepts either a dashboard signup or a raw device configuration.
async fn save_config(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<Value>, AppError> {
    let Value::Object(fields) = body else {
        return Err(Error::Validation("Configuration must be a JSON object".to_string()).into());
    };

    let is_signup = ["firstName", "password"]
        .iter()
        .all(|key| fields.get(*key).is_some_and(|v| !v.is_null()));

    if is_signup {
        let req: RegisterRequest = serde_json::from_value(Value::Object(fields))?;
        let (profile, token) = state.directory.register(&req).await?;
        return Ok(Json(json!({
            "message": "User configuration saved successfully",
            "token": token,
            "user": profile.to_public(),
            "deviceId": profile.device_id,
        })));
    }

    let profile = state.directory.save_device_config(fields).await?;
    Ok(Json(json!({
        "message": "Configuration saved successfully",
        "id": profile.id,
        "deviceId": profile.device_id,
    })))
}

async fn get_config(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let profile = state.directory.profile(parse_device_id(&device_id)?).await?;
    Ok(Json(json!(profile.to_public())))
}

/// Password check on the config path. Same as `/auth/login`.
async fn login_with_config(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    ApiJson(body): ApiJson<PasswordBody>,
) -> Result<Json<AuthResponse>, AppError> {
    let device_id = parse_device_id(&device_id)?;
    let password = body
        .password
        .ok_or_else(|| Error::Validation("Password is required".to_string()))?;

    let (profile, token) = state.directory.authenticate(device_id, &password).await?;
    Ok(Json(AuthResponse {
        user: profile.to_public(),
        token,
    }))
}

async fn update_config(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    ApiJson(body): ApiJson<UpdateProfileRequest>,
) -> Result<Json<Value>, AppError> {
    let device_id = parse_device_id(&device_id)?;
    let profile = state.directory.update_profile(device_id, &body).await?;
    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": profile.to_public(),
    })))
}

async fn upload(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<UploadResponse>, AppError> {
    UPLOAD_REQUESTS_TOTAL.inc();
    let inserted_count = state.ingest.upload(body).await?;
    Ok(Json(UploadResponse {
        message: "Data inserted successfully".to_string(),
        inserted_count,
    }))
}

async fn get_telemetry(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<TelemetryQuery>,
) -> Result<Json<TelemetryResponse>, AppError> {
    let device_id = parse_device_id(&device_id)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let data = state.ingest.fetch(device_id, Some(limit)).await?;
    Ok(Json(TelemetryResponse {
        device_id,
        total: data.len(),
        data,
        limit,
    }))
}

async fn get_driving_records(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DrivingRecordsResponse>, AppError> {
    let device_id = parse_device_id(&device_id)?;
    debug!("Fetching records for device {}", device_id);

    let (records, all_records) = state.ingest.driving_records(device_id).await?;
    Ok(Json(DrivingRecordsResponse {
        records,
        all_records,
        device_id,
    }))
}

/// Adds one record for the device that owns the bearer token.
async fn create_driving_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<DrivingRecordRequest>,
) -> Result<Json<DrivingRecordCreated>, AppError> {
    let device_id = authorized_device(&state, &headers).await?;
    let record = state.ingest.record(device_id, &body).await?;
    Ok(Json(DrivingRecordCreated {
        message: "Driving record saved successfully".to_string(),
        record,
    }))
}

/// Dashboard summary for the device that owns the bearer token.
async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardSummary>, AppError> {
    let device_id = authorized_device(&state, &headers).await?;
    let (summary, _) = state.ingest.driving_records(device_id).await?;
    Ok(Json(summary))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let (Some(device_id), Some(password)) = (body.device_id.as_ref(), body.password.as_deref())
    else {
        return Err(
            Error::Validation("Device ID and password are required".to_string()).into(),
        );
    };
    let device_id = validate::device_id(Some(device_id))?;

    let (profile, token) = state.directory.authenticate(device_id, password).await?;
    Ok(Json(AuthResponse {
        user: profile.to_public(),
        token,
    }))
}

async fn signup(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let (profile, token) = state.directory.register(&body).await?;
    Ok(Json(AuthResponse {
        user: profile.to_public(),
        token,
    }))
}

/// Takes the token from the body, falling back to a bearer header.
async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<VerifyRequest>>,
) -> Result<Json<VerifyResponse>, AppError> {
    let from_body = body.and_then(|Json(b)| b.token).filter(|t| !t.is_empty());

    let token = from_body
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| Error::Validation("Token is required".to_string()))?;

    let (_, profile) = state.directory.verify_token(&token).await?;
    Ok(Json(VerifyResponse {
        valid: true,
        user: profile.to_public(),
    }))
}

pub struct AppError(Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unauthorized(_) | Error::InvalidToken | Error::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Database(_)
            | Error::Migration(_)
            | Error::PasswordHash(_)
            | Error::TokenSigning(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API error: {}", self.0);
        } else {
            debug!("Request rejected ({}): {}", status, self.0);
        }

        let message = match &self.0 {
            Error::Validation(msg)
            | Error::Conflict(msg)
            | Error::Unauthorized(msg)
            | Error::NotFound(msg) => msg.clone(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
