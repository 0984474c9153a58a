use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Token signing error: {0}")]
    TokenSigning(#[from] jsonwebtoken::errors::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Maps a unique-constraint violation to `Conflict`, leaving any other
    /// database error untouched.
    pub fn from_insert(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().is_some_and(|code| code == "23505") {
                let subject = match db_err.constraint() {
                    Some(name) if name.contains("email") => "Email",
                    _ => what,
                };
                return Error::Conflict(format!("{} already exists", subject));
            }
        }
        Error::Database(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
