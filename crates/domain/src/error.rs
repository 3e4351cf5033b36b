/// Shared error type used across all run-broker crates.
///
/// Variants map 1:1 onto the error kinds a caller at the HTTP boundary needs
/// to distinguish: validation failures never reach the broker, `NotFound`
/// and `IdempotencyConflict` are surfaced as specific status codes, and
/// `RunTermination` never escapes the broker itself (a worker panic or
/// bubbled error becomes an `error`+`done` event pair instead).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("idempotency conflict: {0}")]
    IdempotencyConflict(String),

    #[error("plugin guard: {0}")]
    PluginGuard(String),

    #[error("upstream: {0}")]
    Upstream(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Other(_) => "INTERNAL",
            Error::Validation(_) => "VALIDATION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            Error::PluginGuard(_) => "PLUGIN_GUARD",
            Error::Upstream(_) => "UPSTREAM",
            Error::Auth(_) => "UNAUTHORIZED",
            Error::Config(_) => "CONFIG",
        }
    }
}
