use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

// ============================================================================
// Layer Errors
// ============================================================================

/// Failure talking to the operator website.
#[derive(Error, Debug)]
pub enum OriginError {
    #[error("origin returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("origin unreachable ({url}): {reason}")]
    Unreachable { url: String, reason: String },
}

impl OriginError {
    /// The operator answers 404 when a stop or vehicle has nothing active.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OriginError::Http { status: 404, .. })
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("expected container `{0}` is missing from the origin page")]
    StructureMissing(String),

    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("reference query failed: {0}")]
    Query(String),
}

/// Failure loading the reference feed at startup.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("required table {0} is missing from the feed")]
    MissingTable(&'static str),

    #[error("CSV error in {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Anything that stops the server from coming up.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("reference feed: {0}")]
    Feed(#[from] FeedError),

    #[error("origin client: {0}")]
    Origin(#[from] OriginError),

    #[error("page layout: {0}")]
    Layout(#[from] ExtractError),
}

// ============================================================================
// API Boundary
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Every handler failure is converted into one of these before it reaches
/// the client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid {parameter}: {reason}")]
    Validation {
        parameter: &'static str,
        reason: String,
    },

    #[error("origin {0:?} is not allowed")]
    UnauthorizedOrigin(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn validation(parameter: &'static str, reason: impl Into<String>) -> Self {
        ApiError::Validation {
            parameter,
            reason: reason.into(),
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Validation { parameter, reason } => ErrorBody {
                error: format!("Invalid {}", parameter),
                details: Some(json!({ "parameter": parameter, "reason": reason })),
            },
            ApiError::UnauthorizedOrigin(_) => ErrorBody {
                error: "Origin not allowed".to_string(),
                details: None,
            },
            ApiError::NotFound(message) => ErrorBody {
                error: message.clone(),
                details: None,
            },
            ApiError::Origin(_) => ErrorBody {
                error: "Failed to fetch live data from the transit operator".to_string(),
                details: None,
            },
            ApiError::Extraction(_) => ErrorBody {
                error: "Failed to read live data from the transit operator".to_string(),
                details: None,
            },
            ApiError::Store(_) => ErrorBody {
                error: "Failed to query reference data".to_string(),
                details: None,
            },
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::UnauthorizedOrigin(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Origin(_) | ApiError::Extraction(_) | ApiError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            // Full detail stays server-side; the client only sees the summary.
            error!("❌ {}", self);
        }
        HttpResponse::build(status).json(self.body())
    }
}
