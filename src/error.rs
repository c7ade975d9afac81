use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Typed failures produced by the engine and auth layers; the
/// `IntoResponse` impl maps them to wire responses.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0} already exists")]
    Duplicate(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("no admin user is configured")]
    NoAdminConfigured,

    #[error("session expired")]
    SessionExpired,

    #[error("storage error")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::Duplicate(_) => StatusCode::CONFLICT,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::NoAdminConfigured => StatusCode::UNAUTHORIZED,
            // non-standard "login timeout": tells the client to drop its
            // session and send the user back to the login screen
            EngineError::SessionExpired => {
                StatusCode::from_u16(440).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let message = match &self {
            EngineError::Storage(err) => {
                tracing::error!(error = %err, "storage failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            EngineError::invalid("missing field").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EngineError::NotFound("lead").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EngineError::Forbidden("not the current assignee").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            EngineError::NoAdminConfigured.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(EngineError::SessionExpired.status().as_u16(), 440);
        assert_eq!(EngineError::Duplicate("email").status(), StatusCode::CONFLICT);
    }

    #[test]
    fn storage_errors_never_leak_detail() {
        let resp = EngineError::Storage(sqlx::Error::PoolClosed).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
