use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tagwatch_core::TagwatchError;

// ---------------------------------------------------------------------------
// Internal sentinel for rejected webhook deliveries
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 401 through the `anyhow::Error` chain without
/// touching the `TagwatchError` enum.
#[derive(Debug)]
struct UnauthorizedError(String);

impl std::fmt::Display for UnauthorizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UnauthorizedError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 401 Unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self(UnauthorizedError(msg.into()).into())
    }

    pub(crate) fn join(e: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {e}"))
    }
}

fn status_for(e: &TagwatchError) -> StatusCode {
    match e {
        TagwatchError::UnknownAction(_) | TagwatchError::TagNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        TagwatchError::InvalidConfig(_) | TagwatchError::InvalidPattern { .. } => {
            StatusCode::BAD_REQUEST
        }
        TagwatchError::InvalidTransition { .. } => StatusCode::CONFLICT,
        e if e.is_upstream() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(u) = self.0.downcast_ref::<UnauthorizedError>() {
            let body = serde_json::json!({ "error": u.0.clone() });
            return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
        }

        let status = self
            .0
            .downcast_ref::<TagwatchError>()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("request failed: {:#}", self.0);
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: TagwatchError) -> StatusCode {
        AppError(e.into()).into_response().status()
    }

    #[test]
    fn unknown_action_maps_to_404() {
        assert_eq!(
            status(TagwatchError::UnknownAction("x".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn upstream_failures_map_to_502() {
        assert_eq!(
            status(TagwatchError::CiUnavailable("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(TagwatchError::RegistryUnavailable {
                repository: "acme/api".into(),
                reason: "timeout".into(),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(TagwatchError::TransportSendFailure("blocked".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn invalid_config_maps_to_400() {
        assert_eq!(
            status(TagwatchError::InvalidConfig("bad".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn store_failure_maps_to_500() {
        assert_eq!(
            status(TagwatchError::Store("corrupt".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unauthorized_sentinel_maps_to_401() {
        let response = AppError::unauthorized("bad secret").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn non_domain_error_maps_to_500() {
        let response = AppError(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
