//! HTTP error mapping (§6, §7): `CoreError`/`StoreError` converted to a
//! status code + JSON body via a single `IntoResponse` impl, with the
//! taxonomy kind driving the status code rather than message parsing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chainrt_core::error::{CoreError, ResolverError};
use serde::Serialize;

/// Wraps every error a handler can produce — `CoreError` propagated from
/// `chainrt-core`/`chainrt-store`, or an ad hoc status+message pair for
/// checks (auth, path parsing) that never touch the core taxonomy.
#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Status(StatusCode, String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl From<chainrt_store::StoreError> for ApiError {
    fn from(err: chainrt_store::StoreError) -> Self {
        ApiError::Core(CoreError::from(err))
    }
}

impl From<(StatusCode, String)> for ApiError {
    fn from((status, message): (StatusCode, String)) -> Self {
        ApiError::Status(status, message)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Core(CoreError::from(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Constraint(_) => StatusCode::CONFLICT,
        CoreError::Concurrency(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Capacity(_) => StatusCode::INSUFFICIENT_STORAGE,
        CoreError::TransientUpstream(_) => StatusCode::BAD_GATEWAY,
        CoreError::Resolver(resolver_err) => match resolver_err {
            ResolverError::NoAvailableModels => StatusCode::SERVICE_UNAVAILABLE,
            ResolverError::NoSatisfactoryModel => StatusCode::NOT_FOUND,
        },
        CoreError::Chain { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::HookProtocol { .. } => StatusCode::BAD_GATEWAY,
        CoreError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Core(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                } else {
                    tracing::warn!(error = %err, "request rejected");
                }
                (status, Json(ErrorBody { error: err.to_string() })).into_response()
            }
            ApiError::Status(status, message) => (status, Json(ErrorBody { error: message })).into_response(),
        }
    }
}
