use crate::config::ConfigError;
use crate::cycle::CycleError;
use crate::ledger::LedgerError;
use crate::pool::PoolError;
use crate::reference::ReferenceError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Reference(ReferenceError),
    Cycle(CycleError),
    Ledger(LedgerError),
    InvalidRequest(String),
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Reference(err) => write!(f, "reference data error: {}", err),
            AppError::Cycle(err) => write!(f, "decision cycle failed: {}", err),
            AppError::Ledger(err) => write!(f, "ledger error: {}", err),
            AppError::InvalidRequest(reason) => write!(f, "invalid request: {}", reason),
            AppError::NotFound(what) => write!(f, "{} not found", what),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Reference(err) => Some(err),
            AppError::Cycle(err) => Some(err),
            AppError::Ledger(err) => Some(err),
            AppError::InvalidRequest(_) | AppError::NotFound(_) => None,
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Reference(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Cycle(CycleError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Cycle(CycleError::Pool(PoolError::Conflict { .. }))
            | AppError::Cycle(CycleError::Ledger(LedgerError::Conflict { .. }))
            | AppError::Ledger(LedgerError::Conflict { .. }) => StatusCode::CONFLICT,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Cycle(_)
            | AppError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({ "error": self.to_string() });
        if let AppError::Cycle(err) = &self {
            body["retryable"] = json!(err.is_retryable());
        }
        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<ReferenceError> for AppError {
    fn from(value: ReferenceError) -> Self {
        Self::Reference(value)
    }
}

impl From<CycleError> for AppError {
    fn from(value: CycleError) -> Self {
        Self::Cycle(value)
    }
}

impl From<PoolError> for AppError {
    fn from(value: PoolError) -> Self {
        Self::Cycle(CycleError::Pool(value))
    }
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn maps_failures_to_http_statuses() {
        let timeout = AppError::from(CycleError::Timeout(Duration::from_secs(5)));
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let conflict = AppError::from(CycleError::Pool(PoolError::Conflict {
            expected: 1,
            actual: 2,
        }));
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let missing = AppError::NotFound("plan".to_string());
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "plan not found");

        let unavailable = AppError::from(LedgerError::Unavailable("down".to_string()));
        assert_eq!(unavailable.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
