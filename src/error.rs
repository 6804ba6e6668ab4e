//! Error types for the HTTP-to-MQTT bridge
//!
//! Three failure classes reach HTTP callers: validation errors (the client's
//! fault), connection errors and publish errors (both broker-side). Each maps
//! to a status code and a `{"message": ...}` body carrying the underlying text.

use crate::protocol::messages::BaseResponse;
use crate::transport::mqtt::MqttError;
use thiserror::Error;
use warp::http::StatusCode;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{message}")]
    Validation { message: String },

    #[error("{0}")]
    Connection(#[source] MqttError),

    #[error("{0}")]
    Publish(#[source] MqttError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl BridgeError {
    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// HTTP status reported to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Validation { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Connection(_) | BridgeError::Publish(_) | BridgeError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Response body for this error
    pub fn to_response(&self) -> BaseResponse {
        BaseResponse::new(self.to_string())
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_validation_error_text_is_exact() {
        let error = BridgeError::validation("topic must not be empty");
        assert!(matches!(error, BridgeError::Validation { .. }));
        assert_eq!(error.to_string(), "topic must not be empty");
        assert_eq!(error.to_response().message, "topic must not be empty");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            BridgeError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BridgeError::Connection(MqttError::ConnectionFailed("refused".to_string()))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BridgeError::Publish(MqttError::PublishFailed("NotAuthorized".to_string()))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BridgeError::from(ConfigError::InvalidConfig("x".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_broker_errors_keep_underlying_text() {
        let error = BridgeError::Connection(MqttError::ConnectionFailed(
            "I/O: Connection refused (os error 111)".to_string(),
        ));
        let body = error.to_response();
        assert!(body.message.contains("Connection refused"));

        let error = BridgeError::Publish(MqttError::PublishFailed("QuotaExceeded".to_string()));
        assert!(error.to_response().message.contains("QuotaExceeded"));
    }

    #[test]
    fn test_is_client_error() {
        assert!(BridgeError::validation("x").is_client_error());
        assert!(
            !BridgeError::Publish(MqttError::PublishFailed("x".to_string())).is_client_error()
        );
    }
}
