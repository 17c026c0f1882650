use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::util::error_response;

/// Errors the gateway reports to its own callers.
///
/// Backend replies (rate limits, policy rejections, other statuses) are not
/// errors here: the dispatcher classifies and relays them. Only conditions
/// where no usable backend reply exists end up in this enum.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid or missing proxy key")]
    Unauthorized,
    #[error("Unsupported model on this endpoint: {0}")]
    UnsupportedModel(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),
    #[error("Backend timed out: {0}")]
    BackendTimeout(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::BackendTimeout(err.to_string())
        } else {
            GatewayError::BackendUnreachable(err.to_string())
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::UnsupportedModel(_) | GatewayError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        error_response(self.status_code(), &self.to_string())
    }
}
