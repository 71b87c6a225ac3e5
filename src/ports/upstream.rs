use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for upstream fetch operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Connection to the target failed (refused, reset, DNS failure)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The target did not answer within the configured budget
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// The outgoing request could not be constructed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The target redirected more times than the configured cap
    #[error("Redirect limit of {0} exceeded")]
    TooManyRedirects(usize),
}

impl UpstreamError {
    /// The gateway-side status surfaced to the client. Upstream failures
    /// must never crash a worker; they become 502/504-class responses.
    pub fn client_status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Connection(_) | Self::InvalidRequest(_) | Self::TooManyRedirects(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

/// Result type alias for upstream fetch operations
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// UpstreamClient defines the port (interface) for fetching a resource from
/// the proxy target.
///
/// The request body is buffered (`Bytes`) so the implementation can replay
/// it when following redirects. The response body is returned streaming;
/// buffering it is the pipeline's responsibility.
#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    /// Forward a request to the target it addresses and return the target's
    /// response, following redirects up to the implementation's cap.
    async fn fetch(&self, req: Request<Bytes>) -> UpstreamResult<Response<AxumBody>>;
}
