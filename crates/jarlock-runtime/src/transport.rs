//! How validation requests reach the authority.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{ClientError, TransportError};
use crate::protocol::{ValidationRequest, ValidationResponse};

/// Sends one validation request.
pub trait Transport: Send + Sync {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationResponse, TransportError> {
        (**self).validate(request)
    }
}

/// JSON over HTTP to `POST {server}/validate`.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpTransport {
    /// `connect_timeout` bounds connection setup; `read_timeout` bounds the
    /// whole exchange after that.
    pub fn new(
        server_url: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(connect_timeout + read_timeout)
            .user_agent(concat!("jarlock-runtime/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: validate_endpoint(server_url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationResponse, TransportError> {
        debug!(endpoint = %self.endpoint, product = %request.product_id, "sending validation request");
        let response = self.client.post(&self.endpoint).json(request).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

pub fn validate_endpoint(server_url: &str) -> String {
    format!("{}/validate", server_url.trim_end_matches('/'))
}
