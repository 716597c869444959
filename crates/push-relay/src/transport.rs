use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::protocol::ListenRequest;

pub const CONNECTION_HEADER: &str = "X-Connection";
pub const CONNECTION_REASON_HEADER: &str = "X-Connection-reason";

/// Raw answer to one long-poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenResponse {
    pub status: u16,
    /// The server asked to stop listening (`X-Connection: close`).
    pub close: bool,
    pub close_reason: Option<String>,
    pub body: String,
}

impl ListenResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            close: false,
            close_reason: None,
            body: body.into(),
        }
    }

    pub fn closed(reason: Option<&str>) -> Self {
        Self {
            status: 200,
            close: true,
            close_reason: reason.map(str::to_string),
            body: String::new(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            close: false,
            close_reason: None,
            body: body.into(),
        }
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
}

#[async_trait]
pub trait PollTransport: Send + Sync {
    async fn listen(
        &self,
        request: &ListenRequest,
        timeout: Duration,
    ) -> Result<ListenResponse, TransportError>;
}

/// Long-poll over HTTP POST.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl PollTransport for HttpTransport {
    async fn listen(
        &self,
        request: &ListenRequest,
        timeout: Duration,
    ) -> Result<ListenResponse, TransportError> {
        let res = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = res.status().as_u16();
        let (close, close_reason) = connection_headers(res.headers());
        let body = res.text().await.map_err(map_reqwest_error)?;
        Ok(ListenResponse {
            status,
            close,
            close_reason,
            body,
        })
    }
}

fn connection_headers(headers: &HeaderMap) -> (bool, Option<String>) {
    let close = headers
        .get(CONNECTION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().eq_ignore_ascii_case("close"))
        .unwrap_or(false);
    let reason = headers
        .get(CONNECTION_REASON_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    (close, reason)
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
