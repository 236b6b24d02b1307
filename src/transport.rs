//! The network seam.
//!
//! Everything above this module works on [`FinalizedRequest`] / [`RawResponse`]
//! values, so the pipeline can be driven by `reqwest` in production and by a
//! scripted transport in tests.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::request::{FinalizedRequest, FormPart, RequestBody};

/// Response as seen by the pipeline: status, headers and the fully read body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Turn a non-2xx response into [`Error::Http`], keeping the body as detail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the status is not a success.
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::Http {
            status: self.status.as_u16(),
            detail: self.text(),
        })
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Body as text, for error details.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure to obtain any response at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connect failure or timeout: no network path to the server.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The request could not be built or the body could not be read.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unreachable(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Sends a finalized request and reads the whole response.
///
/// Dropping the returned future abandons the call; the interceptor relies on
/// this for cancellation.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: FinalizedRequest,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom HTTP client (for connection pool reuse or proxies).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Build a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TLS backend cannot be initialised.
    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: FinalizedRequest) -> Result<RawResponse, TransportError> {
        let FinalizedRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let builder = self.http.request(method, url).headers(headers);
        let builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(parts: Vec<FormPart>) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name, value),
            FormPart::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let mut file = Part::bytes(bytes).file_name(file_name);
                if let Some(mime) = mime {
                    file = file.mime_str(&mime)?;
                }
                form.part(name, file)
            }
        };
    }
    Ok(form)
}

/// Reports whether the client currently has a network path.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Probe for environments without connectivity events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity flag flipped by whatever watches the network (OS events, a
/// heartbeat, a test).
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::Relaxed);
        if was != online {
            tracing::info!(online, "Connectivity changed");
        }
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_response_decodes_json_or_reports_decode_error() {
        let ok = RawResponse::new(StatusCode::OK, r#"[{"id":1,"name":"a"}]"#);
        let guilds: Vec<crate::types::GuildDto> = ok.json().unwrap();
        assert_eq!(guilds.len(), 1);

        let bad = RawResponse::new(StatusCode::OK, "not json");
        let err = bad.json::<Vec<crate::types::GuildDto>>().unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn connectivity_flag_toggles() {
        let flag = ConnectivityFlag::default();
        assert!(flag.is_online());
        flag.set_online(false);
        assert!(!flag.is_online());
        flag.set_online(true);
        assert!(flag.is_online());
    }
}
