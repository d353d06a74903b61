//! HTTP probe used by the validator.
//!
//! [`HyperProbe`] opens a plain HTTP/1.1 connection per request, sends a
//! `GET`, and returns the status code with the body. Every request is bounded
//! by a timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tracing::debug;

use crate::error::ProbeError;

/// Status and body of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Boolean field of a JSON object body, `None` if the body is not JSON
    /// or the field is missing or not a boolean.
    pub fn json_flag(&self, field: &str) -> Option<bool> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        value.get(field)?.as_bool()
    }
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<ProbeResponse, ProbeError>> + Send + 'a>>;

/// Issues `GET path` against the deployment's public address.
pub trait HttpProbe: Send + Sync {
    fn get<'a>(&'a self, path: &'a str) -> ProbeFuture<'a>;

    /// Address being probed, for messages.
    fn target(&self) -> String;
}

/// Probe over hyper's HTTP/1 client connection.
#[derive(Debug, Clone)]
pub struct HyperProbe {
    /// `host:port` to connect to.
    authority: String,
    /// Value of the `Host` header.
    host: String,
    timeout: Duration,
}

impl HyperProbe {
    /// Accepts `host`, `host:port` or `http://host[:port][/]`.
    pub fn new(target: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let trimmed = target.trim().trim_end_matches('/');
        if trimmed.starts_with("https://") {
            return Err(ProbeError::InvalidTarget(format!(
                "{target}: probes use plain HTTP; pass the http:// address of the load balancer"
            )));
        }
        let host = trimmed.strip_prefix("http://").unwrap_or(trimmed);
        if host.is_empty() || host.contains('/') {
            return Err(ProbeError::InvalidTarget(target.to_string()));
        }
        let authority = if host.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            host.to_string()
        } else {
            format!("{host}:80")
        };
        Ok(Self {
            authority,
            host: host.to_string(),
            timeout,
        })
    }

    async fn request(&self, path: &str) -> Result<ProbeResponse, ProbeError> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| ProbeError::Connect(format!("{}: {e}", self.authority)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", &self.host)
            .header("user-agent", "landfall-health/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?
            .to_bytes();

        Ok(ProbeResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

impl HttpProbe for HyperProbe {
    fn get<'a>(&'a self, path: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.request(path)).await {
                Ok(Ok(response)) => {
                    debug!(host = %self.host, %path, status = response.status, "probe answered");
                    Ok(response)
                }
                Ok(Err(e)) => {
                    debug!(host = %self.host, %path, error = %e, "probe failed");
                    Err(e)
                }
                Err(_) => Err(ProbeError::Timeout {
                    path: path.to_string(),
                    after: self.timeout,
                }),
            }
        })
    }

    fn target(&self) -> String {
        format!("http://{}", self.authority)
    }
}
