//! Transport – one request/response exchange with the robot API.
//!
//! Every outcome is normalized into a [`CommandResult`]:
//!
//! | Outcome | Result |
//! |---|---|
//! | 2xx with a JSON body | `Ok(value)` |
//! | 2xx with an empty body | `Ok(Value::Null)` |
//! | connection refused, DNS failure, … | [`LinkError::NetworkUnreachable`] |
//! | per-request timeout elapsed | [`LinkError::Timeout`] |
//! | any non-2xx status | [`LinkError::HttpStatus`] |
//! | body is not JSON | [`LinkError::MalformedResponse`] |
//!
//! Nothing is retried here; the poller and dispatcher own retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atlas_types::{CommandResult, LinkError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config_store::ConfigStore;

/// HTTP verbs used by the robot API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single request/response exchange against the configured endpoint.
///
/// Implemented by [`HttpTransport`] for a live robot and by
/// [`SimTransport`][crate::sim::SimTransport] for demo mode.  Tests swap in
/// scripted implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform `method` on `endpoint` (e.g. `"/status"`), relative to the
    /// current base URL.
    async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
    ) -> CommandResult<Value>;
}

/// Deserialize a transport payload, mapping shape errors to
/// [`LinkError::MalformedResponse`].
pub(crate) fn decode<T: DeserializeOwned>(endpoint: &str, value: Value) -> CommandResult<T> {
    serde_json::from_value(value)
        .map_err(|e| LinkError::MalformedResponse(format!("{endpoint}: {e}")))
}

/// [`Transport`] backed by `reqwest`.
///
/// Reads the base URL from the [`ConfigStore`] on every request, so a
/// configuration change takes effect for the next request without rebuilding
/// the client.
pub struct HttpTransport {
    config: Arc<ConfigStore>,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`.
    pub fn new(config: Arc<ConfigStore>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to a default HTTP client without timeout");
                reqwest::Client::new()
            });
        Self { config, client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
    ) -> CommandResult<Value> {
        let url = format!("{}{}", self.config.base_url(), endpoint);
        debug!(%url, ?method, "robot api request");

        let mut request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            debug!(%url, status = status.as_u16(), "robot api returned error status");
            return Err(LinkError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| LinkError::MalformedResponse(format!("{endpoint}: {e}")))
    }
}

/// Map a `reqwest` failure onto the link's error kinds.
fn classify(e: reqwest::Error) -> LinkError {
    if e.is_timeout() {
        LinkError::Timeout
    } else if e.is_decode() {
        LinkError::MalformedResponse(e.to_string())
    } else {
        LinkError::NetworkUnreachable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::get, routing::post};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn status() -> Json<Value> {
        Json(json!({ "status": "idle", "battery": 87, "temperature": 42.5 }))
    }

    async fn not_json() -> &'static str {
        "<html>robot_gui</html>"
    }

    async fn unavailable() -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    async fn no_content() -> StatusCode {
        StatusCode::NO_CONTENT
    }

    async fn slow() -> Json<Value> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Json(json!({}))
    }

    async fn echo(Json(body): Json<Value>) -> Json<Value> {
        Json(json!({ "received": body }))
    }

    async fn spawn_robot_api() -> Arc<ConfigStore> {
        // SAFETY: tests only ever set this to the same value.
        unsafe { std::env::set_var("NO_PROXY", "127.0.0.1,localhost") };
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = Router::new()
            .route("/api/status", get(status))
            .route("/api/html", get(not_json))
            .route("/api/down", get(unavailable))
            .route("/api/class/stop", post(no_content))
            .route("/api/slow", get(slow))
            .route("/api/robot/move", post(echo));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        let config = Arc::new(ConfigStore::in_memory());
        config
            .set("127.0.0.1", &addr.port().to_string())
            .expect("valid test config");
        config
    }

    #[tokio::test]
    async fn success_returns_parsed_json() {
        let transport = HttpTransport::new(spawn_robot_api().await, Duration::from_secs(2));
        let value = transport.request("/status", Method::Get, None).await.unwrap();
        assert_eq!(value["battery"], 87);
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let transport = HttpTransport::new(spawn_robot_api().await, Duration::from_secs(2));
        let value = transport
            .request("/robot/move", Method::Post, Some(json!({ "part": "head", "x": 10.0 })))
            .await
            .unwrap();
        assert_eq!(value["received"]["part"], "head");
    }

    #[tokio::test]
    async fn non_2xx_carries_status_code() {
        let transport = HttpTransport::new(spawn_robot_api().await, Duration::from_secs(2));
        let err = transport.request("/down", Method::Get, None).await.unwrap_err();
        assert_eq!(err, LinkError::HttpStatus(503));
    }

    #[tokio::test]
    async fn unknown_route_is_http_404() {
        let transport = HttpTransport::new(spawn_robot_api().await, Duration::from_secs(2));
        let err = transport.request("/nope", Method::Get, None).await.unwrap_err();
        assert_eq!(err, LinkError::HttpStatus(404));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let transport = HttpTransport::new(spawn_robot_api().await, Duration::from_secs(2));
        let err = transport.request("/html", Method::Get, None).await.unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let transport = HttpTransport::new(spawn_robot_api().await, Duration::from_secs(2));
        let value = transport
            .request("/class/stop", Method::Post, Some(json!({})))
            .await
            .unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let transport = HttpTransport::new(spawn_robot_api().await, Duration::from_millis(100));
        let err = transport.request("/slow", Method::Get, None).await.unwrap_err();
        assert_eq!(err, LinkError::Timeout);
    }

    #[tokio::test]
    async fn closed_port_is_network_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = Arc::new(ConfigStore::in_memory());
        config.set("127.0.0.1", &port.to_string()).unwrap();
        let transport = HttpTransport::new(config, Duration::from_secs(2));
        let err = transport.request("/status", Method::Get, None).await.unwrap_err();
        assert!(matches!(err, LinkError::NetworkUnreachable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn config_change_applies_to_next_request() {
        let config = spawn_robot_api().await;
        let transport = HttpTransport::new(Arc::clone(&config), Duration::from_secs(2));
        assert!(transport.request("/status", Method::Get, None).await.is_ok());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);
        config.set("127.0.0.1", &dead_port.to_string()).unwrap();

        let err = transport.request("/status", Method::Get, None).await.unwrap_err();
        assert!(matches!(err, LinkError::NetworkUnreachable(_)));
    }

    #[test]
    fn decode_maps_shape_errors_to_malformed() {
        let err = decode::<u32>("/status", json!("nope")).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(ref m) if m.starts_with("/status")));
    }
}
