//! JSON-over-HTTP transport built on reqwest.
//!
//! Endpoint layout (relative to the configured base URL):
//!
//! | operation                | method | path                          |
//! |--------------------------|--------|-------------------------------|
//! | queue snapshot           | GET    | `/api/queue`                  |
//! | status snapshot          | GET    | `/api/status`                 |
//! | history snapshot         | GET    | `/api/history?limit=N`        |
//! | pause/resume job         | POST   | `/api/queue/{id}/{action}`    |
//! | remove job               | DELETE | `/api/queue/{id}`             |
//! | pause/resume all         | POST   | `/api/queue/{action}`         |
//! | delete history entry     | DELETE | `/api/history/{id}`           |
//! | clear history            | DELETE | `/api/history`                |
//! | speed limit              | GET/POST | `/api/speed-limit`          |
//! | dismiss warning          | POST   | `/api/warnings/dismiss`       |
//! | display preferences      | GET/POST | `/api/preferences/{context}` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{JobAction, QueueAction, Transport, WarningTarget};
use crate::error::ApiError;
use crate::models::{
    Context, DisplayPreferences, HistoryEntry, QmonConfig, QueueSnapshot, StatusSnapshot,
    lenient,
};

/// Longest raw body echoed back as a server message
const MAX_RAW_ERROR_LEN: usize = 200;

/// HTTP transport for the download service
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport with a bounded per-request timeout.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("qmon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: trimmed.to_string(),
            api_key,
            timeout,
        })
    }

    /// Build a transport from the loaded client configuration.
    pub fn from_config(config: &QmonConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.server.url,
            config.server.api_key.clone(),
            config.network.request_timeout(),
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => builder.header("X-Api-Key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(|e| self.map_reqwest(e))?;
        check_status(response).await
    }

    async fn get_value(&self, path: &str) -> Result<Value, ApiError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout)
            } else {
                ApiError::Decode(e.to_string())
            }
        })
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.send(builder).await.map(|_| ())
    }

    fn map_reqwest(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Network(err)
        }
    }
}

/// Turn a non-success response into [`ApiError::Server`], keeping the
/// server's message verbatim when one can be found.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Server {
        status: status.as_u16(),
        message: extract_error_message(&body),
    })
}

/// Pull a human-readable message out of an error body.
///
/// Accepts `{"error": "..."}`, `{"message": "..."}`, `{"error": {"message": "..."}}`
/// or a short plain-text body.
fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let candidate = value
            .get("error")
            .and_then(|e| e.as_str().map(str::to_string).or_else(|| {
                e.get("message").and_then(Value::as_str).map(str::to_string)
            }))
            .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_string));
        return candidate.filter(|m| !m.trim().is_empty());
    }

    if trimmed.len() <= MAX_RAW_ERROR_LEN && !trimmed.starts_with('<') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Decode a list that may arrive bare or wrapped in an object under `key`.
fn decode_list<T: DeserializeOwned>(value: Value, key: &str) -> Result<Vec<T>, ApiError> {
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map.remove(key).unwrap_or(Value::Array(Vec::new())),
        Value::Null => Value::Array(Vec::new()),
        other => {
            return Err(ApiError::Decode(format!(
                "expected a list under '{key}', got {other}"
            )));
        }
    };
    match list {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<T>(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::warn!("Skipping undecodable {} entry: {}", key, e);
                    None
                }
            })
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(ApiError::Decode(format!(
            "expected a list under '{key}', got {other}"
        ))),
    }
}

fn decode_object<T: DeserializeOwned + Default>(value: Value) -> Result<T, ApiError> {
    match value {
        Value::Null => Ok(T::default()),
        Value::Object(_) => {
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
        }
        other => Err(ApiError::Decode(format!("expected an object, got {other}"))),
    }
}

/// Percent-encode a path segment (ids are opaque strings).
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[async_trait]
impl Transport for HttpTransport {
    async fn queue_snapshot(&self) -> Result<QueueSnapshot, ApiError> {
        let value = self.get_value("/api/queue").await?;
        Ok(QueueSnapshot::new(decode_list(value, "jobs")?))
    }

    async fn status_snapshot(&self) -> Result<StatusSnapshot, ApiError> {
        let value = self.get_value("/api/status").await?;
        decode_object(value)
    }

    async fn history_snapshot(&self, limit: usize) -> Result<Vec<HistoryEntry>, ApiError> {
        let value = self
            .get_value(&format!("/api/history?limit={}", limit))
            .await?;
        decode_list(value, "entries")
    }

    async fn job_action(&self, id: &str, action: JobAction) -> Result<(), ApiError> {
        let path = format!("/api/queue/{}/{}", encode_segment(id), action.as_str());
        self.execute(self.request(Method::POST, &path)).await
    }

    async fn delete_job(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/api/queue/{}", encode_segment(id));
        self.execute(self.request(Method::DELETE, &path)).await
    }

    async fn delete_history_entry(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/api/history/{}", encode_segment(id));
        self.execute(self.request(Method::DELETE, &path)).await
    }

    async fn clear_history(&self) -> Result<(), ApiError> {
        self.execute(self.request(Method::DELETE, "/api/history"))
            .await
    }

    async fn queue_action(&self, action: QueueAction) -> Result<(), ApiError> {
        let path = format!("/api/queue/{}", action.as_str());
        self.execute(self.request(Method::POST, &path)).await
    }

    async fn speed_limit(&self) -> Result<u64, ApiError> {
        let value = self.get_value("/api/speed-limit").await?;
        Ok(match &value {
            Value::Object(map) => map
                .get("speed_limit_bps")
                .map(lenient::value_to_u64)
                .unwrap_or(0),
            other => lenient::value_to_u64(other),
        })
    }

    async fn set_speed_limit(&self, bps: u64) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, "/api/speed-limit")
            .json(&json!({ "speed_limit_bps": bps }));
        self.execute(builder).await
    }

    async fn dismiss_warning(&self, target: &WarningTarget) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, "/api/warnings/dismiss")
            .json(&json!({ "id": target.as_wire() }));
        self.execute(builder).await
    }

    async fn display_preferences(&self, context: Context) -> Result<DisplayPreferences, ApiError> {
        let value = self
            .get_value(&format!("/api/preferences/{}", context.as_str()))
            .await?;
        match value {
            Value::Null => Ok(DisplayPreferences::defaults_for(context)),
            Value::Object(_) => {
                serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
            }
            other => Err(ApiError::Decode(format!("expected an object, got {other}"))),
        }
    }

    async fn save_display_preferences(
        &self,
        context: Context,
        prefs: &DisplayPreferences,
    ) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, &format!("/api/preferences/{}", context.as_str()))
            .json(prefs);
        self.execute(builder).await
    }
}
