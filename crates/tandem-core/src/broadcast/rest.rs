//! Redis-over-HTTP broadcast store (Upstash-compatible REST protocol).
//!
//! Every command is a `POST` of a JSON array such as `["SET","k","v"]` with
//! a bearer token; the response body is `{"result": ...}` or
//! `{"error": "..."}`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{BroadcastError, BroadcastResult, BroadcastStore};
use crate::util::{clip, is_http_url, normalize_text_option};

const REQUEST_TIMEOUT_SECS: u64 = 10;
const ERROR_SNIPPET_CHARS: usize = 180;

#[derive(Clone)]
pub struct RestBroadcastStore {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestBroadcastStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestBroadcastStore")
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RestBroadcastStore {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> BroadcastResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let token = normalize_text_option(Some(token.into())).ok_or_else(|| {
            BroadcastError::InvalidConfiguration("REST token must not be empty".to_string())
        })?;
        Ok(Self {
            endpoint,
            token,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn command(&self, args: &[&str]) -> BroadcastResult<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(&args)
            .send()
            .await
            .map_err(|error| {
                if error.is_connect() || error.is_timeout() {
                    BroadcastError::Unreachable(error.to_string())
                } else {
                    BroadcastError::Http(error)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BroadcastError::Api(parse_api_error(status, &body)));
        }

        let payload = serde_json::from_str::<CommandResponse>(&body)
            .map_err(|error| BroadcastError::InvalidPayload(error.to_string()))?;
        if let Some(error) = payload.error {
            return Err(BroadcastError::Api(error));
        }
        Ok(payload.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BroadcastStore for RestBroadcastStore {
    async fn get(&self, key: &str) -> BroadcastResult<Option<String>> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value)),
            other => Err(unexpected("GET", &other)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> BroadcastResult<()> {
        self.command(&["SET", key, value]).await.map(drop)
    }

    async fn keys(&self, prefix: &str) -> BroadcastResult<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut keys = string_array("KEYS", self.command(&["KEYS", &pattern]).await?)?;
        keys.sort();
        Ok(keys)
    }

    async fn del(&self, key: &str) -> BroadcastResult<()> {
        self.command(&["DEL", key]).await.map(drop)
    }

    async fn list_push(&self, key: &str, value: &str) -> BroadcastResult<()> {
        self.command(&["RPUSH", key, value]).await.map(drop)
    }

    async fn list_range(&self, key: &str, start: i64, end: i64) -> BroadcastResult<Vec<String>> {
        let (start, end) = (start.to_string(), end.to_string());
        string_array("LRANGE", self.command(&["LRANGE", key, &start, &end]).await?)
    }

    async fn list_trim(&self, key: &str, start: i64, end: i64) -> BroadcastResult<()> {
        let (start, end) = (start.to_string(), end.to_string());
        self.command(&["LTRIM", key, &start, &end]).await.map(drop)
    }

    async fn expire(&self, key: &str, seconds: u64) -> BroadcastResult<()> {
        let seconds = seconds.to_string();
        self.command(&["EXPIRE", key, &seconds]).await.map(drop)
    }
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    result: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = clip(body, ERROR_SNIPPET_CHARS);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> BroadcastResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        BroadcastError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(BroadcastError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn string_array(command: &str, value: Value) -> BroadcastResult<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(value) => Ok(value),
                other => Err(unexpected(command, &other)),
            })
            .collect(),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &str, value: &Value) -> BroadcastError {
    BroadcastError::InvalidPayload(format!(
        "unexpected {command} result: {}",
        clip(&value.to_string(), ERROR_SNIPPET_CHARS)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("redis.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint(" https://redis.example.com/ ".to_string()).unwrap(),
            "https://redis.example.com"
        );
    }

    #[test]
    fn new_rejects_empty_token() {
        assert!(matches!(
            RestBroadcastStore::new("https://redis.example.com", "  "),
            Err(BroadcastError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn debug_redacts_token() {
        let store = RestBroadcastStore::new("https://redis.example.com", "secret").unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn escape_glob_escapes_pattern_characters() {
        assert_eq!(escape_glob("ns:chat:"), "ns:chat:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[test]
    fn string_array_accepts_null_and_strings() {
        assert!(string_array("KEYS", Value::Null).unwrap().is_empty());
        assert_eq!(
            string_array("KEYS", json!(["a", "b"])).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(string_array("KEYS", json!([1])).is_err());
        assert!(string_array("KEYS", json!("a")).is_err());
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        let message = parse_api_error(StatusCode::UNAUTHORIZED, r#"{"error":"bad token"}"#);
        assert_eq!(message, "bad token (401)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
