//! Rate-limited HTTP transport shared by the JSON-RPC and REST clients.

use crate::chain::cache::CacheError;
use crate::error::{DecodeError, KeeperError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

const RATE_LIMIT_MS: u64 = 100;
const RETRY_BACKOFF_MS: u64 = 500;
const TIMEOUT_SECS: u64 = 30;

/// Transport tuning. `max_retries` defaults to 0: the core never retries on its own,
/// callers opt in for read-heavy tooling.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: RATE_LIMIT_MS,
            max_retries: 0,
            retry_backoff_ms: RETRY_BACKOFF_MS,
            timeout_secs: TIMEOUT_SECS,
        }
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("api error: status {0} body {1}")]
    Api(u16, String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("{0}: response carried neither result nor error")]
    MissingResult(String),
    #[error("offline mode: no cached data for key")]
    OfflineMiss,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// HTTP client bound to one endpoint, with request spacing and optional retries.
pub struct HttpTransport {
    base_url: String,
    config: RpcConfig,
    client: reqwest::Client,
    last_request: Mutex<Option<OffsetDateTime>>,
    request_count: AtomicU64,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, config: RpcConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            config,
            client,
            last_request: Mutex::new(None),
            request_count: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn rate_limit(&self) {
        let sleep_ms = {
            let prev = *self
                .last_request
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match prev {
                Some(prev) => {
                    let elapsed = (OffsetDateTime::now_utc() - prev).whole_milliseconds();
                    let need = i128::from(self.config.rate_limit_ms);
                    (need - elapsed).max(0) as u64
                }
                None => 0,
            }
        };
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        *self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(OffsetDateTime::now_utc());
    }

    /// GET `base_url + path`, returning the body of a successful response.
    pub async fn get_text(&self, path: &str) -> Result<String, RpcError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        self.send(|client| client.get(&url)).await
    }

    /// POST a JSON body to `base_url`, returning the raw body.
    pub async fn post_json(&self, body: &serde_json::Value) -> Result<String, RpcError> {
        let url = self.base_url.clone();
        self.send(|client| client.post(&url).json(body)).await
    }

    async fn send<F>(&self, build: F) -> Result<String, RpcError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.rate_limit().await;
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match build(&self.client).send().await {
                Ok(r) => {
                    let status = r.status();
                    let body = r.text().await?;
                    self.request_count.fetch_add(1, Ordering::Relaxed);
                    if status.is_success() {
                        return Ok(body);
                    }
                    last_err = Some(RpcError::Api(status.as_u16(), body));
                }
                Err(e) => last_err = Some(RpcError::Request(e)),
            }
            if attempt < self.config.max_retries {
                let ms = self.config.retry_backoff_ms * (1 << attempt);
                warn!(attempt, ms, "retry after error");
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        Err(last_err.unwrap_or(RpcError::Api(0, "no attempt made".to_string())))
    }

    /// JSON-RPC 2.0 call decoding `result` into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, KeeperError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "rpc call");
        let raw = self.post_json(&body).await?;
        decode_envelope(method, &raw)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

/// Split a JSON-RPC envelope into its typed result or the server's error.
/// An explicit `null` result is legitimate (absent receipt, unknown account).
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    method: &str,
    raw: &str,
) -> Result<T, KeeperError> {
    let mut envelope: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(DecodeError::from)?;
    if let Some(err) = envelope.remove("error").filter(|e| !e.is_null()) {
        let err: RpcErrorObject = serde_json::from_value(err).map_err(DecodeError::from)?;
        return Err(RpcError::Rpc {
            code: err.code,
            message: err.message,
        }
        .into());
    }
    let value = envelope
        .remove("result")
        .ok_or_else(|| RpcError::MissingResult(method.to_string()))?;
    Ok(serde_json::from_value(value).map_err(DecodeError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_result_decodes() {
        let n: u64 = decode_envelope("getBlockHeight", r#"{"jsonrpc":"2.0","id":1,"result":42}"#)
            .unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn envelope_error_is_network_error() {
        let err = decode_envelope::<u64>(
            "sendTransaction",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32002,"message":"preflight failed"}}"#,
        )
        .unwrap_err();
        match err {
            KeeperError::Network(RpcError::Rpc { code, .. }) => assert_eq!(code, -32002),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn explicit_null_result_is_accepted() {
        let v: Option<u64> =
            decode_envelope("eth_getTransactionReceipt", r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
                .unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn missing_result_is_reported() {
        let err = decode_envelope::<u64>("getSlot", r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err, KeeperError::Network(RpcError::MissingResult(_))));
    }

    #[test]
    fn malformed_result_is_decode_error() {
        let err = decode_envelope::<u64>("getSlot", r#"{"jsonrpc":"2.0","id":1,"result":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, KeeperError::Decode(_)));
    }
}
