//! JSON-RPC client for EVM nodes
//!
//! `RpcTransport` moves one JSON-RPC envelope over the wire; `RpcClient`
//! adds retries with exponential backoff and jitter, a per-chain cap on
//! in-flight requests, and typed accessors with hex decoding.

use crate::error::{RpcError, RpcErrorKind};
use crate::types::{decode_hex_bytes, parse_hex_u256, parse_hex_u64, BlockHeader, BlockTag};
use alloy_primitives::{Address, U256};
use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Failure to get a JSON envelope back from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete in time.
    Timeout(String),
    /// Connection refused, reset, DNS failure and the like.
    Network(String),
    /// Non-2xx HTTP status.
    Status { status: u16, body: String },
    /// The body was not JSON.
    Decode(String),
}

/// Sends a JSON-RPC request body to an endpoint and returns the response envelope.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn post(&self, endpoint: &Url, request: &Value) -> Result<Value, TransportError>;
}

/// reqwest-backed transport shared by every chain's client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(&self, endpoint: &Url, request: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::Decode(e.to_string())
            }
        })
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Bounded retry schedule for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional spread applied to each delay, 0.25 = ±25%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before the next attempt, after `failures` failed attempts (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let nominal = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        nominal.mul_f64(factor)
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
struct Failure {
    error: RpcError,
    transient: bool,
}

impl Failure {
    fn transient(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: RpcError::new(kind, message),
            transient: true,
        }
    }

    fn fatal(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: RpcError::new(kind, message),
            transient: false,
        }
    }
}

fn classify_transport(e: TransportError) -> Failure {
    match e {
        TransportError::Timeout(msg) => Failure::transient(RpcErrorKind::Timeout, msg),
        TransportError::Network(msg) => Failure::transient(RpcErrorKind::Timeout, msg),
        TransportError::Status { status: 429, body } => {
            Failure::transient(RpcErrorKind::RateLimited, format!("HTTP 429: {}", body))
        }
        TransportError::Status { status, body } if status >= 500 => Failure::transient(
            RpcErrorKind::InvalidResponse,
            format!("HTTP {}: {}", status, body),
        ),
        TransportError::Status { status, body } => Failure::fatal(
            RpcErrorKind::InvalidResponse,
            format!("HTTP {}: {}", status, body),
        ),
        TransportError::Decode(msg) => Failure::fatal(RpcErrorKind::InvalidResponse, msg),
    }
}

/// Map a JSON-RPC `error` object onto the error taxonomy.
fn classify_rpc_error(error: &Value) -> Failure {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let lower = message.to_lowercase();
    let detail = format!("{} (code {})", message, code);

    if code == 429
        || code == -32005
        || code == -32090
        || lower.contains("rate limit")
        || lower.contains("too many requests")
    {
        Failure::transient(RpcErrorKind::RateLimited, detail)
    } else if code == 3 || lower.contains("revert") {
        Failure::fatal(RpcErrorKind::Reverted, detail)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        Failure::transient(RpcErrorKind::Timeout, detail)
    } else if code == -32603 {
        // internal error, usually node-side trouble
        Failure::transient(RpcErrorKind::InvalidResponse, detail)
    } else {
        Failure::fatal(RpcErrorKind::InvalidResponse, detail)
    }
}

/// JSON-RPC client bound to one chain endpoint.
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    endpoint: Url,
    policy: RetryPolicy,
    in_flight: Semaphore,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client. At most `max_in_flight` requests are on the wire at once.
    pub fn new(
        endpoint: Url,
        transport: Arc<dyn RpcTransport>,
        policy: RetryPolicy,
        max_in_flight: usize,
    ) -> Self {
        Self {
            transport,
            endpoint,
            policy,
            in_flight: Semaphore::new(max_in_flight.max(1)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make a JSON-RPC call, retrying transient failures per the retry policy.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params
        });

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(&request).await {
                Ok(result) => return Ok(result),
                Err(failure) if failure.transient && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        host = self.endpoint.host_str().unwrap_or("?"),
                        method,
                        attempt,
                        max_attempts,
                        "RPC attempt failed ({}), retrying in {:?}",
                        failure.error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    debug!(method, attempt, "RPC call failed: {}", failure.error);
                    return Err(failure.error);
                }
            }
        }
    }

    /// One round-trip. The in-flight permit is released before any backoff sleep.
    async fn attempt(&self, request: &Value) -> Result<Value, Failure> {
        let response = {
            let _permit = self.in_flight.acquire().await.map_err(|_| {
                Failure::fatal(RpcErrorKind::InvalidResponse, "RPC client shut down")
            })?;
            self.transport.post(&self.endpoint, request).await
        };
        let envelope = response.map_err(classify_transport)?;

        if let Some(error) = envelope.get("error") {
            return Err(classify_rpc_error(error));
        }

        envelope.get("result").cloned().ok_or_else(|| {
            Failure::fatal(
                RpcErrorKind::InvalidResponse,
                "RPC response missing 'result' field",
            )
        })
    }

    /// Current head block number.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| RpcError::invalid_response("block number is not a string"))?;
        parse_hex_u64(s)
    }

    /// Header of a block by number, without transactions.
    pub async fn block_header(&self, number: u64) -> Result<BlockHeader, RpcError> {
        let params = json!([BlockTag::Number(number).to_string(), false]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            return Err(RpcError::invalid_response(format!(
                "block {} not found",
                number
            )));
        }
        serde_json::from_value(result)
            .map_err(|e| RpcError::invalid_response(format!("bad block {}: {}", number, e)))
    }

    /// Native balance of an address in the smallest unit.
    pub async fn get_balance(&self, address: Address, block: BlockTag) -> Result<U256, RpcError> {
        let params = json!([format!("0x{:x}", address), block.to_string()]);
        let result = self.call("eth_getBalance", params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| RpcError::invalid_response("balance is not a string"))?;
        debug!("eth_getBalance({:?}, {}) returned raw: {}", address, block, raw);
        parse_hex_u256(raw)
    }

    /// Read-only contract call; returns the raw return data.
    pub async fn eth_call(
        &self,
        to: Address,
        data: &[u8],
        block: BlockTag,
    ) -> Result<Vec<u8>, RpcError> {
        let params = json!([
            {
                "to": format!("0x{:x}", to),
                "data": format!("0x{}", hex::encode(data)),
            },
            block.to_string()
        ]);
        let result = self.call("eth_call", params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| RpcError::invalid_response("call result is not a string"))?;
        decode_hex_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockTransport, Scripted};

    fn client(mock: &Arc<MockTransport>, attempts: u32) -> RpcClient {
        RpcClient::new(
            Url::parse("http://chain.test").unwrap(),
            mock.clone(),
            RetryPolicy::immediate(attempts),
            4,
        )
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(30), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            jitter: 0.5,
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_classify_rpc_errors() {
        let rate = classify_rpc_error(&json!({"code": -32005, "message": "limit exceeded"}));
        assert_eq!(rate.error.kind, RpcErrorKind::RateLimited);
        assert!(rate.transient);

        let revert = classify_rpc_error(&json!({"code": -32000, "message": "execution reverted"}));
        assert_eq!(revert.error.kind, RpcErrorKind::Reverted);
        assert!(!revert.transient);

        let unknown = classify_rpc_error(&json!({"code": -32601, "message": "method not found"}));
        assert_eq!(unknown.error.kind, RpcErrorKind::InvalidResponse);
        assert!(!unknown.transient);
    }

    #[test]
    fn test_classify_transport_errors() {
        assert!(classify_transport(TransportError::Status { status: 503, body: String::new() }).transient);
        let limited = classify_transport(TransportError::Status { status: 429, body: String::new() });
        assert_eq!(limited.error.kind, RpcErrorKind::RateLimited);
        assert!(!classify_transport(TransportError::Status { status: 400, body: String::new() }).transient);
        assert!(!classify_transport(TransportError::Decode("x".into())).transient);
    }

    #[tokio::test]
    async fn test_block_number() {
        let mock = Arc::new(MockTransport::new().with_blocks(vec![100, 200, 300]));
        assert_eq!(client(&mock, 3).block_number().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mock = Arc::new(MockTransport::new().with_blocks(vec![100, 200]));
        mock.push_failure(Scripted::Timeout);
        mock.push_failure(Scripted::RateLimited);
        let n = client(&mock, 3).block_number().await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(mock.calls_to("eth_blockNumber"), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mock = Arc::new(MockTransport::new().with_blocks(vec![100]));
        for _ in 0..5 {
            mock.push_failure(Scripted::Timeout);
        }
        let err = client(&mock, 3).block_number().await.unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::Timeout);
        assert_eq!(mock.calls_to("eth_blockNumber"), 3);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mock = Arc::new(MockTransport::new().with_blocks(vec![100, 200, 300]));
        mock.push_failure(Scripted::ServerError);
        mock.push_failure(Scripted::ServerError);
        assert_eq!(client(&mock, 3).block_number().await.unwrap(), 2);
        assert_eq!(mock.calls_to("eth_blockNumber"), 3);
    }

    #[tokio::test]
    async fn test_server_error_exhausted_is_invalid_response() {
        let mock = Arc::new(MockTransport::new().with_blocks(vec![100]));
        for _ in 0..3 {
            mock.push_failure(Scripted::ServerError);
        }
        let err = client(&mock, 3).block_number().await.unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::InvalidResponse);
        assert_eq!(mock.calls_to("eth_blockNumber"), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let mock = Arc::new(MockTransport::new().with_blocks(vec![100]));
        mock.push_failure(Scripted::Reverted);
        let err = client(&mock, 3).block_number().await.unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::Reverted);
        assert_eq!(mock.calls_to("eth_blockNumber"), 1);
    }

    #[tokio::test]
    async fn test_missing_block_is_invalid_response() {
        let mock = Arc::new(MockTransport::new().with_blocks(vec![100]));
        let err = client(&mock, 1).block_header(7).await.unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_get_balance_passes_block_tag() {
        let wallet = Address::repeat_byte(0x11);
        let mock = Arc::new(
            MockTransport::new()
                .with_blocks(vec![100, 200])
                .with_native(wallet, U256::from(42u64)),
        );
        let bal = client(&mock, 1)
            .get_balance(wallet, BlockTag::Number(1))
            .await
            .unwrap();
        assert_eq!(bal, U256::from(42u64));
        let (_, params) = mock.calls().pop().unwrap();
        assert_eq!(params[1], "0x1");
    }
}
