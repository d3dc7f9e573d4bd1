//! In-memory JSON-RPC endpoint for tests.
//!
//! Serves a synthetic chain: block `n` has timestamp `timestamps[n]`, native
//! and ERC20 balances are fixed across blocks. Failures can be queued ahead
//! of normal responses and every request is logged.

use crate::rpc::{RpcTransport, TransportError};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Failure returned instead of the next normal response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Timeout,
    RateLimited,
    Reverted,
    ServerError,
}

#[derive(Default)]
struct MockToken {
    decimals: u8,
    balances: HashMap<Address, U256>,
    reverts: bool,
}

#[derive(Default)]
struct State {
    timestamps: Vec<u64>,
    native: HashMap<Address, U256>,
    tokens: HashMap<Address, MockToken>,
    script: VecDeque<Scripted>,
    down: HashSet<String>,
    calls: Vec<(String, Value)>,
}

#[derive(Default)]
pub struct MockTransport {
    state: Mutex<State>,
    latency: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(self, timestamps: Vec<u64>) -> Self {
        self.state.lock().timestamps = timestamps;
        self
    }

    pub fn with_native(self, owner: Address, wei: U256) -> Self {
        self.state.lock().native.insert(owner, wei);
        self
    }

    pub fn with_token(self, token: Address, decimals: u8, balances: &[(Address, U256)]) -> Self {
        self.state.lock().tokens.insert(
            token,
            MockToken {
                decimals,
                balances: balances.iter().copied().collect(),
                reverts: false,
            },
        );
        self
    }

    /// A contract whose every call reverts.
    pub fn with_reverting_token(self, token: Address) -> Self {
        self.state.lock().tokens.insert(
            token,
            MockToken {
                reverts: true,
                ..MockToken::default()
            },
        );
        self
    }

    /// Every request to this endpoint times out.
    pub fn with_down_endpoint(self, endpoint: &str) -> Self {
        let url = Url::parse(endpoint).expect("test endpoint url");
        self.state.lock().down.insert(url.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_failure(&self, failure: Scripted) {
        self.state.lock().script.push_back(failure);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Number of `eth_call`s carrying the given selector.
    pub fn contract_calls(&self, selector: [u8; 4]) -> usize {
        let prefix = format!("0x{}", hex::encode(selector));
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, p)| {
                m == "eth_call"
                    && p[0]["data"]
                        .as_str()
                        .map_or(false, |d| d.starts_with(&prefix))
            })
            .count()
    }

    fn respond(state: &State, method: &str, params: &Value) -> Result<Value, (i64, String)> {
        match method {
            "eth_blockNumber" => {
                let head = state.timestamps.len().saturating_sub(1);
                Ok(json!(format!("0x{:x}", head)))
            }
            "eth_getBlockByNumber" => {
                let tag = params[0].as_str().unwrap_or_default();
                let number = if tag == "latest" {
                    state.timestamps.len().saturating_sub(1) as u64
                } else {
                    u64::from_str_radix(tag.trim_start_matches("0x"), 16)
                        .map_err(|_| (-32602, "invalid block".to_string()))?
                };
                Ok(match state.timestamps.get(number as usize) {
                    Some(ts) => json!({
                        "number": format!("0x{:x}", number),
                        "timestamp": format!("0x{:x}", ts),
                        "transactions": []
                    }),
                    None => Value::Null,
                })
            }
            "eth_getBalance" => {
                let owner = parse_addr(&params[0])?;
                let wei = state.native.get(&owner).copied().unwrap_or(U256::ZERO);
                Ok(json!(format!("0x{:x}", wei)))
            }
            "eth_call" => {
                let to = parse_addr(&params[0]["to"])?;
                let data = hex::decode(
                    params[0]["data"]
                        .as_str()
                        .unwrap_or_default()
                        .trim_start_matches("0x"),
                )
                .map_err(|_| (-32602, "invalid data".to_string()))?;
                let token = match state.tokens.get(&to) {
                    Some(t) => t,
                    // no code at the address: calls succeed with empty return data
                    None => return Ok(json!("0x")),
                };
                if token.reverts {
                    return Err((3, "execution reverted".to_string()));
                }
                let word = if data.starts_with(&DECIMALS_SELECTOR) {
                    U256::from(token.decimals)
                } else if data.starts_with(&BALANCE_OF_SELECTOR) && data.len() >= 36 {
                    let owner = Address::from_slice(&data[16..36]);
                    token.balances.get(&owner).copied().unwrap_or(U256::ZERO)
                } else {
                    return Err((3, "execution reverted".to_string()));
                };
                Ok(json!(format!("0x{}", hex::encode(word.to_be_bytes::<32>()))))
            }
            other => Err((-32601, format!("the method {} does not exist", other))),
        }
    }
}

fn parse_addr(v: &Value) -> Result<Address, (i64, String)> {
    let s = v.as_str().unwrap_or_default().trim_start_matches("0x");
    let bytes = hex::decode(s).map_err(|_| (-32602, "invalid address".to_string()))?;
    if bytes.len() != 20 {
        return Err((-32602, "invalid address".to_string()));
    }
    Ok(Address::from_slice(&bytes))
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn post(&self, endpoint: &Url, request: &Value) -> Result<Value, TransportError> {
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let params = request["params"].clone();
        let id = request["id"].clone();

        self.state.lock().calls.push((method.clone(), params.clone()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock();

        if state.down.contains(endpoint.as_str()) {
            return Err(TransportError::Timeout("operation timed out".into()));
        }

        if let Some(failure) = state.script.pop_front() {
            return match failure {
                Scripted::Timeout => Err(TransportError::Timeout("operation timed out".into())),
                Scripted::ServerError => Err(TransportError::Status {
                    status: 502,
                    body: "bad gateway".into(),
                }),
                Scripted::RateLimited => Ok(json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": {"code": 429, "message": "Too Many Requests"}
                })),
                Scripted::Reverted => Ok(json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": {"code": 3, "message": "execution reverted"}
                })),
            };
        }

        Ok(match Self::respond(&state, &method, &params) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": code, "message": message}
            }),
        })
    }
}
