//! JSON-RPC access to the node.
//!
//! [`RetryingClient::call`] races each logical call against a timer. When the timer
//! fires first the call is re-issued after an exponentially growing delay, and every
//! attempt already in flight keeps racing: whichever attempt settles first is the
//! single result, the rest are dropped. At most `max_in_flight` attempts race at
//! once; issuing another aborts the oldest. Retries continue until an attempt
//! settles or the client's cancellation token fires.

use alloy_eips::BlockNumberOrTag;
use alloy_rpc_client::RpcClient;
use alloy_transport::TransportError;
use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable, Aborted, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::metrics::Metrics;
use crate::models::errors::RpcError;
use crate::models::rpc::{RawBlock, RawReceipt};
use crate::utils::hex::{parse_quantity_u64, Hash, HexString};

/// A single `call(method, params)` capability.
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

pub struct HttpTransport {
    client: RpcClient,
}

impl HttpTransport {
    pub fn new(url: Url) -> Self {
        Self {
            client: RpcClient::new_http(url),
        }
    }
}

#[async_trait]
impl JsonRpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.client
            .request::<_, Value>(method.to_string(), params)
            .await
            .map_err(RpcError::from)
    }
}

impl From<TransportError> for RpcError {
    fn from(error: TransportError) -> Self {
        match error {
            alloy_transport::RpcError::ErrorResp(payload) => RpcError::Response {
                code: payload.code,
                message: payload.message.to_string(),
            },
            other => RpcError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub timeout: Duration,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub max_in_flight: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5 * 60),
            max_in_flight: 4,
        }
    }
}

pub struct RetryingClient {
    transport: Arc<dyn JsonRpcTransport>,
    settings: RetrySettings,
    cancel: CancellationToken,
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

impl RetryingClient {
    pub fn new(
        transport: Arc<dyn JsonRpcTransport>,
        settings: RetrySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            settings,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let start = Instant::now();
        let result = self.race(method, params).await;

        if let Some(metrics) = Metrics::global() {
            metrics.record_rpc_call(method, start.elapsed().as_secs_f64(), result.is_err());
        }

        result
    }

    async fn race(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut attempts = FuturesUnordered::new();
        let mut in_flight: VecDeque<(u64, AbortHandle)> = VecDeque::new();
        let mut retry_delay = self.settings.initial_retry_delay;
        let mut next_id = 0;

        let (handle, attempt) = self.attempt(method, params.clone(), next_id);
        in_flight.push_back((next_id, handle));
        attempts.push(attempt);
        let mut deadline = Some(Box::pin(sleep(self.settings.timeout)));
        let mut backoff: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),

                Some((id, outcome)) = attempts.next(), if !attempts.is_empty() => {
                    in_flight.retain(|(live, _)| *live != id);
                    match outcome {
                        // Evicted by a newer attempt
                        Err(Aborted) => {}
                        // A timeout reported by the transport only matters once nothing else is racing
                        Ok(Err(RpcError::Timeout)) => {
                            if in_flight.is_empty() && backoff.is_none() {
                                deadline = None;
                                backoff = Some(self.schedule_retry(method, &mut retry_delay));
                            }
                        }
                        Ok(outcome) => return outcome,
                    }
                }

                _ = fire(&mut deadline) => {
                    deadline = None;
                    backoff = Some(self.schedule_retry(method, &mut retry_delay));
                }

                _ = fire(&mut backoff) => {
                    backoff = None;
                    while in_flight.len() >= self.settings.max_in_flight.max(1) {
                        match in_flight.pop_front() {
                            Some((_, oldest)) => oldest.abort(),
                            None => break,
                        }
                    }
                    debug!("Re-issuing {} ({} attempts in flight)", method, in_flight.len());

                    next_id += 1;
                    let (handle, attempt) = self.attempt(method, params.clone(), next_id);
                    in_flight.push_back((next_id, handle));
                    attempts.push(attempt);
                    deadline = Some(Box::pin(sleep(self.settings.timeout)));
                }
            }
        }
    }

    fn attempt<'a>(
        &'a self,
        method: &'a str,
        params: Value,
        id: u64,
    ) -> (
        AbortHandle,
        impl Future<Output = (u64, Result<Result<Value, RpcError>, Aborted>)> + Send + 'a,
    ) {
        let (handle, registration) = AbortHandle::new_pair();
        let attempt = Abortable::new(self.transport.request(method, params), registration)
            .map(move |outcome| (id, outcome));
        (handle, attempt)
    }

    fn schedule_retry(&self, method: &str, retry_delay: &mut Duration) -> Pin<Box<Sleep>> {
        let delay = *retry_delay;
        warn!(
            "Timed out calling {}, trying again in {:.1} seconds",
            method,
            delay.as_secs_f64()
        );
        if let Some(metrics) = Metrics::global() {
            metrics.record_rpc_timeout(method);
        }

        *retry_delay = std::cmp::min(delay * 2, self.settings.max_retry_delay);
        Box::pin(sleep(delay))
    }

    async fn call_decoded<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get_block_number(&self) -> Result<u64, RpcError> {
        let raw: String = self.call_decoded("eth_blockNumber", json!([])).await?;
        parse_quantity_u64(&raw).map_err(|e| RpcError::Decode {
            method: "eth_blockNumber".to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get_block_by_number(
        &self,
        block: BlockNumberOrTag,
    ) -> Result<Option<RawBlock>, RpcError> {
        self.call_decoded("eth_getBlockByNumber", json!([block.to_string(), true]))
            .await
    }

    pub async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<RawBlock>, RpcError> {
        self.call_decoded("eth_getBlockByHash", json!([hash.to_0x_string(), true]))
            .await
    }

    /// Block with transaction hashes only, for callers that need header fields.
    pub async fn get_block_header_by_hash(
        &self,
        hash: &Hash,
    ) -> Result<Option<RawBlock<String>>, RpcError> {
        self.call_decoded("eth_getBlockByHash", json!([hash.to_0x_string(), false]))
            .await
    }

    pub async fn get_transaction_receipt(
        &self,
        hash: &Hash,
    ) -> Result<Option<RawReceipt>, RpcError> {
        self.call_decoded("eth_getTransactionReceipt", json!([hash.to_0x_string()]))
            .await
    }
}
