//! In-process [`UpstreamClient`] with canned answers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use super::{UpstreamCall, UpstreamClient, UpstreamError, UpstreamResult};

/// Stub upstream returning fixed values.
///
/// Latency and failures can be injected per call, and every call is counted
/// so tests can assert how many requests reached the "node".
///
/// ```rust
/// use std::time::Duration;
/// use ethereum_data_api::upstream::{StaticUpstream, UpstreamCall};
///
/// let stub = StaticUpstream::zero(18_000_000)
///     .with_delay(UpstreamCall::Balance, Duration::from_millis(20))
///     .failing(UpstreamCall::GasPrice, "node unavailable");
/// ```
#[derive(Debug, Clone)]
pub struct StaticUpstream {
    gas_price: U256,
    block_number: u64,
    balance: U256,
    delays: [Option<Duration>; 3],
    failures: [Option<String>; 3],
    panics: Option<UpstreamCall>,
    calls: Arc<AtomicUsize>,
}

impl StaticUpstream {
    pub fn new(gas_price: U256, block_number: u64, balance: U256) -> Self {
        Self {
            gas_price,
            block_number,
            balance,
            delays: [None, None, None],
            failures: [None, None, None],
            panics: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Zero gas price and zero balance at `block_number`.
    pub fn zero(block_number: u64) -> Self {
        Self::new(U256::ZERO, block_number, U256::ZERO)
    }

    /// Delay `call` by `delay` before answering.
    pub fn with_delay(mut self, call: UpstreamCall, delay: Duration) -> Self {
        self.delays[slot(call)] = Some(delay);
        self
    }

    /// Delay all three calls.
    pub fn with_latency(mut self, delay: Duration) -> Self {
        self.delays = [Some(delay); 3];
        self
    }

    /// Make `call` fail with an RPC error after its delay.
    pub fn failing(mut self, call: UpstreamCall, message: &str) -> Self {
        self.failures[slot(call)] = Some(message.to_string());
        self
    }

    /// Make `call` panic, for exercising fault recovery.
    pub fn panicking(mut self, call: UpstreamCall) -> Self {
        self.panics = Some(call);
        self
    }

    /// Total number of calls received across all three operations.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer<T>(&self, call: UpstreamCall, value: T) -> UpstreamResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delays[slot(call)] {
            tokio::time::sleep(delay).await;
        }

        if self.panics == Some(call) {
            panic!("stub upstream panicked during {call} call");
        }

        match &self.failures[slot(call)] {
            Some(message) => Err(UpstreamError::Rpc(message.clone())),
            None => Ok(value),
        }
    }
}

fn slot(call: UpstreamCall) -> usize {
    match call {
        UpstreamCall::GasPrice => 0,
        UpstreamCall::BlockNumber => 1,
        UpstreamCall::Balance => 2,
    }
}

#[async_trait]
impl UpstreamClient for StaticUpstream {
    async fn suggest_gas_price(&self) -> UpstreamResult<U256> {
        self.answer(UpstreamCall::GasPrice, self.gas_price).await
    }

    async fn latest_block_number(&self) -> UpstreamResult<u64> {
        self.answer(UpstreamCall::BlockNumber, self.block_number)
            .await
    }

    async fn balance_of(&self, _address: Address) -> UpstreamResult<U256> {
        self.answer(UpstreamCall::Balance, self.balance).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_returns_values_and_counts() {
        let stub = StaticUpstream::new(U256::from(7u64), 42, U256::from(9u64));

        assert_eq!(stub.suggest_gas_price().await.unwrap(), U256::from(7u64));
        assert_eq!(stub.latest_block_number().await.unwrap(), 42);
        assert_eq!(
            stub.balance_of(Address::ZERO).await.unwrap(),
            U256::from(9u64)
        );
        assert_eq!(stub.call_count(), 3);
    }

    #[tokio::test]
    async fn test_stub_injected_failure() {
        let stub = StaticUpstream::zero(1).failing(UpstreamCall::BlockNumber, "boom");

        assert_eq!(
            stub.latest_block_number().await,
            Err(UpstreamError::Rpc("boom".to_string()))
        );
        assert!(stub.suggest_gas_price().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_delay() {
        let stub = StaticUpstream::zero(1).with_delay(UpstreamCall::GasPrice, Duration::from_secs(3));
        let start = tokio::time::Instant::now();

        stub.suggest_gas_price().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
