//! Fan-out/fan-in over the three upstream queries.
//!
//! # Algorithm
//!
//! ```text
//!                    ┌──────────────► suggest_gas_price ──┐
//! get_address_info ──┼──────────────► latest_block_number ─┼──► join (3) ──► AddressInfo
//!                    └──────────────► balance_of ──────────┘        │
//!                                                                  └── first failure wins
//! ```
//!
//! Each call runs on its own task under a child [`RequestContext`] whose
//! deadline is `min(parent deadline, now + per-call timeout)`. The join loop
//! waits for exactly three completions, but returns as soon as any task
//! reports an error or the parent context ends. Partial results are dropped.
//!
//! On early return the child context is cancelled and the [`JoinSet`] is
//! dropped, which aborts the remaining tasks. A panic inside a task is
//! re-raised on the caller so the Recovery middleware handles it.
//!
//! Configured retry attempts are not applied here; a failed call fails the
//! request.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::{DoneReason, RequestContext};
use crate::metrics;
use crate::models::{AddressInfo, ConversionError};
use crate::upstream::{UpstreamCall, UpstreamClient, UpstreamError};

/// Why an aggregation produced no [`AddressInfo`].
#[derive(Debug, Error)]
pub enum AggregateError {
    /// One of the three upstream calls failed or hit its per-call deadline.
    #[error("failed to get {call}: {source}")]
    Upstream {
        call: UpstreamCall,
        #[source]
        source: UpstreamError,
    },

    /// The address could not be decoded into 20 bytes.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The caller's context was cancelled before all results arrived.
    #[error("context cancelled")]
    Cancelled,

    /// The caller's deadline passed before all results arrived.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A fetched amount could not be rendered in its display unit.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// A task ended without reporting a result.
    #[error("upstream task aborted")]
    Aborted,
}

impl AggregateError {
    /// The upstream call responsible, if the failure came from one.
    pub fn call(&self) -> Option<UpstreamCall> {
        match self {
            AggregateError::Upstream { call, .. } => Some(*call),
            _ => None,
        }
    }
}

impl From<DoneReason> for AggregateError {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::Cancelled => AggregateError::Cancelled,
            DoneReason::DeadlineExceeded => AggregateError::DeadlineExceeded,
        }
    }
}

/// One completed upstream call.
enum Fetched {
    GasPrice(U256),
    BlockNumber(u64),
    Balance(U256),
}

/// Aggregates gas price, latest block and balance into one [`AddressInfo`].
#[derive(Clone)]
pub struct Aggregator {
    upstream: Arc<dyn UpstreamClient>,
    call_timeout: Duration,
}

impl Aggregator {
    /// # Arguments
    ///
    /// * `upstream` - Node access capability
    /// * `call_timeout` - Upper bound for each individual upstream call
    pub fn new(upstream: Arc<dyn UpstreamClient>, call_timeout: Duration) -> Self {
        Self {
            upstream,
            call_timeout,
        }
    }

    /// Query the three values concurrently and merge them.
    ///
    /// `address` is expected to be normalized already; it is stored verbatim
    /// in the result.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` if `address` is not 20 hex-encoded bytes
    /// - `Upstream` naming the first call that failed or timed out
    /// - `Cancelled` / `DeadlineExceeded` if `ctx` ends first
    pub async fn get_address_info(
        &self,
        ctx: &RequestContext,
        address: &str,
    ) -> Result<AddressInfo, AggregateError> {
        let target: Address = address
            .parse()
            .map_err(|_| AggregateError::InvalidAddress(address.to_string()))?;

        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }

        let calls = ctx.with_timeout(self.call_timeout);
        let _cancel_calls = calls.cancel_on_drop();

        let mut tasks = JoinSet::new();

        let upstream = Arc::clone(&self.upstream);
        let call_ctx = calls.clone();
        tasks.spawn(async move {
            bounded(&call_ctx, UpstreamCall::GasPrice, upstream.suggest_gas_price())
                .await
                .map(Fetched::GasPrice)
        });

        let upstream = Arc::clone(&self.upstream);
        let call_ctx = calls.clone();
        tasks.spawn(async move {
            bounded(&call_ctx, UpstreamCall::BlockNumber, upstream.latest_block_number())
                .await
                .map(Fetched::BlockNumber)
        });

        let upstream = Arc::clone(&self.upstream);
        let call_ctx = calls.clone();
        tasks.spawn(async move {
            bounded(&call_ctx, UpstreamCall::Balance, upstream.balance_of(target))
                .await
                .map(Fetched::Balance)
        });

        let mut gas_price = None;
        let mut block_number = None;
        let mut balance = None;

        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                reason = ctx.done() => {
                    warn!(address, %reason, "Aggregation abandoned before all upstream calls completed");
                    return Err(reason.into());
                }
            };

            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok(Ok(Fetched::GasPrice(wei))) => gas_price = Some(wei),
                Ok(Ok(Fetched::BlockNumber(number))) => block_number = Some(number),
                Ok(Ok(Fetched::Balance(wei))) => balance = Some(wei),
                Ok(Err(e)) => {
                    warn!(address, error = %e, "Upstream call failed, discarding partial results");
                    return Err(e);
                }
                Err(join_error) if join_error.is_panic() => {
                    std::panic::resume_unwind(join_error.into_panic());
                }
                Err(_) => return Err(AggregateError::Aborted),
            }
        }

        match (gas_price, block_number, balance) {
            (Some(gas_price), Some(block_number), Some(balance)) => {
                debug!(address, block_number, "Aggregated address info");
                Ok(AddressInfo::new(
                    address.to_string(),
                    gas_price,
                    block_number,
                    balance,
                )?)
            }
            _ => Err(AggregateError::Aborted),
        }
    }
}

/// Race one upstream call against its context and record its outcome.
async fn bounded<T>(
    ctx: &RequestContext,
    call: UpstreamCall,
    request: impl Future<Output = Result<T, UpstreamError>>,
) -> Result<T, AggregateError> {
    let started = Instant::now();

    let result = tokio::select! {
        result = request => result,
        reason = ctx.done() => Err(UpstreamError::from(reason)),
    };

    let outcome = match &result {
        Ok(_) => "success",
        Err(UpstreamError::Timeout) => "timeout",
        Err(UpstreamError::Cancelled) => "cancelled",
        Err(_) => "error",
    };
    metrics::record_upstream_call(call.as_str(), outcome, started.elapsed().as_secs_f64());

    result.map_err(|source| AggregateError::Upstream { call, source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::upstream::StaticUpstream;

    const ADDRESS: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";

    fn aggregator(stub: StaticUpstream) -> Aggregator {
        Aggregator::new(Arc::new(stub), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_all_three_values_merged() {
        let stub = StaticUpstream::new(
            "12000000000".parse().unwrap(),
            19_000_000,
            "2500000000000000000".parse().unwrap(),
        );
        let info = aggregator(stub.clone())
            .get_address_info(&RequestContext::background(), ADDRESS)
            .await
            .unwrap();

        assert_eq!(info.address(), ADDRESS);
        assert_eq!(info.gas_price().gwei, 12.0);
        assert_eq!(info.current_block(), 19_000_000);
        assert_eq!(info.balance().ether, 2.5);
        assert_eq!(stub.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_run_concurrently() {
        let stub = StaticUpstream::zero(1).with_latency(Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        aggregator(stub)
            .get_address_info(&RequestContext::background(), ADDRESS)
            .await
            .unwrap();

        // Sequential execution would take 6s
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_short_circuits() {
        let stub = StaticUpstream::zero(1)
            .with_delay(UpstreamCall::GasPrice, Duration::from_secs(5))
            .with_delay(UpstreamCall::BlockNumber, Duration::from_secs(5))
            .failing(UpstreamCall::Balance, "execution reverted");
        let start = tokio::time::Instant::now();

        let err = aggregator(stub)
            .get_address_info(&RequestContext::background(), ADDRESS)
            .await
            .unwrap_err();

        assert_eq!(err.call(), Some(UpstreamCall::Balance));
        assert!(err.to_string().contains("failed to get balance"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_wins_over_later_successes() {
        let stub = StaticUpstream::zero(1)
            .with_delay(UpstreamCall::GasPrice, Duration::from_millis(100))
            .failing(UpstreamCall::GasPrice, "rate limited by provider");

        let err = aggregator(stub)
            .get_address_info(&RequestContext::background(), ADDRESS)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AggregateError::Upstream {
                call: UpstreamCall::GasPrice,
                source: UpstreamError::Rpc(_)
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout() {
        let stub =
            StaticUpstream::zero(1).with_delay(UpstreamCall::BlockNumber, Duration::from_secs(60));
        let start = tokio::time::Instant::now();

        let err = Aggregator::new(Arc::new(stub), Duration::from_secs(2))
            .get_address_info(&RequestContext::background(), ADDRESS)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AggregateError::Upstream {
                call: UpstreamCall::BlockNumber,
                source: UpstreamError::Timeout
            }
        ));
        assert!(start.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_deadline_bounds_call_timeout() {
        let stub = StaticUpstream::zero(1).with_latency(Duration::from_secs(60));
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let err = aggregator(stub)
            .get_address_info(&ctx, ADDRESS)
            .await
            .unwrap_err();

        // Either the join loop or a call observes the parent deadline first
        assert!(matches!(
            err,
            AggregateError::DeadlineExceeded
                | AggregateError::Upstream {
                    source: UpstreamError::Timeout,
                    ..
                }
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_unblocks_join() {
        let stub = StaticUpstream::zero(1).with_latency(Duration::from_secs(60));
        let ctx = RequestContext::background();
        let canceller = ctx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = aggregator(stub)
            .get_address_info(&ctx, ADDRESS)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AggregateError::Cancelled
                | AggregateError::Upstream {
                    source: UpstreamError::Cancelled,
                    ..
                }
        ));
    }

    #[tokio::test]
    async fn test_already_cancelled_context_issues_no_calls() {
        let stub = StaticUpstream::zero(1);
        let ctx = RequestContext::background();
        ctx.cancel();

        let err = aggregator(stub.clone())
            .get_address_info(&ctx, ADDRESS)
            .await
            .unwrap_err();

        assert!(matches!(err, AggregateError::Cancelled));
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_fan_out() {
        let stub = StaticUpstream::zero(1);

        let err = aggregator(stub.clone())
            .get_address_info(&RequestContext::background(), "0x1234")
            .await
            .unwrap_err();

        assert!(matches!(err, AggregateError::InvalidAddress(_)));
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    #[should_panic(expected = "stub upstream panicked")]
    async fn test_task_panic_is_propagated() {
        let stub = StaticUpstream::zero(1).panicking(UpstreamCall::GasPrice);

        let _ = aggregator(stub)
            .get_address_info(&RequestContext::background(), ADDRESS)
            .await;
    }
}
