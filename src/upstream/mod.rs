//! Access to the remote Ethereum node.
//!
//! The Aggregator only sees the [`UpstreamClient`] capability. Two
//! implementations ship with the crate:
//!
//! - [`RpcUpstream`]: JSON-RPC over HTTP through an alloy provider
//! - [`StaticUpstream`]: in-process stub with fixed values, optional latency
//!   and injected failures, used by tests and local runs
//!
//! Implementations do not apply timeouts or retries themselves. Every call is
//! raced against the caller's [`RequestContext`](crate::context::RequestContext)
//! by the Aggregator, which drops the in-flight future once the context ends.

mod rpc;
mod stub;

use std::fmt;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;

use crate::context::DoneReason;

pub use rpc::RpcUpstream;
pub use stub::StaticUpstream;

/// The three calls the Aggregator issues per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamCall {
    GasPrice,
    BlockNumber,
    Balance,
}

impl UpstreamCall {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamCall::GasPrice => "gas_price",
            UpstreamCall::BlockNumber => "block_number",
            UpstreamCall::Balance => "balance",
        }
    }
}

impl fmt::Display for UpstreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamCall::GasPrice => write!(f, "gas price"),
            UpstreamCall::BlockNumber => write!(f, "block number"),
            UpstreamCall::Balance => write!(f, "balance"),
        }
    }
}

/// Failure of a single upstream call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The node answered with an error, or the transport failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The per-call deadline elapsed before the node answered.
    #[error("upstream call timed out")]
    Timeout,

    /// The governing context was cancelled while the call was in flight.
    #[error("upstream call cancelled")]
    Cancelled,

    /// The endpoint could not be set up.
    #[error("invalid upstream endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<DoneReason> for UpstreamError {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::Cancelled => UpstreamError::Cancelled,
            DoneReason::DeadlineExceeded => UpstreamError::Timeout,
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Capability exposing the node queries the Aggregator needs.
///
/// All amounts are in wei. Futures must be safe to drop at any await point;
/// dropping is how cancellation is delivered.
#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    /// Current gas price suggested by the node.
    async fn suggest_gas_price(&self) -> UpstreamResult<U256>;

    /// Number of the latest block.
    async fn latest_block_number(&self) -> UpstreamResult<u64>;

    /// Balance of `address` at the latest block.
    async fn balance_of(&self, address: Address) -> UpstreamResult<U256>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_labels() {
        assert_eq!(UpstreamCall::GasPrice.to_string(), "gas price");
        assert_eq!(UpstreamCall::BlockNumber.as_str(), "block_number");
    }

    #[test]
    fn test_done_reason_conversion() {
        assert_eq!(
            UpstreamError::from(DoneReason::DeadlineExceeded),
            UpstreamError::Timeout
        );
        assert_eq!(
            UpstreamError::from(DoneReason::Cancelled),
            UpstreamError::Cancelled
        );
    }
}
