//! JSON-RPC implementation of [`UpstreamClient`] backed by an alloy HTTP provider.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{UpstreamClient, UpstreamError, UpstreamResult};

/// Upstream client talking to a single Ethereum node over HTTP.
#[derive(Clone)]
pub struct RpcUpstream {
    provider: Arc<dyn Provider + Send + Sync>,
    endpoint: String,
}

impl RpcUpstream {
    /// Build a provider for `rpc_url`.
    ///
    /// No request is sent here; use [`UpstreamClient::latest_block_number`]
    /// to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::InvalidEndpoint` if the URL does not parse.
    pub fn connect(rpc_url: &str) -> UpstreamResult<Self> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e| UpstreamError::InvalidEndpoint(format!("'{rpc_url}': {e}")))?;

        let provider =
            Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>;

        info!(endpoint = %redact_endpoint(rpc_url), "Ethereum RPC provider configured");

        Ok(Self {
            provider,
            endpoint: rpc_url.to_string(),
        })
    }
}

#[async_trait]
impl UpstreamClient for RpcUpstream {
    async fn suggest_gas_price(&self) -> UpstreamResult<U256> {
        let wei = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| UpstreamError::Rpc(e.to_string()))?;
        debug!(wei = %wei, "eth_gasPrice");
        Ok(U256::from(wei))
    }

    async fn latest_block_number(&self) -> UpstreamResult<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| UpstreamError::Rpc(e.to_string()))?;
        debug!(number, "eth_blockNumber");
        Ok(number)
    }

    async fn balance_of(&self, address: Address) -> UpstreamResult<U256> {
        let balance = self
            .provider
            .get_balance(address)
            .await
            .map_err(|e| UpstreamError::Rpc(e.to_string()))?;
        debug!(%address, %balance, "eth_getBalance");
        Ok(balance)
    }
}

impl std::fmt::Debug for RpcUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcUpstream")
            .field("endpoint", &redact_endpoint(&self.endpoint))
            .finish()
    }
}

/// Strip the path (where hosted providers put project keys) from an endpoint for logging.
fn redact_endpoint(endpoint: &str) -> String {
    match endpoint.parse::<url::Url>() {
        Ok(url) => format!(
            "{}://{}{}",
            url.scheme(),
            url.host_str().unwrap_or("unknown"),
            url.port().map(|p| format!(":{p}")).unwrap_or_default()
        ),
        Err(_) => "invalid".to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_invalid_url() {
        let result = RpcUpstream::connect("not a url");
        assert!(matches!(result, Err(UpstreamError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_connect_does_not_dial() {
        // Nothing listens here; construction must still succeed
        let client = RpcUpstream::connect("http://127.0.0.1:1").unwrap();
        assert!(format!("{client:?}").contains("127.0.0.1:1"));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_rpc_error() {
        let client = RpcUpstream::connect("http://127.0.0.1:1").unwrap();
        let result = client.latest_block_number().await;
        assert!(matches!(result, Err(UpstreamError::Rpc(_))));
    }

    #[test]
    fn test_redact_endpoint_hides_path() {
        assert_eq!(
            redact_endpoint("https://mainnet.infura.io/v3/secret-project-id"),
            "https://mainnet.infura.io"
        );
        assert_eq!(redact_endpoint("http://localhost:8545"), "http://localhost:8545");
        assert_eq!(redact_endpoint("::"), "invalid");
    }
}
