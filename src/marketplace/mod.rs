//! Marketplace read client
//!
//! [`MarketplaceClient`] is the one public surface. Two implementations back
//! it, picked by [`ClientMode`]:
//!
//! - [`EdgeMarketplaceClient`]: query transport only (`POST /sql`)
//! - [`FullMarketplaceClient`]: stateful client protocol for tokens and
//!   balances, query transport for orders, fees and collections
//!
//! Data-layer failures come back inside [`DataResult`]; usage errors (a
//! missing provider) are returned as `Err`.

pub mod address;
pub mod coerce;
pub mod edge;
pub mod errors;
pub mod full;
pub mod normalize;
pub mod queries;
pub mod types;
pub mod verify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use edge::EdgeMarketplaceClient;
pub use errors::{DataResult, MarketplaceError, MarketplaceResult};
pub use full::FullMarketplaceClient;
pub use types::*;

use crate::config::{ConfigError, IndexerConfig};
use crate::indexer::{Aggregator, CallbackTransport, FanoutResult, HttpClientFactory, ProjectId, SqlTransport};
use address::checksum_or_raw;
use coerce::{as_bigint, u256_calldata};

/// Which client runtime backs the read client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    #[default]
    Edge,
    Full,
}

impl FromStr for ClientMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" => Ok(ClientMode::Edge),
            "full" => Ok(ClientMode::Full),
            other => Err(format!("unknown client mode '{other}' (expected edge or full)")),
        }
    }
}

impl std::fmt::Display for ClientMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientMode::Edge => f.write_str("edge"),
            ClientMode::Full => f.write_str("full"),
        }
    }
}

/// Deployment-level knobs shared by both implementations
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub default_project: ProjectId,
    pub orders_table: String,
    pub books_table: String,
    pub default_page_size: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            default_project: ProjectId::from("arcade"),
            orders_table: "ARCADE-Order".to_string(),
            books_table: "ARCADE-Book".to_string(),
            default_page_size: 50,
        }
    }
}

#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    fn mode(&self) -> ClientMode;

    async fn get_collection(&self, options: &CollectionOptions) -> DataResult<CollectionSummary>;

    /// Cursor-paginated. With attribute filters a page may hold fewer than
    /// `limit` tokens while `next_cursor` is still set.
    async fn list_collection_tokens(&self, options: &TokenListOptions) -> DataResult<TokenPage>;

    async fn get_collection_orders(&self, options: &OrderOptions) -> DataResult<Vec<Order>>;

    /// Sell + Placed + unexpired orders, ownership-checked when asked
    async fn list_collection_listings(&self, options: &ListingOptions) -> DataResult<Vec<Order>>;

    /// Token with its orders and its (optionally verified) listings
    async fn get_token(&self, options: &TokenDetailOptions) -> DataResult<TokenDetail>;

    async fn get_fees(&self, options: &FeeOptions) -> DataResult<Fees>;

    /// On-chain ERC-2981 style read through the supplied provider
    async fn get_royalty_fee(&self, options: &RoyaltyOptions) -> MarketplaceResult<RoyaltyInfo> {
        fetch_royalty(options).await
    }

    /// Trait counts aggregated across projects, plus the derived filter table
    async fn collection_traits(&self, options: &TraitOptions) -> DataResult<CollectionTraits>;

    /// Collections of every listed project; failing projects are reported
    /// alongside the ones that answered
    async fn list_collections(&self, projects: &[ProjectId]) -> FanoutResult<Vec<CollectionSummary>>;
}

const ROYALTY_ENTRYPOINT: &str = "royalty_info";

pub async fn fetch_royalty(options: &RoyaltyOptions) -> MarketplaceResult<RoyaltyInfo> {
    let provider = options
        .provider
        .as_ref()
        .ok_or(MarketplaceError::MissingProvider("contract caller for royalty reads"))?;

    let token_id = as_bigint(Some(&Value::String(coerce::normalize_token_id(&options.token_id))));
    let [id_low, id_high] = u256_calldata(token_id);
    let [amount_low, amount_high] = u256_calldata(options.amount);
    let calldata = vec![id_low, id_high, amount_low, amount_high];

    let result = provider
        .call_contract(&options.collection, ROYALTY_ENTRYPOINT, calldata)
        .await
        .map_err(|e| MarketplaceError::Provider(format!("{e:#}")))?;

    match result.as_slice() {
        [receiver, amount, ..] => {
            let info = RoyaltyInfo {
                receiver: checksum_or_raw(receiver),
                amount: as_bigint(Some(&Value::String(amount.clone()))),
            };
            debug!(collection = %options.collection, receiver = %info.receiver, amount = %info.amount, "Royalty read");
            Ok(info)
        }
        other => Err(MarketplaceError::Provider(format!(
            "royalty_info returned {} values, expected 2",
            other.len()
        ))),
    }
}

/// Assemble a read client over an existing aggregator
pub fn build_marketplace_client(
    aggregator: Aggregator,
    settings: ClientSettings,
    mode: ClientMode,
) -> Arc<dyn MarketplaceClient> {
    let edge = EdgeMarketplaceClient::new(aggregator, settings);
    match mode {
        ClientMode::Edge => Arc::new(edge),
        ClientMode::Full => Arc::new(FullMarketplaceClient::new(edge)),
    }
}

/// Read client for a validated deployment configuration
pub fn create_marketplace_client(
    config: &IndexerConfig,
    mode: ClientMode,
) -> Result<Arc<dyn MarketplaceClient>, ConfigError> {
    config.validate()?;

    let timeout = Duration::from_millis(config.request_timeout_ms);
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

    let registry = config.registry();
    let factory = Arc::new(HttpClientFactory::new(http.clone(), timeout));
    let aggregator = Aggregator::new(
        CallbackTransport::new(registry.clone(), factory, config.retry.clone()),
        SqlTransport::new(registry, http, timeout),
        config.retry.clone(),
    );

    info!(
        mode = %mode,
        projects = config.projects.len(),
        default_project = %config.default_project_id(),
        "Marketplace client ready"
    );
    Ok(build_marketplace_client(aggregator, config.settings(), mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingCaller {
        calls: Mutex<Vec<(String, String, Vec<String>)>>,
        reply: Vec<String>,
    }

    #[async_trait]
    impl ContractCaller for RecordingCaller {
        async fn call_contract(
            &self,
            contract_address: &str,
            entrypoint: &str,
            calldata: Vec<String>,
        ) -> anyhow::Result<Vec<String>> {
            self.calls
                .lock()
                .push((contract_address.to_string(), entrypoint.to_string(), calldata));
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_royalty_without_provider_is_usage_error() {
        let err = fetch_royalty(&RoyaltyOptions::default()).await.unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn test_royalty_shapes_calldata_and_decodes_pair() {
        let caller = Arc::new(RecordingCaller {
            reply: vec!["0x5".to_string(), "0x64".to_string()],
            ..Default::default()
        });
        let options = RoyaltyOptions {
            collection: "0xabc".to_string(),
            token_id: "10".to_string(),
            amount: 1_000,
            provider: Some(caller.clone()),
        };

        let info = fetch_royalty(&options).await.unwrap();
        assert_eq!(info.amount, 100);
        assert_eq!(info.receiver, checksum_or_raw("0x5"));

        let calls = caller.calls.lock();
        assert_eq!(calls[0].1, "royalty_info");
        assert_eq!(calls[0].2, vec!["0xa", "0x0", "0x3e8", "0x0"]);
    }

    #[tokio::test]
    async fn test_royalty_short_reply_is_provider_error() {
        let options = RoyaltyOptions {
            provider: Some(Arc::new(RecordingCaller {
                reply: vec!["0x5".to_string()],
                ..Default::default()
            })),
            ..Default::default()
        };
        assert!(matches!(fetch_royalty(&options).await, Err(MarketplaceError::Provider(_))));
    }

    #[test]
    fn test_client_mode_parsing() {
        assert_eq!("EDGE".parse::<ClientMode>(), Ok(ClientMode::Edge));
        assert_eq!(" full ".parse::<ClientMode>(), Ok(ClientMode::Full));
        assert!("hybrid".parse::<ClientMode>().is_err());
    }
}
