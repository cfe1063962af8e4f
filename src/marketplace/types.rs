//! Read client data and option types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::coerce::TokenMetadata;
use crate::filter::{ActiveFilterSet, AvailableFilter, TraitCounts};
use crate::indexer::{EndpointError, ProjectId, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderCategory {
    None,
    Buy,
    Sell,
}

impl OrderCategory {
    /// Decode from the stored name or ordinal; unknown values map to `None`
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Buy" | "1" => OrderCategory::Buy,
            "Sell" | "2" => OrderCategory::Sell,
            _ => OrderCategory::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderCategory::None => "None",
            OrderCategory::Buy => "Buy",
            OrderCategory::Sell => "Sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    None,
    Placed,
    Canceled,
    Executed,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Placed" | "1" => OrderStatus::Placed,
            "Canceled" | "Cancelled" | "2" => OrderStatus::Canceled,
            "Executed" | "3" => OrderStatus::Executed,
            _ => OrderStatus::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::None => "None",
            OrderStatus::Placed => "Placed",
            OrderStatus::Canceled => "Canceled",
            OrderStatus::Executed => "Executed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub category: OrderCategory,
    pub status: OrderStatus,
    /// Unix seconds; 0 never expires
    pub expiration: u64,
    pub collection: String,
    pub token_id: String,
    pub quantity: u128,
    pub price: u128,
    pub currency: String,
    pub owner: String,
}

impl Order {
    /// Rows with a zero identity key are placeholders, not orders
    pub fn exists(&self) -> bool {
        self.id != 0
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration != 0 && self.expiration <= now
    }

    /// Sell + Placed + not expired
    pub fn is_listing(&self, now: u64) -> bool {
        self.exists()
            && self.category == OrderCategory::Sell
            && self.status == OrderStatus::Placed
            && !self.is_expired(now)
    }
}

/// One token-balance row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub account_address: String,
    pub contract_address: String,
    pub token_id: String,
    pub balance: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedToken {
    pub project: ProjectId,
    /// Checksum form
    pub contract_address: String,
    /// Canonical hex
    pub token_id: String,
    pub name: Option<String>,
    pub metadata: TokenMetadata,
    pub image: Option<String>,
    pub raw: Row,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub project: ProjectId,
    pub contract_address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub token_count: u64,
    /// Metadata of a representative token
    pub metadata: TokenMetadata,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenPage {
    pub tokens: Vec<NormalizedToken>,
    /// Absent on the final page
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenDetail {
    pub token: NormalizedToken,
    pub orders: Vec<Order>,
    pub listings: Vec<Order>,
}

/// Marketplace fee, `fee_num / FEE_DENOMINATOR` of the sale price
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fees {
    pub fee_num: u64,
    pub fee_receiver: String,
    pub fee_denominator: u64,
}

pub const FEE_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoyaltyInfo {
    pub receiver: String,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionTraits {
    pub counts: TraitCounts,
    pub available_filters: Vec<AvailableFilter>,
    /// Projects whose counts are missing from `counts`
    pub failed: Vec<EndpointError>,
}

/// Generic on-chain read supplied by the caller
#[async_trait]
pub trait ContractCaller: Send + Sync {
    async fn call_contract(
        &self,
        contract_address: &str,
        entrypoint: &str,
        calldata: Vec<String>,
    ) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Falls back to the client's default project
    pub project: Option<ProjectId>,
    pub contract_address: String,
}

#[derive(Debug, Clone, Default)]
pub struct TokenListOptions {
    pub project: Option<ProjectId>,
    pub contract_address: String,
    pub cursor: Option<String>,
    /// Falls back to the configured page size
    pub limit: Option<u32>,
    pub attribute_filters: ActiveFilterSet,
    /// Explicit allowlist; empty means every token
    pub token_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderOptions {
    pub project: Option<ProjectId>,
    pub collection: String,
    pub token_id: Option<String>,
    pub order_ids: Vec<u64>,
    pub status: Option<OrderStatus>,
    pub category: Option<OrderCategory>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    pub project: Option<ProjectId>,
    pub collection: String,
    pub token_id: Option<String>,
    pub verify_ownership: bool,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenDetailOptions {
    pub project: Option<ProjectId>,
    pub collection: String,
    pub token_id: String,
    pub verify_ownership: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FeeOptions {
    pub project: Option<ProjectId>,
}

#[derive(Clone, Default)]
pub struct RoyaltyOptions {
    pub collection: String,
    pub token_id: String,
    /// Sale amount the royalty is computed against
    pub amount: u128,
    pub provider: Option<Arc<dyn ContractCaller>>,
}

impl fmt::Debug for RoyaltyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoyaltyOptions")
            .field("collection", &self.collection)
            .field("token_id", &self.token_id)
            .field("amount", &self.amount)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraitOptions {
    /// Empty means every configured project
    pub projects: Vec<ProjectId>,
    pub collection: String,
    pub filters: ActiveFilterSet,
}
