//! Raw indexer rows → typed marketplace values
//!
//! Row-level decode is total: a malformed field degrades to its default, and
//! a row missing a structurally required field is skipped with a warning.

use tracing::warn;

use super::address::checksum_or_raw;
use super::coerce::{as_bigint, as_number, as_string, normalize_token_id, parse_json_safe, TokenMetadata};
use super::types::{Balance, CollectionSummary, NormalizedToken, Order, OrderCategory, OrderStatus};
use crate::indexer::{ProjectId, Row};

const IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// `ipfs://` URIs rewritten to the public gateway
pub fn resolve_image(uri: &str) -> String {
    match uri.strip_prefix("ipfs://") {
        Some(path) => format!("{IPFS_GATEWAY}{}", path.trim_start_matches("ipfs/")),
        None => uri.to_string(),
    }
}

fn metadata_image(metadata: &TokenMetadata) -> Option<String> {
    metadata
        .str_field("image")
        .or_else(|| metadata.str_field("image_url"))
        .filter(|s| !s.is_empty())
        .map(resolve_image)
}

/// `None` when the row has no contract address or token id
pub fn normalize_token(project: &ProjectId, row: &Row) -> Option<NormalizedToken> {
    let contract = as_string(row.get("contract_address"));
    let token_id = as_string(row.get("token_id"));
    if contract.is_empty() || token_id.is_empty() {
        return None;
    }

    let metadata = parse_json_safe(row.get("metadata"));
    let name = non_empty(as_string(row.get("name")))
        .or_else(|| metadata.str_field("name").map(str::to_string));
    let image = metadata_image(&metadata);

    Some(NormalizedToken {
        project: project.clone(),
        contract_address: checksum_or_raw(&contract),
        token_id: normalize_token_id(&token_id),
        name,
        metadata,
        image,
        raw: row.clone(),
    })
}

pub fn normalize_tokens(project: &ProjectId, rows: &[Row]) -> Vec<NormalizedToken> {
    let tokens: Vec<NormalizedToken> = rows.iter().filter_map(|row| normalize_token(project, row)).collect();
    if tokens.len() < rows.len() {
        warn!(
            project = %project,
            skipped = rows.len() - tokens.len(),
            "Skipped token rows without contract address or token id"
        );
    }
    tokens
}

pub fn normalize_order(row: &Row) -> Order {
    Order {
        id: as_number(row.get("id")),
        category: OrderCategory::parse(&as_string(row.get("category"))),
        status: OrderStatus::parse(&as_string(row.get("status"))),
        expiration: as_number(row.get("expiration")),
        collection: checksum_or_raw(&as_string(row.get("collection"))),
        token_id: normalize_token_id(&as_string(row.get("token_id"))),
        quantity: as_bigint(row.get("quantity")),
        price: as_bigint(row.get("price")),
        currency: checksum_or_raw(&as_string(row.get("currency"))),
        owner: checksum_or_raw(&as_string(row.get("owner"))),
    }
}

/// Decoded orders that exist (non-zero id)
pub fn normalize_orders(rows: &[Row]) -> Vec<Order> {
    rows.iter().map(normalize_order).filter(Order::exists).collect()
}

pub fn normalize_balance(row: &Row) -> Option<Balance> {
    let account = as_string(row.get("account_address"));
    let token_id = as_string(row.get("token_id"));
    if account.is_empty() || token_id.is_empty() {
        return None;
    }
    // Composite `contract:token` ids carry the contract when the column is absent
    let contract = non_empty(as_string(row.get("contract_address")))
        .or_else(|| token_id.split_once(':').map(|(c, _)| c.to_string()))
        .unwrap_or_default();

    Some(Balance {
        account_address: checksum_or_raw(&account),
        contract_address: checksum_or_raw(&contract),
        token_id: normalize_token_id(&token_id),
        balance: as_bigint(row.get("balance")),
    })
}

pub fn normalize_balances(rows: &[Row]) -> Vec<Balance> {
    rows.iter().filter_map(normalize_balance).collect()
}

pub fn normalize_collection(project: &ProjectId, row: &Row) -> Option<CollectionSummary> {
    let contract = as_string(row.get("contract_address"));
    if contract.is_empty() {
        return None;
    }
    let metadata = parse_json_safe(row.get("metadata"));
    Some(CollectionSummary {
        project: project.clone(),
        contract_address: checksum_or_raw(&contract),
        name: non_empty(as_string(row.get("name"))),
        symbol: non_empty(as_string(row.get("symbol"))),
        token_count: as_number(row.get("token_count")),
        image: metadata_image(&metadata),
        metadata,
    })
}

pub fn normalize_collections(project: &ProjectId, rows: &[Row]) -> Vec<CollectionSummary> {
    rows.iter().filter_map(|row| normalize_collection(project, row)).collect()
}
