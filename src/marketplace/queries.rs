//! SQL builders for the query-mode read path
//!
//! Addresses are bound in padded lowercase form and token ids in canonical
//! hex; every literal goes through [`sql_literal`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use itertools::Itertools;

use super::address::sql_address;
use super::coerce::normalize_token_id;
use super::errors::{MarketplaceError, MarketplaceResult};
use super::types::{OrderCategory, OrderStatus};
use crate::filter::{sql_literal, token_ids_query, ActiveFilterSet};

const TOKEN_COLUMNS: &str = "contract_address, token_id, name, symbol, metadata";
const ORDER_COLUMNS: &str = "id, category, status, expiration, collection, token_id, quantity, price, currency, owner";
const CURSOR_PREFIX: &str = "offset:";

fn quote_table(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn in_list<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values.into_iter().map(|v| sql_literal(v.as_ref())).join(", ")
}

/// Opaque cursor for the row offset of the next page
pub fn encode_cursor(offset: u64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{CURSOR_PREFIX}{offset}"))
}

pub fn decode_cursor(cursor: &str) -> MarketplaceResult<u64> {
    let invalid = || MarketplaceError::InvalidCursor(cursor.to_string());
    let bytes = URL_SAFE_NO_PAD.decode(cursor.trim()).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(invalid)
}

pub fn collection_query(contract: &str) -> String {
    format!(
        "SELECT contract_address, MAX(name) AS name, MAX(symbol) AS symbol, COUNT(*) AS token_count, \
         MAX(metadata) AS metadata FROM tokens WHERE contract_address = {} GROUP BY contract_address",
        sql_literal(&sql_address(contract))
    )
}

pub fn collections_query(limit: u32) -> String {
    format!(
        "SELECT contract_address, MAX(name) AS name, MAX(symbol) AS symbol, COUNT(*) AS token_count, \
         MAX(metadata) AS metadata FROM tokens GROUP BY contract_address ORDER BY contract_address LIMIT {limit}"
    )
}

/// One page of tokens. Asks for `limit + 1` rows so the caller can tell
/// whether another page exists.
pub fn tokens_query(
    contract: &str,
    token_ids: &[String],
    filters: &ActiveFilterSet,
    limit: u32,
    offset: u64,
) -> String {
    let contract = sql_address(contract);
    let mut sql = format!(
        "SELECT {TOKEN_COLUMNS} FROM tokens WHERE contract_address = {}",
        sql_literal(&contract)
    );
    if !token_ids.is_empty() {
        let ids = token_ids.iter().map(|id| normalize_token_id(id)).unique();
        sql.push_str(&format!(" AND token_id IN ({})", in_list(ids)));
    }
    if let Some(matching) = token_ids_query(&contract, filters) {
        sql.push_str(&format!(" AND (contract_address || ':' || token_id) IN ({matching})"));
    }
    sql.push_str(&format!(
        " ORDER BY token_id LIMIT {} OFFSET {offset}",
        u64::from(limit) + 1
    ));
    sql
}

/// Narrowing applied to an orders query
#[derive(Debug, Clone, Default)]
pub struct OrderFilter<'a> {
    pub collection: &'a str,
    pub token_id: Option<&'a str>,
    pub order_ids: &'a [u64],
    pub status: Option<OrderStatus>,
    pub category: Option<OrderCategory>,
    /// Keep only orders still open at this unix time (`expiration = 0` never expires)
    pub unexpired_at: Option<u64>,
}

pub fn orders_query(table: &str, filter: &OrderFilter<'_>, limit: u32) -> String {
    let mut sql = format!(
        "SELECT {ORDER_COLUMNS} FROM {} WHERE collection = {}",
        quote_table(table),
        sql_literal(&sql_address(filter.collection))
    );
    if let Some(token_id) = filter.token_id {
        sql.push_str(&format!(" AND token_id = {}", sql_literal(&normalize_token_id(token_id))));
    }
    if !filter.order_ids.is_empty() {
        sql.push_str(&format!(" AND id IN ({})", filter.order_ids.iter().join(", ")));
    }
    if let Some(status) = filter.status {
        sql.push_str(&format!(" AND status = {}", sql_literal(status.as_str())));
    }
    if let Some(category) = filter.category {
        sql.push_str(&format!(" AND category = {}", sql_literal(category.as_str())));
    }
    if let Some(now) = filter.unexpired_at {
        sql.push_str(&format!(" AND (expiration = 0 OR expiration > {now})"));
    }
    sql.push_str(&format!(" ORDER BY id LIMIT {limit}"));
    sql
}

/// Balances for exactly the `(collection, owner, token)` space given
pub fn balances_query(contract: &str, owners: &[String], token_ids: &[String]) -> String {
    let contract = sql_address(contract);
    let owners = owners.iter().map(|o| sql_address(o)).unique();
    let ids = token_ids
        .iter()
        .map(|id| format!("{contract}:{}", normalize_token_id(id)))
        .unique();
    format!(
        "SELECT account_address, contract_address, token_id, balance FROM token_balances \
         WHERE contract_address = {} AND account_address IN ({}) AND token_id IN ({})",
        sql_literal(&contract),
        in_list(owners),
        in_list(ids)
    )
}

pub fn fees_query(books_table: &str) -> String {
    format!("SELECT fee_num, fee_receiver FROM {} LIMIT 1", quote_table(books_table))
}
