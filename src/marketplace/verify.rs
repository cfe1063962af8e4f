//! Listing ownership verification
//!
//! Order state can lag a transfer. A listing survives only if its owner
//! currently holds a strictly positive balance of the listed token.

use std::collections::HashSet;
use tracing::debug;

use super::address::pad_address;
use super::coerce::normalize_token_id;
use super::types::{Balance, Order};
use crate::metrics::metrics;

fn owner_key(owner: &str) -> String {
    pad_address(owner).unwrap_or_else(|| owner.to_ascii_lowercase())
}

/// Distinct owners and token ids of the candidate listings, in first-seen order
pub fn ownership_space(listings: &[Order]) -> (Vec<String>, Vec<String>) {
    let mut seen_owners = HashSet::new();
    let mut seen_ids = HashSet::new();
    let mut owners = Vec::new();
    let mut token_ids = Vec::new();
    for listing in listings {
        if seen_owners.insert(owner_key(&listing.owner)) {
            owners.push(listing.owner.clone());
        }
        let id = normalize_token_id(&listing.token_id);
        if seen_ids.insert(id.clone()) {
            token_ids.push(id);
        }
    }
    (owners, token_ids)
}

/// Keep listings whose `(owner, token)` has a positive balance
pub fn retain_owned(listings: Vec<Order>, balances: &[Balance]) -> Vec<Order> {
    let held: HashSet<(String, String)> = balances
        .iter()
        .filter(|b| b.balance > 0)
        .map(|b| (owner_key(&b.account_address), normalize_token_id(&b.token_id)))
        .collect();

    let before = listings.len();
    let kept: Vec<Order> = listings
        .into_iter()
        .filter(|l| held.contains(&(owner_key(&l.owner), normalize_token_id(&l.token_id))))
        .collect();

    let dropped = before - kept.len();
    if dropped > 0 {
        metrics().listings_dropped.inc_by(dropped as u64);
        debug!(dropped = dropped, kept = kept.len(), "Dropped listings without current ownership");
    }
    kept
}
