//! Trait-count aggregation across projects
//!
//! Counts are keyed by `(trait_name, trait_value)`, never by value alone, so
//! two traits sharing a value string stay distinct.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{sql_literal, token_ids_query, ActiveFilterSet};
use crate::indexer::Row;
use crate::marketplace::coerce::{as_number, as_string};

/// One `(trait, value, count)` row as returned by an indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitMetadataRow {
    pub trait_name: String,
    pub trait_value: String,
    pub count: u64,
}

impl TraitMetadataRow {
    /// Rows without a trait name are dropped
    pub fn from_row(row: &Row) -> Option<Self> {
        let trait_name = as_string(row.get("trait_name"));
        if trait_name.is_empty() {
            return None;
        }
        Some(Self {
            trait_name,
            trait_value: as_string(row.get("trait_value")),
            count: as_number(row.get("count")),
        })
    }

    pub fn from_rows(rows: &[Row]) -> Vec<Self> {
        rows.iter().filter_map(Self::from_row).collect()
    }
}

/// Count per `(trait, value)`, summed across every page fed in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitCounts {
    counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl TraitCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate a set of pages, one per project. Pure: the same pages in any
    /// order give the same table.
    pub fn aggregate<'a, I>(pages: I) -> Self
    where
        I: IntoIterator<Item = &'a [TraitMetadataRow]>,
    {
        let mut counts = Self::new();
        for page in pages {
            counts.add_rows(page);
        }
        counts
    }

    pub fn add_rows(&mut self, rows: &[TraitMetadataRow]) {
        for row in rows {
            let count = self
                .counts
                .entry(row.trait_name.clone())
                .or_default()
                .entry(row.trait_value.clone())
                .or_default();
            *count = count.saturating_add(row.count);
        }
    }

    pub fn merge(&mut self, other: &TraitCounts) {
        for (name, values) in &other.counts {
            let entry = self.counts.entry(name.clone()).or_default();
            for (value, count) in values {
                let total = entry.entry(value.clone()).or_default();
                *total = total.saturating_add(*count);
            }
        }
    }

    pub fn count(&self, trait_name: &str, trait_value: &str) -> u64 {
        self.counts
            .get(trait_name)
            .and_then(|values| values.get(trait_value))
            .copied()
            .unwrap_or(0)
    }

    pub fn trait_names(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Flattened table sorted by trait then value
    pub fn rows(&self) -> Vec<TraitMetadataRow> {
        self.counts
            .iter()
            .flat_map(|(name, values)| {
                values.iter().map(move |(value, count)| TraitMetadataRow {
                    trait_name: name.clone(),
                    trait_value: value.clone(),
                    count: *count,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOption {
    pub value: String,
    pub count: u64,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableFilter {
    pub trait_name: String,
    pub options: Vec<FilterOption>,
}

/// Filter table for the UI.
///
/// Every `(trait, value)` of the full collection is listed. Counts come from
/// `filtered` (the counts over tokens matching `active`) and are zero where
/// the filtered set has none; with no `filtered` table the full counts are
/// used.
pub fn available_filters(
    full: &TraitCounts,
    filtered: Option<&TraitCounts>,
    active: &ActiveFilterSet,
) -> Vec<AvailableFilter> {
    full.counts
        .iter()
        .map(|(name, values)| AvailableFilter {
            trait_name: name.clone(),
            options: values
                .iter()
                .map(|(value, full_count)| FilterOption {
                    value: value.clone(),
                    count: match filtered {
                        Some(f) => f.count(name, value),
                        None => *full_count,
                    },
                    selected: active.is_selected(name, value),
                })
                .collect(),
        })
        .collect()
}

/// Per-(trait, value) token counts for one collection, optionally restricted
/// to tokens matching `filters`
pub fn trait_counts_query(contract: &str, filters: &ActiveFilterSet) -> String {
    let mut sql = format!(
        "SELECT trait_name, trait_value, COUNT(*) AS count FROM token_attributes WHERE token_id LIKE {}",
        sql_literal(&format!("{contract}:%"))
    );
    if let Some(ids) = token_ids_query(contract, filters) {
        sql.push_str(&format!(" AND token_id IN ({ids})"));
    }
    sql.push_str(" GROUP BY trait_name, trait_value");
    sql
}
