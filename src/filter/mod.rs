//! Trait filter engine
//!
//! An [`ActiveFilterSet`] maps trait names to selected values. A token
//! matches when every selected trait has at least one selected value among
//! the token's values for that trait. The same predicate is rendered
//! server-side as a SQL fragment and evaluated client-side over parsed
//! metadata. Comparisons are exact equality on both sides.

pub mod aggregate;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub use aggregate::{
    available_filters, trait_counts_query, AvailableFilter, FilterOption, TraitCounts, TraitMetadataRow,
};

/// Trait name → selected values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveFilterSet {
    traits: BTreeMap<String, BTreeSet<String>>,
}

impl ActiveFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, trait_name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(trait_name, value);
        self
    }

    /// Returns false if the value was already selected
    pub fn insert(&mut self, trait_name: impl Into<String>, value: impl Into<String>) -> bool {
        self.traits.entry(trait_name.into()).or_default().insert(value.into())
    }

    pub fn remove(&mut self, trait_name: &str, value: &str) -> bool {
        let Some(values) = self.traits.get_mut(trait_name) else {
            return false;
        };
        let removed = values.remove(value);
        if values.is_empty() {
            self.traits.remove(trait_name);
        }
        removed
    }

    /// Flip one value's selection, as a UI checkbox does
    pub fn toggle(&mut self, trait_name: &str, value: &str) {
        if !self.remove(trait_name, value) {
            self.insert(trait_name, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.traits.is_empty()
    }

    pub fn is_selected(&self, trait_name: &str, value: &str) -> bool {
        self.traits.get(trait_name).is_some_and(|v| v.contains(value))
    }

    pub fn selects_trait(&self, trait_name: &str) -> bool {
        self.traits.contains_key(trait_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.traits.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ActiveFilterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// Quote a SQL string literal
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn value_clause(trait_name: &str, value: &str) -> String {
    format!(
        "(trait_name={} AND trait_value={})",
        sql_literal(trait_name),
        sql_literal(value)
    )
}

fn group_clause(trait_name: &str, values: &BTreeSet<String>) -> String {
    let alternatives: Vec<String> = values.iter().map(|v| value_clause(trait_name, v)).collect();
    format!("({})", alternatives.join(" OR "))
}

/// `((name='A' AND value='x') OR ...) AND ((name='B' ...))`, `None` when empty.
///
/// Evaluated against a single attribute row this only reads as "row matches
/// one selected value"; use [`token_ids_query`] to select tokens.
pub fn trait_clause(filters: &ActiveFilterSet) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let groups: Vec<String> = filters.iter().map(|(name, values)| group_clause(name, values)).collect();
    Some(groups.join(" AND "))
}

/// Token ids (`contract:token` form) of `contract` matching every trait group.
///
/// Attribute rows hold one (trait, value) pair each, so each group selects
/// its own id set and the sets are intersected.
pub fn token_ids_query(contract: &str, filters: &ActiveFilterSet) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let prefix = sql_literal(&format!("{contract}:%"));
    let selects: Vec<String> = filters
        .iter()
        .map(|(name, values)| {
            format!(
                "SELECT token_id FROM token_attributes WHERE token_id LIKE {prefix} AND {}",
                group_clause(name, values)
            )
        })
        .collect();
    Some(selects.join(" INTERSECT "))
}

/// `(trait, value)` pairs from a metadata document's `attributes` array.
///
/// Accepts `trait_type`/`trait`/`name` for the key and `value`/`trait_value`
/// for the value; scalar values are stringified. `None` when there is no
/// attributes array.
pub fn metadata_attributes(metadata: &Value) -> Option<Vec<(String, String)>> {
    let attributes = metadata.get("attributes")?.as_array()?;
    let pairs = attributes
        .iter()
        .filter_map(|attr| {
            let name = ["trait_type", "trait", "name"]
                .iter()
                .find_map(|k| attr.get(*k).and_then(Value::as_str))?;
            let value = ["value", "trait_value"].iter().find_map(|k| match attr.get(*k) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(Value::Bool(b)) => Some(b.to_string()),
                _ => None,
            })?;
            Some((name.to_string(), value))
        })
        .collect();
    Some(pairs)
}

/// Client-side predicate over already-extracted attributes
pub fn matches_attributes(filters: &ActiveFilterSet, attributes: &[(String, String)]) -> bool {
    filters.iter().all(|(name, selected)| {
        attributes
            .iter()
            .any(|(attr_name, value)| attr_name == name && selected.contains(value))
    })
}

/// Client-side predicate over parsed metadata; `None` is metadata that failed
/// to parse and never matches a non-empty filter set
pub fn matches(filters: &ActiveFilterSet, metadata: Option<&Value>) -> bool {
    if filters.is_empty() {
        return true;
    }
    match metadata.and_then(metadata_attributes) {
        Some(attributes) => matches_attributes(filters, &attributes),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn p3_filters() -> ActiveFilterSet {
        ActiveFilterSet::new()
            .with("Rarity", "Legendary")
            .with("Rarity", "Epic")
            .with("Background", "Gold")
    }

    #[test]
    fn test_clause_groups_or_within_and_across() {
        let clause = trait_clause(&p3_filters()).unwrap();
        assert_eq!(
            clause,
            "((trait_name='Background' AND trait_value='Gold')) AND \
             ((trait_name='Rarity' AND trait_value='Epic') OR (trait_name='Rarity' AND trait_value='Legendary'))"
        );
        assert!(!clause.contains("LIKE"));
    }

    #[test]
    fn test_empty_filters_have_no_clause() {
        assert!(trait_clause(&ActiveFilterSet::new()).is_none());
        assert!(token_ids_query("0x1", &ActiveFilterSet::new()).is_none());
    }

    #[test]
    fn test_literals_are_escaped() {
        let filters = ActiveFilterSet::new().with("Owner's Pick", "it's");
        let clause = trait_clause(&filters).unwrap();
        assert_eq!(clause, "((trait_name='Owner''s Pick' AND trait_value='it''s'))");
    }

    #[test]
    fn test_token_ids_query_intersects_groups() {
        let sql = token_ids_query("0xabc", &p3_filters()).unwrap();
        assert_eq!(sql.matches("INTERSECT").count(), 1);
        assert!(sql.contains("token_id LIKE '0xabc:%'"));
    }

    #[test]
    fn test_exact_match_not_substring() {
        let filters = ActiveFilterSet::new().with("Background", "Gold");
        let golden = json!({"attributes": [{"trait_type": "Background", "value": "Golden"}]});
        let gold = json!({"attributes": [{"trait_type": "Background", "value": "Gold"}]});
        assert!(!matches(&filters, Some(&golden)));
        assert!(matches(&filters, Some(&gold)));
    }

    #[test]
    fn test_same_value_different_trait_does_not_match() {
        let filters = ActiveFilterSet::new().with("Background", "Gold");
        let token = json!({"attributes": [{"trait_type": "Weapon", "value": "Gold"}]});
        assert!(!matches(&filters, Some(&token)));
    }

    #[test]
    fn test_unparseable_metadata_fails_closed() {
        let filters = ActiveFilterSet::new().with("Rarity", "Epic");
        assert!(!matches(&filters, None));
        assert!(!matches(&filters, Some(&json!({"name": "no attributes"}))));
        assert!(matches(&ActiveFilterSet::new(), None));
    }

    #[test]
    fn test_numeric_attribute_values() {
        let filters = ActiveFilterSet::new().with("Level", "3");
        let token = json!({"attributes": [{"trait_type": "Level", "value": 3}]});
        assert!(matches(&filters, Some(&token)));
    }

    #[test]
    fn test_toggle_and_remove_prune_empty_groups() {
        let mut filters = ActiveFilterSet::new();
        filters.toggle("Rarity", "Epic");
        assert!(filters.is_selected("Rarity", "Epic"));
        filters.toggle("Rarity", "Epic");
        assert!(filters.is_empty());
    }

    fn attrs() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("[A-C]", "[x-z]{1,2}"), 0..6)
    }

    fn filter_sets() -> impl Strategy<Value = ActiveFilterSet> {
        prop::collection::vec(("[A-C]", "[x-z]{1,2}"), 0..5)
            .prop_map(|pairs| pairs.into_iter().collect::<ActiveFilterSet>())
    }

    proptest! {
        #[test]
        fn prop_matches_is_and_of_ors(filters in filter_sets(), token in attrs()) {
            let expected = filters.iter().all(|(name, selected)| {
                token.iter().any(|(n, v)| n == name && selected.contains(v))
            });
            prop_assert_eq!(matches_attributes(&filters, &token), expected);
        }

        #[test]
        fn prop_adding_a_value_never_narrows(filters in filter_sets(), token in attrs(), extra in "[x-z]{1,2}") {
            // within-trait OR: one more value for an already selected trait can only widen
            if let Some((name, _)) = filters.iter().next() {
                let name = name.to_string();
                let widened = filters.clone().with(name, extra);
                if matches_attributes(&filters, &token) {
                    prop_assert!(matches_attributes(&widened, &token));
                }
            }
        }

        #[test]
        fn prop_clause_mentions_every_selection(filters in filter_sets()) {
            if let Some(clause) = trait_clause(&filters) {
                for (name, values) in filters.iter() {
                    for v in values {
                        let needle = format!("(trait_name='{name}' AND trait_value='{v}')");
                        prop_assert!(clause.contains(&needle));
                    }
                }
            }
        }
    }
}
