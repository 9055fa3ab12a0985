//! Key sets and resolution results.
//!
//! A [`KeyCollection`] is the set of `(organization_id, string)` pairs still to
//! be resolved. A [`KeyResults`] maps each resolved pair to its id and the
//! [`FetchType`] describing how the id was obtained. Subtracting one from the
//! other yields what the next tier (cache → store → writer) has to handle.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strindex_storage::OrgStringKey;

/// Strings requested per organization.
pub type OrgStrings = HashMap<u64, HashSet<String>>;

/// Resolved ids per organization and string. `None` marks a string that was
/// not given an id (rate limited).
pub type MappedResults = HashMap<u64, HashMap<String, Option<u64>>>;

/// Provenance of a resolved id.
///
/// Serialized as the single-letter codes used in `mapping_meta` payload
/// headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchType {
    #[serde(rename = "c")]
    CacheHit,
    #[serde(rename = "d")]
    DbRead,
    #[serde(rename = "f")]
    FirstSeen,
    #[serde(rename = "r")]
    RateLimited,
    #[serde(rename = "h")]
    Hardcoded,
}

impl FetchType {
    /// Returns the single-letter code for this fetch type.
    pub fn code(&self) -> char {
        match self {
            FetchType::CacheHit => 'c',
            FetchType::DbRead => 'd',
            FetchType::FirstSeen => 'f',
            FetchType::RateLimited => 'r',
            FetchType::Hardcoded => 'h',
        }
    }
}

/// Extra diagnostics attached to a fetch type. Currently only set for
/// rate-limited strings, naming the quota that was exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTypeExt {
    /// True when the global quota (rather than the per-org one) was exceeded.
    pub is_global: bool,
    pub window_seconds: u64,
    pub limit: u64,
}

/// A set of `(organization_id, string)` keys grouped by organization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCollection {
    mapping: OrgStrings,
    size: usize,
}

impl KeyCollection {
    /// Builds a collection from a mapping of organization to strings.
    /// Organizations with no strings are dropped.
    pub fn new(mut mapping: OrgStrings) -> Self {
        mapping.retain(|_, strings| !strings.is_empty());
        let size = mapping.values().map(HashSet::len).sum();
        Self { mapping, size }
    }

    /// Total number of distinct `(organization_id, string)` pairs.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Iterates the keys as `(organization_id, string)` tuples.
    ///
    /// The iterator borrows the collection, so it can be recreated any number
    /// of times.
    pub fn as_tuples(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.mapping
            .iter()
            .flat_map(|(org_id, strings)| strings.iter().map(move |s| (*org_id, s.as_str())))
    }

    /// Returns the keys in a deterministic (sorted) order, owned, for storage calls.
    pub fn to_sorted_keys(&self) -> Vec<OrgStringKey> {
        let mut keys: Vec<OrgStringKey> = self
            .as_tuples()
            .map(|(org_id, s)| (org_id, s.to_string()))
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn contains(&self, org_id: u64, string: &str) -> bool {
        self.mapping
            .get(&org_id)
            .is_some_and(|strings| strings.contains(string))
    }

    /// Strings requested for one organization.
    pub fn strings(&self, org_id: u64) -> Option<&HashSet<String>> {
        self.mapping.get(&org_id)
    }

    pub fn organization_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.mapping.keys().copied()
    }

    pub fn mapping(&self) -> &OrgStrings {
        &self.mapping
    }

    /// Keys present in `self` but not in `other`.
    pub fn difference(&self, other: &KeyCollection) -> KeyCollection {
        self.as_tuples()
            .filter(|(org_id, s)| !other.contains(*org_id, s))
            .map(|(org_id, s)| (org_id, s.to_string()))
            .collect()
    }
}

impl From<OrgStrings> for KeyCollection {
    fn from(mapping: OrgStrings) -> Self {
        Self::new(mapping)
    }
}

impl FromIterator<(u64, String)> for KeyCollection {
    fn from_iter<T: IntoIterator<Item = (u64, String)>>(iter: T) -> Self {
        let mut mapping = OrgStrings::new();
        for (org_id, string) in iter {
            mapping.entry(org_id).or_default().insert(string);
        }
        Self::new(mapping)
    }
}

/// A single resolution: `id` is `None` for strings that received no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResult {
    pub org_id: u64,
    pub string: String,
    pub id: Option<u64>,
}

impl KeyResult {
    pub fn new(org_id: u64, string: impl Into<String>, id: Option<u64>) -> Self {
        Self {
            org_id,
            string: string.into(),
            id,
        }
    }
}

/// Resolved id plus provenance for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Option<u64>,
    pub fetch_type: FetchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_type_ext: Option<FetchTypeExt>,
}

/// Mapping from `(organization_id, string)` to its resolution.
///
/// Holds at most one entry per key; the first entry added for a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyResults {
    results: HashMap<u64, HashMap<String, Metadata>>,
}

impl KeyResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a result. Returns false (and changes nothing) if the key already
    /// has a result.
    pub fn add_key_result(
        &mut self,
        result: KeyResult,
        fetch_type: FetchType,
        fetch_type_ext: Option<FetchTypeExt>,
    ) -> bool {
        let strings = self.results.entry(result.org_id).or_default();
        if strings.contains_key(&result.string) {
            return false;
        }
        strings.insert(
            result.string,
            Metadata {
                id: result.id,
                fetch_type,
                fetch_type_ext,
            },
        );
        true
    }

    /// Adds several results sharing one fetch type.
    pub fn add_key_results<I>(&mut self, results: I, fetch_type: FetchType)
    where
        I: IntoIterator<Item = KeyResult>,
    {
        for result in results {
            self.add_key_result(result, fetch_type, None);
        }
    }

    pub fn get(&self, org_id: u64, string: &str) -> Option<&Metadata> {
        self.results.get(&org_id).and_then(|m| m.get(string))
    }

    /// Returns the id for a key, flattening "not resolved" and "rate limited".
    pub fn get_id(&self, org_id: u64, string: &str) -> Option<u64> {
        self.get(org_id, string).and_then(|m| m.id)
    }

    /// Number of resolved keys.
    pub fn len(&self) -> usize {
        self.results.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &str, &Metadata)> + '_ {
        self.results.iter().flat_map(|(org_id, strings)| {
            strings
                .iter()
                .map(move |(s, meta)| (*org_id, s.as_str(), meta))
        })
    }

    /// Returns `org_id -> string -> id`.
    pub fn get_mapped_results(&self) -> MappedResults {
        self.results
            .iter()
            .map(|(org_id, strings)| {
                let ids = strings
                    .iter()
                    .map(|(s, meta)| (s.clone(), meta.id))
                    .collect();
                (*org_id, ids)
            })
            .collect()
    }

    /// Returns `org_id -> string -> metadata`.
    pub fn get_fetch_metadata(&self) -> HashMap<u64, HashMap<String, Metadata>> {
        self.results.clone()
    }

    /// Keys of `original` that have no result here.
    pub fn get_unmapped_keys(&self, original: &KeyCollection) -> KeyCollection {
        original
            .as_tuples()
            .filter(|(org_id, s)| self.get(*org_id, s).is_none())
            .map(|(org_id, s)| (org_id, s.to_string()))
            .collect()
    }

    /// Unions two result sets. On a shared key the entry already in `self` is kept.
    pub fn merge(mut self, other: KeyResults) -> KeyResults {
        for (org_id, strings) in other.results {
            let mine = self.results.entry(org_id).or_default();
            for (string, meta) in strings {
                mine.entry(string).or_insert(meta);
            }
        }
        self
    }

    /// Counts results per fetch type.
    pub fn count_by_fetch_type(&self) -> HashMap<FetchType, usize> {
        let mut counts = HashMap::new();
        for (_, _, meta) in self.iter() {
            *counts.entry(meta.fetch_type).or_insert(0) += 1;
        }
        counts
    }
}

/// Convenience for building an [`OrgStrings`] mapping in tests and callers.
pub fn org_strings<I, S>(entries: I) -> OrgStrings
where
    I: IntoIterator<Item = (u64, Vec<S>)>,
    S: Into<String>,
{
    let mut mapping = OrgStrings::new();
    for (org_id, strings) in entries {
        mapping
            .entry(org_id)
            .or_default()
            .extend(strings.into_iter().map(Into::into));
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeyCollection {
        KeyCollection::new(org_strings([(1, vec!["a", "b"]), (2, vec!["a"])]))
    }

    #[test]
    fn test_collection_size_counts_distinct_pairs() {
        let collection = sample();
        assert_eq!(collection.size(), 3);
        assert!(!collection.is_empty());
    }

    #[test]
    fn test_collection_drops_empty_organizations() {
        let mut mapping = org_strings([(1, vec!["a"])]);
        mapping.insert(9, HashSet::new());
        let collection = KeyCollection::new(mapping);
        assert_eq!(collection.organization_ids().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_as_tuples_is_restartable() {
        let collection = sample();
        let first: HashSet<(u64, String)> = collection
            .as_tuples()
            .map(|(o, s)| (o, s.to_string()))
            .collect();
        let second: HashSet<(u64, String)> = collection
            .as_tuples()
            .map(|(o, s)| (o, s.to_string()))
            .collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_sorted_keys_are_deterministic() {
        let keys = sample().to_sorted_keys();
        assert_eq!(
            keys,
            vec![
                (1, "a".to_string()),
                (1, "b".to_string()),
                (2, "a".to_string())
            ]
        );
    }

    #[test]
    fn test_unmapped_keys_after_partial_resolution() {
        let collection = sample();
        let mut results = KeyResults::new();
        results.add_key_result(KeyResult::new(1, "a", Some(10)), FetchType::DbRead, None);

        let unmapped = results.get_unmapped_keys(&collection);
        assert_eq!(unmapped.size(), 2);
        assert!(unmapped.contains(1, "b"));
        assert!(unmapped.contains(2, "a"));
        assert!(!unmapped.contains(1, "a"));
    }

    #[test]
    fn test_rate_limited_keys_count_as_mapped() {
        let collection = KeyCollection::new(org_strings([(1, vec!["a"])]));
        let mut results = KeyResults::new();
        results.add_key_result(KeyResult::new(1, "a", None), FetchType::RateLimited, None);
        assert!(results.get_unmapped_keys(&collection).is_empty());
    }

    #[test]
    fn test_readding_key_keeps_original_provenance() {
        let mut results = KeyResults::new();
        assert!(results.add_key_result(KeyResult::new(1, "a", Some(1)), FetchType::DbRead, None));
        assert!(!results.add_key_result(
            KeyResult::new(1, "a", Some(2)),
            FetchType::FirstSeen,
            None
        ));

        let meta = results.get(1, "a").unwrap();
        assert_eq!(meta.id, Some(1));
        assert_eq!(meta.fetch_type, FetchType::DbRead);
    }

    #[test]
    fn test_merge_keeps_first_entry_and_unions_rest() {
        let mut left = KeyResults::new();
        left.add_key_result(KeyResult::new(1, "a", Some(1)), FetchType::CacheHit, None);
        let mut right = KeyResults::new();
        right.add_key_result(KeyResult::new(1, "a", Some(99)), FetchType::FirstSeen, None);
        right.add_key_result(KeyResult::new(2, "b", Some(2)), FetchType::FirstSeen, None);

        let merged = left.merge(right);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get_id(1, "a"), Some(1));
        assert_eq!(merged.get(1, "a").unwrap().fetch_type, FetchType::CacheHit);
        assert_eq!(merged.get_id(2, "b"), Some(2));
    }

    #[test]
    fn test_merge_with_itself_is_identity() {
        let mut results = KeyResults::new();
        results.add_key_result(KeyResult::new(1, "a", Some(1)), FetchType::DbRead, None);
        let merged = results.clone().merge(results.clone());
        assert_eq!(merged, results);
    }

    #[test]
    fn test_mapped_results_and_metadata() {
        let mut results = KeyResults::new();
        results.add_key_result(KeyResult::new(1, "a", Some(5)), FetchType::FirstSeen, None);
        let ext = FetchTypeExt {
            is_global: true,
            window_seconds: 10,
            limit: 1,
        };
        results.add_key_result(
            KeyResult::new(1, "b", None),
            FetchType::RateLimited,
            Some(ext.clone()),
        );

        let mapped = results.get_mapped_results();
        assert_eq!(mapped[&1]["a"], Some(5));
        assert_eq!(mapped[&1]["b"], None);

        let meta = results.get_fetch_metadata();
        assert_eq!(meta[&1]["b"].fetch_type_ext, Some(ext));
        assert_eq!(
            results.count_by_fetch_type().get(&FetchType::RateLimited),
            Some(&1)
        );
    }

    #[test]
    fn test_collection_difference() {
        let all = sample();
        let some = KeyCollection::new(org_strings([(1, vec!["a"])]));
        let rest = all.difference(&some);
        assert_eq!(rest.size(), 2);
        assert!(!rest.contains(1, "a"));
    }

    #[test]
    fn test_fetch_type_codes_match_serialization() {
        for fetch_type in [
            FetchType::CacheHit,
            FetchType::DbRead,
            FetchType::FirstSeen,
            FetchType::RateLimited,
            FetchType::Hardcoded,
        ] {
            let json = serde_json::to_string(&fetch_type).unwrap();
            assert_eq!(json, format!("\"{}\"", fetch_type.code()));
            let back: FetchType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, fetch_type);
        }
    }
}
