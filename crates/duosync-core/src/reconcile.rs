//! Item reconciliation.
//!
//! Two peers converge by the side receiving a `SyncRequest` merging both
//! collections and answering with the merged result, which the requester
//! adopts verbatim.
//!
//! Algorithm:
//! 1. Concatenate local then remote items
//! 2. Keep the first occurrence of each id
//! 3. Sort newest first; equal timestamps order by ascending id

use std::collections::HashSet;

use crate::types::SyncItem;

/// Merge two collections into one deduplicated, newest-first list.
///
/// Both sides are expected to hold identical copies of any shared id, so
/// which occurrence survives is immaterial.
pub fn merge(local: &[SyncItem], remote: &[SyncItem]) -> Vec<SyncItem> {
    let mut seen = HashSet::new();
    let mut merged: Vec<SyncItem> = local
        .iter()
        .chain(remote)
        .filter(|item| seen.insert(item.id.as_str()))
        .cloned()
        .collect();
    sort_newest_first(&mut merged);
    merged
}

/// Sort descending by timestamp, ties broken by ascending id.
pub fn sort_newest_first(items: &mut [SyncItem]) {
    items.sort_by(|a, b| {
        b.timestamp_millis
            .cmp(&a.timestamp_millis)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// The local, always-sorted item collection of one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemCollection {
    items: Vec<SyncItem>,
}

impl ItemCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from arbitrary items, deduplicating and sorting.
    pub fn from_items(items: Vec<SyncItem>) -> Self {
        Self {
            items: merge(&items, &[]),
        }
    }

    /// Insert one item and re-sort.
    ///
    /// Returns false if an item with the same id is already present.
    pub fn insert(&mut self, item: SyncItem) -> bool {
        if self.contains(&item.id) {
            return false;
        }
        self.items.push(item);
        sort_newest_first(&mut self.items);
        true
    }

    /// Merge remote items into this collection and return the merged list.
    pub fn merge_remote(&mut self, remote: &[SyncItem]) -> Vec<SyncItem> {
        self.items = merge(&self.items, remote);
        self.items.clone()
    }

    /// Replace the whole collection with an already-merged list.
    pub fn replace(&mut self, items: Vec<SyncItem>) {
        self.items = items;
    }

    /// Check whether an id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    pub fn as_slice(&self) -> &[SyncItem] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<SyncItem> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn item(id: &str, t: i64) -> SyncItem {
        SyncItem::with_id(id, format!("text-{id}"), t)
    }

    fn ids(items: &[SyncItem]) -> BTreeSet<String> {
        items.iter().map(|i| i.id.clone()).collect()
    }

    /// Items with unique ids. Text and timestamp are derived from the id so
    /// shared ids carry identical copies, as they do between real peers.
    fn collection() -> impl Strategy<Value = Vec<SyncItem>> {
        prop::collection::btree_set("[a-j]{1,2}", 0..12).prop_map(|set| {
            set.into_iter()
                .map(|id| {
                    let t = id.bytes().fold(0i64, |acc, b| (acc * 31 + b as i64) % 50);
                    SyncItem::with_id(id.clone(), format!("text-{id}"), t)
                })
                .collect()
        })
    }

    #[test]
    fn test_merge_two_disjoint_collections() {
        let server = vec![item("a", 100)];
        let client = vec![item("b", 200)];

        let merged = merge(&server, &client);
        assert_eq!(merged, vec![item("b", 200), item("a", 100)]);
    }

    #[test]
    fn test_merge_keeps_first_occurrence() {
        let local = vec![SyncItem::with_id("a", "local", 100)];
        let remote = vec![SyncItem::with_id("a", "remote", 100)];

        let merged = merge(&local, &remote);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "local");
    }

    #[test]
    fn test_equal_timestamps_order_by_id() {
        let merged = merge(&[item("c", 5), item("a", 5)], &[item("b", 5)]);
        let order: Vec<&str> = merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_collection_insert_sorts_and_dedupes() {
        let mut items = ItemCollection::new();
        assert!(items.insert(item("a", 100)));
        assert!(items.insert(item("b", 300)));
        assert!(items.insert(item("c", 200)));
        assert!(!items.insert(item("a", 999)));

        let order: Vec<&str> = items.as_slice().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_collection_replace_is_verbatim() {
        let mut items = ItemCollection::from_items(vec![item("a", 1)]);
        let incoming = vec![item("x", 1), item("y", 2)];
        items.replace(incoming.clone());
        assert_eq!(items.to_vec(), incoming);
    }

    proptest! {
        #[test]
        fn test_merge_commutative_on_ids(a in collection(), b in collection()) {
            prop_assert_eq!(ids(&merge(&a, &b)), ids(&merge(&b, &a)));
            prop_assert_eq!(merge(&a, &b), merge(&b, &a));
        }

        #[test]
        fn test_merge_idempotent(a in collection(), b in collection()) {
            let once = merge(&a, &b);
            let twice = merge(&once, &b);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_merge_sorted_non_increasing(a in collection(), b in collection()) {
            let merged = merge(&a, &b);
            for pair in merged.windows(2) {
                prop_assert!(pair[0].timestamp_millis >= pair[1].timestamp_millis);
            }
        }

        #[test]
        fn test_merge_is_union(a in collection(), b in collection()) {
            let merged = merge(&a, &b);
            let expected: BTreeSet<String> = ids(&a).union(&ids(&b)).cloned().collect();
            prop_assert_eq!(ids(&merged), expected.clone());
            prop_assert_eq!(merged.len(), expected.len());
        }
    }
}
