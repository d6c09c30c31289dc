use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
};

use serde::{Deserialize, Serialize};

/// A store returned by a locator, identified by the retailer's own key.
pub trait DiscoveredStore {
    type Key: Ord + Clone + fmt::Debug;

    fn key(&self) -> Self::Key;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocatedStore {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DiscoveredStore for LocatedStore {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Stores found so far, at most one per key. The first store seen for a key
/// is kept.
#[derive(Debug)]
pub struct StoreSet<S: DiscoveredStore> {
    stores: BTreeMap<S::Key, S>,
}

impl<S: DiscoveredStore> Default for StoreSet<S> {
    fn default() -> Self {
        Self {
            stores: BTreeMap::new(),
        }
    }
}

impl<S: DiscoveredStore> StoreSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds stores with unseen keys and returns how many were new.
    pub fn merge(&mut self, stores: impl IntoIterator<Item = S>) -> usize {
        let mut added = 0;
        for store in stores {
            if let Entry::Vacant(x) = self.stores.entry(store.key()) {
                x.insert(store);
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn contains(&self, key: &S::Key) -> bool {
        self.stores.contains_key(key)
    }

    pub fn get(&self, key: &S::Key) -> Option<&S> {
        self.stores.get(key)
    }

    /// Stores in key order.
    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.stores.values()
    }

    pub fn into_stores(self) -> Vec<S> {
        self.stores.into_values().collect()
    }
}

impl<S: DiscoveredStore> FromIterator<S> for StoreSet<S> {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = Self::new();
        set.merge(iter);
        set
    }
}
