use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Key = String;
type Hash = HashMap<String, Bytes>;

/// The Store holds the keyspace: a flat map of string keys and a map of hashes, each hash being a
/// map of fields to values.
///
/// Each map sits behind its own reader/writer lock and every operation takes the lock exactly
/// once, so an operation never observes another one half applied. The store is cheap to clone and
/// all clones share the same data.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<InnerStore>,
}

#[derive(Default)]
struct InnerStore {
    strings: RwLock<HashMap<Key, Bytes>>,
    hashes: RwLock<HashMap<Key, Hash>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn set(&self, key: String, value: Bytes) {
        let mut strings = self.inner.strings.write().unwrap();
        strings.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let strings = self.inner.strings.read().unwrap();
        strings.get(key).cloned()
    }

    /// Sets `field` in the hash stored at `key`, creating the hash if it doesn't exist yet.
    pub fn hset(&self, key: String, field: String, value: Bytes) {
        let mut hashes = self.inner.hashes.write().unwrap();
        hashes.entry(key).or_default().insert(field, value);
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<Bytes> {
        let hashes = self.inner.hashes.read().unwrap();
        hashes.get(key).and_then(|hash| hash.get(field)).cloned()
    }

    /// Returns a snapshot of every field and value in the hash, in no particular order.
    pub fn hgetall(&self, key: &str) -> Option<Vec<(String, Bytes)>> {
        let hashes = self.inner.hashes.read().unwrap();
        hashes.get(key).map(|hash| {
            hash.iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
    }

    /// Number of string keys.
    pub fn len(&self) -> usize {
        self.inner.strings.read().unwrap().len()
    }

    pub fn hash_count(&self) -> usize {
        self.inner.hashes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.hash_count() == 0
    }
}
