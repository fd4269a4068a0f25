//! Collection assembly: turn query results into one response.
//!
//! Documents can expire between the query and the fetch. A missing document
//! is skipped silently; any other per-document failure is logged and
//! skipped. Neither aborts the batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tdrepo_store::{DocumentStore, StoreError};
use tracing::{debug, warn};

use crate::ident::local_id;

/// Documents keyed by local identifier, in query order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThingCollection {
    entries: Vec<(String, Value)>,
    /// Position of each key in `entries`
    index: HashMap<String, usize>,
}

impl ThingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document unless its key is already present
    pub fn push(&mut self, key: impl Into<String>, document: Value) -> bool {
        let key = key.into();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, document));
        true
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ThingCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, document) in &self.entries {
            map.serialize_entry(key, document)?;
        }
        map.end()
    }
}

/// Response of a list request
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    /// Assembled documents (structured, free-text and list-all queries)
    Collection(ThingCollection),
    /// Raw values (type/value lookups)
    Values(Vec<Value>),
}

impl QueryResponse {
    /// Serialize once, at the transport boundary
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn as_collection(&self) -> Option<&ThingCollection> {
        match self {
            Self::Collection(collection) => Some(collection),
            Self::Values(_) => None,
        }
    }

    pub fn as_values(&self) -> Option<&[Value]> {
        match self {
            Self::Values(values) => Some(values),
            Self::Collection(_) => None,
        }
    }
}

/// Fetches documents by URI and collects the ones still available
#[derive(Clone)]
pub struct CollectionAssembler {
    store: Arc<dyn DocumentStore>,
}

impl CollectionAssembler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Fetch every URI in order. Never fails; unavailable documents are left out.
    pub fn assemble(&self, uris: &[String]) -> ThingCollection {
        let mut collection = ThingCollection::new();
        let mut seen = HashSet::with_capacity(uris.len());

        for uri in uris {
            if !seen.insert(uri.as_str()) {
                continue;
            }

            let thing = match self.store.get_document(uri) {
                Ok(thing) => thing,
                Err(StoreError::DocumentNotFound(_)) => {
                    debug!("Skipping {}: removed before it could be fetched", uri);
                    continue;
                }
                Err(e) => {
                    warn!("Unable to retrieve Thing Description {}: {}", uri, e);
                    continue;
                }
            };

            match serde_json::from_str::<Value>(&thing.content) {
                Ok(document) => {
                    collection.push(local_id(&thing.uri), document);
                }
                Err(e) => warn!("Stored Thing Description {} is not valid JSON: {}", uri, e),
            }
        }

        collection
    }
}
