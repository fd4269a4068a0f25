//! Store contract consumed by the repository core.
//!
//! A [`DocumentStore`] hands out one [`WriteTransaction`] at a time. Content,
//! keywords and metadata for a document are written through the same
//! transaction, so readers see either all of them or none.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bookkeeping fields attached to every registered document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingMetadata {
    /// Endpoint that registered the document
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A document as persisted by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredThing {
    /// Resource URI (the store key)
    pub uri: String,
    /// Source form of the document
    pub content: String,
    pub keywords: Vec<String>,
    /// Absent only if the writer never attached metadata
    pub metadata: Option<ThingMetadata>,
}

/// Write side of one ingestion.
///
/// Dropping a transaction without calling [`commit`](WriteTransaction::commit)
/// rolls it back.
pub trait WriteTransaction {
    /// Whether a document is already stored under `uri`
    fn contains(&self, uri: &str) -> Result<bool>;

    /// Store the source content. Fails with `Parse` if it is not valid JSON
    /// and with `DuplicateId` if `uri` is taken.
    fn put_document(&mut self, uri: &str, content: &str) -> Result<()>;

    /// Replace the free-text index entry for `uri`
    fn put_keywords(&mut self, uri: &str, keywords: &[String]) -> Result<()>;

    fn put_metadata(&mut self, uri: &str, metadata: &ThingMetadata) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transactional key-to-document storage with an embedded query engine
pub trait DocumentStore: Send + Sync {
    /// Start a write transaction. Blocks other writers until it ends.
    fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>>;

    fn contains(&self, uri: &str) -> Result<bool>;

    /// Fetch one document, `DocumentNotFound` if absent
    fn get_document(&self, uri: &str) -> Result<StoredThing>;

    /// Run a structured query, returning matching document URIs.
    ///
    /// A query that does not compile is `QuerySyntax`; a failure while it
    /// runs is reported as a store error.
    fn query_structured(&self, query: &str) -> Result<Vec<String>>;

    /// URIs of every stored document, in insertion order
    fn list_all(&self) -> Result<Vec<String>>;

    /// Match `terms` against the keyword index, returning document URIs
    fn query_text(&self, terms: &str) -> Result<Vec<String>>;

    /// Look up raw attribute values. Duplicates are kept.
    fn query_type_values(&self, expr: &str) -> Result<Vec<Value>>;

    /// Delete a document. Returns `false` if it was not stored.
    fn delete_document(&self, uri: &str) -> Result<bool>;

    /// Every stored `(uri, expires_at)` pair, soonest first
    fn expiry_entries(&self) -> Result<Vec<(String, DateTime<Utc>)>>;
}
