//! # tdrepo-core - Thing Description Repository
//!
//! Orchestration around a queryable, transactional document store.
//!
//! This crate provides:
//! - Repository facade (`repository`) - register, list, get and remove TDs
//! - Keyword extraction (`keywords`) - terms for the free-text index
//! - Metadata annotation (`annotate`) - endpoint, timestamps, lifetime
//! - Query routing (`query`) - structured, free-text or type/value lookups
//! - Collection assembly (`assemble`) - tolerant multi-document responses
//! - Expiry (`expiry`) - priority-ordered TTL eviction on a single timer
//! - Configuration (`config`), clocks (`clock`) and logging (`logging`)

pub mod annotate;
pub mod assemble;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod ident;
pub mod keywords;
pub mod logging;
pub mod query;
pub mod repository;

pub use tdrepo_store as store;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::annotate::{MetadataAnnotator, RegisterParams};
    pub use crate::assemble::{CollectionAssembler, QueryResponse, ThingCollection};
    pub use crate::clock::{Clock, SystemClock, TokioClock};
    pub use crate::config::RepositoryConfig;
    pub use crate::error::{Error, Result};
    pub use crate::expiry::{ExpiryEntry, ExpiryScheduler, ExpiryStatus};
    pub use crate::keywords::KeywordExtractor;
    pub use crate::query::{QueryRequest, QueryRouter, RouteOutcome};
    pub use crate::repository::{Registration, ThingRepository};
    pub use tdrepo_store::{DocumentStore, SqliteStore, StoredThing, ThingMetadata};
}
