//! # tdrepo-store: Thing Description Document Store
//!
//! Transactional storage for Thing Descriptions, providing:
//! - **Atomic ingestion**: content, keywords and metadata written in one transaction
//! - **Structured queries**: SQLite expressions over a `thing_view` of stored documents
//! - **FTS5 keyword search**: free-text matching against the derived keyword index
//! - **Type/value lookup**: raw attribute values pulled out with SQLite's JSON functions
//!
//! ## Quick Start
//!
//! ```rust
//! use tdrepo_store::{DocumentStore, SqliteStore, ThingMetadata};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> tdrepo_store::Result<()> {
//! let store = SqliteStore::in_memory()?;
//! let uri = "http://localhost:8080/td/1a2b3c4d";
//! let now = Utc::now();
//!
//! let mut tx = store.begin_write()?;
//! tx.put_document(uri, r#"{"title": "Lamp"}"#)?;
//! tx.put_keywords(uri, &["lamp".to_string()])?;
//! tx.put_metadata(uri, &ThingMetadata {
//!     endpoint: "http://example.org/".to_string(),
//!     created_at: now,
//!     modified_at: now,
//!     expires_at: now + Duration::hours(24),
//! })?;
//! tx.commit()?;
//!
//! assert_eq!(store.query_text("lamp")?, vec![uri.to_string()]);
//! assert_eq!(
//!     store.query_structured("json_extract(content, '$.title') = 'Lamp'")?,
//!     vec![uri.to_string()]
//! );
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod store;
pub mod traits;

pub use error::{Result, StoreError};
pub use store::SqliteStore;
pub use traits::{DocumentStore, StoredThing, ThingMetadata, WriteTransaction};
