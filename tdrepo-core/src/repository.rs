//! The Thing Description repository.
//!
//! `ThingRepository` is what a transport layer (HTTP, CoAP) talks to:
//!
//! - **register**: validate, extract keywords, annotate, write in one
//!   transaction, then hand the expiry deadline to the scheduler
//! - **list / query / observe**: route to one query mode and assemble
//! - **get / remove**: single-document access by identifier
//!
//! # Example
//!
//! ```rust,no_run
//! use tdrepo_core::prelude::*;
//!
//! # async fn run() -> tdrepo_core::error::Result<()> {
//! let repo = ThingRepository::open(RepositoryConfig::default()).await?;
//!
//! let reg = repo
//!     .register(r#"{"title": "Lamp"}"#, &RegisterParams::default().with_lifetime("60"))
//!     .await?;
//! println!("registered {}", reg.location);
//!
//! let found = repo.query(QueryRequest::Text("lamp".to_string())).await?;
//! println!("{}", found.to_json()?);
//!
//! repo.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tdrepo_store::{DocumentStore, SqliteStore, StoredThing, ThingMetadata};
use tracing::{debug, error, info, warn};

use crate::annotate::{MetadataAnnotator, RegisterParams};
use crate::assemble::{CollectionAssembler, QueryResponse};
use crate::clock::{Clock, SystemClock};
use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::expiry::ExpiryScheduler;
use crate::ident::{generate_id, local_id, resource_uri};
use crate::keywords::KeywordExtractor;
use crate::query::{QueryRequest, QueryRouter, RouteOutcome};

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    /// Store-assigned identifier
    pub id: String,
    /// Full resource URI
    pub uri: String,
    /// Local identifier of the created resource, e.g. `/td/1a2b3c4d`
    pub location: String,
    pub expires_at: DateTime<Utc>,
}

/// Document store plus the ingestion, query and expiry machinery around it
pub struct ThingRepository {
    config: RepositoryConfig,
    store: Arc<dyn DocumentStore>,
    extractor: KeywordExtractor,
    annotator: MetadataAnnotator,
    router: QueryRouter,
    assembler: CollectionAssembler,
    scheduler: ExpiryScheduler,
}

impl ThingRepository {
    /// Open the store named by `config` and start expiry
    pub async fn open(config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        let db_path = config.db_path.clone();
        let store = tokio::task::spawn_blocking(move || match db_path {
            Some(path) => SqliteStore::open(path),
            None => SqliteStore::in_memory(),
        })
        .await??;

        Self::with_store(config, Arc::new(store), Arc::new(SystemClock)).await
    }

    /// Build around an existing store and clock.
    ///
    /// Every document already in the store is re-tracked for expiry.
    pub async fn with_store(
        config: RepositoryConfig,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let annotator = MetadataAnnotator::new(Arc::clone(&clock))
            .with_defaults(config.default_lifetime_secs, config.default_endpoint.clone());
        let scheduler = ExpiryScheduler::start(Arc::clone(&store), clock);

        let recovery_store = Arc::clone(&store);
        let entries = tokio::task::spawn_blocking(move || recovery_store.expiry_entries()).await??;
        if !entries.is_empty() {
            info!("Re-tracking expiry of {} stored Thing Descriptions", entries.len());
        }
        for (uri, expires_at) in entries {
            scheduler.track(uri, expires_at)?;
        }

        Ok(Self {
            router: QueryRouter::new(Arc::clone(&store)),
            assembler: CollectionAssembler::new(Arc::clone(&store)),
            extractor: KeywordExtractor::new(),
            annotator,
            scheduler,
            store,
            config,
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &ExpiryScheduler {
        &self.scheduler
    }

    /// Register a Thing Description.
    ///
    /// Fails with `BadRequest` for an oversized or malformed body, or one
    /// whose `id`/`@id` is an already registered resource; nothing is
    /// written in that case. A store failure rolls the transaction back.
    pub async fn register(&self, body: &str, params: &RegisterParams) -> Result<Registration> {
        if body.len() > self.config.max_document_bytes {
            return Err(Error::bad_request(format!(
                "Document too large: {} bytes (max {} bytes)",
                body.len(),
                self.config.max_document_bytes
            )));
        }

        let document: Value = serde_json::from_str(body)
            .map_err(|e| Error::bad_request(format!("Malformed Thing Description: {}", e)))?;
        if !document.is_object() {
            return Err(Error::bad_request(
                "Thing Description must be a JSON object",
            ));
        }

        let keywords = self.extractor.extract(&document).unwrap_or_else(|e| {
            warn!("Keyword extraction failed, indexing without keywords: {}", e);
            Vec::new()
        });
        let metadata = self.annotator.annotate(params);

        let write = PendingWrite {
            body: body.to_string(),
            declared_ids: declared_ids(&document),
            keywords,
            metadata,
            base_uri: self.config.base_uri.clone(),
            id_attempts: self.config.id_attempts,
        };
        let store = Arc::clone(&self.store);
        let (id, uri, expires_at) =
            tokio::task::spawn_blocking(move || write.commit(store.as_ref())).await??;

        if let Err(e) = self.scheduler.track(uri.clone(), expires_at) {
            error!("Registered {} but could not schedule its expiry: {}", uri, e);
        }

        info!("Registered Thing Description {} (expires {})", uri, expires_at);
        Ok(Registration {
            location: local_id(&uri).to_string(),
            id,
            uri,
            expires_at,
        })
    }

    /// List documents matching `request`
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let router = self.router.clone();
        let assembler = self.assembler.clone();

        tokio::task::spawn_blocking(move || -> Result<QueryResponse> {
            Ok(match router.route(&request)? {
                RouteOutcome::Documents(uris) => {
                    debug!("Assembling {} Thing Descriptions", uris.len());
                    QueryResponse::Collection(assembler.assemble(&uris))
                }
                RouteOutcome::Values(values) => QueryResponse::Values(values),
            })
        })
        .await?
    }

    /// List documents using transport parameters (`query`, `text`, `rdf`)
    pub async fn list(&self, params: &HashMap<String, String>) -> Result<QueryResponse> {
        self.query(QueryRequest::from_params(params)).await
    }

    /// Watch hook for the collection; same as listing everything
    pub async fn observe(&self) -> Result<QueryResponse> {
        self.query(QueryRequest::All).await
    }

    /// Fetch one document by identifier or URI
    pub async fn get(&self, id: &str) -> Result<StoredThing> {
        let uri = self.uri_for(id);
        let store = Arc::clone(&self.store);
        let thing = tokio::task::spawn_blocking(move || store.get_document(&uri)).await??;
        Ok(thing)
    }

    /// Delete one document by identifier or URI and stop tracking its expiry
    pub async fn remove(&self, id: &str) -> Result<()> {
        let uri = self.uri_for(id);
        let store = Arc::clone(&self.store);
        let target = uri.clone();
        let deleted = tokio::task::spawn_blocking(move || store.delete_document(&target)).await??;
        if !deleted {
            return Err(Error::NotFound(uri));
        }

        if let Err(e) = self.scheduler.untrack(uri.clone()) {
            warn!("Removed {} but could not drop its expiry entry: {}", uri, e);
        }
        info!("Removed Thing Description {}", uri);
        Ok(())
    }

    /// Stop the expiry task
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// Full URIs pass through; bare identifiers are resolved against the base URI
    fn uri_for(&self, id: &str) -> String {
        if id.contains("://") {
            id.to_string()
        } else {
            let id = id.trim_start_matches('/');
            let id = id.rsplit('/').next().unwrap_or(id);
            resource_uri(&self.config.base_uri, id)
        }
    }
}

/// Everything one registration writes, prepared outside the transaction
struct PendingWrite {
    body: String,
    declared_ids: Vec<String>,
    keywords: Vec<String>,
    metadata: ThingMetadata,
    base_uri: String,
    id_attempts: u32,
}

impl PendingWrite {
    /// Assign an identifier and write content, keywords and metadata atomically
    fn commit(self, store: &dyn DocumentStore) -> Result<(String, String, DateTime<Utc>)> {
        // Dropping `tx` on any early return rolls it back
        let mut tx = store.begin_write()?;

        for declared in &self.declared_ids {
            if tx.contains(declared)? {
                return Err(Error::bad_request(format!(
                    "Thing Description references an already registered resource: {}",
                    declared
                )));
            }
        }

        let mut assigned = None;
        for _ in 0..self.id_attempts {
            let id = generate_id();
            let uri = resource_uri(&self.base_uri, &id);
            if tx.contains(&uri)? {
                debug!("Generated identifier {} is taken, retrying", id);
                continue;
            }
            assigned = Some((id, uri));
            break;
        }
        let (id, uri) = assigned.ok_or_else(|| {
            Error::Internal(format!(
                "No free identifier after {} attempts",
                self.id_attempts
            ))
        })?;

        tx.put_document(&uri, &self.body)?;
        tx.put_keywords(&uri, &self.keywords)?;
        tx.put_metadata(&uri, &self.metadata)?;
        tx.commit()?;

        Ok((id, uri, self.metadata.expires_at))
    }
}

/// Top-level `id` / `@id` strings of a document
fn declared_ids(document: &Value) -> Vec<String> {
    ["id", "@id"]
        .iter()
        .filter_map(|key| document.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_ids() {
        let doc = json!({"id": "urn:dev:1", "@id": "http://h/td/a", "title": "x"});
        assert_eq!(declared_ids(&doc), vec!["urn:dev:1", "http://h/td/a"]);
        assert!(declared_ids(&json!({"id": 5})).is_empty());
    }

    /// Only answers lookups made inside a write transaction
    struct TransactionalLookups(SqliteStore);

    impl DocumentStore for TransactionalLookups {
        fn begin_write(&self) -> tdrepo_store::Result<Box<dyn tdrepo_store::WriteTransaction + '_>> {
            self.0.begin_write()
        }
        fn contains(&self, uri: &str) -> tdrepo_store::Result<bool> {
            Err(tdrepo_store::StoreError::Custom(format!(
                "lookup of {} outside a transaction",
                uri
            )))
        }
        fn get_document(&self, uri: &str) -> tdrepo_store::Result<StoredThing> {
            self.0.get_document(uri)
        }
        fn query_structured(&self, query: &str) -> tdrepo_store::Result<Vec<String>> {
            self.0.query_structured(query)
        }
        fn list_all(&self) -> tdrepo_store::Result<Vec<String>> {
            self.0.list_all()
        }
        fn query_text(&self, terms: &str) -> tdrepo_store::Result<Vec<String>> {
            self.0.query_text(terms)
        }
        fn query_type_values(&self, expr: &str) -> tdrepo_store::Result<Vec<Value>> {
            self.0.query_type_values(expr)
        }
        fn delete_document(&self, uri: &str) -> tdrepo_store::Result<bool> {
            self.0.delete_document(uri)
        }
        fn expiry_entries(&self) -> tdrepo_store::Result<Vec<(String, DateTime<Utc>)>> {
            self.0.expiry_entries()
        }
    }

    fn pending(body: &Value) -> PendingWrite {
        let now = Utc::now();
        PendingWrite {
            body: body.to_string(),
            declared_ids: declared_ids(body),
            keywords: vec!["lamp".to_string()],
            metadata: ThingMetadata {
                endpoint: "http://example.org/".to_string(),
                created_at: now,
                modified_at: now,
                expires_at: now + chrono::Duration::seconds(60),
            },
            base_uri: "http://localhost:8080/td".to_string(),
            id_attempts: 8,
        }
    }

    #[test]
    fn test_declared_id_checked_inside_transaction() {
        let store = TransactionalLookups(SqliteStore::in_memory().unwrap());

        let (_, uri, _) = pending(&json!({"title": "Lamp"})).commit(&store).unwrap();

        let clash = pending(&json!({"@id": uri, "title": "Impostor"})).commit(&store);
        assert!(matches!(clash, Err(Error::BadRequest(_))));

        // Rejected write released the transaction
        let fresh = pending(&json!({"id": "urn:dev:lamp", "title": "Lamp"})).commit(&store);
        assert!(fresh.is_ok());
        assert_eq!(store.0.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_uri_for() {
        let repo = ThingRepository::open(RepositoryConfig::default()).await.unwrap();
        assert_eq!(repo.uri_for("1a2b3c4d"), "http://localhost:8080/td/1a2b3c4d");
        assert_eq!(repo.uri_for("/td/1a2b3c4d"), "http://localhost:8080/td/1a2b3c4d");
        assert_eq!(repo.uri_for("http://other/td/x"), "http://other/td/x");
        repo.shutdown().await;
    }
}
