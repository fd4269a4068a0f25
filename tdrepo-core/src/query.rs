//! Query routing: one request, exactly one query strategy.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tdrepo_store::DocumentStore;
use tracing::debug;

use crate::error::{Error, Result};

/// Parameter carrying a structured query
pub const QUERY: &str = "query";
/// Parameter carrying a free-text query
pub const TEXT: &str = "text";
/// Parameter carrying a type/value lookup
pub const RDF: &str = "rdf";

/// The query mode of a list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRequest {
    /// Expression in the store's structured query language
    Structured(String),
    /// Terms matched against the keyword index
    Text(String),
    /// Attribute lookup returning raw values
    TypeValue(String),
    /// Every stored document
    All,
}

impl QueryRequest {
    /// Choose the mode from transport parameters.
    ///
    /// Empty values count as absent. When several are present the first of
    /// `query`, `text`, `rdf` wins.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let present = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();

        if let Some(query) = present(QUERY) {
            Self::Structured(query)
        } else if let Some(text) = present(TEXT) {
            Self::Text(text)
        } else if let Some(expr) = present(RDF) {
            Self::TypeValue(expr)
        } else {
            Self::All
        }
    }
}

/// What a routed query produced
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Document URIs, to be assembled into a collection
    Documents(Vec<String>),
    /// Raw attribute values, returned as-is
    Values(Vec<Value>),
}

/// Dispatches a [`QueryRequest`] to the matching store query
#[derive(Clone)]
pub struct QueryRouter {
    store: Arc<dyn DocumentStore>,
}

impl QueryRouter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Run the single strategy selected by `request`.
    ///
    /// Any failure of a caller-supplied query is a `BadRequest`. Listing
    /// everything involves no caller input, so its failures stay store errors.
    pub fn route(&self, request: &QueryRequest) -> Result<RouteOutcome> {
        match request {
            QueryRequest::Structured(query) => {
                debug!("Routing structured query: {}", query);
                self.store
                    .query_structured(query)
                    .map(RouteOutcome::Documents)
                    .map_err(|e| Error::bad_request(e.to_string()))
            }
            QueryRequest::Text(terms) => {
                debug!("Routing text query: {}", terms);
                self.store
                    .query_text(terms)
                    .map(RouteOutcome::Documents)
                    .map_err(|e| Error::bad_request(e.to_string()))
            }
            QueryRequest::TypeValue(expr) => {
                debug!("Routing type/value lookup: {}", expr);
                self.store
                    .query_type_values(expr)
                    .map(RouteOutcome::Values)
                    .map_err(|e| Error::bad_request(e.to_string()))
            }
            QueryRequest::All => Ok(RouteOutcome::Documents(self.store.list_all()?)),
        }
    }
}
