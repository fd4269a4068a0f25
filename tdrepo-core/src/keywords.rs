//! Keyword extraction for the free-text index.
//!
//! Terms come from two places in a Thing Description:
//! - **Literals**: string values are split into lowercase alphanumeric words
//! - **Labels**: object keys and IRI-valued strings contribute their local
//!   name (`saref:LightSwitch` and `http://ex.org/ns#LightSwitch` both yield
//!   `lightswitch`)
//!
//! JSON-LD keywords (`@context`, `@type`, ...) are not labels, but their
//! values are still visited.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{Error, Result};

/// Deepest nesting the extractor will walk
const MAX_DEPTH: usize = 64;

/// Derives normalized search terms from a parsed document
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    min_len: usize,
    max_terms: usize,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self {
            min_len: 2,
            max_terms: 4096,
        }
    }
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the keyword set of `doc`, sorted and without duplicates.
    ///
    /// Fails only on documents nested deeper than the walk allows; callers
    /// treat that as "no keywords".
    pub fn extract(&self, doc: &Value) -> Result<Vec<String>> {
        let mut terms = BTreeSet::new();
        self.walk(doc, 0, &mut terms)?;
        Ok(terms.into_iter().take(self.max_terms).collect())
    }

    fn walk(&self, value: &Value, depth: usize, terms: &mut BTreeSet<String>) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::Parse(format!(
                "document nested deeper than {} levels",
                MAX_DEPTH
            )));
        }

        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if !key.starts_with('@') {
                        self.add_label(key, terms);
                    }
                    self.walk(child, depth + 1, terms)?;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(item, depth + 1, terms)?;
                }
            }
            Value::String(text) => {
                if is_iri(text) {
                    self.add_label(text, terms);
                } else {
                    self.add_words(text, terms);
                }
            }
            Value::Number(_) | Value::Bool(_) | Value::Null => {}
        }
        Ok(())
    }

    fn add_label(&self, label: &str, terms: &mut BTreeSet<String>) {
        let term: String = local_name(label)
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if term.chars().count() >= self.min_len {
            terms.insert(term);
        }
    }

    fn add_words(&self, text: &str, terms: &mut BTreeSet<String>) {
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            if word.chars().count() >= self.min_len {
                terms.insert(word.to_lowercase());
            }
        }
    }
}

/// Absolute IRIs and compact `prefix:local` names, never free text
fn is_iri(text: &str) -> bool {
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        return false;
    }
    if text.contains("://") || text.starts_with("urn:") {
        return true;
    }
    match text.split_once(':') {
        Some((prefix, local)) => {
            !prefix.is_empty()
                && !local.is_empty()
                && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                && !prefix.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Part of an IRI after the last `#`, `/` or `:`
fn local_name(label: &str) -> &str {
    let trimmed = label.trim_end_matches(['/', '#']);
    match trimmed.rfind(['#', '/', ':']) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}
