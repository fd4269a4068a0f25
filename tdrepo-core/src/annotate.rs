//! Bookkeeping metadata attached to each registered document.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tdrepo_store::ThingMetadata;
use tracing::warn;

use crate::clock::Clock;
use crate::config::{DEFAULT_ENDPOINT, DEFAULT_LIFETIME_SECS};
use crate::error::{Error, Result};

/// Request parameter naming the registering endpoint
pub const END_POINT: &str = "ep";
/// Request parameter carrying the lifetime in seconds
pub const LIFE_TIME: &str = "lt";

/// Optional caller-supplied registration parameters, as raw strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterParams {
    pub endpoint: Option<String>,
    pub lifetime: Option<String>,
}

impl RegisterParams {
    /// Pick `ep` and `lt` out of transport-level parameters
    pub fn from_map(params: &HashMap<String, String>) -> Self {
        Self {
            endpoint: params.get(END_POINT).cloned(),
            lifetime: params.get(LIFE_TIME).cloned(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: impl Into<String>) -> Self {
        self.lifetime = Some(lifetime.into());
        self
    }
}

/// Parse a lifetime parameter: a positive number of seconds
pub fn parse_lifetime(raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        Ok(_) => Err(Error::Parse("lifetime must be positive".to_string())),
        Err(e) => Err(Error::Parse(format!("invalid lifetime '{}': {}", raw, e))),
    }
}

/// Computes created/modified/expiry timestamps and the endpoint
pub struct MetadataAnnotator {
    clock: Arc<dyn Clock>,
    default_lifetime_secs: u64,
    default_endpoint: String,
}

impl MetadataAnnotator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            default_lifetime_secs: DEFAULT_LIFETIME_SECS,
            default_endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_defaults(mut self, lifetime_secs: u64, endpoint: impl Into<String>) -> Self {
        self.default_lifetime_secs = lifetime_secs;
        self.default_endpoint = endpoint.into();
        self
    }

    /// Build the metadata for a document registered now.
    ///
    /// Never fails: an absent, empty or malformed `lt` falls back to the
    /// default lifetime, an absent or empty `ep` to the default endpoint.
    pub fn annotate(&self, params: &RegisterParams) -> ThingMetadata {
        // Millisecond precision, same as the store keeps
        let now = self.clock.now().trunc_subsecs(3);

        let endpoint = params
            .endpoint
            .as_deref()
            .filter(|ep| !ep.is_empty())
            .unwrap_or(&self.default_endpoint)
            .to_string();

        let lifetime = match params.lifetime.as_deref().filter(|lt| !lt.is_empty()) {
            Some(raw) => parse_lifetime(raw).unwrap_or_else(|e| {
                warn!("Ignoring lifetime parameter, using default: {}", e);
                self.default_lifetime_secs
            }),
            None => self.default_lifetime_secs,
        };

        let expires_at = expiry_after(now, lifetime)
            .or_else(|| expiry_after(now, self.default_lifetime_secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        ThingMetadata {
            endpoint,
            created_at: now,
            modified_at: now,
            expires_at,
        }
    }
}

fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn annotator() -> MetadataAnnotator {
        MetadataAnnotator::new(Arc::new(SystemClock))
    }

    #[test]
    fn test_defaults_when_absent() {
        let meta = annotator().annotate(&RegisterParams::default());
        assert_eq!(meta.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(meta.created_at, meta.modified_at);
        assert_eq!((meta.expires_at - meta.created_at).num_seconds(), 86_400);
    }

    #[test]
    fn test_caller_values() {
        let params = RegisterParams::default()
            .with_endpoint("http://gateway.local/")
            .with_lifetime("10");
        let meta = annotator().annotate(&params);
        assert_eq!(meta.endpoint, "http://gateway.local/");
        assert_eq!((meta.expires_at - meta.created_at).num_seconds(), 10);
    }

    #[test]
    fn test_malformed_lifetime_falls_back() {
        for raw in ["", "abc", "-5", "0", "1.5", "99999999999999999999999"] {
            let meta = annotator().annotate(&RegisterParams::default().with_lifetime(raw));
            assert_eq!(
                (meta.expires_at - meta.created_at).num_seconds(),
                86_400,
                "lifetime {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_unrepresentable_lifetime_falls_back() {
        let meta = annotator().annotate(&RegisterParams::default().with_lifetime(u64::MAX.to_string()));
        assert_eq!((meta.expires_at - meta.created_at).num_seconds(), 86_400);
    }

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert("ep".to_string(), "http://a/".to_string());
        map.insert("lt".to_string(), "30".to_string());
        map.insert("other".to_string(), "x".to_string());

        let params = RegisterParams::from_map(&map);
        assert_eq!(params.endpoint.as_deref(), Some("http://a/"));
        assert_eq!(params.lifetime.as_deref(), Some("30"));
    }

    #[test]
    fn test_parse_lifetime() {
        assert_eq!(parse_lifetime(" 60 ").unwrap(), 60);
        assert!(parse_lifetime("0").is_err());
    }
}
