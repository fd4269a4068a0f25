//! Document identifiers and resource URIs.

use uuid::Uuid;

/// Fresh 8-hex-digit identifier: the first group of a random UUID
pub fn generate_id() -> String {
    let id = Uuid::new_v4().to_string();
    match id.split_once('-') {
        Some((head, _)) => head.to_string(),
        None => id,
    }
}

/// `<base>/<id>`, with any non-http(s) scheme rewritten to `http`
pub fn resource_uri(base: &str, id: &str) -> String {
    let base = base.trim_end_matches('/');
    let normalized = match base.split_once("://") {
        Some((scheme, rest)) if scheme != "http" && scheme != "https" => {
            format!("http://{}", rest)
        }
        _ => base.to_string(),
    };
    format!("{}/{}", normalized, id)
}

/// Path part of a URI, used as the key inside collections
pub fn local_id(uri: &str) -> &str {
    let Some((_, rest)) = uri.split_once("://") else {
        return uri;
    };
    let path = match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "/",
    };
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Last path segment of a URI: the identifier the store assigned
pub fn short_id(uri: &str) -> &str {
    let path = local_id(uri);
    path.rsplit('/').next().unwrap_or(path)
}
