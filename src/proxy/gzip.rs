//! Response compression gated on Content-Type.
//!
//! Wraps the data plane in tower-http's gzip encoder, compressing only
//! responses whose Content-Type matches the configured pattern. Client
//! Accept-Encoding negotiation is handled by the layer itself.

use std::sync::Arc;

use regex::Regex;
use tower_http::compression::predicate::Predicate;
use tower_http::compression::CompressionLayer;

/// Compress when the response Content-Type matches the configured
/// regex.
#[derive(Clone)]
pub struct ContentTypeMatch {
    pattern: Arc<Regex>,
}

impl Predicate for ContentTypeMatch {
    fn should_compress<B: http_body::Body>(&self, response: &http::Response<B>) -> bool {
        response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| self.pattern.is_match(ct))
    }
}

/// Build the compression layer for a non-empty `gzip_content_types`
/// pattern. The pattern is validated at config load.
pub fn layer(pattern: &str) -> Option<CompressionLayer<ContentTypeMatch>> {
    if pattern.is_empty() {
        return None;
    }
    let pattern = Arc::new(Regex::new(pattern).ok()?);
    Some(
        CompressionLayer::new()
            .gzip(true)
            .compress_when(ContentTypeMatch { pattern }),
    )
}
