//! Content-filter collaborator interface.
//!
//! The filter classifies MIME types and transforms payloads so that
//! untrusted fetched content is safe to hand to a browser. The engine never
//! inspects payload bytes itself; it only routes them through this trait
//! and reacts to the verdict.

use thiserror::Error;

use crate::key::ContentKey;
use crate::payload::Payload;

/// How the filter classifies a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeClass {
    /// Safe to serve without running a filter (e.g. plain images).
    Safe,
    /// A filter exists for this type and must run before serving.
    Filterable,
    /// No filter known; content of this type cannot be served safely.
    Unknown,
}

/// Errors the filter can report.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The payload was classified unsafe and must not be served.
    #[error("content rejected as unsafe: {0}")]
    Unsafe(String),

    /// Transient I/O failure while filtering. The caller may fall back to
    /// a fresh retrieval instead of surfacing this.
    #[error("I/O error during filtering: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifies and transforms payloads by MIME type.
///
/// Implementations must be cheap to call for `classify`; `filter` may do
/// real work. Both are synchronous, mirroring the instant-lookup contract
/// of the cache shortcut path they serve.
pub trait ContentFilter: Send + Sync {
    /// Classify a parameter-stripped MIME type.
    fn classify(&self, mime: &str) -> MimeClass;

    /// Filter the payload into a fresh buffer.
    ///
    /// `base` is the key the content was fetched under, used by filters
    /// that rewrite relative references.
    fn filter(
        &self,
        payload: &Payload,
        mime: &str,
        base: &ContentKey,
    ) -> Result<Payload, FilterError>;
}
