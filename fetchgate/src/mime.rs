//! MIME type helpers.
//!
//! The engine treats MIME types as plain strings; the content-filter
//! collaborator decides what they mean. These helpers cover the two
//! normalizations the cache shortcut needs: falling back to a default type
//! for unlabelled content, and stripping parameters such as `charset=`
//! before classification.

/// MIME type assumed for content with no recorded type.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Strip MIME parameters, leaving only `type/subtype`.
///
/// ```
/// use fetchgate::mime::strip_params;
///
/// assert_eq!(strip_params("text/html; charset=utf-8"), "text/html");
/// assert_eq!(strip_params("image/png"), "image/png");
/// ```
pub fn strip_params(mime: &str) -> &str {
    mime.split(';').next().unwrap_or(mime).trim()
}

/// The effective MIME type for a stored or fetched copy: the recorded type,
/// or [`DEFAULT_MIME`] if nothing was recorded.
pub fn effective(mime: &str) -> &str {
    if mime.is_empty() {
        DEFAULT_MIME
    } else {
        mime
    }
}
