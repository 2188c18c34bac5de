//! Fetch options and coalescing equivalence.
//!
//! `FetchOptions` carries everything a caller can vary about a fetch: the
//! size cap, MIME/charset overrides, whether content filtering applies, and
//! the retry budget. Two option sets are *equivalent* for coalescing
//! purposes when they would produce byte-identical results — the retry
//! budget does not affect the result, everything else does.

/// Default size cap for a fetch: 32 MiB.
pub const DEFAULT_MAX_SIZE: u64 = 32 * 1024 * 1024;

/// What to do when the cache holds a copy that was already filtered and the
/// caller wants filtered data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefilterPolicy {
    /// Run the filter again over the stored copy into a fresh buffer.
    /// Catches filter improvements since the copy was downloaded.
    #[default]
    Refilter,
    /// Accept the stored copy as-is. Only as safe as the filter was when
    /// the copy was originally downloaded.
    AcceptOld,
    /// Never serve a previously filtered copy; fetch again.
    RefetchAlways,
}

/// Immutable per-request fetch options.
///
/// # Example
///
/// ```
/// use fetchgate::options::FetchOptions;
///
/// let options = FetchOptions::new(16 * 1024 * 1024)
///     .with_mime_override("text/plain")
///     .with_filtering(false);
/// assert_eq!(options.max_size, 16 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Maximum payload size the caller will accept, in bytes.
    pub max_size: u64,
    /// Serve the content as this MIME type instead of the recorded one.
    pub mime_override: Option<String>,
    /// Charset the caller insists on, if any.
    pub charset_override: Option<String>,
    /// Whether the content filter must run over the payload.
    pub filter_data: bool,
    /// Retry budget handed to the retrieval subsystem.
    pub max_retries: u32,
}

impl FetchOptions {
    /// Options with the given size cap and filtering enabled.
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            mime_override: None,
            charset_override: None,
            filter_data: true,
            max_retries: 0,
        }
    }

    /// Set a MIME override.
    pub fn with_mime_override(mut self, mime: impl Into<String>) -> Self {
        self.mime_override = Some(mime.into());
        self
    }

    /// Set a charset override.
    pub fn with_charset_override(mut self, charset: impl Into<String>) -> Self {
        self.charset_override = Some(charset.into());
        self
    }

    /// Enable or disable content filtering.
    pub fn with_filtering(mut self, filter_data: bool) -> Self {
        self.filter_data = filter_data;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether a fetch started with `other` can serve this request.
    ///
    /// Equivalent iff filtering flag, size cap, charset, and MIME override
    /// all match. The retry budget is deliberately excluded: it changes how
    /// hard the retrieval tries, not what it produces.
    pub fn coalesce_equivalent(&self, other: &Self) -> bool {
        self.filter_data == other.filter_data
            && self.max_size == other.max_size
            && self.charset_override == other.charset_override
            && self.mime_override == other.mime_override
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let options = FetchOptions::default();
        assert_eq!(options.max_size, DEFAULT_MAX_SIZE);
        assert!(options.filter_data);
        assert_eq!(options.mime_override, None);
        assert_eq!(options.max_retries, 0);
    }

    #[test]
    fn test_builders() {
        let options = FetchOptions::new(1024)
            .with_mime_override("text/html")
            .with_charset_override("utf-8")
            .with_filtering(false)
            .with_max_retries(3);
        assert_eq!(options.max_size, 1024);
        assert_eq!(options.mime_override.as_deref(), Some("text/html"));
        assert_eq!(options.charset_override.as_deref(), Some("utf-8"));
        assert!(!options.filter_data);
        assert_eq!(options.max_retries, 3);
    }

    #[test]
    fn test_equivalence_ignores_retries() {
        let a = FetchOptions::new(1024).with_max_retries(0);
        let b = FetchOptions::new(1024).with_max_retries(9);
        assert!(a.coalesce_equivalent(&b));
    }

    #[test]
    fn test_equivalence_respects_everything_else() {
        let base = FetchOptions::new(1024);
        assert!(!base.coalesce_equivalent(&FetchOptions::new(2048)));
        assert!(!base.coalesce_equivalent(&base.clone().with_filtering(false)));
        assert!(!base.coalesce_equivalent(&base.clone().with_mime_override("text/css")));
        assert!(!base.coalesce_equivalent(&base.clone().with_charset_override("latin1")));
    }

    #[test]
    fn test_refilter_policy_default() {
        assert_eq!(RefilterPolicy::default(), RefilterPolicy::Refilter);
    }

    fn arb_options() -> impl Strategy<Value = FetchOptions> {
        (
            1u64..1 << 40,
            proptest::option::of("[a-z]{2,8}/[a-z]{2,8}"),
            proptest::option::of("[a-z0-9-]{2,8}"),
            any::<bool>(),
            0u32..16,
        )
            .prop_map(|(max_size, mime, charset, filter_data, max_retries)| {
                let mut options = FetchOptions::new(max_size)
                    .with_filtering(filter_data)
                    .with_max_retries(max_retries);
                if let Some(mime) = mime {
                    options = options.with_mime_override(mime);
                }
                if let Some(charset) = charset {
                    options = options.with_charset_override(charset);
                }
                options
            })
    }

    proptest! {
        #[test]
        fn prop_equivalence_is_reflexive_and_symmetric(a in arb_options(), b in arb_options()) {
            prop_assert!(a.coalesce_equivalent(&a));
            prop_assert_eq!(a.coalesce_equivalent(&b), b.coalesce_equivalent(&a));
        }

        #[test]
        fn prop_retry_budget_never_splits_equivalence(a in arb_options(), retries in 0u32..64) {
            let b = a.clone().with_max_retries(retries);
            prop_assert!(a.coalesce_equivalent(&b));
        }
    }
}
