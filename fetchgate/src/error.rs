//! Fetch error taxonomy.
//!
//! Every terminal failure a caller can observe is a `FetchError`. Variants
//! carry owned strings rather than source errors so that snapshots of a
//! failed fetch stay `Clone` and can be handed to any number of observers.

use thiserror::Error;

/// Terminal failure of a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The content is larger than the caller's size cap.
    #[error("content too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Reported or actual content size.
        size: u64,
        /// The caller's size cap.
        max: u64,
    },

    /// The MIME type is unknown or has no filter, so the content cannot be
    /// served safely.
    #[error("unknown or unfilterable MIME type: {0}")]
    UnknownMime(String),

    /// The content filter classified the payload as unsafe.
    #[error("content classified unsafe: {0}")]
    UnsafeContent(String),

    /// The retrieval subsystem reported a failure.
    #[error("retrieval failed: {reason}")]
    Retrieval {
        /// Human-readable failure reason from the retrieval subsystem.
        reason: String,
        /// Whether retrying the same request can ever succeed.
        fatal: bool,
    },

    /// The fetch was cancelled before a payload could be stored.
    #[error("fetch cancelled")]
    Cancelled,

    /// An unanticipated collaborator error, converted so it cannot wedge a
    /// waiting caller forever.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FetchError {
    /// A transient retrieval failure.
    pub fn retrieval(reason: impl Into<String>) -> Self {
        Self::Retrieval {
            reason: reason.into(),
            fatal: false,
        }
    }

    /// A retrieval failure that retrying cannot fix.
    pub fn retrieval_fatal(reason: impl Into<String>) -> Self {
        Self::Retrieval {
            reason: reason.into(),
            fatal: true,
        }
    }

    /// Whether retrying the same request is pointless.
    ///
    /// Size-cap, MIME, and filter rejections are properties of the content
    /// itself; only transient retrieval failures and cancellations leave
    /// room for a retry to succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::TooLarge { .. } => true,
            Self::UnknownMime(_) => true,
            Self::UnsafeContent(_) => true,
            Self::Retrieval { fatal, .. } => *fatal,
            Self::Cancelled => false,
            Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = FetchError::TooLarge {
            size: 2048,
            max: 1024,
        };
        let text = err.to_string();
        assert!(text.contains("2048"));
        assert!(text.contains("1024"));

        let err = FetchError::UnknownMime("application/x-thing".to_string());
        assert!(err.to_string().contains("application/x-thing"));
    }

    #[test]
    fn test_fatality() {
        assert!(FetchError::TooLarge { size: 1, max: 0 }.is_fatal());
        assert!(FetchError::UnknownMime(String::new()).is_fatal());
        assert!(FetchError::UnsafeContent(String::new()).is_fatal());
        assert!(FetchError::retrieval_fatal("data not found").is_fatal());
        assert!(!FetchError::retrieval("timed out").is_fatal());
        assert!(!FetchError::Cancelled.is_fatal());
        assert!(!FetchError::Internal("oops".to_string()).is_fatal());
    }

    #[test]
    fn test_clone_and_compare() {
        let err = FetchError::retrieval("route not found");
        let copy = err.clone();
        assert_eq!(err, copy);
        assert_ne!(err, FetchError::retrieval_fatal("route not found"));
    }
}
