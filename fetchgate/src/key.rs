//! Content key types.
//!
//! Provides the `ContentKey` type that identifies a piece of retrievable
//! content. A key is either immutable (its routing string alone identifies
//! the data forever) or versioned, in which case it may carry an *edition*:
//! a monotonically increasing version number of the mutable content behind
//! the key. A versioned key without an edition means "whatever is newest".

use std::fmt;

/// Identity of a piece of retrievable content.
///
/// Keys are immutable once constructed. Two keys are equal only if their
/// routing string, versioned-ness, and requested edition all match, so a
/// request for edition 4 of a key never coalesces with a request for
/// edition 5.
///
/// # Example
///
/// ```
/// use fetchgate::key::ContentKey;
///
/// let page = ContentKey::immutable("CHK@a51f...");
/// assert!(!page.is_versioned());
///
/// let site = ContentKey::versioned("USK@b7e2...", Some(12));
/// assert_eq!(site.edition(), Some(12));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    /// Opaque routing identity understood by the retrieval subsystem.
    routing: String,
    /// Whether this key class carries editions at all.
    versioned: bool,
    /// Requested edition, if any. Always `None` for unversioned keys.
    edition: Option<u64>,
}

impl ContentKey {
    /// Create an immutable (unversioned) key.
    pub fn immutable(routing: impl Into<String>) -> Self {
        Self {
            routing: routing.into(),
            versioned: false,
            edition: None,
        }
    }

    /// Create a versioned key, optionally pinned to a specific edition.
    ///
    /// `None` means "no edition preference": the caller wants the newest
    /// edition the network can produce, which rules out serving stale
    /// local copies.
    pub fn versioned(routing: impl Into<String>, edition: Option<u64>) -> Self {
        Self {
            routing: routing.into(),
            versioned: true,
            edition,
        }
    }

    /// The routing identity, without edition.
    pub fn routing(&self) -> &str {
        &self.routing
    }

    /// Whether this key class carries editions.
    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    /// The requested edition, if any.
    pub fn edition(&self) -> Option<u64> {
        self.edition
    }

    /// A copy of this key pinned to the given edition.
    pub fn with_edition(&self, edition: u64) -> Self {
        Self {
            routing: self.routing.clone(),
            versioned: true,
            edition: Some(edition),
        }
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.edition {
            Some(edition) => write!(f, "{}/{}", self.routing, edition),
            None => write!(f, "{}", self.routing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable_key() {
        let key = ContentKey::immutable("CHK@abc");
        assert_eq!(key.routing(), "CHK@abc");
        assert!(!key.is_versioned());
        assert_eq!(key.edition(), None);
    }

    #[test]
    fn test_versioned_key_with_edition() {
        let key = ContentKey::versioned("USK@site", Some(7));
        assert!(key.is_versioned());
        assert_eq!(key.edition(), Some(7));
    }

    #[test]
    fn test_versioned_key_without_preference() {
        let key = ContentKey::versioned("USK@site", None);
        assert!(key.is_versioned());
        assert_eq!(key.edition(), None);
    }

    #[test]
    fn test_editions_do_not_coalesce() {
        let a = ContentKey::versioned("USK@site", Some(4));
        let b = ContentKey::versioned("USK@site", Some(5));
        assert_ne!(a, b);
        assert_eq!(a, b.with_edition(4));
    }

    #[test]
    fn test_hash_distinguishes_editions() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(ContentKey::versioned("USK@site", Some(1)));
        set.insert(ContentKey::versioned("USK@site", Some(1)));
        set.insert(ContentKey::versioned("USK@site", Some(2)));
        set.insert(ContentKey::versioned("USK@site", None));

        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_display() {
        let plain = ContentKey::immutable("CHK@abc");
        assert_eq!(plain.to_string(), "CHK@abc");

        let pinned = ContentKey::versioned("USK@site", Some(12));
        assert_eq!(pinned.to_string(), "USK@site/12");
    }
}
