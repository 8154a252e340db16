//! Kind catalog.
//!
//! The catalog is populated once at startup and read-only afterwards. It is
//! consulted when block types are registered (every declared kind must exist) and
//! provides the compatibility rule used for all connection checks.

use indexmap::IndexMap;
use thiserror::Error;
use visionflow_types::{Kind, builtin_kinds, is_wildcard_kind};

/// Errors raised while populating the catalog.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KindError {
    #[error("kind '{name}' is already registered")]
    DuplicateKind { name: String },
}

/// Registry of named kinds, in registration order.
#[derive(Debug, Clone, Default)]
pub struct KindCatalog {
    kinds: IndexMap<String, Kind>,
}

impl KindCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the built-in kind set.
    pub fn with_builtin_kinds() -> Self {
        let mut catalog = Self::new();
        for kind in builtin_kinds() {
            // Built-in names are unique; a clash here would be a defect in the list.
            if let Err(error) = catalog.register(kind) {
                tracing::warn!(%error, "skipping duplicate built-in kind");
            }
        }
        catalog
    }

    /// Registers a kind. Fails when a kind with the same name already exists.
    pub fn register(&mut self, kind: Kind) -> Result<(), KindError> {
        if self.kinds.contains_key(&kind.name) {
            return Err(KindError::DuplicateKind { name: kind.name });
        }
        self.kinds.insert(kind.name.clone(), kind);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Kind> {
        self.kinds.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &Kind> {
        self.kinds.values()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn is_wildcard(&self, kind: &Kind) -> bool {
        kind.is_wildcard()
    }

    /// See [`kinds_compatible`].
    pub fn compatible<A, B>(&self, producer_kinds: &[A], consumer_kinds: &[B]) -> bool
    where
        A: AsRef<str>,
        B: AsRef<str>,
    {
        kinds_compatible(producer_kinds, consumer_kinds)
    }
}

/// Two kind sets are compatible when they intersect or either contains the wildcard kind.
pub fn kinds_compatible<A, B>(producer_kinds: &[A], consumer_kinds: &[B]) -> bool
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    if producer_kinds.iter().any(|kind| is_wildcard_kind(kind.as_ref()))
        || consumer_kinds.iter().any(|kind| is_wildcard_kind(kind.as_ref()))
    {
        return true;
    }
    producer_kinds
        .iter()
        .any(|produced| consumer_kinds.iter().any(|accepted| accepted.as_ref() == produced.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use visionflow_types::kind::{IMAGE_KIND, OBJECT_DETECTION_PREDICTION_KIND, STRING_KIND, WILDCARD_KIND};

    #[test]
    fn register_rejects_duplicates() {
        let mut catalog = KindCatalog::new();
        catalog.register(Kind::new("custom")).expect("first registration");
        let error = catalog.register(Kind::new("custom")).expect_err("duplicate");
        assert_eq!(error, KindError::DuplicateKind { name: "custom".into() });
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn builtin_catalog_contains_wildcard_first() {
        let catalog = KindCatalog::with_builtin_kinds();
        let first = catalog.kinds().next().expect("non-empty catalog");
        assert!(catalog.is_wildcard(first));
        assert!(catalog.contains(IMAGE_KIND));
    }

    #[test]
    fn compatibility_is_set_intersection() {
        assert!(kinds_compatible(&[IMAGE_KIND], &[STRING_KIND, IMAGE_KIND]));
        assert!(!kinds_compatible(&[IMAGE_KIND], &[STRING_KIND]));
        let empty: [&str; 0] = [];
        assert!(!kinds_compatible(&empty, &[STRING_KIND]));
    }

    #[test]
    fn compatibility_is_symmetric_and_wildcard_absorbs() {
        let sets: Vec<Vec<&str>> = vec![
            vec![],
            vec![IMAGE_KIND],
            vec![STRING_KIND, OBJECT_DETECTION_PREDICTION_KIND],
            vec![WILDCARD_KIND],
            vec![OBJECT_DETECTION_PREDICTION_KIND],
        ];
        for left in &sets {
            for right in &sets {
                let (left, right) = (left.as_slice(), right.as_slice());
                assert_eq!(kinds_compatible(left, right), kinds_compatible(right, left), "{left:?} vs {right:?}");
                if left.contains(&WILDCARD_KIND) || right.contains(&WILDCARD_KIND) {
                    assert!(kinds_compatible(left, right));
                }
            }
        }
    }
}
