//! Version store - the single persisted "currently applied revision" marker

use crate::backend::{Backend, BackendError};
use crate::migration::revision::RevisionId;

/// Typed view over a backend's version-store primitives
pub struct VersionStore<'a> {
    backend: &'a dyn Backend,
}

impl<'a> VersionStore<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Create the store if absent; safe to call repeatedly
    pub fn init(&self) -> Result<(), BackendError> {
        self.backend.init_version_store()
    }

    /// The applied revision, or `None` at base
    pub fn current(&self) -> Result<Option<RevisionId>, BackendError> {
        match self.backend.read_version()? {
            None => Ok(None),
            Some(raw) => RevisionId::parse(raw.as_str()).map(Some).ok_or_else(|| {
                BackendError::CorruptVersionStore(format!("stored marker {raw:?} is not a revision id"))
            }),
        }
    }

    pub fn set(&self, revision: Option<&RevisionId>) -> Result<(), BackendError> {
        self.backend.write_version(revision.map(RevisionId::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_marker_round_trip() {
        let backend = MemoryBackend::new();
        let store = VersionStore::new(&backend);
        store.init().unwrap();
        assert_eq!(store.current().unwrap(), None);

        let id = RevisionId::from("ae1027a6acf0");
        store.set(Some(&id)).unwrap();
        assert_eq!(store.current().unwrap(), Some(id));

        store.set(None).unwrap();
        assert_eq!(store.current().unwrap(), None);
    }

    #[test]
    fn test_blank_marker_is_corrupt() {
        let backend = MemoryBackend::new();
        backend.init_version_store().unwrap();
        backend.write_version(Some("")).unwrap();
        assert!(matches!(
            VersionStore::new(&backend).current(),
            Err(BackendError::CorruptVersionStore(_))
        ));
    }
}
