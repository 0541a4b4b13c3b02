//! Bundle storage
//!
//! The certificate managers only need three calls from a store: read a
//! bundle by name, create one that must not exist yet, and update one that
//! has not changed since it was read. Updates carry the version observed at
//! read time; a store that sees a different current version rejects the
//! write with [`PkiError::Conflict`] and the caller re-runs the whole
//! operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::bundle::Bundle;
use crate::error::{PkiError, Result};

pub trait BundleStore {
    /// `Ok(None)` when no bundle with this name exists.
    fn get(&self, name: &str) -> Result<Option<Bundle>>;

    /// Persist a new bundle, returning it with its assigned version.
    fn create(&self, bundle: &Bundle) -> Result<Bundle>;

    /// Replace an existing bundle, returning it with its new version.
    fn update(&self, bundle: &Bundle) -> Result<Bundle>;
}

impl<S: BundleStore + ?Sized> BundleStore for &S {
    fn get(&self, name: &str) -> Result<Option<Bundle>> {
        (**self).get(name)
    }

    fn create(&self, bundle: &Bundle) -> Result<Bundle> {
        (**self).create(bundle)
    }

    fn update(&self, bundle: &Bundle) -> Result<Bundle> {
        (**self).update(bundle)
    }
}

/// In-process store with per-bundle versions.
#[derive(Default)]
pub struct MemoryStore {
    bundles: Mutex<HashMap<String, Bundle>>,
    next_version: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful create and update calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Overwrite a bundle without any version check, bumping its version.
    /// Stands in for another writer racing with the managers.
    pub fn put_unchecked(&self, bundle: Bundle) {
        let mut bundles = self.lock();
        let mut stored = bundle;
        stored.version = Some(self.bump());
        bundles.insert(stored.name.clone(), stored);
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) as u64 + 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bundle>> {
        match self.bundles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl BundleStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<Bundle>> {
        Ok(self.lock().get(name).cloned())
    }

    fn create(&self, bundle: &Bundle) -> Result<Bundle> {
        let mut bundles = self.lock();
        if bundles.contains_key(&bundle.name) {
            return Err(PkiError::AlreadyExists {
                name: bundle.name.clone(),
            });
        }
        let mut stored = bundle.clone();
        stored.version = Some(self.bump());
        bundles.insert(stored.name.clone(), stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    fn update(&self, bundle: &Bundle) -> Result<Bundle> {
        let mut bundles = self.lock();
        let current = bundles
            .get(&bundle.name)
            .ok_or_else(|| PkiError::store(&bundle.name, "bundle does not exist"))?;
        if current.version != bundle.version {
            return Err(PkiError::Conflict {
                name: bundle.name.clone(),
            });
        }
        let mut stored = bundle.clone();
        stored.version = Some(self.bump());
        bundles.insert(stored.name.clone(), stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(name: &str) -> Bundle {
        Bundle::new(name, b"ca".to_vec(), b"cert".to_vec(), b"key".to_vec())
    }

    #[test]
    fn create_then_get() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());

        let stored = store.create(&bundle("a")).unwrap();
        assert!(stored.version.is_some());
        assert_eq!(store.get("a").unwrap().unwrap(), stored);
        assert_eq!(store.writes(), 1);

        let err = store.create(&bundle("a")).unwrap_err();
        assert!(matches!(err, PkiError::AlreadyExists { .. }));
    }

    #[test]
    fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let stored = store.create(&bundle("a")).unwrap();

        let mut first = stored.clone();
        first.cert = b"first".to_vec();
        let updated = store.update(&first).unwrap();
        assert_ne!(updated.version, stored.version);

        let mut second = stored;
        second.cert = b"second".to_vec();
        assert!(store.update(&second).unwrap_err().is_conflict());
        assert_eq!(store.get("a").unwrap().unwrap().cert, b"first");
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn update_of_missing_bundle_fails() {
        let store = MemoryStore::new();
        let err = store.update(&bundle("ghost")).unwrap_err();
        assert!(matches!(err, PkiError::Store { .. }));
    }
}
