//! Dependency isolation
//!
//! Cookers read earlier results only through a [`DependencyView`] restricted
//! to the paths they declared. Declaring a dependency both schedules the
//! cooker after it and grants read access to its output; nothing else is
//! reachable, even if it already ran.

use crate::types::{CookedData, CookerPath};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Dependency query failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    /// The querying cooker did not declare this dependency
    #[error("{owner} did not declare a dependency on {requested}")]
    Undeclared {
        owner: CookerPath,
        requested: CookerPath,
    },

    /// Declared, but no result has been published
    #[error("no result available for {0}")]
    NotAvailable(CookerPath),

    /// Published result has a different type than requested
    #[error("result of {path} is not a {expected}")]
    TypeMismatch {
        path: CookerPath,
        expected: &'static str,
    },
}

#[derive(Default)]
struct StoreState {
    /// Outputs published by passes of the current run
    published: HashMap<CookerPath, CookedData>,
    /// Results supplied by the caller; survive across runs
    external: HashMap<CookerPath, CookedData>,
}

/// Cooked outputs of completed passes plus externally supplied results
///
/// Clones share the same storage. Only the session publishes into it.
/// Published outputs shadow external results of the same path.
#[derive(Clone, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<StoreState>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, path: CookerPath, data: CookedData) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .insert(path, data);
    }

    pub(crate) fn supply_external(&self, path: CookerPath, data: CookedData) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .external
            .insert(path, data);
    }

    /// Drop every pass-published output, keeping external results
    pub(crate) fn clear_published(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .clear();
    }

    pub fn get(&self, path: &CookerPath) -> Option<CookedData> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        state
            .published
            .get(path)
            .or_else(|| state.external.get(path))
            .cloned()
    }

    /// Typed lookup; `None` when missing or of another type
    pub fn get_as<T: Any + Send + Sync>(&self, path: &CookerPath) -> Option<Arc<T>> {
        self.get(path).and_then(|data| data.downcast::<T>().ok())
    }

    pub fn contains(&self, path: &CookerPath) -> bool {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        state.published.contains_key(path) || state.external.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Available paths, published and external, sorted
    pub fn paths(&self) -> Vec<CookerPath> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<CookerPath> = state
            .published
            .keys()
            .chain(state.external.keys())
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Read-only view of results restricted to one cooker's declared dependencies
pub struct DependencyView {
    owner: CookerPath,
    declared: BTreeSet<CookerPath>,
    store: ResultStore,
}

impl DependencyView {
    pub fn new(
        owner: CookerPath,
        declared: impl IntoIterator<Item = CookerPath>,
        store: ResultStore,
    ) -> Self {
        Self {
            owner,
            declared: declared.into_iter().collect(),
            store,
        }
    }

    /// View for a cooker with no dependencies
    pub fn empty(owner: CookerPath) -> Self {
        Self::new(owner, std::iter::empty(), ResultStore::new())
    }

    pub fn owner(&self) -> &CookerPath {
        &self.owner
    }

    pub fn declared(&self) -> impl Iterator<Item = &CookerPath> {
        self.declared.iter()
    }

    pub fn is_declared(&self, path: &CookerPath) -> bool {
        self.declared.contains(path)
    }

    /// Untyped query
    pub fn query_raw(&self, path: &CookerPath) -> Result<CookedData, DependencyError> {
        if !self.is_declared(path) {
            return Err(DependencyError::Undeclared {
                owner: self.owner.clone(),
                requested: path.clone(),
            });
        }
        self.store
            .get(path)
            .ok_or_else(|| DependencyError::NotAvailable(path.clone()))
    }

    /// Typed query
    pub fn query<T: Any + Send + Sync>(&self, path: &CookerPath) -> Result<Arc<T>, DependencyError> {
        self.query_raw(path)?
            .downcast::<T>()
            .map_err(|_| DependencyError::TypeMismatch {
                path: path.clone(),
                expected: std::any::type_name::<T>(),
            })
    }
}

impl std::fmt::Debug for DependencyView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyView")
            .field("owner", &self.owner)
            .field("declared", &self.declared)
            .finish()
    }
}
