//! Data registry
//!
//! Named, lazily loaded datasets. Each entry is materialized at most once by
//! its [`Loader`] and cached; [`DataRegistry::get_all_data`] produces the
//! read-only [`DataSnapshot`] handed to every analysis call.
//!
//! # Load states
//!
//! `Unloaded -> Loading -> Loaded`. `Loading` records the thread running the
//! loader. A loader that (directly or through other loaders) asks for the
//! dataset it is producing gets [`PlanError::CyclicLoad`]; any other thread
//! blocks until the load settles. A failed or panicking loader leaves the
//! entry `Unloaded`, and a waiting thread then retries the load itself.

use crate::config::DuplicatePolicy;
use crate::error::{EntryKind, PlanError, Result};
use crate::hash::ContentHash;
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Loader function: receives the registry (for inter-dataset composition)
/// and the extra arguments bound at registration
pub type LoaderFn = Arc<dyn Fn(&DataRegistry, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// How a dataset is produced
#[derive(Clone)]
pub enum Loader {
    /// Literal value, returned unchanged
    Direct(Value),
    /// Loader registered by name in the loader table
    Named {
        /// Loader table key
        function: String,
        /// Extra arguments passed after the registry
        args: Vec<Value>,
    },
    /// Inline loader function
    Function(LoaderFn),
}

impl Loader {
    /// Literal value loader
    #[inline]
    #[must_use]
    pub fn direct(value: Value) -> Self {
        Self::Direct(value)
    }

    /// Named loader with no extra arguments
    #[inline]
    #[must_use]
    pub fn named(function: impl Into<String>) -> Self {
        Self::Named {
            function: function.into(),
            args: Vec::new(),
        }
    }

    /// Named loader with extra arguments
    #[inline]
    #[must_use]
    pub fn named_with_args(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Named {
            function: function.into(),
            args,
        }
    }

    /// Inline loader function
    #[inline]
    #[must_use]
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&DataRegistry, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(v) => f.debug_tuple("Direct").field(v).finish(),
            Self::Named { function, args } => f
                .debug_struct("Named")
                .field("function", function)
                .field("args", args)
                .finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[derive(Debug, Clone)]
enum LoadState {
    Unloaded,
    Loading(ThreadId),
    Loaded(Arc<Value>),
}

#[derive(Debug)]
struct DataEntry {
    loader: Loader,
    state: Mutex<LoadState>,
    settled: Condvar,
    value_hash: Mutex<Option<ContentHash>>,
}

impl DataEntry {
    fn new(loader: Loader) -> Self {
        Self {
            loader,
            state: Mutex::new(LoadState::Unloaded),
            settled: Condvar::new(),
            value_hash: Mutex::new(None),
        }
    }
}

/// Resets an entry to `Unloaded` unless the load completed
struct LoadingGuard<'a> {
    entry: &'a DataEntry,
    done: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            *self.entry.state.lock() = LoadState::Unloaded;
            self.entry.settled.notify_all();
        }
    }
}

/// Registry of named datasets
pub struct DataRegistry {
    entries: IndexMap<String, DataEntry>,
    loaders: HashMap<String, LoaderFn>,
    policy: DuplicatePolicy,
}

impl DataRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: IndexMap::new(),
            loaders: HashMap::new(),
            policy,
        }
    }

    /// Register a named dataset
    ///
    /// # Errors
    /// - `InvalidInput` if the name is empty
    /// - `DuplicateKey` if the name exists and the policy rejects duplicates
    pub fn add_data(&mut self, name: &str, loader: Loader) -> Result<()> {
        if name.is_empty() {
            return Err(PlanError::InvalidInput("data name must not be empty".to_string()));
        }
        if self.policy == DuplicatePolicy::Reject && self.entries.contains_key(name) {
            return Err(PlanError::duplicate(EntryKind::Data, name));
        }
        tracing::debug!(data = name, loader = ?loader, "registered data");
        self.entries.insert(name.to_string(), DataEntry::new(loader));
        Ok(())
    }

    /// Register a loader function under a name usable by [`Loader::Named`]
    ///
    /// # Errors
    /// Returns `DuplicateKey` if the name exists and the policy rejects duplicates
    pub fn register_loader<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&DataRegistry, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        if self.policy == DuplicatePolicy::Reject && self.loaders.contains_key(name) {
            return Err(PlanError::duplicate(EntryKind::Loader, name));
        }
        self.loaders.insert(name.to_string(), Arc::new(f));
        Ok(())
    }

    /// Get a dataset, loading it on first access
    ///
    /// # Errors
    /// - `NotFound` if the name is not registered
    /// - `CyclicLoad` if called from within the dataset's own loader
    ///
    /// Blocks while another thread is loading the same dataset.
    /// - `UnresolvedReference` if a named loader is not in the loader table
    /// - `LoaderFailed` if the loader returns an error
    pub fn get_data(&self, name: &str) -> Result<Arc<Value>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| PlanError::not_found(EntryKind::Data, name))?;

        let me = thread::current().id();
        {
            let mut state = entry.state.lock();
            loop {
                match &*state {
                    LoadState::Loaded(value) => return Ok(Arc::clone(value)),
                    LoadState::Loading(owner) if *owner == me => {
                        return Err(PlanError::CyclicLoad {
                            name: name.to_string(),
                        })
                    }
                    LoadState::Loading(_) => {}
                    LoadState::Unloaded => break,
                }
                entry.settled.wait(&mut state);
            }
            *state = LoadState::Loading(me);
        }

        let mut guard = LoadingGuard { entry, done: false };
        let started = Instant::now();
        let value = Arc::new(self.invoke(name, &entry.loader)?);
        *entry.state.lock() = LoadState::Loaded(Arc::clone(&value));
        guard.done = true;
        entry.settled.notify_all();

        tracing::debug!(
            data = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded data"
        );
        Ok(value)
    }

    /// Materialize every dataset and return the snapshot, in registration order
    ///
    /// # Errors
    /// Returns the first load error encountered
    pub fn get_all_data(&self) -> Result<DataSnapshot> {
        let mut values = IndexMap::with_capacity(self.entries.len());
        for name in self.entries.keys() {
            values.insert(name.clone(), self.get_data(name)?);
        }
        Ok(DataSnapshot { values })
    }

    /// Recompute the hash of a dataset (loading it if needed) and remember it
    ///
    /// # Errors
    /// Same as [`DataRegistry::get_data`]
    pub fn hash_data(&self, name: &str) -> Result<ContentHash> {
        let value = self.get_data(name)?;
        let hash = ContentHash::of_value(&value);
        if let Some(entry) = self.entries.get(name) {
            *entry.value_hash.lock() = Some(hash);
        }
        Ok(hash)
    }

    /// Hash every dataset, in registration order
    ///
    /// # Errors
    /// Returns the first load error encountered
    pub fn data_hashes(&self) -> Result<IndexMap<String, ContentHash>> {
        self.entries
            .keys()
            .map(|name| Ok((name.clone(), self.hash_data(name)?)))
            .collect()
    }

    /// Last computed hash of a dataset, without recomputing
    #[must_use]
    pub fn value_hash(&self, name: &str) -> Option<ContentHash> {
        self.entries.get(name).and_then(|e| *e.value_hash.lock())
    }

    /// Check if a dataset has been materialized
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| matches!(*e.state.lock(), LoadState::Loaded(_)))
    }

    /// Check if a dataset is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Number of datasets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a dataset and its cached value
    pub fn remove_data(&mut self, name: &str) -> bool {
        self.entries.shift_remove(name).is_some()
    }

    /// Drop every cached value; loaders run again on next access
    pub fn unload_all(&mut self) {
        for entry in self.entries.values_mut() {
            *entry.state.get_mut() = LoadState::Unloaded;
            *entry.value_hash.get_mut() = None;
        }
    }

    /// Remove all datasets (loader table is kept)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn invoke(&self, name: &str, loader: &Loader) -> Result<Value> {
        let (f, args) = match loader {
            Loader::Direct(value) => return Ok(value.clone()),
            Loader::Named { function, args } => {
                let f = self
                    .loaders
                    .get(function)
                    .ok_or_else(|| PlanError::unresolved(name, EntryKind::Loader, function.as_str()))?;
                (f, args.as_slice())
            }
            Loader::Function(f) => (f, &[][..]),
        };
        f(self, args).map_err(|source| PlanError::LoaderFailed {
            name: name.to_string(),
            source,
        })
    }
}

impl Default for DataRegistry {
    fn default() -> Self {
        Self::new(DuplicatePolicy::Reject)
    }
}

impl fmt::Debug for DataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRegistry")
            .field("entries", &self.entries)
            .field("loaders", &self.loaders.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Read-only view of every loaded dataset, shared by all analyses of a run
#[derive(Debug, Clone, Default)]
pub struct DataSnapshot {
    values: IndexMap<String, Arc<Value>>,
}

impl DataSnapshot {
    /// Get a dataset
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).map(|v| v.as_ref())
    }

    /// Get a dataset, falling back to `default` when absent
    #[inline]
    #[must_use]
    pub fn get_or<'a>(&'a self, name: &str, default: &'a Value) -> &'a Value {
        self.get(name).unwrap_or(default)
    }

    /// Get a dataset or fail with `NotFound`
    ///
    /// # Errors
    /// Returns `NotFound` if absent
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| PlanError::not_found(EntryKind::Data, name))
    }

    /// Get a dataset deserialized as `T`
    ///
    /// # Errors
    /// Returns `NotFound` if absent, `InvalidInput` on shape mismatch
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.require(name)?;
        serde_json::from_value(value.clone())
            .map_err(|e| PlanError::InvalidInput(format!("data '{name}': {e}")))
    }

    /// Shared handle to a dataset
    #[inline]
    #[must_use]
    pub fn get_shared(&self, name: &str) -> Option<Arc<Value>> {
        self.values.get(name).cloned()
    }

    /// Dataset names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Number of datasets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if snapshot is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
