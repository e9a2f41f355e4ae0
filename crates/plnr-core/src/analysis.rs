//! Analysis registry
//!
//! An analysis binds one function reference to one argset by name. Both
//! references resolve lazily: functions against the registry's function
//! table, argsets against the [`ArgsetRegistry`] when the analysis is
//! inspected or run.

use crate::argset::{take_names, take_text, Argset, ArgsetRegistry};
use crate::config::DuplicatePolicy;
use crate::data::DataSnapshot;
use crate::error::{EntryKind, PlanError, Result};
use crate::naming::NameSequence;
use crate::table::{Fields, Table};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Analysis function: `(data, argset) -> result`
pub type AnalysisFn = Arc<dyn Fn(&DataSnapshot, &Argset) -> anyhow::Result<Value> + Send + Sync>;

/// Reference to an analysis function
#[derive(Clone)]
pub enum FnRef {
    /// Function registered by name in the function table
    Named(String),
    /// Inline function
    Function(AnalysisFn),
}

impl FnRef {
    /// Reference a function table entry
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Wrap an inline function
    #[inline]
    #[must_use]
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&DataSnapshot, &Argset) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }
}

impl From<&str> for FnRef {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl fmt::Debug for FnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// A registered analysis
#[derive(Debug, Clone)]
pub struct AnalysisEntry {
    name: String,
    function: FnRef,
    argset: String,
}

impl AnalysisEntry {
    /// Analysis name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound function reference
    #[inline]
    #[must_use]
    pub fn function(&self) -> &FnRef {
        &self.function
    }

    /// Name of the bound argset
    #[inline]
    #[must_use]
    pub fn argset(&self) -> &str {
        &self.argset
    }
}

/// An analysis with its function and argset resolved
#[derive(Clone)]
pub struct ResolvedAnalysis {
    /// Analysis name
    pub name: String,
    /// Resolved function
    pub function: AnalysisFn,
    /// Resolved argset
    pub argset: Argset,
}

impl ResolvedAnalysis {
    /// Call the function against a data snapshot
    ///
    /// # Errors
    /// Returns whatever the analysis function returns
    pub fn call(&self, data: &DataSnapshot) -> anyhow::Result<Value> {
        (self.function)(data, &self.argset)
    }
}

impl fmt::Debug for ResolvedAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedAnalysis")
            .field("name", &self.name)
            .field("argset", &self.argset)
            .finish_non_exhaustive()
    }
}

/// Column roles for batch analysis construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Column supplying each analysis name (synthesized when `None`)
    pub name_field: Option<String>,
    /// Column naming an existing argset to bind; when `None`, each row becomes
    /// a new argset named like its analysis
    pub argset_field: Option<String>,
}

impl BatchOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With name column
    #[inline]
    #[must_use]
    pub fn with_name_field(mut self, field: impl Into<String>) -> Self {
        self.name_field = Some(field.into());
        self
    }

    /// With argset column
    #[inline]
    #[must_use]
    pub fn with_argset_field(mut self, field: impl Into<String>) -> Self {
        self.argset_field = Some(field.into());
        self
    }
}

/// Registry of analyses, in registration order
pub struct AnalysisRegistry {
    entries: IndexMap<String, AnalysisEntry>,
    functions: HashMap<String, AnalysisFn>,
    names: NameSequence,
    policy: DuplicatePolicy,
}

impl AnalysisRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(prefix: &str, policy: DuplicatePolicy) -> Self {
        Self {
            entries: IndexMap::new(),
            functions: HashMap::new(),
            names: NameSequence::new(prefix),
            policy,
        }
    }

    /// Register an analysis function under a name usable by [`FnRef::Named`]
    ///
    /// # Errors
    /// Returns `DuplicateKey` if the name exists and the policy rejects duplicates
    pub fn register_function<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&DataSnapshot, &Argset) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        if self.policy == DuplicatePolicy::Reject && self.functions.contains_key(name) {
            return Err(PlanError::duplicate(EntryKind::Function, name));
        }
        self.functions.insert(name.to_string(), Arc::new(f));
        Ok(())
    }

    /// Register one analysis
    ///
    /// With no `argset`, the analysis binds to the argset carrying its own name.
    /// The argset is not required to exist yet.
    ///
    /// # Errors
    /// - `DuplicateKey` if the name exists and the policy rejects duplicates
    /// - `InvalidInput` if an explicit name is empty
    pub fn add_analysis(&mut self, name: Option<&str>, function: FnRef, argset: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => {
                self.check_insertable(name)?;
                name.to_string()
            }
            None => {
                let entries = &self.entries;
                self.names.next_free(|n| entries.contains_key(n))
            }
        };
        let argset = argset.unwrap_or(name.as_str()).to_string();
        self.insert(name.clone(), function, argset);
        Ok(name)
    }

    /// Register one analysis per record, in order
    ///
    /// Unless `options.argset_field` is set, each record is also inserted into
    /// `argsets` under the analysis name. The whole batch is validated before
    /// anything is inserted into either registry.
    ///
    /// # Errors
    /// - `InvalidInput` on missing/unusable/repeated name or argset columns
    /// - `DuplicateKey` on collisions with existing analyses or argsets
    pub fn add_analysis_from_list<I>(
        &mut self,
        function: &FnRef,
        items: I,
        options: &BatchOptions,
        argsets: &mut ArgsetRegistry,
    ) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Fields>,
    {
        let mut items: Vec<Fields> = items.into_iter().collect();
        let creates_argsets = options.argset_field.is_none();

        let bindings = match &options.argset_field {
            Some(field) => Some(
                items
                    .iter_mut()
                    .enumerate()
                    .map(|(row, item)| take_text(item, field, row))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        let mut sequence = self.names.clone();
        let names = match &options.name_field {
            Some(field) => take_names(&mut items, field)?,
            None => items
                .iter()
                .map(|_| {
                    sequence.next_free(|n| {
                        self.entries.contains_key(n) || (creates_argsets && argsets.contains(n))
                    })
                })
                .collect(),
        };

        for name in &names {
            self.check_insertable(name)?;
            if creates_argsets {
                argsets.check_insertable(name)?;
            }
        }

        self.names = sequence;
        let bindings = bindings.unwrap_or_else(|| names.clone());
        for ((name, argset), fields) in names.iter().zip(bindings).zip(items) {
            if creates_argsets {
                argsets.insert(name.clone(), fields);
            }
            self.insert(name.clone(), function.clone(), argset);
        }
        tracing::debug!(count = names.len(), creates_argsets, "added analyses from list");
        Ok(names)
    }

    /// Register one analysis per table row; see [`AnalysisRegistry::add_analysis_from_list`]
    ///
    /// # Errors
    /// Same as [`AnalysisRegistry::add_analysis_from_list`]
    pub fn add_analysis_from_table(
        &mut self,
        function: &FnRef,
        table: &Table,
        options: &BatchOptions,
        argsets: &mut ArgsetRegistry,
    ) -> Result<Vec<String>> {
        self.add_analysis_from_list(function, table.records()?, options, argsets)
    }

    /// Rebind every analysis to `function`
    pub fn apply_analysis_fn_to_all(&mut self, function: &FnRef) {
        for entry in self.entries.values_mut() {
            entry.function = function.clone();
        }
        tracing::debug!(count = self.entries.len(), function = ?function, "rebound analysis functions");
    }

    /// Registered entry, unresolved
    ///
    /// # Errors
    /// Returns `NotFound` if absent
    pub fn entry(&self, name: &str) -> Result<&AnalysisEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| PlanError::not_found(EntryKind::Analysis, name))
    }

    /// Resolve an analysis for inspection
    ///
    /// # Errors
    /// - `NotFound` if the analysis or its argset is missing
    /// - `UnresolvedReference` if a named function is not in the function table
    pub fn get_analysis(&self, name: &str, argsets: &ArgsetRegistry) -> Result<ResolvedAnalysis> {
        let entry = self.entry(name)?;
        let argset = argsets.get_argset(&entry.argset)?;
        self.resolve_entry(entry, argset)
    }

    /// Resolve an analysis for execution
    ///
    /// # Errors
    /// - `NotFound` if the analysis is missing
    /// - `UnresolvedReference` if its argset or named function is missing
    pub fn resolve(&self, name: &str, argsets: &ArgsetRegistry) -> Result<ResolvedAnalysis> {
        let entry = self.entry(name)?;
        let argset = argsets
            .get_argset(&entry.argset)
            .map_err(|_| PlanError::unresolved(name, EntryKind::Argset, entry.argset.as_str()))?;
        self.resolve_entry(entry, argset)
    }

    fn resolve_entry(&self, entry: &AnalysisEntry, argset: &Argset) -> Result<ResolvedAnalysis> {
        let function = match &entry.function {
            FnRef::Function(f) => Arc::clone(f),
            FnRef::Named(fn_name) => self
                .functions
                .get(fn_name)
                .cloned()
                .ok_or_else(|| PlanError::unresolved(entry.name.as_str(), EntryKind::Function, fn_name.as_str()))?,
        };
        Ok(ResolvedAnalysis {
            name: entry.name.clone(),
            function,
            argset: argset.clone(),
        })
    }

    /// Check if an analysis exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Remove an analysis
    pub fn remove(&mut self, name: &str) -> Option<AnalysisEntry> {
        self.entries.shift_remove(name)
    }

    /// Names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Iterate over entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &AnalysisEntry> {
        self.entries.values()
    }

    /// Number of analyses
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

    /// Remove all analyses and restart name synthesis (function table is kept)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.names.reset();
    }

    fn check_insertable(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(PlanError::InvalidInput("analysis name must not be empty".to_string()));
        }
        if self.policy == DuplicatePolicy::Reject && self.entries.contains_key(name) {
            return Err(PlanError::duplicate(EntryKind::Analysis, name));
        }
        Ok(())
    }

    fn insert(&mut self, name: String, function: FnRef, argset: String) {
        tracing::debug!(analysis = %name, argset = %argset, function = ?function, "registered analysis");
        let entry = AnalysisEntry {
            name: name.clone(),
            function,
            argset,
        };
        self.entries.insert(name, entry);
    }
}

impl Default for AnalysisRegistry {
    fn default() -> Self {
        Self::new("analysis_", DuplicatePolicy::Reject)
    }
}

impl fmt::Debug for AnalysisRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRegistry")
            .field("entries", &self.entries)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}
