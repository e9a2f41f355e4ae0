//! Plan facade
//!
//! The [`Plan`] owns the data, argset and analysis registries plus the
//! configuration, and exposes them as one API. Runs borrow the plan
//! immutably, so no registry can change while a run is in flight.

use crate::analysis::{AnalysisRegistry, BatchOptions, FnRef, ResolvedAnalysis};
use crate::argset::{Argset, ArgsetRegistry};
use crate::config::PlanConfig;
use crate::data::{DataRegistry, DataSnapshot, Loader};
use crate::engine::{Executor, RunResults};
use crate::error::Result;
use crate::hash::ContentHash;
use crate::table::{Fields, Table};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Registry counts for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Registered datasets
    pub datasets: usize,
    /// Datasets already materialized
    pub loaded: usize,
    /// Registered argsets
    pub argsets: usize,
    /// Registered analyses
    pub analyses: usize,
}

/// Top-level object owning all registries and driving execution
#[derive(Debug)]
pub struct Plan {
    config: PlanConfig,
    data: DataRegistry,
    argsets: ArgsetRegistry,
    analyses: AnalysisRegistry,
}

impl Plan {
    /// Create a plan with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PlanConfig::default())
    }

    /// Create a plan with the given configuration
    #[must_use]
    pub fn with_config(config: PlanConfig) -> Self {
        Self {
            data: DataRegistry::new(config.duplicate_policy),
            argsets: ArgsetRegistry::new(&config.argset_prefix, config.duplicate_policy),
            analyses: AnalysisRegistry::new(&config.analysis_prefix, config.duplicate_policy),
            config,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    // ---- data ----

    /// Register a dataset; see [`DataRegistry::add_data`]
    ///
    /// # Errors
    /// `DuplicateKey` or `InvalidInput`
    pub fn add_data(&mut self, name: &str, loader: Loader) -> Result<()> {
        self.data.add_data(name, loader)
    }

    /// Register a named loader function; see [`DataRegistry::register_loader`]
    ///
    /// # Errors
    /// `DuplicateKey`
    pub fn register_loader<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&DataRegistry, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.data.register_loader(name, f)
    }

    /// Get a dataset, loading it on first access
    ///
    /// # Errors
    /// See [`DataRegistry::get_data`]
    pub fn get_data(&self, name: &str) -> Result<Arc<Value>> {
        self.data.get_data(name)
    }

    /// Materialize every dataset
    ///
    /// # Errors
    /// See [`DataRegistry::get_all_data`]
    pub fn get_all_data(&self) -> Result<DataSnapshot> {
        self.data.get_all_data()
    }

    /// Recompute and remember a dataset's hash
    ///
    /// # Errors
    /// See [`DataRegistry::hash_data`]
    pub fn hash_data(&self, name: &str) -> Result<ContentHash> {
        self.data.hash_data(name)
    }

    /// Hash every dataset
    ///
    /// # Errors
    /// See [`DataRegistry::data_hashes`]
    pub fn data_hashes(&self) -> Result<IndexMap<String, ContentHash>> {
        self.data.data_hashes()
    }

    /// Remove a dataset
    pub fn remove_data(&mut self, name: &str) -> bool {
        self.data.remove_data(name)
    }

    /// Data registry
    #[inline]
    #[must_use]
    pub fn data(&self) -> &DataRegistry {
        &self.data
    }

    // ---- argsets ----

    /// Insert one argset; see [`ArgsetRegistry::add_argset`]
    ///
    /// # Errors
    /// `DuplicateKey` or `InvalidInput`
    pub fn add_argset(&mut self, name: Option<&str>, fields: Fields) -> Result<String> {
        self.argsets.add_argset(name, fields)
    }

    /// Insert one argset per table row
    ///
    /// # Errors
    /// See [`ArgsetRegistry::add_argset_from_list`]
    pub fn add_argset_from_table(&mut self, table: &Table, name_field: Option<&str>) -> Result<Vec<String>> {
        self.argsets.add_argset_from_table(table, name_field)
    }

    /// Insert one argset per record
    ///
    /// # Errors
    /// See [`ArgsetRegistry::add_argset_from_list`]
    pub fn add_argset_from_list<I>(&mut self, items: I, name_field: Option<&str>) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Fields>,
    {
        self.argsets.add_argset_from_list(items, name_field)
    }

    /// Look up an argset
    ///
    /// # Errors
    /// `NotFound`
    pub fn get_argset(&self, name: &str) -> Result<&Argset> {
        self.argsets.get_argset(name)
    }

    /// Rewrite every argset
    ///
    /// # Errors
    /// See [`ArgsetRegistry::apply_action_fn_to_all_argsets`]
    pub fn apply_action_fn_to_all_argsets<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(Argset) -> anyhow::Result<Argset>,
    {
        self.argsets.apply_action_fn_to_all_argsets(f)
    }

    /// Argset registry
    #[inline]
    #[must_use]
    pub fn argsets(&self) -> &ArgsetRegistry {
        &self.argsets
    }

    // ---- analyses ----

    /// Register a named analysis function
    ///
    /// # Errors
    /// `DuplicateKey`
    pub fn register_function<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&DataSnapshot, &Argset) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.analyses.register_function(name, f)
    }

    /// Register one analysis; see [`AnalysisRegistry::add_analysis`]
    ///
    /// # Errors
    /// `DuplicateKey` or `InvalidInput`
    pub fn add_analysis(&mut self, name: Option<&str>, function: impl Into<FnRef>, argset: Option<&str>) -> Result<String> {
        self.analyses.add_analysis(name, function.into(), argset)
    }

    /// Register one analysis per table row
    ///
    /// # Errors
    /// See [`AnalysisRegistry::add_analysis_from_list`]
    pub fn add_analysis_from_table(
        &mut self,
        function: impl Into<FnRef>,
        table: &Table,
        options: &BatchOptions,
    ) -> Result<Vec<String>> {
        self.analyses
            .add_analysis_from_table(&function.into(), table, options, &mut self.argsets)
    }

    /// Register one analysis per record
    ///
    /// # Errors
    /// See [`AnalysisRegistry::add_analysis_from_list`]
    pub fn add_analysis_from_list<I>(
        &mut self,
        function: impl Into<FnRef>,
        items: I,
        options: &BatchOptions,
    ) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Fields>,
    {
        self.analyses
            .add_analysis_from_list(&function.into(), items, options, &mut self.argsets)
    }

    /// Rebind every analysis to one function
    pub fn apply_analysis_fn_to_all(&mut self, function: impl Into<FnRef>) {
        self.analyses.apply_analysis_fn_to_all(&function.into());
    }

    /// Resolve an analysis without running it
    ///
    /// # Errors
    /// See [`AnalysisRegistry::get_analysis`]
    pub fn get_analysis(&self, name: &str) -> Result<ResolvedAnalysis> {
        self.analyses.get_analysis(name, &self.argsets)
    }

    /// Remove an analysis
    pub fn remove_analysis(&mut self, name: &str) -> bool {
        self.analyses.remove(name).is_some()
    }

    /// Analysis registry
    #[inline]
    #[must_use]
    pub fn analyses(&self) -> &AnalysisRegistry {
        &self.analyses
    }

    // ---- execution ----

    /// Executor over this plan's registries
    #[inline]
    #[must_use]
    pub fn executor(&self) -> Executor<'_> {
        Executor::new(&self.data, &self.argsets, &self.analyses, &self.config)
    }

    /// Run one analysis, propagating any failure
    ///
    /// # Errors
    /// See [`Executor::run_one`]
    pub fn run_one(&self, name: &str) -> Result<Value> {
        self.executor().run_one(name)
    }

    /// Run all analyses sequentially
    ///
    /// # Errors
    /// See [`Executor::run_all`]
    pub fn run_all(&self) -> Result<RunResults> {
        self.executor().run_all()
    }

    /// Run all analyses on a worker pool
    ///
    /// # Errors
    /// See [`Executor::run_all_parallel`]
    pub fn run_all_parallel(&self, workers: Option<usize>) -> Result<RunResults> {
        self.executor().run_all_parallel(workers)
    }

    // ---- lifecycle ----

    /// Registry counts
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            datasets: self.data.len(),
            loaded: self.data.names().iter().filter(|n| self.data.is_loaded(n)).count(),
            argsets: self.argsets.len(),
            analyses: self.analyses.len(),
        }
    }

    /// Clear every registry and cached dataset
    ///
    /// Loader and function tables survive; name synthesis restarts.
    pub fn reset(&mut self) {
        self.data.clear();
        self.argsets.clear();
        self.analyses.clear();
        tracing::debug!("plan reset");
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::error::PlanError;
    use crate::fields;
    use serde_json::json;

    fn sample_plan() -> Plan {
        let mut plan = Plan::new();
        plan.add_data("numbers", Loader::direct(json!([1, 2, 3, 4]))).unwrap();
        plan.register_function("sum_times", |data, argset| {
            let numbers: Vec<i64> = data.get_as("numbers")?;
            let k: i64 = argset.get_as("k")?;
            Ok(json!(numbers.iter().sum::<i64>() * k))
        })
        .unwrap();
        plan
    }

    #[test]
    fn end_to_end_named_function() {
        let mut plan = sample_plan();
        plan.add_argset(Some("double"), fields! {"k" => 2}).unwrap();
        plan.add_analysis(Some("double"), "sum_times", None).unwrap();
        assert_eq!(plan.run_one("double").unwrap(), json!(20));
    }

    #[test]
    fn analysis_from_list_then_run_all() {
        let mut plan = sample_plan();
        let names = plan
            .add_analysis_from_list(
                "sum_times",
                vec![fields! {"k" => 1}, fields! {"k" => 3}],
                &BatchOptions::new(),
            )
            .unwrap();
        let results = plan.run_all().unwrap();
        assert_eq!(results.value(&names[0]), Some(&json!(10)));
        assert_eq!(results.value(&names[1]), Some(&json!(30)));
    }

    #[test]
    fn analyses_may_precede_argsets() {
        let mut plan = sample_plan();
        plan.add_analysis(Some("late"), "sum_times", None).unwrap();
        assert!(matches!(
            plan.run_one("late"),
            Err(PlanError::UnresolvedReference { .. })
        ));
        plan.add_argset(Some("late"), fields! {"k" => 1}).unwrap();
        assert_eq!(plan.run_one("late").unwrap(), json!(10));
    }

    #[test]
    fn summary_tracks_loading() {
        let mut plan = sample_plan();
        plan.add_argset(None, fields! {"k" => 1}).unwrap();
        assert_eq!(plan.summary().loaded, 0);
        plan.get_all_data().unwrap();
        let summary = plan.summary();
        assert_eq!(summary.datasets, 1);
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.argsets, 1);
    }

    #[test]
    fn reset_discards_everything() {
        let mut plan = sample_plan();
        plan.add_argset(None, fields! {"k" => 1}).unwrap();
        plan.add_analysis(Some("a"), "sum_times", Some("argset_1")).unwrap();
        plan.reset();
        let summary = plan.summary();
        assert_eq!((summary.datasets, summary.argsets, summary.analyses), (0, 0, 0));
        assert_eq!(plan.add_argset(None, Fields::new()).unwrap(), "argset_1");
    }

    #[test]
    fn config_policy_reaches_registries() {
        let config = PlanConfig::new()
            .with_duplicate_policy(DuplicatePolicy::Overwrite)
            .with_argset_prefix("row_");
        let mut plan = Plan::with_config(config);
        assert_eq!(plan.add_argset(None, Fields::new()).unwrap(), "row_1");
        plan.add_data("d", Loader::direct(json!(1))).unwrap();
        assert!(plan.add_data("d", Loader::direct(json!(2))).is_ok());
    }

    #[test]
    fn attach_data_hash_to_argsets() {
        let mut plan = sample_plan();
        plan.add_argset(Some("a"), fields! {"k" => 1}).unwrap();
        let hash = plan.hash_data("numbers").unwrap().to_string();
        plan.apply_action_fn_to_all_argsets(|argset| Ok(argset.with_field("numbers_hash", json!(hash))))
            .unwrap();
        assert_eq!(
            plan.get_argset("a").unwrap().get("numbers_hash"),
            Some(&json!(hash))
        );
        assert_eq!(plan.data().value_hash("numbers").map(|h| h.to_string()), Some(hash));
    }
}
