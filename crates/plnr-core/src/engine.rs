//! Execution engine
//!
//! Binds each analysis to its function, its argset and the full data
//! snapshot, then runs one, all, or all in parallel.
//!
//! # Failure containment
//!
//! - [`Executor::run_one`] propagates every error to the caller.
//! - [`Executor::run_all`] and [`Executor::run_all_parallel`] route every
//!   analysis through the same isolating call: resolution errors, returned
//!   errors and panics become `Err` outcomes in [`RunResults`]; the batch
//!   never aborts because of one analysis.

use crate::analysis::{AnalysisRegistry, ResolvedAnalysis};
use crate::argset::ArgsetRegistry;
use crate::config::PlanConfig;
use crate::data::{DataRegistry, DataSnapshot};
use crate::error::{PlanError, Result};
use crossbeam::channel;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of running one analysis
pub type Outcome = Result<Value, PlanError>;

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Not started
    #[default]
    Idle,
    /// Analyses executing
    Running,
    /// Every analysis has an outcome
    Completed,
}

impl RunState {
    /// Next state; a completed run has no successor
    fn advance(self) -> Self {
        debug_assert!(self != Self::Completed, "run state advanced past Completed");
        let next = match self {
            Self::Idle => Self::Running,
            Self::Running | Self::Completed => Self::Completed,
        };
        tracing::trace!(from = ?self, to = ?next, "run state");
        next
    }
}

/// Outcomes of a batch run, keyed by analysis name in registration order
#[derive(Debug)]
pub struct RunResults {
    outcomes: IndexMap<String, Outcome>,
    state: RunState,
    elapsed: Duration,
    workers: usize,
}

impl RunResults {
    /// Outcome of one analysis
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Outcome> {
        self.outcomes.get(name)
    }

    /// Successful value of one analysis
    #[inline]
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.outcomes.get(name).and_then(|o| o.as_ref().ok())
    }

    /// Error of one analysis
    #[inline]
    #[must_use]
    pub fn error(&self, name: &str) -> Option<&PlanError> {
        self.outcomes.get(name).and_then(|o| o.as_ref().err())
    }

    /// Iterate over `(name, outcome)` in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over failed analyses
    pub fn failures(&self) -> impl Iterator<Item = (&str, &PlanError)> {
        self.outcomes
            .iter()
            .filter_map(|(k, v)| v.as_ref().err().map(|e| (k.as_str(), e)))
    }

    /// Analysis names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.outcomes.keys().map(String::as_str).collect()
    }

    /// Number of outcomes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if the run had no analyses
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of successful analyses
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ok()).count()
    }

    /// Number of failed analyses
    #[must_use]
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Check if every analysis succeeded
    #[inline]
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(Result::is_ok)
    }

    /// Final run state
    #[inline]
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Wall time of the run (excluding data loading)
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Workers used (1 for sequential runs)
    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Consume into the outcome map
    #[inline]
    #[must_use]
    pub fn into_outcomes(self) -> IndexMap<String, Outcome> {
        self.outcomes
    }
}

/// Executes analyses against borrowed registries
///
/// Borrowing immutably keeps registries unmodified for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'p> {
    data: &'p DataRegistry,
    argsets: &'p ArgsetRegistry,
    analyses: &'p AnalysisRegistry,
    config: &'p PlanConfig,
}

impl<'p> Executor<'p> {
    /// Create an executor over the given registries
    #[must_use]
    pub fn new(
        data: &'p DataRegistry,
        argsets: &'p ArgsetRegistry,
        analyses: &'p AnalysisRegistry,
        config: &'p PlanConfig,
    ) -> Self {
        Self {
            data,
            argsets,
            analyses,
            config,
        }
    }

    /// Run a single analysis without isolation
    ///
    /// Data is loaded on first use and cached for later runs.
    ///
    /// # Errors
    /// - `NotFound` if the analysis does not exist
    /// - `UnresolvedReference` if its argset or named function is missing
    /// - any data loading error
    /// - `AnalysisFailed` wrapping the function's own error
    pub fn run_one(&self, name: &str) -> Result<Value> {
        let resolved = self.analyses.resolve(name, self.argsets)?;
        let data = self.data.get_all_data()?;
        tracing::debug!(analysis = name, argset = resolved.argset.name(), "running analysis");
        resolved
            .call(&data)
            .map_err(|source| PlanError::AnalysisFailed {
                analysis: name.to_string(),
                source,
            })
    }

    /// Run every analysis sequentially, in registration order
    ///
    /// # Errors
    /// Only data loading errors; analysis failures are captured as outcomes
    pub fn run_all(&self) -> Result<RunResults> {
        let data = self.data.get_all_data()?;
        let mut state = RunState::Idle.advance();
        let started = Instant::now();
        tracing::info!(analyses = self.analyses.len(), datasets = data.len(), "starting sequential run");

        let mut outcomes = IndexMap::with_capacity(self.analyses.len());
        for entry in self.analyses.iter() {
            let name = entry.name();
            let outcome = isolate(name, self.analyses.resolve(name, self.argsets), &data);
            self.report(name, &outcome);
            outcomes.insert(name.to_string(), outcome);
        }

        state = state.advance();
        Ok(self.finish(outcomes, state, started, 1))
    }

    /// Run every analysis on a fixed pool of worker threads
    ///
    /// Jobs are queued in registration order; outcomes are reassembled in
    /// registration order regardless of completion order. `workers` overrides
    /// [`PlanConfig::workers`]; the default is the available parallelism.
    ///
    /// # Errors
    /// Only data loading errors; analysis failures are captured as outcomes
    pub fn run_all_parallel(&self, workers: Option<usize>) -> Result<RunResults> {
        let data = self.data.get_all_data()?;
        let names: Vec<&str> = self.analyses.names();
        let workers = self.config.resolve_workers(workers).min(names.len().max(1));
        let mut state = RunState::Idle.advance();
        let started = Instant::now();
        tracing::info!(analyses = names.len(), datasets = data.len(), workers, "starting parallel run");

        let (job_tx, job_rx) = channel::unbounded::<(usize, String, Result<ResolvedAnalysis>)>();
        for (index, name) in names.iter().enumerate() {
            let job = self.analyses.resolve(name, self.argsets);
            if job_tx.send((index, (*name).to_string(), job)).is_err() {
                break;
            }
        }
        drop(job_tx);

        let mut slots: Vec<Option<Outcome>> = (0..names.len()).map(|_| None).collect();
        let (out_tx, out_rx) = channel::unbounded::<(usize, Outcome)>();
        let snapshot = &data;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for id in 0..workers {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("plnr-worker-{id}"))
                    .spawn_scoped(scope, move || {
                        for (index, name, job) in job_rx.iter() {
                            let outcome = isolate(&name, job, snapshot);
                            if out_tx.send((index, outcome)).is_err() {
                                break;
                            }
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => tracing::error!(worker = id, error = %e, "failed to spawn worker"),
                }
            }
            drop(out_tx);

            for (index, outcome) in out_rx.iter() {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(outcome);
                }
            }

            for handle in handles {
                if handle.join().is_err() {
                    tracing::error!("worker thread terminated abnormally");
                }
            }
        });
        drop(job_rx);

        let outcomes = reassemble(&names, slots);
        for (name, outcome) in &outcomes {
            self.report(name, outcome);
        }

        state = state.advance();
        Ok(self.finish(outcomes, state, started, workers))
    }

    fn report(&self, name: &str, outcome: &Outcome) {
        match outcome {
            Ok(_) if self.config.log_progress => tracing::info!(analysis = name, "analysis succeeded"),
            Ok(_) => tracing::debug!(analysis = name, "analysis succeeded"),
            Err(e) => tracing::warn!(analysis = name, error = %e, "analysis failed"),
        }
    }

    fn finish(
        &self,
        outcomes: IndexMap<String, Outcome>,
        state: RunState,
        started: Instant,
        workers: usize,
    ) -> RunResults {
        let results = RunResults {
            outcomes,
            state,
            elapsed: started.elapsed(),
            workers,
        };
        tracing::info!(
            succeeded = results.succeeded(),
            failed = results.failed(),
            elapsed_ms = results.elapsed.as_millis() as u64,
            "run completed"
        );
        results
    }
}

/// Pair slots with names in registration order; an empty slot is a `WorkerFailure`
fn reassemble(names: &[&str], slots: Vec<Option<Outcome>>) -> IndexMap<String, Outcome> {
    names
        .iter()
        .zip(slots)
        .map(|(name, slot)| {
            let outcome = slot.unwrap_or_else(|| {
                Err(PlanError::WorkerFailure {
                    analysis: (*name).to_string(),
                })
            });
            ((*name).to_string(), outcome)
        })
        .collect()
}

/// Run one resolved analysis, converting every failure into an `Err` outcome
fn isolate(name: &str, job: Result<ResolvedAnalysis>, data: &DataSnapshot) -> Outcome {
    let resolved = job?;
    match panic::catch_unwind(AssertUnwindSafe(|| resolved.call(data))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(PlanError::AnalysisFailed {
            analysis: name.to_string(),
            source,
        }),
        Err(payload) => Err(PlanError::AnalysisPanicked {
            analysis: name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FnRef;
    use crate::data::Loader;
    use crate::table::Fields;
    use serde_json::json;

    struct Registries {
        data: DataRegistry,
        argsets: ArgsetRegistry,
        analyses: AnalysisRegistry,
        config: PlanConfig,
    }

    impl Registries {
        fn new() -> Self {
            let mut data = DataRegistry::default();
            data.add_data("base", Loader::direct(json!(10))).unwrap();
            Self {
                data,
                argsets: ArgsetRegistry::default(),
                analyses: AnalysisRegistry::default(),
                config: PlanConfig::default(),
            }
        }

        fn add(&mut self, name: &str, function: FnRef, x: i64) {
            let fields: Fields = [("x".to_string(), json!(x))].into_iter().collect();
            self.argsets.add_argset(Some(name), fields).unwrap();
            self.analyses.add_analysis(Some(name), function, None).unwrap();
        }

        fn executor(&self) -> Executor<'_> {
            Executor::new(&self.data, &self.argsets, &self.analyses, &self.config)
        }
    }

    fn add_base() -> FnRef {
        FnRef::function(|data, argset| {
            let base: i64 = data.get_as("base")?;
            let x: i64 = argset.get_as("x")?;
            Ok(json!(base + x))
        })
    }

    #[test]
    fn empty_slot_becomes_worker_failure() {
        let names = ["a", "lost", "c"];
        let slots = vec![Some(Ok(json!(1))), None, Some(Ok(json!(3)))];
        let outcomes = reassemble(&names, slots);

        let keys: Vec<&str> = outcomes.keys().map(String::as_str).collect();
        assert_eq!(keys, names);
        assert!(matches!(
            outcomes["lost"],
            Err(PlanError::WorkerFailure { ref analysis }) if analysis == "lost"
        ));
        assert_eq!(outcomes["a"].as_ref().ok(), Some(&json!(1)));
        assert_eq!(outcomes["c"].as_ref().ok(), Some(&json!(3)));
    }

    #[test]
    fn run_state_moves_forward() {
        let running = RunState::default().advance();
        assert_eq!(running, RunState::Running);
        assert_eq!(running.advance(), RunState::Completed);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "advanced past Completed")]
    fn run_state_cannot_leave_completed() {
        let _ = RunState::Completed.advance();
    }

    #[test]
    fn run_one_returns_value() {
        let mut regs = Registries::new();
        regs.add("a", add_base(), 5);
        assert_eq!(regs.executor().run_one("a").unwrap(), json!(15));
    }

    #[test]
    fn run_one_propagates_error() {
        let mut regs = Registries::new();
        regs.add("bad", FnRef::function(|_, _| anyhow::bail!("nope")), 0);
        let err = regs.executor().run_one("bad").unwrap_err();
        assert!(matches!(err, PlanError::AnalysisFailed { ref analysis, .. } if analysis == "bad"));
    }

    #[test]
    fn run_one_missing_analysis() {
        let regs = Registries::new();
        assert!(matches!(
            regs.executor().run_one("ghost"),
            Err(PlanError::NotFound { .. })
        ));
    }

    #[test]
    fn run_all_isolates_failures() {
        let mut regs = Registries::new();
        regs.add("a", add_base(), 1);
        regs.add("bad", FnRef::function(|_, _| anyhow::bail!("nope")), 2);
        regs.add("c", add_base(), 3);

        let results = regs.executor().run_all().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.state(), RunState::Completed);
        assert_eq!(results.value("a"), Some(&json!(11)));
        assert!(matches!(results.error("bad"), Some(PlanError::AnalysisFailed { .. })));
        assert_eq!(results.value("c"), Some(&json!(13)));
        assert_eq!(results.succeeded(), 2);
        assert_eq!(results.failed(), 1);
        assert_eq!(results.names(), vec!["a", "bad", "c"]);
    }

    #[test]
    fn run_all_captures_panics() {
        let mut regs = Registries::new();
        regs.add("boom", FnRef::function(|_, _| panic!("kaboom")), 0);
        regs.add("ok", add_base(), 0);
        let results = regs.executor().run_all().unwrap();
        match results.error("boom") {
            Some(PlanError::AnalysisPanicked { message, .. }) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(results.value("ok").is_some());
    }

    #[test]
    fn unresolved_argset_captured_at_run_time() {
        let mut regs = Registries::new();
        regs.analyses
            .add_analysis(Some("orphan"), add_base(), Some("missing"))
            .unwrap();
        let results = regs.executor().run_all().unwrap();
        assert!(matches!(
            results.error("orphan"),
            Some(PlanError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn parallel_matches_sequential() {
        let mut regs = Registries::new();
        for i in 0..20 {
            if i % 7 == 3 {
                regs.add(&format!("an_{i}"), FnRef::function(|_, _| anyhow::bail!("fail")), i);
            } else {
                regs.add(&format!("an_{i}"), add_base(), i);
            }
        }
        let sequential = regs.executor().run_all().unwrap();
        let parallel = regs.executor().run_all_parallel(Some(4)).unwrap();

        assert_eq!(sequential.names(), parallel.names());
        for (name, outcome) in sequential.iter() {
            let other = parallel.get(name).unwrap();
            assert_eq!(outcome.as_ref().ok(), other.as_ref().ok());
            assert_eq!(outcome.is_err(), other.is_err());
        }
        assert_eq!(parallel.workers(), 4);
    }

    #[test]
    fn parallel_worker_count_capped_by_jobs() {
        let mut regs = Registries::new();
        regs.add("only", add_base(), 1);
        let results = regs.executor().run_all_parallel(Some(16)).unwrap();
        assert_eq!(results.workers(), 1);
        assert_eq!(results.value("only"), Some(&json!(11)));
    }

    #[test]
    fn parallel_with_no_analyses() {
        let regs = Registries::new();
        let results = regs.executor().run_all_parallel(None).unwrap();
        assert!(results.is_empty());
        assert_eq!(results.state(), RunState::Completed);
    }

    #[test]
    fn data_load_failure_aborts_batch() {
        let mut regs = Registries::new();
        regs.data
            .add_data("broken", Loader::function(|_, _| anyhow::bail!("disk gone")))
            .unwrap();
        regs.add("a", add_base(), 1);
        assert!(matches!(
            regs.executor().run_all(),
            Err(PlanError::LoaderFailed { .. })
        ));
    }

    #[test]
    fn panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
