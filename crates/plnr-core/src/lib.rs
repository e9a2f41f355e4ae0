//! plnr core - analysis plans over datasets and argsets
//!
//! A [`Plan`] holds three registries:
//! - **data**: named datasets, loaded lazily and at most once
//! - **argsets**: named parameter sets
//! - **analyses**: bindings of one function to one argset
//!
//! and runs analyses one at a time, all in order, or all on a worker pool,
//! collecting one outcome per analysis.
//!
//! # Example
//!
//! ```
//! use plnr_core::prelude::*;
//! use serde_json::json;
//!
//! # fn main() -> plnr_core::Result<()> {
//! let mut plan = Plan::new();
//! plan.add_data("population", Loader::direct(json!([120, 80, 45])))?;
//! plan.register_function("share", |data, argset| {
//!     let population: Vec<f64> = data.get_as("population")?;
//!     let index: usize = argset.get_as("index")?;
//!     Ok(json!(population[index] / population.iter().sum::<f64>()))
//! })?;
//!
//! plan.add_analysis_from_list(
//!     "share",
//!     plnr_core::expand!("index" => [0, 1, 2]),
//!     &BatchOptions::new(),
//! )?;
//!
//! let results = plan.run_all_parallel(None)?;
//! assert_eq!(results.len(), 3);
//! assert!(results.all_succeeded());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod analysis;
pub mod argset;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod expand;
pub mod hash;
pub mod logging;
mod naming;
pub mod plan;
pub mod retry;
pub mod table;

// Re-exports for convenience
pub use analysis::{AnalysisEntry, AnalysisFn, AnalysisRegistry, BatchOptions, FnRef, ResolvedAnalysis};
pub use argset::{Argset, ArgsetRegistry};
pub use config::{ConfigError, DuplicatePolicy, PlanConfig};
pub use data::{DataRegistry, DataSnapshot, Loader, LoaderFn};
pub use engine::{Executor, Outcome, RunResults, RunState};
pub use error::{EntryKind, PlanError, Result};
pub use hash::{hash_value, ContentHash, HashError};
pub use plan::{Plan, PlanSummary};
pub use retry::{retry, RetryPolicy};
pub use table::{Fields, Table};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building and running plans
    pub use crate::{
        Argset, BatchOptions, DataSnapshot, DuplicatePolicy, Fields, FnRef, Loader, Plan,
        PlanConfig, PlanError, RunResults, Table,
    };
}

/// Build a [`Fields`] mapping from `key => value` pairs
///
/// ```
/// let f = plnr_core::fields! {"k" => 2, "label" => "north"};
/// assert_eq!(f["k"], serde_json::json!(2));
/// ```
#[macro_export]
macro_rules! fields {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut fields = $crate::Fields::new();
        $(
            fields.insert(::std::string::String::from($key), $crate::__private::json!($value));
        )*
        fields
    }};
}

#[doc(hidden)]
pub mod __private {
    pub use indexmap::IndexMap;
    pub use serde_json::{json, Value};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
