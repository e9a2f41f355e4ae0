//! Error types for plnr
//!
//! Provides error handling for:
//! - Registry collisions and missing entries
//! - References that only resolve at run time
//! - Failures raised inside user analysis functions and loaders
//! - Worker pool failures during parallel runs

use crate::config::ConfigError;
use crate::hash::HashError;
use std::fmt::{self, Display, Formatter};

/// Result alias used across the crate
pub type Result<T, E = PlanError> = std::result::Result<T, E>;

/// Kind of registry entry an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Dataset in the data registry
    Data,
    /// Parameter set
    Argset,
    /// Analysis binding
    Analysis,
    /// Analysis function in the function table
    Function,
    /// Data loader in the loader table
    Loader,
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Data => "data",
            Self::Argset => "argset",
            Self::Analysis => "analysis",
            Self::Function => "function",
            Self::Loader => "loader",
        };
        f.write_str(s)
    }
}

/// Main plnr error type
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Insertion under a name that is already registered
    #[error("duplicate {kind} name: {name}")]
    DuplicateKey { kind: EntryKind, name: String },

    /// Lookup of a name that is not registered
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntryKind, name: String },

    /// An entry references something that does not exist at run time
    #[error("{owner} references unknown {kind} '{reference}'")]
    UnresolvedReference {
        /// Name of the entry holding the reference
        owner: String,
        /// Kind of the referenced entry
        kind: EntryKind,
        /// The missing name
        reference: String,
    },

    /// User analysis function returned an error
    #[error("analysis '{analysis}' failed: {source}")]
    AnalysisFailed {
        analysis: String,
        #[source]
        source: anyhow::Error,
    },

    /// User analysis function panicked
    #[error("analysis '{analysis}' panicked: {message}")]
    AnalysisPanicked { analysis: String, message: String },

    /// Worker terminated without reporting an outcome
    #[error("worker terminated without reporting an outcome for analysis '{analysis}'")]
    WorkerFailure { analysis: String },

    /// Data loader returned an error
    #[error("loading data '{name}' failed: {source}")]
    LoaderFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Data loader requested its own dataset while it was loading
    #[error("cyclic data dependency while loading '{name}'")]
    CyclicLoad { name: String },

    /// Argset action function returned an error
    #[error("argset action failed on '{argset}': {source}")]
    ActionFailed {
        argset: String,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed input to a registry operation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Hashing error
    #[error("hash error: {0}")]
    Hash(#[from] HashError),
}

impl PlanError {
    #[inline]
    pub(crate) fn duplicate(kind: EntryKind, name: impl Into<String>) -> Self {
        Self::DuplicateKey {
            kind,
            name: name.into(),
        }
    }

    #[inline]
    pub(crate) fn not_found(kind: EntryKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    #[inline]
    pub(crate) fn unresolved(
        owner: impl Into<String>,
        kind: EntryKind,
        reference: impl Into<String>,
    ) -> Self {
        Self::UnresolvedReference {
            owner: owner.into(),
            kind,
            reference: reference.into(),
        }
    }

    /// Check if error was produced while executing an analysis
    #[inline]
    #[must_use]
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            Self::AnalysisFailed { .. } | Self::AnalysisPanicked { .. } | Self::WorkerFailure { .. }
        )
    }

    /// Check if error is a registry programmer error
    #[inline]
    #[must_use]
    pub fn is_registry_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey { .. } | Self::NotFound { .. } | Self::InvalidInput(_)
        )
    }

    /// Analysis name carried by execution errors
    #[must_use]
    pub fn analysis_name(&self) -> Option<&str> {
        match self {
            Self::AnalysisFailed { analysis, .. }
            | Self::AnalysisPanicked { analysis, .. }
            | Self::WorkerFailure { analysis } => Some(analysis),
            Self::UnresolvedReference { owner, .. } => Some(owner),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_display() {
        let err = PlanError::duplicate(EntryKind::Argset, "a1");
        assert_eq!(err.to_string(), "duplicate argset name: a1");
        assert!(err.is_registry_error());
        assert!(!err.is_execution_error());
    }

    #[test]
    fn unresolved_reference_display() {
        let err = PlanError::unresolved("an_1", EntryKind::Argset, "missing");
        assert_eq!(err.to_string(), "an_1 references unknown argset 'missing'");
        assert_eq!(err.analysis_name(), Some("an_1"));
    }

    #[test]
    fn analysis_failed_keeps_source() {
        let err = PlanError::AnalysisFailed {
            analysis: "an_1".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(err.is_execution_error());
        assert_eq!(err.analysis_name(), Some("an_1"));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("boom"));
    }

    #[test]
    fn worker_failure_is_execution_error() {
        let err = PlanError::WorkerFailure {
            analysis: "x".to_string(),
        };
        assert!(err.is_execution_error());
        assert!(err.to_string().contains("without reporting"));
    }
}
