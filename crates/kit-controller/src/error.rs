// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use kit_bootstrap::BootstrapError;
use kit_cloud::CloudError;
use kit_core::KitError;
use kit_storage::StorageError;
use miette::Diagnostic;
use thiserror::Error;

/// Reconcile error type
///
/// Every variant is retried by the reconciler; the variant only decides the
/// Active condition reason and how loudly the failure is logged.
#[derive(Error, Debug, Diagnostic)]
pub enum ReconcileError {
    /// A handle this record needs has not been published yet
    #[error("{resource} is waiting for {dependency}")]
    #[diagnostic(
        code(kit::controller::dependency_not_ready),
        help("The dependency is still being provisioned; the record is retried with backoff")
    )]
    DependencyNotReady {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        dependency: String,
    },

    /// Discovery found more cloud objects than the record owns
    #[error("Found {found} {kind} objects tagged for cluster {cluster}, expected at most {expected}")]
    #[diagnostic(
        code(kit::controller::cardinality_violation),
        help("Duplicate cloud objects are never cleaned up automatically; delete the extras by hand")
    )]
    CardinalityViolation {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        cluster: String,
        #[allow(unused)]
        expected: usize,
        #[allow(unused)]
        found: usize,
    },

    /// The pass was abandoned because the manager is shutting down
    #[error("Reconcile cancelled")]
    #[diagnostic(
        code(kit::controller::cancelled),
        help("The record is reconciled again on the next start")
    )]
    Cancelled,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] KitError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Result type for reconcile operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    /// Create a DependencyNotReady error
    pub fn dependency_not_ready(resource: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::DependencyNotReady {
            resource: resource.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a CardinalityViolation error
    pub fn cardinality_violation(
        kind: impl Into<String>,
        cluster: impl Into<String>,
        expected: usize,
        found: usize,
    ) -> Self {
        Self::CardinalityViolation {
            kind: kind.into(),
            cluster: cluster.into(),
            expected,
            found,
        }
    }

    pub fn is_dependency_not_ready(&self) -> bool {
        matches!(self, Self::DependencyNotReady { .. })
    }

    /// Reason recorded on the Active condition
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DependencyNotReady { .. } => "DependencyNotReady",
            Self::CardinalityViolation { .. } => "CardinalityViolation",
            Self::Cancelled => "Cancelled",
            Self::Cloud(e) if e.is_dependency_violation() => "DependencyViolation",
            Self::Cloud(_) => "CloudError",
            Self::Store(_) => "StoreError",
            Self::Core(_) => "InvalidSpec",
            Self::Bootstrap(_) => "BootstrapError",
        }
    }
}
