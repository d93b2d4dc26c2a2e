//! Kit Controller - converges cloud objects with their stored records
//!
//! This crate provides:
//! - The generic reconciler driving a controller per record kind
//! - Work queue and requeue rate limiters
//! - Resource controllers for every cloud object family
//! - The control-plane pipeline that creates child records stage by stage
//! - The manager that routes store events to workers

pub mod config;
pub mod controllers;
pub mod error;
pub mod manager;
pub mod queue;
pub mod ratelimit;
pub mod reconciler;

// Re-export commonly used types
pub use config::{ManagerConfig, ProvisioningDefaults, RateLimiterConfig};
pub use controllers::{Context, ControlPlaneController, Stage};
pub use error::{ReconcileError, Result};
pub use manager::{build_reconcilers, Manager};
pub use queue::WorkQueue;
pub use reconciler::{Action, Controller, Reconcile, Reconciler};
