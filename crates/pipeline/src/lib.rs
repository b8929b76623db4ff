//! Generation lifecycle: submission, reconciliation and polling.

pub mod error;
pub mod poller;
pub mod reconciler;
pub mod service;
pub mod submitter;

pub use error::PipelineError;
pub use poller::{PollerConfig, PollerRegistry};
pub use reconciler::{DiscardReason, ReconcileOutcome, StatusReconciler};
pub use service::{GenerationService, ServiceConfig};
pub use submitter::{SubmitterConfig, TaskSubmitter};
