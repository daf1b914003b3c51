//! The ambient operation/actor context that drives timeline emission.
//!
//! `SaveState`/`DeleteState` emit a timeline event only when an orchestrator
//! call set this context for the task performing the write. Tests and direct
//! store callers that never set it get silent writes with no timeline entry,
//! which matches the store-level contract: the timeline records lifecycle
//! operations, not every row mutation.

use std::future::Future;

use infractl_core::model::Operation;

tokio::task_local! {
    static AMBIENT: (Operation, String);
}

/// Runs `fut` with `operation`/`changed_by` set as the ambient context for
/// any state-store call it makes.
pub async fn with_operation<F>(operation: Operation, changed_by: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    AMBIENT.scope((operation, changed_by.into()), fut).await
}

/// The current ambient `(operation, changed_by)`, if a caller set one via
/// [`with_operation`].
pub(crate) fn current() -> Option<(Operation, String)> {
    AMBIENT.try_with(Clone::clone).ok()
}
