//! Refresh coordination: decides when the external collector may run.

pub mod coordinator;
pub mod invoker;

pub use coordinator::{RefreshCoordinator, RefreshStatus};
pub use invoker::{CollectorRun, Invoker, ProcessInvoker};

use crate::error::CollectorError;

/// Result of one `request_refresh` call. Consumed immediately by the caller.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// A successful run happened within the debounce window; nothing ran.
    Debounced,
    /// The collector ran to completion.
    Succeeded,
    /// The collector was attempted and failed. The cached snapshot stays.
    Failed(CollectorError),
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Debounced => "debounced",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }
}
