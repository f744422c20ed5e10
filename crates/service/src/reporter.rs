//! Result reporting boundary
//!
//! The presentation layer decides how results are shown; the service only
//! defines the hand-off.

use common::OperationResult;
use tracing::{info, warn};

/// Receives the outcome of each dispatched operation
pub trait ResultReporter {
    fn report(&mut self, result: &OperationResult);
}

/// Writes outcomes to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ResultReporter for TracingReporter {
    fn report(&mut self, result: &OperationResult) {
        if result.succeeded() {
            info!(operation = %result.kind(), "{}", result.message());
        } else {
            warn!(operation = %result.kind(), error = ?result.error(), "{}", result.message());
        }
    }
}

/// Keeps every reported result in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    results: Vec<OperationResult>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> &[OperationResult] {
        &self.results
    }
}

impl ResultReporter for MemoryReporter {
    fn report(&mut self, result: &OperationResult) {
        self.results.push(result.clone());
    }
}
