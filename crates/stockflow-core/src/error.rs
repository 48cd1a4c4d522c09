// Error types shared across the pipeline

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, StockflowError>;

/// Errors that can occur while driving a workflow
///
/// The variants map onto retry behavior: `Transient` errors are retried by
/// the gateway/orchestrator budgets, `Conflict` is resolved by the purchase
/// order writer outside the failed transaction, `Validation` gets one fresh
/// extraction attempt, `Business` is handled inline, `Fatal` aborts the
/// process.
#[derive(Debug, Error)]
pub enum StockflowError {
    /// Infrastructure hiccup: connection closed, pool timeout, broker
    /// disconnect, extraction RPC timeout
    #[error("transient error: {0}")]
    Transient(String),

    /// Unique violation on (merchant_id, number)
    #[error("purchase order number conflict for merchant {merchant_id}: {number}")]
    Conflict { merchant_id: Uuid, number: String },

    /// Malformed extraction response or missing required fields
    #[error("validation error: {0}")]
    Validation(String),

    /// Domain-level condition handled by the caller
    #[error("business rule: {0}")]
    Business(String),

    /// Unrecoverable: warmup failed, broker unreachable past budget
    #[error("fatal: {0}")]
    Fatal(String),

    /// Stage timed out; carries whether a retry is worthwhile
    #[error("stage {stage} timed out after {elapsed_ms} ms")]
    StageTimeout { stage: String, elapsed_ms: u64 },

    /// Workflow is no longer in a processable state
    #[error("workflow {0} is not processing")]
    WorkflowCancelled(String),

    /// Could not acquire the purchase order advisory lock in time
    #[error("lock on purchase order {0} held by another workflow")]
    LockContended(Uuid),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StockflowError {
    pub fn transient(msg: impl Into<String>) -> Self {
        StockflowError::Transient(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        StockflowError::Validation(msg.into())
    }

    pub fn business(msg: impl Into<String>) -> Self {
        StockflowError::Business(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        StockflowError::Fatal(msg.into())
    }

    /// Whether the orchestrator should schedule another attempt of the
    /// failing stage
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StockflowError::Transient(_)
                | StockflowError::StageTimeout { .. }
                | StockflowError::LockContended(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_timeout_are_retryable() {
        assert!(StockflowError::transient("pool timeout").is_retryable());
        assert!(StockflowError::StageTimeout {
            stage: "ai_parsing".into(),
            elapsed_ms: 120_000,
        }
        .is_retryable());
    }

    #[test]
    fn validation_and_fatal_are_not() {
        assert!(!StockflowError::validation("missing line items").is_retryable());
        assert!(!StockflowError::fatal("warmup failed").is_retryable());
        assert!(!StockflowError::Conflict {
            merchant_id: Uuid::nil(),
            number: "1001".into(),
        }
        .is_retryable());
    }
}
