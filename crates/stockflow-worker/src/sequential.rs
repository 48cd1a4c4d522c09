// Sequential execution mode
//
// Runs stages back-to-back inside one worker invocation, threading each
// outcome straight into the next stage instead of round-tripping through
// the queues. A processing budget keeps the whole chain safely under the
// serverless invocation cap; whatever does not fit is handed back to
// queued mode at the current stage boundary.

use std::time::Duration;
use tracing::info;

use stockflow_core::{Result, Stage, StagePayload, StockflowError};
use stockflow_storage::{ExecutionMode, WorkflowExecutionRow};

use crate::orchestrator::Orchestrator;

/// 30 s safety buffer under the 300 s invocation cap
pub const PROCESSING_BUDGET: Duration = Duration::from_secs(270);

#[derive(Debug, PartialEq, Eq)]
pub enum SequentialOutcome {
    Completed,
    /// Remaining stages handed to queued mode, pointer left at `stage`
    Deferred { stage: Stage },
    Failed,
}

/// Whether the next stage's worst-case cost still fits the budget
pub fn fits_in_budget(elapsed: Duration, stage: Stage) -> bool {
    PROCESSING_BUDGET.saturating_sub(elapsed) >= stage.estimated_cost()
}

/// Chain stages from `start` until completion, failure or budget exhaustion
pub async fn run_from(
    orchestrator: &Orchestrator,
    workflow: &WorkflowExecutionRow,
    start: Stage,
) -> Result<SequentialOutcome> {
    let started = tokio::time::Instant::now();
    let workflow_id = workflow.workflow_id.as_str();
    let mut stage = start;
    let mut input: Option<StagePayload> = None;

    loop {
        if !fits_in_budget(started.elapsed(), stage) {
            // The previous commit already persisted this stage's input blob
            // and pointer, so queued mode picks up exactly here
            orchestrator
                .context()
                .db
                .set_workflow_mode(workflow_id, ExecutionMode::Queued)
                .await
                .map_err(StockflowError::Internal)?;
            orchestrator.enqueue_stage(workflow_id, stage, None).await?;
            return Ok(SequentialOutcome::Deferred { stage });
        }

        match orchestrator.execute_stage(workflow_id, stage, input.take()).await {
            Ok(outcome) => match outcome.next {
                Some(next) => {
                    stage = next.stage();
                    input = Some(next);
                }
                None => {
                    info!(
                        workflow_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "sequential run complete"
                    );
                    return Ok(SequentialOutcome::Completed);
                }
            },
            Err(e) => {
                orchestrator
                    .handle_stage_failure(workflow_id, stage, &e)
                    .await;
                return Ok(SequentialOutcome::Failed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_budget_fits_every_stage() {
        for stage in Stage::ALL {
            assert!(fits_in_budget(Duration::ZERO, stage));
        }
    }

    #[test]
    fn late_budget_defers_expensive_stages() {
        // 250 s in: shopify_sync (45 s worst case) no longer fits
        assert!(!fits_in_budget(Duration::from_secs(250), Stage::ShopifySync));
        // but the cheap terminal stage still does
        assert!(fits_in_budget(Duration::from_secs(250), Stage::StatusUpdate));
    }

    #[test]
    fn budget_is_exactly_thirty_seconds_under_the_cap() {
        assert_eq!(PROCESSING_BUDGET, Duration::from_secs(300) - Duration::from_secs(30));
    }
}
