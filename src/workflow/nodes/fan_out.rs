use super::Round;
use crate::error::Result;
use crate::workflow::dispatch::{image_units, run_fan_out, video_units, UnitWorker};
use crate::workflow::graph::{NodeFunction, RunContext};
use crate::workflow::state::{StateUpdate, TaskState};
use async_trait::async_trait;
use std::sync::Arc;

/// Dispatches one round of unit tasks and returns their results for the
/// coordinator to merge. The step is left to the aggregator.
pub struct FanOutNode {
    round: Round,
    worker: Arc<dyn UnitWorker>,
}

impl FanOutNode {
    pub fn new(round: Round, worker: Arc<dyn UnitWorker>) -> Self {
        Self { round, worker }
    }
}

#[async_trait]
impl NodeFunction for FanOutNode {
    async fn execute(&self, state: &TaskState, ctx: &RunContext<'_>) -> Result<StateUpdate> {
        let units = match self.round {
            Round::Images => image_units(state),
            Round::Videos => video_units(state, ctx.config.max_clip_seconds),
        };
        let already = self.round.results(state).len();
        let total = already + units.len();

        if units.is_empty() {
            // Nothing eligible; the aggregator will count what exists (possibly zero).
            tracing::warn!("⚠️ Task {}: no {} units to dispatch", state.task_id, self.round.name());
        } else {
            ctx.progress.report(
                self.round.step(),
                0.0,
                format!("Generating {} {}s", units.len(), self.round.name()),
            );
        }

        let results = if units.is_empty() {
            Default::default()
        } else {
            run_fan_out(units, self.worker.as_ref(), self.round.step(), ctx).await?
        };

        let mut update = StateUpdate::new();
        match self.round {
            Round::Images => {
                update.total_images = Some(total);
                update.image_results = Some(results);
            }
            Round::Videos => {
                update.total_videos = Some(total);
                update.video_results = Some(results);
            }
        }
        Ok(update)
    }
}
