use crate::error::Result;
use crate::style::style_seed;
use crate::workflow::graph::{NodeFunction, RunContext};
use crate::workflow::state::{StateUpdate, Step, TaskState};
use async_trait::async_trait;

/// Derives the task's style seed and hands over to the writer.
pub struct InitNode;

#[async_trait]
impl NodeFunction for InitNode {
    async fn execute(&self, state: &TaskState, _ctx: &RunContext<'_>) -> Result<StateUpdate> {
        let seed = style_seed(&state.config.topic);
        tracing::info!("🌱 Task {}: topic={:?} seed={}", state.task_id, state.config.topic, seed);

        Ok(StateUpdate {
            style_seed: Some(seed),
            ..StateUpdate::new().with_step(Step::Writing)
        })
    }
}
