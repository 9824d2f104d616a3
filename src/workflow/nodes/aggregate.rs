use super::Round;
use crate::error::{PipelineError, Result};
use crate::workflow::graph::{NodeFunction, RunContext};
use crate::workflow::state::{Scene, StateUpdate, TaskState};
use async_trait::async_trait;

/// Folds a round's results into the scenes and decides whether to go on.
pub struct AggregateNode {
    round: Round,
}

impl AggregateNode {
    pub fn new(round: Round) -> Self {
        Self { round }
    }
}

/// Copy each successful artifact onto its scene, recount successes from the
/// result map, and pick the next step. Zero successes fails the task.
pub fn aggregate(state: &TaskState, round: Round) -> StateUpdate {
    let results = round.results(state);

    let enriched: Vec<Scene> = state
        .scenes
        .iter()
        .filter_map(|scene| {
            let result = results.get(&scene.id).filter(|r| r.is_success())?;
            let mut scene = scene.clone();
            match round {
                Round::Images => {
                    scene.image_url = result.artifact_url.clone();
                    scene.image_transient_url = result.transient_url.clone();
                }
                Round::Videos => scene.video_url = result.artifact_url.clone(),
            }
            Some(scene)
        })
        .collect();

    let completed = results.values().filter(|r| r.is_success()).count();
    tracing::info!(
        "📦 Task {}: {} round {}/{} succeeded",
        state.task_id,
        round.name(),
        completed,
        results.len()
    );

    let mut update = if completed == 0 {
        StateUpdate::failed(
            PipelineError::AggregationEmpty {
                stage: round.name().to_string(),
                dispatched: results.len(),
            }
            .to_string(),
        )
    } else {
        StateUpdate::new().with_step(round.next_step())
    };

    for (id, result) in results.iter().filter(|(_, r)| !r.is_success()) {
        let reason = result.error.as_deref().unwrap_or("unknown error");
        update = update.with_warning(format!("{} for scene {} failed: {}", round.name(), id, reason));
    }

    match round {
        Round::Images => update.completed_images = Some(completed),
        Round::Videos => update.completed_videos = Some(completed),
    }
    if !enriched.is_empty() {
        update.scenes = Some(enriched);
    }
    update
}

#[async_trait]
impl NodeFunction for AggregateNode {
    async fn execute(&self, state: &TaskState, _ctx: &RunContext<'_>) -> Result<StateUpdate> {
        Ok(aggregate(state, self.round))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::{SceneId, Step, TaskConfig, UnitResult};
    use std::collections::BTreeMap;

    fn scene(id: SceneId) -> Scene {
        Scene {
            id,
            text: format!("line {}", id),
            scene_type: "hook".to_string(),
            duration: 2.0,
            emotion: "calm".to_string(),
            image_prompt: format!("prompt {}", id),
            image_url: None,
            image_transient_url: None,
            video_url: None,
        }
    }

    fn imaging_state(ids: &[SceneId]) -> TaskState {
        let mut state = TaskState::new("t".to_string(), TaskConfig::new("topic"));
        state.apply_update(StateUpdate {
            scenes: Some(ids.iter().map(|id| scene(*id)).collect()),
            ..StateUpdate::new().with_step(Step::Imaging)
        });
        state
    }

    fn ok(id: SceneId) -> (SceneId, UnitResult) {
        (id, UnitResult::succeeded(format!("img-{}", id), Some(format!("tmp-{}", id)), 1))
    }

    fn failed(id: SceneId) -> (SceneId, UnitResult) {
        (id, UnitResult::failed("quota".to_string(), 3))
    }

    #[test]
    fn test_count_is_independent_of_arrival_order() {
        let arrivals = [vec![ok(2), failed(3), ok(1)], vec![ok(1), ok(2), failed(3)], vec![failed(3), ok(1), ok(2)]];
        let mut outcomes = Vec::new();
        for batch in arrivals {
            let mut state = imaging_state(&[1, 2, 3]);
            // One merge per arriving unit.
            for (id, result) in batch {
                state.apply_update(StateUpdate {
                    image_results: Some(BTreeMap::from([(id, result)])),
                    ..Default::default()
                });
            }
            state.apply_update(aggregate(&state, Round::Images));
            outcomes.push(state);
        }

        for state in &outcomes {
            assert_eq!(*state.completed_images, 2);
            assert_eq!(state.step(), Step::Animating);
            assert_eq!(state.image_results, outcomes[0].image_results);
        }
    }

    #[test]
    fn test_artifacts_copied_by_id() {
        let mut state = imaging_state(&[3, 1, 2]);
        state.apply_update(StateUpdate {
            image_results: Some(BTreeMap::from([ok(1), failed(2), ok(3)])),
            ..Default::default()
        });
        state.apply_update(aggregate(&state, Round::Images));

        let by_id = |id| state.scenes.iter().find(|s| s.id == id).unwrap();
        assert_eq!(by_id(1).image_url.as_deref(), Some("img-1"));
        assert_eq!(by_id(3).image_transient_url.as_deref(), Some("tmp-3"));
        assert!(by_id(2).image_url.is_none());
        assert_eq!(state.scenes.len(), 3, "scenes are never removed");
        assert_eq!(state.warnings.len(), 1);
    }

    #[test]
    fn test_zero_successes_fails_task() {
        let mut state = imaging_state(&[1, 2]);
        state.apply_update(StateUpdate {
            image_results: Some(BTreeMap::from([failed(1), failed(2)])),
            ..Default::default()
        });
        state.apply_update(aggregate(&state, Round::Images));
        assert_eq!(state.step(), Step::Failed);
        assert_eq!(*state.completed_images, 0);
        assert!(state.errors[0].contains("no successful units in image round"));
    }

    #[test]
    fn test_empty_round_fails_task() {
        let mut state = imaging_state(&[1]);
        state.apply_update(StateUpdate::new().with_step(Step::Animating));
        state.apply_update(aggregate(&state, Round::Videos));
        assert_eq!(state.step(), Step::Failed);
        assert!(state.errors[0].contains("0 dispatched"));
    }
}
