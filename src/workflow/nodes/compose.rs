use crate::error::Result;
use crate::services::{ClipKind, MediaClip};
use crate::workflow::graph::{NodeFunction, RunContext};
use crate::workflow::state::{StateUpdate, Step, TaskState};
use async_trait::async_trait;

/// Concatenates scene media in id order. Muxer failures are fatal.
pub struct ComposeNode;

/// Ordered clip list: ascending scene id, the clip when a scene has one,
/// otherwise its still held for the scene's duration. Scenes with neither
/// are left out.
pub fn clip_list(state: &TaskState) -> Vec<MediaClip> {
    state
        .scenes_in_order()
        .into_iter()
        .filter_map(|scene| {
            let (uri, kind) = match (&scene.video_url, &scene.image_url) {
                (Some(video), _) => (video.clone(), ClipKind::Video),
                (None, Some(image)) => (image.clone(), ClipKind::Still),
                (None, None) => return None,
            };
            Some(MediaClip {
                uri,
                kind,
                duration: scene.duration,
            })
        })
        .collect()
}

#[async_trait]
impl NodeFunction for ComposeNode {
    async fn execute(&self, state: &TaskState, ctx: &RunContext<'_>) -> Result<StateUpdate> {
        let clips = clip_list(state);
        if clips.is_empty() {
            return Ok(StateUpdate::failed("No media available to compose"));
        }

        ctx.progress
            .report(Step::Composing, 0.0, format!("Composing {} clips", clips.len()));
        let composed = ctx.services.muxer.concat(&clips).await?;
        tracing::info!("🎬 Task {}: composed {}", state.task_id, composed);

        Ok(StateUpdate {
            composed_artifact_url: Some(composed),
            ..StateUpdate::new().with_step(Step::Narrating)
        })
    }
}
