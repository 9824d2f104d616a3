use crate::error::Result;
use crate::services::ScriptDraft;
use crate::style::{stylize_prompt, writer_prompt, WRITER_SYSTEM_PROMPT};
use crate::workflow::graph::{NodeFunction, RunContext};
use crate::workflow::state::{Scene, StateUpdate, Step, TaskState};
use async_trait::async_trait;
use std::collections::HashSet;

/// Asks the text generator for the scene list. Output that does not parse or
/// does not validate fails the task; nothing is guessed.
pub struct WriterNode;

/// Turn a draft into scenes: non-empty, unique ids, positive durations,
/// stylized image prompts.
pub fn scenes_from_draft(draft: ScriptDraft) -> std::result::Result<Vec<Scene>, String> {
    if draft.scenes.is_empty() {
        return Err("script has no scenes".to_string());
    }
    let mut ids = HashSet::new();
    if let Some(dup) = draft.scenes.iter().find(|s| !ids.insert(s.id)) {
        return Err(format!("duplicate scene id {}", dup.id));
    }
    if let Some(bad) = draft
        .scenes
        .iter()
        .find(|s| !(s.duration.is_finite() && s.duration > 0.0))
    {
        return Err(format!("scene {} has invalid duration {}", bad.id, bad.duration));
    }

    Ok(draft
        .scenes
        .into_iter()
        .map(|s| Scene {
            id: s.id,
            image_prompt: stylize_prompt(&s.image_prompt, &s.emotion),
            text: s.text,
            scene_type: s.scene_type,
            duration: s.duration,
            emotion: s.emotion,
            image_url: None,
            image_transient_url: None,
            video_url: None,
        })
        .collect())
}

#[async_trait]
impl NodeFunction for WriterNode {
    async fn execute(&self, state: &TaskState, ctx: &RunContext<'_>) -> Result<StateUpdate> {
        ctx.progress.report(Step::Writing, 0.0, "Writing script");

        let draft = ctx
            .services
            .text
            .generate_structured(&writer_prompt(&state.config), WRITER_SYSTEM_PROMPT)
            .await?;

        let scenes = match scenes_from_draft(draft) {
            Ok(scenes) => scenes,
            Err(reason) => {
                tracing::error!("❌ Task {}: rejected script: {}", state.task_id, reason);
                return Ok(StateUpdate::failed(format!("Script rejected: {}", reason)));
            }
        };

        tracing::info!("📝 Task {}: script ready with {} scenes", state.task_id, scenes.len());
        Ok(StateUpdate {
            total_images: Some(scenes.len()),
            scenes: Some(scenes),
            ..StateUpdate::new().with_step(Step::Imaging)
        })
    }
}
