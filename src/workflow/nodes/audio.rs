use crate::error::{CollaboratorError, PipelineError, Result};
use crate::services::MixRequest;
use crate::workflow::graph::{NodeFunction, RunContext};
use crate::workflow::state::{StateUpdate, Step, TaskState};
use async_trait::async_trait;
use std::path::Path;

/// Synthesizes the narration. A narrator outage degrades the task to the
/// silent composed video instead of failing it.
pub struct NarratorNode;

/// All scene lines in id order, space separated.
pub fn narration_text(state: &TaskState) -> String {
    state
        .scenes_in_order()
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Seconds of last-frame hold needed so the video covers the narration.
pub fn pad_seconds(video_secs: f64, audio_secs: f64) -> f64 {
    (audio_secs - video_secs).max(0.0)
}

fn composed_url(state: &TaskState) -> Result<String> {
    state
        .composed_artifact_url
        .get()
        .cloned()
        .ok_or_else(|| PipelineError::Graph("no composed video in state".to_string()))
}

#[async_trait]
impl NodeFunction for NarratorNode {
    async fn execute(&self, state: &TaskState, ctx: &RunContext<'_>) -> Result<StateUpdate> {
        let composed = composed_url(state)?;
        ctx.progress.report(Step::Narrating, 0.0, "Synthesizing narration");

        match ctx.services.narrator.synthesize(&narration_text(state)).await {
            Ok(audio_url) => Ok(StateUpdate {
                audio_url: Some(audio_url),
                ..StateUpdate::new().with_step(Step::AddingAudio)
            }),
            Err(CollaboratorError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    "🔇 Task {}: narration unavailable, delivering silent video: {}",
                    state.task_id,
                    e
                );
                Ok(StateUpdate {
                    final_artifact_url: Some(composed),
                    ..StateUpdate::new()
                        .with_step(Step::Done)
                        .with_warning(format!("Narration skipped: {}", e))
                })
            }
        }
    }
}

/// Lays the narration (and optional background track) over the composed
/// video and publishes the result.
pub struct AddAudioNode;

#[async_trait]
impl NodeFunction for AddAudioNode {
    async fn execute(&self, state: &TaskState, ctx: &RunContext<'_>) -> Result<StateUpdate> {
        let video = composed_url(state)?;
        let voice = state
            .audio_url
            .get()
            .cloned()
            .ok_or_else(|| PipelineError::Graph("no narration audio in state".to_string()))?;
        let muxer = &ctx.services.muxer;

        let video_secs = muxer.probe_duration(&video).await?;
        let audio_secs = muxer.probe_duration(&voice).await?;
        let pad = pad_seconds(video_secs, audio_secs);
        if pad > 0.0 {
            tracing::info!(
                "⏱️ Task {}: narration {:.2}s exceeds video {:.2}s, holding last frame {:.2}s",
                state.task_id,
                audio_secs,
                video_secs,
                pad
            );
        }

        ctx.progress.report(Step::AddingAudio, 0.0, "Mixing audio");
        let request = MixRequest {
            video,
            voice,
            bgm: ctx.config.bgm_path.clone(),
            bgm_volume: ctx.config.bgm_volume,
            pad_video_secs: pad,
        };
        let mixed = muxer.mix(&request).await?;
        let final_url = ctx
            .services
            .store
            .upload_file(Path::new(&mixed), "video/mp4")
            .await?;

        tracing::info!("✅ Task {}: final video {}", state.task_id, final_url);
        Ok(StateUpdate {
            final_artifact_url: Some(final_url),
            ..StateUpdate::new().with_step(Step::Done)
        })
    }
}
