// Dispatch - fan-out of per-scene unit tasks and the join barrier
use super::graph::RunContext;
use super::state::{ResultMap, SceneId, Step, TaskState, UnitResult};
use crate::error::{CollaboratorError, PipelineError, Result};
use crate::services::video_gen::await_job;
use crate::services::ServiceResult;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Input of one unit task. Units never see the shared state.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTask {
    pub scene_id: SceneId,
    pub prompt: String,
    pub seed: u32,
    /// Image the unit animates; only set for video units.
    pub source_url: Option<String>,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutput {
    pub artifact_url: String,
    pub transient_url: Option<String>,
}

/// One retryable call to a generation collaborator.
#[async_trait]
pub trait UnitWorker: Send + Sync {
    fn label(&self) -> &'static str;

    async fn run(&self, unit: &UnitTask, ctx: &RunContext<'_>) -> ServiceResult<UnitOutput>;
}

/// One unit per scene that has no image result yet.
pub fn image_units(state: &TaskState) -> Vec<UnitTask> {
    state
        .scenes
        .iter()
        .filter(|scene| !state.image_results.contains_key(&scene.id))
        .map(|scene| UnitTask {
            scene_id: scene.id,
            prompt: scene.image_prompt.clone(),
            seed: *state.style_seed,
            source_url: None,
            duration: scene.duration,
        })
        .collect()
}

/// One unit per scene with a usable (transient) image and no video result yet.
/// Clip length is capped at `max_clip_seconds`.
pub fn video_units(state: &TaskState, max_clip_seconds: f64) -> Vec<UnitTask> {
    state
        .scenes
        .iter()
        .filter(|scene| !state.video_results.contains_key(&scene.id))
        .filter_map(|scene| {
            let source = scene.image_transient_url.as_ref().filter(|url| !url.is_empty())?;
            Some(UnitTask {
                scene_id: scene.id,
                prompt: scene.image_prompt.clone(),
                seed: *state.style_seed,
                source_url: Some(source.clone()),
                duration: scene.duration.min(max_clip_seconds),
            })
        })
        .collect()
}

/// Run every unit concurrently (bounded by `max_concurrency`), each under the
/// retry policy and the optional per-attempt `unit_timeout`, and wait for all
/// of them. A failed or timed-out unit becomes a failed entry; it never stops
/// its siblings.
///
/// Cancellation drops the whole round.
pub async fn run_fan_out(
    units: Vec<UnitTask>,
    worker: &dyn UnitWorker,
    step: Step,
    ctx: &RunContext<'_>,
) -> Result<ResultMap> {
    let total = units.len();
    let semaphore = ctx.config.max_concurrency.map(Semaphore::new);
    let finished = AtomicUsize::new(0);

    tracing::info!("⚡ Dispatching {} {} units", total, worker.label());

    let semaphore = &semaphore;
    let finished = &finished;
    let tasks = units.into_iter().map(|unit| async move {
        let _permit = match semaphore {
            Some(s) => s.acquire().await.ok(),
            None => None,
        };

        let label = format!("{} scene {}", worker.label(), unit.scene_id);
        let unit_ref = &unit;
        let attempted = ctx
            .config
            .retry
            .retry(&label, ctx.cancel, || async move {
                let run = worker.run(unit_ref, ctx);
                match ctx.config.unit_timeout {
                    Some(limit) => tokio::time::timeout(limit, run)
                        .await
                        .unwrap_or_else(|_| Err(CollaboratorError::Timeout(limit))),
                    None => run.await,
                }
            })
            .await;

        let result = match attempted.result {
            Ok(output) => UnitResult::succeeded(output.artifact_url, output.transient_url, attempted.attempts),
            Err(e) => {
                tracing::warn!("❌ {} failed after {} attempt(s): {}", label, attempted.attempts, e);
                UnitResult::failed(e.to_string(), attempted.attempts)
            }
        };

        let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.progress.report(
            step,
            done as f64 / total.max(1) as f64,
            format!("{} {}/{}", worker.label(), done, total),
        );
        (unit.scene_id, result)
    });

    // Barrier: every unit resolves before the round is merged.
    let results = join_all(tasks).await;

    if ctx.cancel.is_cancelled() {
        tracing::warn!("🛑 {} round cancelled; discarding {} results", worker.label(), results.len());
        return Err(PipelineError::Cancelled);
    }

    Ok(results.into_iter().collect())
}

/// Renders a scene's still through the image collaborator.
pub struct ImageWorker;

#[async_trait]
impl UnitWorker for ImageWorker {
    fn label(&self) -> &'static str {
        "image"
    }

    async fn run(&self, unit: &UnitTask, ctx: &RunContext<'_>) -> ServiceResult<UnitOutput> {
        let image = ctx.services.images.generate(&unit.prompt, unit.seed, &[]).await?;
        Ok(UnitOutput {
            artifact_url: image.durable_url,
            transient_url: Some(image.transient_url),
        })
    }
}

/// Animates a scene's still: create a job, poll it to completion, then
/// re-host the clip so the artifact outlives the upstream link.
pub struct VideoWorker;

#[async_trait]
impl UnitWorker for VideoWorker {
    fn label(&self) -> &'static str {
        "video"
    }

    async fn run(&self, unit: &UnitTask, ctx: &RunContext<'_>) -> ServiceResult<UnitOutput> {
        let source = unit
            .source_url
            .as_deref()
            .ok_or_else(|| CollaboratorError::Permanent(format!("Scene {} has no source image", unit.scene_id)))?;

        let videos = ctx.services.videos.as_ref();
        let job_id = videos.create_job(source, &unit.prompt, unit.duration).await?;
        let url = await_job(
            videos,
            &job_id,
            ctx.config.poll_interval,
            ctx.config.poll_timeout,
            ctx.cancel,
        )
        .await?;

        let bytes = videos.download(&url).await?;
        let artifact_url = ctx.services.store.upload(bytes, "video/mp4").await?;
        tracing::debug!("Scene {} clip re-hosted: {} -> {}", unit.scene_id, url, artifact_url);

        Ok(UnitOutput {
            artifact_url,
            transient_url: Some(url),
        })
    }
}
