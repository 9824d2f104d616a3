// src/services/video_gen.rs
//! Image-to-video generation: a task-based upstream API plus the bounded,
//! cancellable poll loop that waits for a job to settle.

use super::{ServiceResult, VideoGenerator, VideoJobPoll, VideoJobStatus};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ArkVideoClient {
    api_key: String,
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize, Debug)]
struct CreateTaskResponse {
    id: String,
}

#[derive(Deserialize, Debug)]
struct TaskResponse {
    status: String,
    content: Option<TaskContent>,
    error: Option<TaskError>,
}

#[derive(Deserialize, Debug)]
struct TaskContent {
    video_url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TaskError {
    message: Option<String>,
}

impl ArkVideoClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

fn parse_status(raw: &str) -> VideoJobStatus {
    match raw {
        "succeeded" => VideoJobStatus::Succeeded,
        "failed" | "cancelled" | "expired" => VideoJobStatus::Failed,
        "running" | "processing" => VideoJobStatus::Processing,
        _ => VideoJobStatus::Pending,
    }
}

#[async_trait]
impl VideoGenerator for ArkVideoClient {
    async fn create_job(&self, image_url: &str, prompt: &str, duration: f64) -> ServiceResult<String> {
        let motion_prompt = format!(
            "{} --duration {} --camerafixed false",
            prompt,
            duration.round().max(1.0) as u32
        );
        let body = json!({
            "model": self.model,
            "content": [
                { "type": "text", "text": motion_prompt },
                { "type": "image_url", "image_url": { "url": image_url } },
            ],
        });

        let response = self
            .client
            .post(format!("{}/contents/generations/tasks", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(60))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CollaboratorError::from_status(status.as_u16(), &text));
        }
        let created: CreateTaskResponse = serde_json::from_str(&text)
            .map_err(|e| CollaboratorError::Parse(format!("Failed to parse task id: {}", e)))?;

        tracing::info!("🎞️ Video job created: {}", created.id);
        Ok(created.id)
    }

    async fn download(&self, result_url: &str) -> ServiceResult<Vec<u8>> {
        let response = self
            .client
            .get(result_url)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::from_status(status.as_u16(), "clip download failed"));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn poll(&self, job_id: &str) -> ServiceResult<VideoJobPoll> {
        let response = self
            .client
            .get(format!("{}/contents/generations/tasks/{}", self.base_url, job_id))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CollaboratorError::from_status(status.as_u16(), &text));
        }
        let task: TaskResponse = serde_json::from_str(&text)
            .map_err(|e| CollaboratorError::Parse(format!("Failed to parse task status: {}", e)))?;

        Ok(VideoJobPoll {
            status: parse_status(&task.status),
            result_url: task.content.and_then(|c| c.video_url),
            error: task.error.and_then(|e| e.message),
        })
    }
}

/// Poll `job_id` every `interval` until it settles, `timeout` elapses, or
/// `cancel` fires. Transient poll errors are logged and polling continues.
pub async fn await_job(
    generator: &dyn VideoGenerator,
    job_id: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ServiceResult<String> {
    let wait = async {
        loop {
            match generator.poll(job_id).await {
                Ok(poll) => match poll.status {
                    VideoJobStatus::Succeeded => {
                        return poll.result_url.ok_or_else(|| {
                            CollaboratorError::Parse(format!("Job {} succeeded without a result url", job_id))
                        });
                    }
                    VideoJobStatus::Failed => {
                        return Err(CollaboratorError::Permanent(format!(
                            "Video job {} failed: {}",
                            job_id,
                            poll.error.unwrap_or_else(|| "unknown error".to_string())
                        )));
                    }
                    VideoJobStatus::Pending | VideoJobStatus::Processing => {
                        tracing::debug!("Video job {} still {:?}", job_id, poll.status);
                    }
                },
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Polling video job {} failed (will poll again): {}", job_id, e);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
        outcome = tokio::time::timeout(timeout, wait) => match outcome {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(timeout)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports `Processing` for `ready_after` polls, then the final status.
    struct ScriptedJob {
        polls: AtomicU32,
        ready_after: u32,
        outcome: VideoJobStatus,
    }

    #[async_trait]
    impl VideoGenerator for ScriptedJob {
        async fn create_job(&self, _: &str, _: &str, _: f64) -> ServiceResult<String> {
            Ok("job".to_string())
        }

        async fn download(&self, _: &str) -> ServiceResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn poll(&self, _: &str) -> ServiceResult<VideoJobPoll> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n < self.ready_after {
                return Ok(VideoJobPoll {
                    status: VideoJobStatus::Processing,
                    result_url: None,
                    error: None,
                });
            }
            Ok(VideoJobPoll {
                status: self.outcome,
                result_url: Some("https://cdn/clip.mp4".to_string()),
                error: Some("nsfw".to_string()),
            })
        }
    }

    fn job(ready_after: u32, outcome: VideoJobStatus) -> ScriptedJob {
        ScriptedJob {
            polls: AtomicU32::new(0),
            ready_after,
            outcome,
        }
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let g = job(2, VideoJobStatus::Succeeded);
        let url = await_job(&g, "job", Duration::from_millis(1), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(url, "https://cdn/clip.mp4");
        assert_eq!(g.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_job_is_permanent() {
        let g = job(0, VideoJobStatus::Failed);
        let err = await_job(&g, "job", Duration::from_millis(1), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Permanent(ref m) if m.contains("nsfw")));
    }

    #[tokio::test]
    async fn test_times_out() {
        let g = job(u32::MAX, VideoJobStatus::Succeeded);
        let err = await_job(&g, "job", Duration::from_millis(5), Duration::from_millis(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_polling() {
        let g = job(u32::MAX, VideoJobStatus::Succeeded);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = await_job(&g, "job", Duration::from_millis(2), Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, CollaboratorError::Cancelled);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(parse_status("queued"), VideoJobStatus::Pending);
        assert_eq!(parse_status("running"), VideoJobStatus::Processing);
        assert_eq!(parse_status("succeeded"), VideoJobStatus::Succeeded);
        assert_eq!(parse_status("expired"), VideoJobStatus::Failed);
    }
}
