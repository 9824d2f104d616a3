// src/services/mod.rs
//! Collaborator interfaces consumed by the pipeline, plus their production
//! implementations. Everything is injected into the coordinator as trait
//! objects so tests can substitute doubles.

use crate::config::Settings;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub mod ffmpeg;
pub mod image_gen;
pub mod llm;
pub mod storage;
pub mod tts;
pub mod video_gen;

pub type ServiceResult<T> = Result<T, CollaboratorError>;

/// Writer output: the scene list exactly as the language model produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDraft {
    pub scenes: Vec<SceneDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDraft {
    pub id: u32,
    pub text: String,
    #[serde(rename = "type")]
    pub scene_type: String,
    pub duration: f64,
    pub emotion: String,
    pub image_prompt: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Fails with [`CollaboratorError::Parse`] when the output is not the
    /// expected JSON shape.
    async fn generate_structured(&self, prompt: &str, system_prompt: &str) -> ServiceResult<ScriptDraft>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Upstream locator, valid for a short time.
    pub transient_url: String,
    /// Re-hosted locator that stays retrievable.
    pub durable_url: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, seed: u32, reference_images: &[Vec<u8>]) -> ServiceResult<GeneratedImage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoJobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoJobPoll {
    pub status: VideoJobStatus,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn create_job(&self, image_url: &str, prompt: &str, duration: f64) -> ServiceResult<String>;

    async fn poll(&self, job_id: &str) -> ServiceResult<VideoJobPoll>;

    /// Fetch a finished clip from its upstream (short-lived) locator.
    async fn download(&self, result_url: &str) -> ServiceResult<Vec<u8>>;
}

#[async_trait]
pub trait Narrator: Send + Sync {
    /// Returns a locator for the synthesized audio.
    async fn synthesize(&self, text: &str) -> ServiceResult<String>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> ServiceResult<String>;

    async fn upload_file(&self, path: &Path, content_type: &str) -> ServiceResult<String> {
        let bytes = tokio::fs::read(path).await?;
        self.upload(bytes, content_type).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    Video,
    /// Still image held for the clip's duration.
    Still,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaClip {
    pub uri: String,
    pub kind: ClipKind,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixRequest {
    pub video: String,
    pub voice: String,
    pub bgm: Option<String>,
    pub bgm_volume: f64,
    /// Seconds to extend the video by holding its last frame.
    pub pad_video_secs: f64,
}

#[async_trait]
pub trait Muxer: Send + Sync {
    async fn probe_duration(&self, uri: &str) -> ServiceResult<f64>;

    /// Concatenate clips in the given order; returns the output locator.
    async fn concat(&self, clips: &[MediaClip]) -> ServiceResult<String>;

    async fn mix(&self, request: &MixRequest) -> ServiceResult<String>;
}

/// Every collaborator the pipeline talks to.
#[derive(Clone)]
pub struct Services {
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub videos: Arc<dyn VideoGenerator>,
    pub narrator: Arc<dyn Narrator>,
    pub store: Arc<dyn ObjectStore>,
    pub muxer: Arc<dyn Muxer>,
}

impl Services {
    /// Production collaborators: Ark generation APIs, ElevenLabs narration,
    /// local file storage and ffmpeg.
    pub fn from_settings(settings: &Settings) -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(storage::LocalObjectStore::new(
            settings.output_dir.join("assets"),
            settings.public_base_url.clone(),
        ));

        let narrator: Arc<dyn Narrator> = match &settings.elevenlabs_api_key {
            Some(key) => Arc::new(tts::ElevenLabsNarrator::new(
                key.clone(),
                settings.elevenlabs_voice_id.clone(),
                store.clone(),
            )),
            None => {
                tracing::warn!("ELEVENLABS_API_KEY not found. Videos will be delivered without narration.");
                Arc::new(UnavailableNarrator)
            }
        };

        Self {
            text: Arc::new(llm::ArkTextClient::new(
                settings.ark_api_key.clone(),
                settings.ark_base_url.clone(),
                settings.llm_model.clone(),
            )),
            images: Arc::new(image_gen::ArkImageClient::new(
                settings.ark_api_key.clone(),
                settings.ark_base_url.clone(),
                settings.image_model.clone(),
                settings.image_size.clone(),
                store.clone(),
            )),
            videos: Arc::new(video_gen::ArkVideoClient::new(
                settings.ark_api_key.clone(),
                settings.ark_base_url.clone(),
                settings.video_model.clone(),
            )),
            narrator,
            store,
            muxer: Arc::new(ffmpeg::FfmpegMuxer::from_size(
                settings.output_dir.clone(),
                &settings.image_size,
            )),
        }
    }
}

/// Stand-in when no TTS credentials are configured; always fails, which the
/// pipeline treats as a narration outage.
pub struct UnavailableNarrator;

#[async_trait]
impl Narrator for UnavailableNarrator {
    async fn synthesize(&self, _text: &str) -> ServiceResult<String> {
        Err(CollaboratorError::Permanent("no narrator configured".to_string()))
    }
}
