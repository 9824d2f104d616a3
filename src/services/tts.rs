// src/services/tts.rs
//! Eleven Labs text-to-speech narrator. Audio bytes are persisted through the
//! object store and the resulting locator is handed back to the pipeline.

use super::{Narrator, ObjectStore, ServiceResult};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub struct ElevenLabsNarrator {
    api_key: String,
    client: Client,
    base_url: String,
    voice_id: String,
    model_id: String,
    store: Arc<dyn ObjectStore>,
}

#[derive(Serialize, Debug)]
pub struct TextToSpeechRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_settings: Option<VoiceSettings>,
}

#[derive(Serialize, Debug)]
pub struct VoiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl ElevenLabsNarrator {
    pub fn new(api_key: String, voice_id: String, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            voice_id,
            model_id: "eleven_multilingual_v2".to_string(),
            store,
        }
    }

    /// Generate speech from text using the configured voice
    pub async fn text_to_speech(&self, text: &str) -> ServiceResult<Vec<u8>> {
        let url = format!("{}/text-to-speech/{}", self.base_url, self.voice_id);

        let request_body = TextToSpeechRequest {
            text: text.to_string(),
            model_id: Some(self.model_id.clone()),
            voice_settings: Some(VoiceSettings {
                stability: Some(0.5),
                similarity_boost: Some(0.75),
                speed: Some(0.9),
            }),
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .query(&[("output_format", "mp3_44100_128")])
            .timeout(Duration::from_secs(120))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CollaboratorError::from_status(
                status.as_u16(),
                &format!("Eleven Labs TTS: {}", error_text),
            ));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Narrator for ElevenLabsNarrator {
    async fn synthesize(&self, text: &str) -> ServiceResult<String> {
        if text.trim().is_empty() {
            return Err(CollaboratorError::Permanent("Nothing to narrate".to_string()));
        }
        let audio = self.text_to_speech(text).await?;
        tracing::info!("🎙️ Narration synthesized ({} bytes)", audio.len());
        self.store.upload(audio, "audio/mpeg").await
    }
}
