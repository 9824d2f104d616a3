// src/services/image_gen.rs
//! Text-to-image client. The upstream URL expires quickly, so every image is
//! downloaded and re-hosted through the object store for a durable locator.

use super::{GeneratedImage, ImageGenerator, ObjectStore, ServiceResult};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub struct ArkImageClient {
    api_key: String,
    client: Client,
    base_url: String,
    model: String,
    size: String,
    store: Arc<dyn ObjectStore>,
}

#[derive(Serialize, Debug)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    seed: u32,
    size: &'a str,
    response_format: &'a str,
    watermark: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize, Debug)]
struct ImageData {
    url: Option<String>,
}

impl ArkImageClient {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        size: String,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            size,
            store,
        }
    }

    async fn download(&self, url: &str) -> ServiceResult<(Vec<u8>, String)> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(60))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::from_status(status.as_u16(), "image download failed"));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        Ok((response.bytes().await?.to_vec(), content_type))
    }
}

/// Reference images travel as data URIs.
fn to_data_uri(bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[async_trait]
impl ImageGenerator for ArkImageClient {
    async fn generate(&self, prompt: &str, seed: u32, reference_images: &[Vec<u8>]) -> ServiceResult<GeneratedImage> {
        let request = ImageRequest {
            model: &self.model,
            prompt,
            seed,
            size: &self.size,
            response_format: "url",
            watermark: false,
            image: reference_images.iter().map(|b| to_data_uri(b)).collect(),
        };

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(120))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CollaboratorError::from_status(status.as_u16(), &body));
        }

        let parsed: ImageResponse = serde_json::from_str(&body)
            .map_err(|e| CollaboratorError::Parse(format!("Failed to parse image response: {}", e)))?;
        let transient_url = parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| CollaboratorError::Parse("Image response has no url".to_string()))?;

        let (bytes, content_type) = self.download(&transient_url).await?;
        let durable_url = self.store.upload(bytes, &content_type).await?;

        tracing::debug!("🖼️ Image ready (seed {}): {}", seed, durable_url);
        Ok(GeneratedImage {
            transient_url,
            durable_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_empty_references() {
        let request = ImageRequest {
            model: "m",
            prompt: "p",
            seed: 7,
            size: "1080x1920",
            response_format: "url",
            watermark: false,
            image: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["seed"], 7);
        assert!(json.get("image").is_none());
    }

    #[test]
    fn test_reference_data_uri() {
        assert_eq!(to_data_uri(b"hi"), "data:image/png;base64,aGk=");
    }
}
