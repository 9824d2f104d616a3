// src/services/storage.rs
//! Filesystem-backed object store. Files land under `root`; the returned
//! locator is `public_base_url/<name>` when a base URL is configured and the
//! absolute file path otherwise.

use super::{ObjectStore, ServiceResult};
use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    async fn locator(&self, name: &str, path: PathBuf) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, name),
            None => tokio::fs::canonicalize(&path)
                .await
                .unwrap_or(path)
                .to_string_lossy()
                .to_string(),
        }
    }
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => "mp4",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> ServiceResult<String> {
        tokio::fs::create_dir_all(&self.root).await?;

        let name = format!("{}.{}", Uuid::new_v4().simple(), extension_for(content_type));
        let path = self.root.join(&name);
        tokio::fs::write(&path, &bytes).await?;

        tracing::info!("💾 Stored {} bytes ({}) as {}", bytes.len(), content_type, name);
        Ok(self.locator(&name, path).await)
    }
}
