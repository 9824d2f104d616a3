// src/services/llm.rs
//! Chat-completions client (OpenAI-compatible, as served by Volcengine Ark)
//! used by the writer stage to obtain a structured scene list.

use super::{ScriptDraft, ServiceResult, TextGenerator};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct ArkTextClient {
    api_key: String,
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ArkTextClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    /// Plain completion with transport-level retries on transient failures.
    pub async fn complete(&self, prompt: &str, system_prompt: &str) -> ServiceResult<String> {
        let full_prompt = format!("{}\n\nRespond with JSON only.", prompt);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: &full_prompt },
            ],
            temperature: 0.7,
            max_tokens: 4000,
        };

        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(180)),
            ..Default::default()
        };

        let operation = || async {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .timeout(Duration::from_secs(120))
                .json(&request)
                .send()
                .await
                .map_err(|e| classify(CollaboratorError::from(e)))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| backoff::Error::permanent(CollaboratorError::from(e)))?;

            if !status.is_success() {
                return Err(classify(CollaboratorError::from_status(status.as_u16(), &body)));
            }

            serde_json::from_str::<ChatResponse>(&body).map_err(|e| {
                backoff::Error::permanent(CollaboratorError::Parse(format!(
                    "Failed to parse completion: {}",
                    e
                )))
            })
        };

        let response = retry(backoff_config, operation).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::Parse("No text content in completion".to_string()))
    }
}

fn classify(e: CollaboratorError) -> backoff::Error<CollaboratorError> {
    if e.is_retryable() {
        tracing::warn!("Text generation transient error (retrying): {}", e);
        backoff::Error::transient(e)
    } else {
        tracing::error!("Text generation permanent error: {}", e);
        backoff::Error::permanent(e)
    }
}

lazy_static::lazy_static! {
    static ref FENCED_JSON: Option<Regex> = Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n\s*```").ok();
}

/// Pull a JSON object out of model output: the raw text, a fenced ```json
/// block, or the outermost `{...}` span, in that order.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        return Some(value);
    }

    if let Some(caps) = FENCED_JSON.as_ref().and_then(|re| re.captures(text)) {
        if let Ok(value) = serde_json::from_str(caps[1].trim()) {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Decode a scene list out of model output; anything that does not match the
/// shape is a parse error rather than a guess.
pub fn parse_script(text: &str) -> ServiceResult<ScriptDraft> {
    let value = extract_json(text).ok_or_else(|| {
        let preview: String = text.chars().take(200).collect();
        CollaboratorError::Parse(format!("No JSON object in model output: {}", preview))
    })?;
    serde_json::from_value(value)
        .map_err(|e| CollaboratorError::Parse(format!("Scene list does not match schema: {}", e)))
}

#[async_trait]
impl TextGenerator for ArkTextClient {
    async fn generate_structured(&self, prompt: &str, system_prompt: &str) -> ServiceResult<ScriptDraft> {
        let text = self.complete(prompt, system_prompt).await?;
        parse_script(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENES: &str = r#"{"scenes":[{"id":1,"text":"a","type":"hook","duration":2.5,"emotion":"calm","image_prompt":"sea"}]}"#;

    #[test]
    fn test_parse_raw_json() {
        let draft = parse_script(SCENES).unwrap();
        assert_eq!(draft.scenes.len(), 1);
        assert_eq!(draft.scenes[0].scene_type, "hook");
        assert_eq!(draft.scenes[0].duration, 2.5);
    }

    #[test]
    fn test_fence_pattern_compiles() {
        assert!(FENCED_JSON.is_some());
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = format!("Here you go:\n```json\n{}\n```\nEnjoy.", SCENES);
        assert_eq!(parse_script(&text).unwrap().scenes[0].id, 1);
    }

    #[test]
    fn test_parse_embedded_object() {
        let text = format!("Sure! {} Hope that helps.", SCENES);
        assert_eq!(parse_script(&text).unwrap().scenes[0].image_prompt, "sea");
    }

    #[test]
    fn test_wrong_shape_is_parse_error() {
        let err = parse_script(r#"{"scenes":[{"id":1,"text":"a"}]}"#).unwrap_err();
        assert!(matches!(err, CollaboratorError::Parse(_)));
    }

    #[test]
    fn test_no_json_is_parse_error() {
        assert!(matches!(
            parse_script("I cannot help with that."),
            Err(CollaboratorError::Parse(_))
        ));
    }
}
