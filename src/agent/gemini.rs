use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use rig::streaming::StreamedAssistantContent;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{GenerationClient, TextStream};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{ChatTurn, MessageRole};

/// Replays stored turns as rig chat history.
fn to_rig_history(history: &[ChatTurn]) -> Vec<RigMessage> {
    history
        .iter()
        .map(|turn| match turn.role {
            MessageRole::User => RigMessage::user(turn.content.clone()),
            MessageRole::Model => RigMessage::assistant(turn.content.clone()),
        })
        .collect()
}

// Imagen `:predict` wire types
#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: [PredictInstance<'a>; 1],
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
    output_mime_type: &'static str,
    aspect_ratio: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Talks to Gemini directly: rig for streamed chat, REST for Imagen.
#[derive(Clone)]
pub struct GeminiAgentService {
    api_key: Option<String>,
    text_model: String,
    image_model: String,
    base_url: String,
    http: Client,
}

impl GeminiAgentService {
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.api_key.clone(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    fn api_key(&self) -> Result<&str, AppError> {
        self.api_key.as_deref().ok_or(AppError::MissingApiKey)
    }

    fn client(&self) -> Result<gemini::Client, AppError> {
        gemini::Client::builder()
            .api_key(self.api_key()?)
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build Gemini client: {e}")))
    }
}

#[async_trait]
impl GenerationClient for GeminiAgentService {
    async fn ensure_configured(&self) -> Result<(), AppError> {
        self.api_key().map(|_| ())
    }

    async fn generate_text_stream(
        &self,
        history: &[ChatTurn],
        new_message: &str,
    ) -> Result<TextStream, AppError> {
        let model = self.client()?.completion_model(self.text_model.as_str());

        let mut response = model
            .completion_request(RigMessage::user(new_message.to_string()))
            .messages(to_rig_history(history))
            .stream()
            .await
            .map_err(|e| {
                error!(model = %self.text_model, "Gemini stream failed to open: {e}");
                AppError::transport(e.to_string())
            })?;

        let stream = async_stream::stream! {
            while let Some(item) = response.next().await {
                match item {
                    Ok(StreamedAssistantContent::Text(text)) => {
                        if !text.text.is_empty() {
                            yield Ok(text.text);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Gemini stream emitted an error chunk: {e}");
                        yield Err(AppError::transport(e.to_string()));
                        return;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/models/{}:predict", self.base_url, self.image_model);
        let body = PredictRequest {
            instances: [PredictInstance { prompt }],
            parameters: PredictParameters {
                sample_count: 1,
                output_mime_type: "image/jpeg",
                aspect_ratio: "1:1",
            },
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            error!(status = status.as_u16(), model = %self.image_model, "Image generation rejected: {message}");
            return Err(AppError::Backend { status: status.as_u16(), message });
        }

        let payload: PredictResponse = response.json().await?;
        let bytes = payload
            .predictions
            .into_iter()
            .find_map(|p| p.bytes_base64_encoded)
            .ok_or_else(|| AppError::empty_result("Image generation"))?;

        debug!(model = %self.image_model, "Image generated");
        Ok(format!("data:image/jpeg;base64,{bytes}"))
    }
}
