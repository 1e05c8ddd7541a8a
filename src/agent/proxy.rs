use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::{GenerationClient, TextStream};
use crate::errors::AppError;
use crate::models::ChatTurn;

/// Error code the proxy attaches when the server has no API key.
pub const MISSING_API_KEY_CODE: &str = "missing_api_key";

// ── Wire format shared with `routes::gemini_routes` ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationRequest {
    Text {
        #[serde(default)]
        history: Vec<ChatTurn>,
        #[serde(rename = "newMessage")]
        new_message: String,
    },
    Image {
        prompt: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Reassembles UTF-8 text from byte chunks that may split a code point.
#[derive(Debug, Default)]
pub(crate) struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    /// Feeds a chunk and returns the text that is complete so far.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<String, AppError> {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(AppError::transport(format!("Invalid UTF-8 in reply stream: {e}"))),
        };
        let tail = self.pending.split_off(complete);
        let head = std::mem::replace(&mut self.pending, tail);
        String::from_utf8(head).map_err(|e| AppError::transport(e.to_string()))
    }

    pub(crate) fn finish(&self) -> Result<(), AppError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(AppError::transport("Reply stream ended inside a UTF-8 sequence"))
        }
    }
}

/// Generation client that goes through a `genlux serve` instance, keeping the
/// API key on the server.
#[derive(Clone)]
pub struct ProxyGenerationClient {
    endpoint: String,
    config_endpoint: String,
    http: Client,
}

impl ProxyGenerationClient {
    pub fn new(base_url: &str) -> Self {
        let endpoint = format!("{}/api/gemini", base_url.trim_end_matches('/'));
        Self {
            config_endpoint: format!("{endpoint}/config"),
            endpoint,
            http: Client::new(),
        }
    }

    async fn post(&self, request: &GenerationRequest) -> Result<Response, AppError> {
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        self.check(response).await
    }

    /// Passes successful responses through and decodes the proxy's error body otherwise.
    async fn check(&self, response: Response) -> Result<Response, AppError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or(ErrorBody { message: text, code: None });
        if body.code.as_deref() == Some(MISSING_API_KEY_CODE) {
            warn!(endpoint = %self.endpoint, "Proxy reports missing API key");
            return Err(AppError::MissingApiKey);
        }
        error!(endpoint = %self.endpoint, status = status.as_u16(), "Proxy request failed: {}", body.message);
        Err(AppError::Backend { status: status.as_u16(), message: body.message })
    }
}

#[async_trait]
impl GenerationClient for ProxyGenerationClient {
    /// Asks the proxy whether it holds an API key; nothing is generated.
    async fn ensure_configured(&self) -> Result<(), AppError> {
        let response = self.http.get(&self.config_endpoint).send().await?;
        self.check(response).await.map(|_| ())
    }

    async fn generate_text_stream(
        &self,
        history: &[ChatTurn],
        new_message: &str,
    ) -> Result<TextStream, AppError> {
        let request = GenerationRequest::Text {
            history: history.to_vec(),
            new_message: new_message.to_string(),
        };
        let mut body = self.post(&request).await?.bytes_stream();

        let stream = async_stream::stream! {
            let mut chunker = Utf8Chunker::default();
            while let Some(chunk) = body.next().await {
                match chunk.map_err(AppError::from).and_then(|bytes| chunker.push(&bytes)) {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => yield Ok(text),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            if let Err(e) = chunker.finish() {
                yield Err(e);
            }
        };
        Ok(stream.boxed())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, AppError> {
        let request = GenerationRequest::Image { prompt: prompt.to_string() };
        let payload: ImageResponse = self.post(&request).await?.json().await?;
        if payload.image_url.is_empty() {
            return Err(AppError::empty_result("Image generation"));
        }
        Ok(payload.image_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;

    #[test]
    fn chunker_holds_back_split_code_points() {
        let bytes = "héllo".as_bytes();
        let mut chunker = Utf8Chunker::default();
        // 'é' is two bytes; split between them.
        assert_eq!(chunker.push(&bytes[..2]).unwrap(), "h");
        assert_eq!(chunker.push(&bytes[2..]).unwrap(), "éllo");
        assert!(chunker.finish().is_ok());
    }

    #[test]
    fn chunker_rejects_invalid_bytes() {
        let mut chunker = Utf8Chunker::default();
        assert!(chunker.push(&[0x61, 0xff, 0x62]).is_err());
    }

    #[test]
    fn truncated_sequence_fails_on_finish() {
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(&[0xe2, 0x82]).unwrap(), "");
        assert!(chunker.finish().is_err());
    }

    #[test]
    fn text_request_uses_camel_case_new_message() {
        let request = GenerationRequest::Text {
            history: vec![ChatTurn { role: MessageRole::Model, content: "hi".into() }],
            new_message: "next".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["newMessage"], "next");
        assert_eq!(json["history"][0]["role"], "model");
    }

    #[test]
    fn image_request_parses_from_proxy_body() {
        let parsed: GenerationRequest =
            serde_json::from_str(r#"{"type":"image","prompt":"a red cube"}"#).unwrap();
        assert!(matches!(parsed, GenerationRequest::Image { ref prompt } if prompt == "a red cube"));
    }
}
