pub mod gemini;
pub mod proxy;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::errors::AppError;
use crate::models::ChatTurn;

pub use self::gemini::GeminiAgentService;
pub use self::proxy::ProxyGenerationClient;

/// Lazy, finite, non-restartable sequence of text deltas.
pub type TextStream = BoxStream<'static, Result<String, AppError>>;

/// Remote text/image generation backend.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Credential check, run before any durable write.
    async fn ensure_configured(&self) -> Result<(), AppError> {
        Ok(())
    }

    /// Opens a reply stream for `new_message` given the prior `history`.
    /// Errors may surface when opening or from any item of the stream.
    async fn generate_text_stream(
        &self,
        history: &[ChatTurn],
        new_message: &str,
    ) -> Result<TextStream, AppError>;

    /// Returns an image reference (a data URI for the bundled backends).
    async fn generate_image(&self, prompt: &str) -> Result<String, AppError>;
}
