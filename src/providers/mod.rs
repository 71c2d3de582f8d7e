//! Provider adapters: one uniform call shape over every LLM backend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::{ConfigError, ProviderFailure};
use crate::prompt::Prompt;

pub mod chat;
pub mod groq;
pub mod openai;
pub mod arcee;

pub use arcee::ArceeAdapter;
pub use groq::GroqAdapter;
pub use openai::OpenAiAdapter;

/// Raw text from one adapter call, or why there is none
pub type ProviderResponse = Result<String, ProviderFailure>;

/// A single LLM backend.
///
/// Implementations must be safe to call from several tasks at once and
/// must give up once `timeout` has elapsed.
#[async_trait]
pub trait ProviderAdapter: Send + Sync
{   /// Configured name, reported as the artifact's provider
    fn name(&self) -> &str;

    async fn send(
      &self
    , prompt: &Prompt
    , timeout: Duration
    ) -> ProviderResponse;
}

/// Build the adapter matching `settings.kind`
pub fn adapter_from_settings(
  settings: &ProviderSettings
) -> Result<Arc<dyn ProviderAdapter>, ConfigError>
{   let adapter: Arc<dyn ProviderAdapter> = match settings.kind
    {   ProviderKind::Groq => Arc::new(GroqAdapter::from_settings(settings)?)
      , ProviderKind::OpenAi => Arc::new(OpenAiAdapter::from_settings(settings)?)
      , ProviderKind::Arcee => Arc::new(ArceeAdapter::from_settings(settings)?)
    };
    Ok(adapter)
}
