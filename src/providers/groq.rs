//! Groq backend (OpenAI-compatible chat completions)

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::ConfigError;
use crate::prompt::Prompt;
use crate::providers::chat::{AdapterConfig, ChatCompletionsClient};
use crate::providers::{ProviderAdapter, ProviderResponse};

pub const GROQ_API_BASE: &str
  = "https://api.groq.com/openai/v1";
pub const GROQ_DEFAULT_MODEL: &str
  = "meta-llama/llama-4-maverick-17b-128e-instruct";
const GROQ_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct GroqAdapter
{   client: ChatCompletionsClient
}

impl GroqAdapter
{   pub fn from_settings(
      settings: &ProviderSettings
    ) -> Result<Self, ConfigError>
    {   debug!("Creating GroqAdapter '{}'", settings.name);
        let config = AdapterConfig::from_settings(
          settings,
          GROQ_API_BASE,
          GROQ_DEFAULT_MODEL,
          GROQ_DEFAULT_TIMEOUT
        );
        Ok(GroqAdapter { client: ChatCompletionsClient::new(config)? })
    }

    /// Adapter named "groq" with default endpoint and model
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, ConfigError>
    {   Self::from_settings(
          &ProviderSettings::new("groq", ProviderKind::Groq)
            .with_api_key(api_key)
        )
    }

    pub fn model(&self) -> &str
    {   self.client.model()
    }
}

#[async_trait]
impl ProviderAdapter for GroqAdapter
{   fn name(&self) -> &str
    {   self.client.name()
    }

    async fn send(
      &self
    , prompt: &Prompt
    , timeout: Duration
    ) -> ProviderResponse
    {   self.client.complete(prompt, timeout).await
    }
}
