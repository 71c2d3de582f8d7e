//! OpenAI chat completions backend

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::ConfigError;
use crate::prompt::Prompt;
use crate::providers::chat::{AdapterConfig, ChatCompletionsClient};
use crate::providers::{ProviderAdapter, ProviderResponse};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
const OPENAI_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct OpenAiAdapter
{   client: ChatCompletionsClient
}

impl OpenAiAdapter
{   pub fn from_settings(
      settings: &ProviderSettings
    ) -> Result<Self, ConfigError>
    {   debug!("Creating OpenAiAdapter '{}'", settings.name);
        let client = ChatCompletionsClient::new(AdapterConfig::from_settings(
          settings,
          OPENAI_API_BASE,
          OPENAI_DEFAULT_MODEL,
          OPENAI_DEFAULT_TIMEOUT
        ))?;
        Ok(OpenAiAdapter { client })
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, ConfigError>
    {   Self::from_settings(
          &ProviderSettings::new("openai", ProviderKind::OpenAi)
            .with_api_key(api_key)
        )
    }

    pub fn model(&self) -> &str
    {   self.client.model()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter
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
