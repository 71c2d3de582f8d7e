//! Arcee Conductor backend; the `auto` model lets Conductor route the call

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::config::ProviderSettings;
use crate::error::ConfigError;
use crate::prompt::Prompt;
use crate::providers::chat::{AdapterConfig, ChatCompletionsClient};
use crate::providers::{ProviderAdapter, ProviderResponse};

pub const ARCEE_API_BASE: &str = "https://conductor.arcee.ai/v1";
pub const ARCEE_DEFAULT_MODEL: &str = "auto";
const ARCEE_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct ArceeAdapter
{   client: ChatCompletionsClient
}

impl ArceeAdapter
{   pub fn from_settings(
      settings: &ProviderSettings
    ) -> Result<Self, ConfigError>
    {   debug!("Creating ArceeAdapter '{}'", settings.name);
        let config = AdapterConfig::from_settings(
          settings,
          ARCEE_API_BASE,
          ARCEE_DEFAULT_MODEL,
          ARCEE_DEFAULT_TIMEOUT
        );
        Ok(ArceeAdapter { client: ChatCompletionsClient::new(config)? })
    }
}

#[async_trait]
impl ProviderAdapter for ArceeAdapter
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
