//! OpenAI-style chat completions client shared by every HTTP adapter

use std::time::Duration;

use log::{debug, error, trace};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::error::{ConfigError, ProviderFailure};
use crate::prompt::Prompt;
use crate::providers::ProviderResponse;

const ERROR_BODY_LOG_LIMIT: usize = 200;

// ===== Message Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub max_tokens: u32
  , pub temperature: f32
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse
{   #[serde(default)]
    pub choices: Vec<Choice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   pub message: ChoiceMessage
  , #[serde(default)]
    pub finish_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage
{   #[serde(default)]
    pub content: Option<String>
}

// ===== Client =====

/// Everything a chat completions backend needs, resolved from settings
/// and backend defaults
#[derive(Clone)]
pub struct AdapterConfig
{   pub name: String
  , pub base_url: String
  , pub api_key: Option<String>
  , pub model: String
  , pub timeout: Duration
  , pub temperature: f32
  , pub max_tokens: u32
}

impl AdapterConfig
{   /// Resolve settings over backend defaults
    pub fn from_settings(
      settings: &ProviderSettings
    , default_base_url: &str
    , default_model: &str
    , default_timeout: Duration
    ) -> Self
    {   AdapterConfig
        {   name: settings.name.clone()
          , base_url: settings.endpoint
              .clone()
              .unwrap_or_else(|| default_base_url.to_string())
          , api_key: settings.api_key.clone()
          , model: settings.model
              .clone()
              .unwrap_or_else(|| default_model.to_string())
          , timeout: settings.timeout_ms
              .map(Duration::from_millis)
              .unwrap_or(default_timeout)
          , temperature: settings.temperature()
          , max_tokens: settings.max_tokens()
        }
    }
}

impl std::fmt::Debug for AdapterConfig
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {   f.debug_struct("AdapterConfig")
          .field("name", &self.name)
          .field("base_url", &self.base_url)
          .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
          .field("model", &self.model)
          .field("timeout", &self.timeout)
          .finish()
    }
}

/// HTTP client for one configured chat completions backend
#[derive(Debug)]
pub struct ChatCompletionsClient
{   config: AdapterConfig
  , endpoint_url: String
  , http_client: reqwest::Client
}

impl ChatCompletionsClient
{   pub fn new(config: AdapterConfig) -> Result<Self, ConfigError>
    {   if config.name.trim().is_empty()
        {   return Err(ConfigError::Invalid(
              "provider name must not be empty".to_string()
            ));
        }
        if config.base_url.trim().is_empty()
        {   return Err(ConfigError::Invalid(format!(
              "provider '{}' has an empty endpoint",
              config.name
            )));
        }
        let http_client = reqwest::Client::builder()
          .timeout(config.timeout)
          .build()
          .map_err(|e| {
            ConfigError::Invalid(format!(
              "failed to create HTTP client for '{}': {}",
              config.name, e
            ))
          })?;
        let endpoint_url = format!(
          "{}/chat/completions",
          config.base_url.trim_end_matches('/')
        );
        debug!("Created chat client '{}' for {}", config.name, endpoint_url);
        Ok(ChatCompletionsClient
        {   config
          , endpoint_url
          , http_client
        })
    }

    pub fn name(&self) -> &str
    {   &self.config.name
    }

    pub fn model(&self) -> &str
    {   &self.config.model
    }

    pub fn endpoint_url(&self) -> &str
    {   &self.endpoint_url
    }

    /// One completion call bounded by `timeout`, capped at the configured
    /// adapter timeout
    pub async fn complete(
      &self
    , prompt: &Prompt
    , timeout: Duration
    ) -> ProviderResponse
    {   let timeout = timeout.min(self.config.timeout);
        let Some(api_key) = self.config.api_key
          .as_deref()
          .filter(|key| !key.trim().is_empty())
        else
        {   error!("No API key for provider '{}'", self.config.name);
            return Err(ProviderFailure::Unauthorized);
        };

        match tokio::time::timeout(timeout, self.send(prompt, api_key, timeout)).await
        {   Ok(result) => result
          , Err(_) => {
              debug!(
                "Provider '{}' exceeded {:?}",
                self.config.name, timeout
              );
              Err(ProviderFailure::Timeout)
            }
        }
    }

    async fn send(
      &self
    , prompt: &Prompt
    , api_key: &str
    , timeout: Duration
    ) -> ProviderResponse
    {   let request = ChatRequest
        {   model: self.config.model.clone()
          , messages: vec![
              ChatMessage
              {   role: "system".to_string()
                , content: prompt.system_text.clone()
              }
            , ChatMessage
              {   role: "user".to_string()
                , content: prompt.user_text.clone()
              }
            ]
          , max_tokens: prompt.max_tokens.unwrap_or(self.config.max_tokens)
          , temperature: prompt.temperature.unwrap_or(self.config.temperature)
          , stream: false
        };

        trace!(
          "Sending {} chars to '{}' model {}",
          prompt.user_text.len(),
          self.config.name,
          self.config.model
        );

        let response = self.http_client
          .post(&self.endpoint_url)
          .bearer_auth(api_key)
          .header("Content-Type", "application/json")
          .timeout(timeout)
          .json(&request)
          .send()
          .await
          .map_err(map_transport_error)?;

        let status = response.status();
        trace!("Provider '{}' response status: {}", self.config.name, status);

        if !status.is_success()
        {   let body = response.text().await.unwrap_or_default();
            debug!(
              "Provider '{}' error body: {}",
              self.config.name,
              truncate(&body, ERROR_BODY_LOG_LIMIT)
            );
            return Err(map_http_error(status));
        }

        let chat_response: ChatResponse = response
          .json()
          .await
          .map_err(|e| {
            if e.is_timeout()
            {   ProviderFailure::Timeout
            } else
            {   ProviderFailure::Transport(format!("undecodable response: {}", e))
            }
          })?;

        extract_text(chat_response)
    }
}

/// First choice's text, or `EmptyResponse` when missing or blank
pub(crate) fn extract_text(response: ChatResponse) -> ProviderResponse
{   response.choices
      .into_iter()
      .next()
      .and_then(|choice| choice.message.content)
      .filter(|text| !text.trim().is_empty())
      .ok_or(ProviderFailure::EmptyResponse)
}

pub(crate) fn map_http_error(status: StatusCode) -> ProviderFailure
{   match status
    {   StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
          ProviderFailure::Unauthorized
        }
      , StatusCode::TOO_MANY_REQUESTS => ProviderFailure::RateLimited
      , StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
          ProviderFailure::Timeout
        }
      , other if other.is_client_error() => {
          ProviderFailure::Rejected(format!("HTTP {}", other))
        }
      , other => ProviderFailure::Transport(format!("HTTP {}", other))
    }
}

fn map_transport_error(err: reqwest::Error) -> ProviderFailure
{   if err.is_timeout()
    {   return ProviderFailure::Timeout;
    }
    error!("HTTP error: {}", err);
    ProviderFailure::Transport(err.to_string())
}

fn truncate(text: &str, limit: usize) -> &str
{   match text.char_indices().nth(limit)
    {   Some((end, _)) => &text[..end]
      , None => text
    }
}
