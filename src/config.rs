//! Configuration for providers, failover behavior and artifact storage

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::failover::RetryPolicy;
use crate::store::CollisionPolicy;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Which backend implementation a provider entry uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind
{   Groq
  , #[serde(alias = "open_ai")]
    OpenAi
  , Arcee
}

/// Provider configuration, filled in by the credential-loading layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings
{   /// Name used in `provider_priority` and in `providerUsed`
    pub name: String
  , /// Backend implementation
    pub kind: ProviderKind
  , /// API base URL (if custom)
    #[serde(default)]
    pub endpoint: Option<String>
  , /// Credential; providers without one are treated as unavailable
    #[serde(default)]
    pub api_key: Option<String>
  , /// Model name (if not the backend default)
    #[serde(default)]
    pub model: Option<String>
  , /// Default request timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>
  , /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>
  , /// Completion token limit
    #[serde(default)]
    pub max_tokens: Option<u32>
  , /// Minimum spacing between request starts, shared by concurrent calls
    #[serde(default)]
    pub min_request_interval_ms: Option<u64>
}

impl ProviderSettings
{   pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self
    {   ProviderSettings
        {   name: name.into()
          , kind
          , endpoint: None
          , api_key: None
          , model: None
          , timeout_ms: None
          , temperature: None
          , max_tokens: None
          , min_request_interval_ms: None
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self
    {   self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self
    {   self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self
    {   self.model = Some(model.into());
        self
    }

    /// A provider is available when it carries a non-blank key
    pub fn is_available(&self) -> bool
    {   self.api_key
          .as_deref()
          .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn temperature(&self) -> f32
    {   self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens(&self) -> u32
    {   self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }
}

/// Failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig
{   /// Attempts per provider for transient faults (first call included)
    pub max_attempts_per_provider: usize
  , /// Delay before the first retry in milliseconds
    pub backoff_base_delay_ms: u64
  , /// Backoff multiplier for retries
    pub backoff_multiplier: f32
  , /// Deadline handed to every adapter call in milliseconds
    pub per_attempt_timeout_ms: u64
}

impl Default for FailoverConfig
{   fn default() -> Self
    {   FailoverConfig
        {   max_attempts_per_provider: 3
          , backoff_base_delay_ms: 500
          , backoff_multiplier: 2.0
          , per_attempt_timeout_ms: 60_000
        }
    }
}

impl FailoverConfig
{   pub fn retry_policy(&self) -> RetryPolicy
    {   RetryPolicy::new(
          self.max_attempts_per_provider
        , self.backoff_multiplier
        , self.backoff_base_delay_ms
        )
    }

    pub fn per_attempt_timeout(&self) -> Duration
    {   Duration::from_millis(self.per_attempt_timeout_ms)
    }
}

/// Engine configuration, built once at startup and shared by reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig
{   /// Provider names, preferred first
    pub provider_priority: Vec<String>
  , /// Provider configurations
    pub providers: Vec<ProviderSettings>
  , /// Failover configuration
    pub failover: FailoverConfig
  , /// What the store does when a name is taken
    pub collision_policy: CollisionPolicy
}

impl EngineConfig
{   /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError>
    {   let config: EngineConfig = serde_json::from_str(json)
          .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        debug!(
          "Loaded engine config with {} providers",
          config.providers.len()
        );
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError>
    {   let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
          ConfigError::Read(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings>
    {   self.providers.iter().find(|p| p.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError>
    {   let failover = &self.failover;
        if failover.max_attempts_per_provider == 0
        {   return Err(ConfigError::Invalid(
              "max_attempts_per_provider must be at least 1".to_string()
            ));
        }
        if failover.per_attempt_timeout_ms == 0
        {   return Err(ConfigError::Invalid(
              "per_attempt_timeout_ms must be positive".to_string()
            ));
        }
        if !(failover.backoff_multiplier >= 1.0)
        {   return Err(ConfigError::Invalid(
              "backoff_multiplier must be >= 1.0".to_string()
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers
        {   if provider.name.trim().is_empty()
            {   return Err(ConfigError::Invalid(
                  "provider name must not be empty".to_string()
                ));
            }
            if !seen.insert(provider.name.as_str())
            {   return Err(ConfigError::Invalid(format!(
                  "provider '{}' declared twice",
                  provider.name
                )));
            }
            if provider.timeout_ms == Some(0)
            {   return Err(ConfigError::Invalid(format!(
                  "provider '{}' timeout_ms must be positive",
                  provider.name
                )));
            }
        }

        for name in &self.provider_priority
        {   if !seen.contains(name.as_str())
            {   return Err(ConfigError::Invalid(format!(
                  "provider_priority names undeclared provider '{}'",
                  name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn test_defaults()
    {   let config = EngineConfig::default();
        assert_eq!(config.failover.max_attempts_per_provider, 3);
        assert_eq!(
          config.failover.per_attempt_timeout(),
          Duration::from_secs(60)
        );
        assert_eq!(config.collision_policy, CollisionPolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_str_reads_priority_and_failover()
    {   let config = EngineConfig::from_json_str(r#"{
          "provider_priority": ["openai", "groq"],
          "providers": [
            {"name": "groq", "kind": "groq", "api_key": "gk"},
            {"name": "openai", "kind": "openai", "api_key": "ok",
             "model": "gpt-4o-mini", "min_request_interval_ms": 250}
          ],
          "failover": {"max_attempts_per_provider": 5,
                       "backoff_base_delay_ms": 10},
          "collision_policy": "version_suffix"
        }"#).expect("config should parse");

        assert_eq!(config.provider_priority, vec!["openai", "groq"]);
        assert_eq!(config.failover.max_attempts_per_provider, 5);
        assert_eq!(config.failover.backoff_base_delay_ms, 10);
        assert_eq!(config.failover.per_attempt_timeout_ms, 60_000);
        assert_eq!(config.collision_policy, CollisionPolicy::VersionSuffix);

        let openai = config.provider("openai").expect("openai declared");
        assert_eq!(openai.kind, ProviderKind::OpenAi);
        assert_eq!(openai.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(openai.min_request_interval_ms, Some(250));
        assert_eq!(openai.max_tokens(), 4096);
    }

    #[test]
    fn test_priority_must_name_declared_provider()
    {   let err = EngineConfig::from_json_str(r#"{
          "provider_priority": ["mistral"],
          "providers": [{"name": "groq", "kind": "groq"}]
        }"#).expect_err("undeclared provider should be rejected");
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("mistral")));
    }

    #[test]
    fn test_zero_attempts_rejected()
    {   let mut config = EngineConfig::default();
        config.failover.max_attempts_per_provider = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_provider_rejected()
    {   let mut config = EngineConfig::default();
        config.providers = vec![
          ProviderSettings::new("groq", ProviderKind::Groq)
        , ProviderSettings::new("groq", ProviderKind::OpenAi)
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_availability_requires_non_blank_key()
    {   let provider = ProviderSettings::new("groq", ProviderKind::Groq);
        assert!(!provider.is_available());
        assert!(!provider.clone().with_api_key("  ").is_available());
        assert!(provider.with_api_key("gsk_123").is_available());
    }

    #[test]
    fn test_malformed_json_is_parse_error()
    {   let err = EngineConfig::from_json_str("{ not json")
          .expect_err("malformed json should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
