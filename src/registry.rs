//! Ordered set of available provider adapters

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::config::{EngineConfig, ProviderSettings};
use crate::error::RegistryError;
use crate::failover::RateLimiter;
use crate::providers::{adapter_from_settings, ProviderAdapter};

/// An adapter and the rate limiter shared by every call through it
#[derive(Clone)]
pub struct RegisteredAdapter
{   pub adapter: Arc<dyn ProviderAdapter>
  , pub limiter: Option<Arc<RateLimiter>>
}

impl RegisteredAdapter
{   pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self
    {   RegisteredAdapter { adapter, limiter: None }
    }

    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self
    {   self.limiter = Some(Arc::new(RateLimiter::new(interval)));
        self
    }

    pub fn name(&self) -> &str
    {   self.adapter.name()
    }
}

impl std::fmt::Debug for RegisteredAdapter
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {   f.debug_struct("RegisteredAdapter")
          .field("name", &self.adapter.name())
          .field("limiter", &self.limiter)
          .finish()
    }
}

/// Available adapters in attempt order. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProviderRegistry
{   adapters: Vec<RegisteredAdapter>
}

impl ProviderRegistry
{   /// Registry over adapters in the given order
    pub fn new(
      adapters: Vec<Arc<dyn ProviderAdapter>>
    ) -> Result<Self, RegistryError>
    {   Self::with_entries(
          adapters.into_iter().map(RegisteredAdapter::new).collect()
        )
    }

    pub fn with_entries(
      adapters: Vec<RegisteredAdapter>
    ) -> Result<Self, RegistryError>
    {   if adapters.is_empty()
        {   return Err(RegistryError::NoProvidersConfigured);
        }
        let mut seen = HashSet::new();
        for entry in &adapters
        {   if !seen.insert(entry.name().to_string())
            {   return Err(RegistryError::DuplicateProvider(
                  entry.name().to_string()
                ));
            }
        }
        debug!(
          "Provider order: {}",
          adapters.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(ProviderRegistry { adapters })
    }

    /// Resolve available providers from configuration.
    ///
    /// Providers named in `provider_priority` come first in that order,
    /// then the remaining declared ones in declaration order. Providers
    /// without a usable key are skipped.
    pub fn from_config(
      config: &EngineConfig
    ) -> Result<Self, RegistryError>
    {   for name in &config.provider_priority
        {   if config.provider(name).is_none()
            {   return Err(RegistryError::UnknownProvider(name.clone()));
            }
        }
        config.validate()?;

        let mut ordered: Vec<&ProviderSettings> = Vec::new();
        for name in &config.provider_priority
        {   if let Some(settings) = config.provider(name)
            {   if !ordered.iter().any(|s| s.name == settings.name)
                {   ordered.push(settings);
                }
            }
        }
        for settings in &config.providers
        {   if !ordered.iter().any(|s| s.name == settings.name)
            {   ordered.push(settings);
            }
        }

        let mut entries = Vec::new();
        for settings in ordered
        {   if !settings.is_available()
            {   info!("Provider '{}' has no API key, skipping", settings.name);
                continue;
            }
            let mut entry = RegisteredAdapter::new(adapter_from_settings(settings)?);
            if let Some(ms) = settings.min_request_interval_ms.filter(|ms| *ms > 0)
            {   entry = entry.with_min_interval(Duration::from_millis(ms));
            }
            entries.push(entry);
        }
        Self::with_entries(entries)
    }

    pub fn ordered_adapters(&self) -> &[RegisteredAdapter]
    {   &self.adapters
    }

    pub fn names(&self) -> Vec<&str>
    {   self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize
    {   self.adapters.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.adapters.is_empty()
    }
}
