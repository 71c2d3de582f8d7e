//! The generate() pipeline: build, dispatch with retry and fallback,
//! validate, persist

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::cancel::CancellationSignal;
use crate::config::EngineConfig;
use crate::error::{Error, GenerationFailure, ProviderFailure, ValidationDefect};
use crate::failover::RetryPolicy;
use crate::prompt::{Prompt, PromptBuilder};
use crate::registry::{ProviderRegistry, RegisteredAdapter};
use crate::request::{
    AttemptRecord, AttemptResult, GenerationRequest, ValidatedArtifact
};
use crate::store::{ArtifactStore, StorageLocation};
use crate::templates::TemplateCatalog;
use crate::validator::ResponseValidator;

/// Where a `generate()` call is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage
{   Building
  , Dispatching
  , Validating
  , Persisting
  , Succeeded
}

impl fmt::Display for PipelineStage
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   let name = match self
        {   PipelineStage::Building => "building"
          , PipelineStage::Dispatching => "dispatching"
          , PipelineStage::Validating => "validating"
          , PipelineStage::Persisting => "persisting"
          , PipelineStage::Succeeded => "succeeded"
        };
        f.write_str(name)
    }
}

/// A stored artifact with the attempts that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact
{   pub artifact: ValidatedArtifact
  , pub location: StorageLocation
  , pub attempts: Vec<AttemptRecord>
}

pub type GenerationOutcome = Result<GeneratedArtifact, GenerationFailure>;

/// What one adapter's turn ended with
enum AdapterTurn
{   Accepted(ValidatedArtifact)
  , Exhausted
}

/// Per-call bookkeeping, never shared between calls
#[derive(Default)]
struct RunLog
{   attempts: Vec<AttemptRecord>
  , last_failure: Option<ProviderFailure>
  , last_defect: Option<ValidationDefect>
}

impl RunLog
{   fn record(&mut self, provider: &str, attempt: usize, result: AttemptResult)
    {   self.attempts.push(AttemptRecord
        {   provider: provider.to_string()
          , attempt
          , result
        });
    }

    fn cancelled(self, stage: PipelineStage) -> GenerationFailure
    {   info!("Generation cancelled while {}", stage);
        GenerationFailure::Cancelled
        {   stage
          , attempts: self.attempts
        }
    }

    fn exhausted(self) -> GenerationFailure
    {   match self.last_defect
        {   Some(last_defect) => GenerationFailure::ValidationExhausted
            {   last_defect
              , last_failure: self.last_failure
              , attempts: self.attempts
            }
          , None => GenerationFailure::AllProvidersExhausted
            {   last_failure: self.last_failure
              , attempts: self.attempts
            }
        }
    }
}

/// Drives requests through the pipeline.
///
/// Holds no per-call state, so one orchestrator serves any number of
/// concurrent `generate()` calls.
pub struct GenerationOrchestrator
{   catalog: Arc<TemplateCatalog>
  , registry: Arc<ProviderRegistry>
  , validator: Arc<ResponseValidator>
  , store: Arc<dyn ArtifactStore>
  , policy: RetryPolicy
  , per_attempt_timeout: Duration
}

impl GenerationOrchestrator
{   pub fn new(
      catalog: Arc<TemplateCatalog>
    , registry: Arc<ProviderRegistry>
    , validator: Arc<ResponseValidator>
    , store: Arc<dyn ArtifactStore>
    ) -> Self
    {   GenerationOrchestrator
        {   catalog
          , registry
          , validator
          , store
          , policy: RetryPolicy::default()
          , per_attempt_timeout: Duration::from_secs(60)
        }
    }

    /// Built-in templates and rules, providers and failover from `config`
    pub fn from_config(
      config: &EngineConfig
    , store: Arc<dyn ArtifactStore>
    ) -> Result<Self, Error>
    {   let catalog = TemplateCatalog::builtin()?;
        let validator = ResponseValidator::builtin()?;
        let registry = ProviderRegistry::from_config(config)?;
        Ok(Self::new(
            Arc::new(catalog)
          , Arc::new(registry)
          , Arc::new(validator)
          , store
          )
          .with_retry_policy(config.failover.retry_policy())
          .with_per_attempt_timeout(config.failover.per_attempt_timeout()))
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self
    {   self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self
    {   self.per_attempt_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry
    {   &self.registry
    }

    /// Run one request to a stored artifact or a typed failure
    pub async fn generate(
      &self
    , request: &GenerationRequest
    , cancel: &CancellationSignal
    ) -> GenerationOutcome
    {   let mut run_log = RunLog::default();
        debug!("Stage {}: {} request", PipelineStage::Building, request.kind);
        if cancel.is_cancelled()
        {   return Err(run_log.cancelled(PipelineStage::Building));
        }

        let template = self.catalog.template_for(request.kind)?;
        let prompt = PromptBuilder::build(request, template)?;

        debug!(
          "Stage {}: {} providers",
          PipelineStage::Dispatching,
          self.registry.len()
        );
        for entry in self.registry.ordered_adapters()
        {   match self.run_adapter(entry, request, &prompt, cancel, &mut run_log).await?
            {   AdapterTurn::Accepted(artifact) => {
                  return self.persist(request, artifact, run_log, cancel).await;
                }
              , AdapterTurn::Exhausted => {
                  debug!("Falling back from '{}'", entry.name());
                }
            }
        }

        let failure = run_log.exhausted();
        error!("Generation of {} failed: {}", request.kind, failure);
        Err(failure)
    }

    /// Call one adapter until it yields valid text, fails permanently or
    /// runs out of attempts
    async fn run_adapter(
      &self
    , entry: &RegisteredAdapter
    , request: &GenerationRequest
    , prompt: &Prompt
    , cancel: &CancellationSignal
    , run_log: &mut RunLog
    ) -> Result<AdapterTurn, GenerationFailure>
    {   let name = entry.name();
        let mut calls = 0;
        loop
        {   if cancel.is_cancelled()
            {   return Err(std::mem::take(run_log).cancelled(PipelineStage::Dispatching));
            }
            if let Some(limiter) = &entry.limiter
            {   tokio::select!
                {   biased;
                    _ = cancel.cancelled() => {
                      return Err(std::mem::take(run_log).cancelled(PipelineStage::Dispatching));
                    }
                  , _ = limiter.acquire() => {}
                }
            }

            calls += 1;
            debug!("Calling '{}' (attempt {})", name, calls);
            let call = tokio::time::timeout(
              self.per_attempt_timeout,
              entry.adapter.send(prompt, self.per_attempt_timeout)
            );
            let response = tokio::select!
            {   biased;
                _ = cancel.cancelled() => {
                  return Err(std::mem::take(run_log).cancelled(PipelineStage::Dispatching));
                }
              , response = call => response.unwrap_or(Err(ProviderFailure::Timeout))
            };

            match response
            {   Ok(raw) => {
                  debug!("Stage {}: {} chars from '{}'", PipelineStage::Validating, raw.len(), name);
                  match self.validator.validate(request.kind, &raw, name)
                  {   Ok(artifact) => {
                        run_log.record(name, calls, AttemptResult::Accepted);
                        return Ok(AdapterTurn::Accepted(artifact));
                      }
                    , Err(defect) => {
                        warn!("'{}' returned invalid {}: {}", name, request.kind, defect);
                        run_log.record(name, calls, AttemptResult::Rejected(defect.clone()));
                        run_log.last_defect = Some(defect);
                        return Ok(AdapterTurn::Exhausted);
                      }
                  }
                }
              , Err(failure) => {
                  warn!("'{}' attempt {} failed: {}", name, calls, failure);
                  run_log.record(name, calls, AttemptResult::Failed(failure.clone()));
                  let retry = failure.is_transient() && self.policy.allows_retry(calls);
                  run_log.last_failure = Some(failure);
                  if !retry
                  {   return Ok(AdapterTurn::Exhausted);
                  }
                }
            }

            let delay = self.policy.backoff_for_attempt(calls - 1);
            tokio::select!
            {   biased;
                _ = cancel.cancelled() => {
                  return Err(std::mem::take(run_log).cancelled(PipelineStage::Dispatching));
                }
              , _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn persist(
      &self
    , request: &GenerationRequest
    , artifact: ValidatedArtifact
    , run_log: RunLog
    , cancel: &CancellationSignal
    ) -> GenerationOutcome
    {   if cancel.is_cancelled()
        {   return Err(run_log.cancelled(PipelineStage::Persisting));
        }
        debug!("Stage {}: {}", PipelineStage::Persisting, artifact.kind());

        let name = request.artifact_name();
        match self.store.store(&name, artifact.kind(), artifact.body().as_bytes()).await
        {   Ok(location) => {
              info!(
                "Stage {}: {} from '{}' at {}",
                PipelineStage::Succeeded,
                artifact.kind(),
                artifact.provider_used(),
                location
              );
              Ok(GeneratedArtifact
              {   artifact
                , location
                , attempts: run_log.attempts
              })
            }
          , Err(failure) => {
              error!("Persisting {} failed: {}", artifact.kind(), failure);
              Err(GenerationFailure::PersistenceFailed
              {   failure
                , artifact
                , attempts: run_log.attempts
              })
            }
        }
    }
}
