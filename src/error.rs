use serde::Serialize;
use thiserror::Error as ThisError;

use crate::ArtifactKind;
use crate::request::{AttemptRecord, ValidatedArtifact};

/// Why a single adapter call produced no text.
/// Exactly the reasons the orchestrator's retry policy branches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ThisError)]
pub enum ProviderFailure
{   /// Credentials rejected (HTTP 401/403 or no key)
    #[error("provider rejected the credentials")]
    Unauthorized
  , /// Backend throttling (HTTP 429)
    #[error("provider rate limit exceeded")]
    RateLimited
  , /// The per-attempt deadline elapsed
    #[error("request timed out")]
    Timeout
  , /// Network-level fault or server-side HTTP status (5xx)
    #[error("transport error: {0}")]
    Transport(String)
  , /// The backend refused this request (HTTP 4xx such as 400 or 404)
    #[error("provider rejected the request: {0}")]
    Rejected(String)
  , /// The backend answered without usable text
    #[error("provider returned no usable text")]
    EmptyResponse
}

impl ProviderFailure
{   /// Transient faults are retried on the same adapter.
    pub fn is_transient(&self) -> bool
    {   matches!(
          self,
          ProviderFailure::RateLimited
            | ProviderFailure::Timeout
            | ProviderFailure::Transport(_)
        )
    }
}

/// Structural flaw found in generated text before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ThisError)]
pub enum ValidationDefect
{   #[error("response is empty")]
    Empty
  , #[error("required marker missing: {0}")]
    MissingMarker(String)
  , #[error(
      "unbalanced blocks: {opened} '{open}' against {closed} '{close}'"
    )]
    UnbalancedBlocks
    {   open: String
      , close: String
      , opened: usize
      , closed: usize
    }
}

/// Request defects raised while turning a request into a prompt.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum BuildError
{   #[error("no template registered for kind {0}")]
    UnknownKind(ArtifactKind)
  , #[error("no value supplied for slot '{0}'")]
    MissingParameter(String)
  , #[error("template for {template} used with a {requested} request")]
    KindMismatch
    {   requested: ArtifactKind
      , template: ArtifactKind
    }
}

/// Startup failures of the template and marker catalogs.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum CatalogError
{   #[error("no template for kind {0}")]
    MissingTemplate(ArtifactKind)
  , #[error("more than one template for kind {0}")]
    DuplicateTemplate(ArtifactKind)
  , #[error("template for {kind} never uses its list slot '{slot}'")]
    UnusedListSlot
    {   kind: ArtifactKind
      , slot: String
    }
  , #[error("no validation rules for kind {0}")]
    MissingRules(ArtifactKind)
  , #[error("invalid marker pattern '{0}'")]
    InvalidMarker(String)
}

/// Failures building the ordered adapter list.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RegistryError
{   #[error("no providers configured")]
    NoProvidersConfigured
  , #[error("provider '{0}' is not declared")]
    UnknownProvider(String)
  , #[error("provider '{0}' is registered twice")]
    DuplicateProvider(String)
  , #[error(transparent)]
    Config(#[from] ConfigError)
}

/// Failures reported by an `ArtifactStore`.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum StorageFailure
{   #[error("artifact '{0}' already exists")]
    Collision(String)
  , #[error("invalid artifact name '{0}'")]
    InvalidName(String)
  , #[error("artifact not found: {0}")]
    NotFound(String)
  , #[error("storage I/O error: {0}")]
    Io(String)
}

/// Configuration loading and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConfigError
{   #[error("failed to read configuration: {0}")]
    Read(String)
  , #[error("failed to parse configuration: {0}")]
    Parse(String)
  , #[error("invalid configuration: {0}")]
    Invalid(String)
}

/// Coarse failure category for callers that only branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind
{   UnknownKind
  , MissingParameter
  , AllProvidersExhausted
  , ValidationExhausted
  , PersistenceFailed
  , Cancelled
}

/// Terminal failure of one `generate()` call.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum GenerationFailure
{   /// Request defect: no template for the kind
    #[error("no template registered for kind {0}")]
    UnknownKind(ArtifactKind)
  , /// Request defect: a template slot had no value
    #[error("missing parameter for slot '{slot}'")]
    MissingParameter
    {   slot: String
    }
  , /// No adapter produced any text
    #[error("all providers exhausted (last failure: {last_failure:?})")]
    AllProvidersExhausted
    {   last_failure: Option<ProviderFailure>
      , attempts: Vec<AttemptRecord>
    }
  , /// Adapters produced text but none of it passed validation
    #[error("no provider produced valid output (last defect: {last_defect})")]
    ValidationExhausted
    {   last_defect: ValidationDefect
      , last_failure: Option<ProviderFailure>
      , attempts: Vec<AttemptRecord>
    }
  , /// Validated text could not be stored; the artifact is returned intact
    #[error("persisting {} failed: {failure}", .artifact.kind())]
    PersistenceFailed
    {   failure: StorageFailure
      , artifact: ValidatedArtifact
      , attempts: Vec<AttemptRecord>
    }
  , /// The caller's cancellation signal fired
    #[error("generation cancelled during {stage}")]
    Cancelled
    {   stage: crate::orchestrator::PipelineStage
      , attempts: Vec<AttemptRecord>
    }
}

impl GenerationFailure
{   pub fn kind(&self) -> FailureKind
    {   match self
        {   GenerationFailure::UnknownKind(_) => FailureKind::UnknownKind
          , GenerationFailure::MissingParameter { .. } => {
              FailureKind::MissingParameter
            }
          , GenerationFailure::AllProvidersExhausted { .. } => {
              FailureKind::AllProvidersExhausted
            }
          , GenerationFailure::ValidationExhausted { .. } => {
              FailureKind::ValidationExhausted
            }
          , GenerationFailure::PersistenceFailed { .. } => {
              FailureKind::PersistenceFailed
            }
          , GenerationFailure::Cancelled { .. } => FailureKind::Cancelled
        }
    }

    /// Adapter calls made before the failure; empty for request defects.
    pub fn attempts(&self) -> &[AttemptRecord]
    {   match self
        {   GenerationFailure::UnknownKind(_)
          | GenerationFailure::MissingParameter { .. } => &[]
          , GenerationFailure::AllProvidersExhausted { attempts, .. }
          | GenerationFailure::ValidationExhausted { attempts, .. }
          | GenerationFailure::PersistenceFailed { attempts, .. }
          | GenerationFailure::Cancelled { attempts, .. } => attempts
        }
    }

    /// Last raw adapter failure, when one is known.
    pub fn last_provider_failure(&self) -> Option<&ProviderFailure>
    {   match self
        {   GenerationFailure::AllProvidersExhausted { last_failure, .. }
          | GenerationFailure::ValidationExhausted { last_failure, .. } => {
              last_failure.as_ref()
            }
          , _ => None
        }
    }

    /// The validated artifact that survived a persistence failure.
    pub fn recovered_artifact(&self) -> Option<&ValidatedArtifact>
    {   match self
        {   GenerationFailure::PersistenceFailed { artifact, .. } => {
              Some(artifact)
            }
          , _ => None
        }
    }
}

impl From<BuildError> for GenerationFailure
{   fn from(err: BuildError) -> Self
    {   match err
        {   BuildError::UnknownKind(kind) => {
              GenerationFailure::UnknownKind(kind)
            }
          , BuildError::MissingParameter(slot) => {
              GenerationFailure::MissingParameter { slot }
            }
          , BuildError::KindMismatch { requested, .. } => {
              GenerationFailure::UnknownKind(requested)
            }
        }
    }
}

/// Crate-level error for setup and the service handle.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error
{   #[error(transparent)]
    Config(#[from] ConfigError)
  , #[error(transparent)]
    Catalog(#[from] CatalogError)
  , #[error(transparent)]
    Registry(#[from] RegistryError)
  , #[error("generation service disconnected")]
    ServiceClosed
  , #[error("timed out waiting for the generation service")]
    Timeout
}
