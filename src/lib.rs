pub mod error;
pub mod config;
pub mod cancel;
pub mod templates;
pub mod prompt;
pub mod providers;
pub mod registry;
pub mod request;
pub mod validator;
pub mod store;
pub mod failover;
pub mod orchestrator;
pub mod service;
use serde::{Deserialize, Serialize};
use std::fmt;

/*

abapgen turns a structured request ("give me a function module that does
X with these parameters") into a validated ABAP source file on disk.

abapgen/
├── Cargo.toml
├── src/
│   ├── lib.rs          # Artifact kinds, service channel types, re-exports
│   ├── error.rs        # Typed failures for every pipeline stage
│   ├── config.rs       # EngineConfig, provider settings, failover knobs
│   ├── cancel.rs       # Cancellation signal shared with in-flight calls
│   ├── templates.rs    # TemplateCatalog: one prompt template per kind
│   ├── prompt.rs       # PromptBuilder: slot resolution into a Prompt
│   ├── providers/      # ProviderAdapter trait and concrete backends
│   │   ├── mod.rs
│   │   ├── chat.rs     # Shared OpenAI-style chat completions client
│   │   ├── groq.rs
│   │   ├── openai.rs
│   │   └── arcee.rs
│   ├── registry.rs     # Ordered adapters resolved from configuration
│   ├── request.rs      # Request, artifact and attempt value types
│   ├── validator.rs    # Structural checks on generated ABAP
│   ├── store.rs        # ArtifactStore trait and atomic filesystem store
│   ├── failover.rs     # Retry policy, backoff and rate limiting
│   ├── orchestrator.rs # The generate() state machine
│   └── service.rs      # Task-owning service for concurrent batches
└── tests/

*/

pub use cancel::{CancellationHandle, CancellationSignal};
pub use config::{EngineConfig, FailoverConfig, ProviderKind, ProviderSettings};
pub use error::{
    BuildError, CatalogError, ConfigError, Error, FailureKind
  , GenerationFailure, ProviderFailure, RegistryError, StorageFailure
  , ValidationDefect
};
pub use orchestrator::{GeneratedArtifact, GenerationOrchestrator, GenerationOutcome, PipelineStage};
pub use prompt::{Prompt, PromptBuilder};
pub use providers::{ProviderAdapter, ProviderResponse};
pub use registry::ProviderRegistry;
pub use request::{
    ArtifactName, AttemptRecord, AttemptResult, GenerationRequest
  , OutputDirectory, Parameter, ValidatedArtifact
};
pub use service::GenerationService;
pub use store::{ArtifactStore, CollisionPolicy, FsArtifactStore, StorageLocation};
pub use templates::{PromptTemplate, TemplateCatalog};
pub use validator::ResponseValidator;

/// ABAPGEN SERVICE INTERFACE:

// ===== Submit =====

pub type SubmitReply = orchestrator::GenerationOutcome;
pub type SubmitReplySender
  = tokio::sync::mpsc::UnboundedSender<SubmitReply>;

pub struct SubmitArgs
{   pub request: GenerationRequest
  , pub reply: SubmitReplySender
}

// ===== Shutdown =====

pub type ShutdownReply = Result<(), crate::error::Error>;
pub type ShutdownReplySender
  = tokio::sync::mpsc::UnboundedSender<ShutdownReply>;

pub struct ShutdownArgs
{   pub reply: ShutdownReplySender
}

// ===== GenerationHand (sender side) =====

pub struct GenerationHand
{   pub submit_tx
      : tokio::sync::mpsc::UnboundedSender<SubmitArgs>
  , pub shutdown_tx
      : tokio::sync::mpsc::UnboundedSender<ShutdownArgs>
}

// ===== GenerationFoot (receiver side) =====

pub struct GenerationFoot
{   pub submit_rx
      : tokio::sync::mpsc::UnboundedReceiver<SubmitArgs>
  , pub shutdown_rx
      : tokio::sync::mpsc::UnboundedReceiver<ShutdownArgs>
}

/// ABAPGEN STRUCTURES:

/// Category of ABAP source the engine can produce.
/// Each variant has exactly one prompt template and one marker set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind
{
  /// Report displaying data through CL_SALV_TABLE
  AlvReport
  ,
  /// Plain list report with a selection screen
  Report
  ,
  /// Global class with definition and implementation parts
  Class
  ,
  /// Function module with a documented parameter interface
  FunctionModule
  ,
  /// TYPES BEGIN OF ... END OF structure definition
  Structure
  ,
  /// ABAP Unit test class
  UnitTest
  ,
  /// Free-form program built from a detailed requirement list
  CustomProgram
  ,
  /// BAdI, enhancement point or exit implementation for a standard object
  Enhancement
}

impl ArtifactKind
{   /// Every kind the engine accepts, in catalog order.
    pub const ALL: [ArtifactKind; 8] = [
      ArtifactKind::AlvReport
    , ArtifactKind::Report
    , ArtifactKind::Class
    , ArtifactKind::FunctionModule
    , ArtifactKind::Structure
    , ArtifactKind::UnitTest
    , ArtifactKind::CustomProgram
    , ArtifactKind::Enhancement
    ];

    pub fn as_str(&self) -> &'static str
    {   match self
        {   ArtifactKind::AlvReport => "alv_report"
          , ArtifactKind::Report => "report"
          , ArtifactKind::Class => "class"
          , ArtifactKind::FunctionModule => "function_module"
          , ArtifactKind::Structure => "structure"
          , ArtifactKind::UnitTest => "unit_test"
          , ArtifactKind::CustomProgram => "custom_program"
          , ArtifactKind::Enhancement => "enhancement"
        }
    }

    /// Position of this kind in `ALL`
    pub fn index(&self) -> usize
    {   match self
        {   ArtifactKind::AlvReport => 0
          , ArtifactKind::Report => 1
          , ArtifactKind::Class => 2
          , ArtifactKind::FunctionModule => 3
          , ArtifactKind::Structure => 4
          , ArtifactKind::UnitTest => 5
          , ArtifactKind::CustomProgram => 6
          , ArtifactKind::Enhancement => 7
        }
    }

    /// File name prefix used when the caller gives no artifact name
    pub fn file_prefix(&self) -> &'static str
    {   match self
        {   ArtifactKind::AlvReport => "z_alv_"
          , ArtifactKind::Report => "z_report_"
          , ArtifactKind::Class => "zcl_"
          , ArtifactKind::FunctionModule => "z_fm_"
          , ArtifactKind::Structure => "zstruct_"
          , ArtifactKind::UnitTest => "zcl_test_"
          , ArtifactKind::CustomProgram => "z_prog_"
          , ArtifactKind::Enhancement => "z_enh_"
        }
    }
}

impl fmt::Display for ArtifactKind
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.as_str())
    }
}
