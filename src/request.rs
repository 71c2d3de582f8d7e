//! Request, artifact and attempt value types for abapgen

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ArtifactKind;
use crate::error::{ProviderFailure, ValidationDefect};

const DERIVED_NAME_MAX_CHARS: usize = 20;
const ENHANCEMENT_NAME_MAX_CHARS: usize = 15;
const BASE_OBJECT_SLOT: &str = "base_object";
const ARTIFACT_EXTENSION: &str = ".abap";

/// One kind-specific request parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameter
{   /// Positional token (table name, method name, parameter list...)
    Positional(String)
  , /// Value for a template slot of the same name
    Named
    {   key: String
      , value: String
    }
}

/// Where the caller wants the artifact to land; interpreted by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputDirectory(pub String);

impl Default for OutputDirectory
{   fn default() -> Self
    {   OutputDirectory("output".to_string())
    }
}

/// A code-generation request built by the calling layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest
{   /// Kind of artifact to generate
    pub kind: ArtifactKind
  , /// Free-text description of what the artifact should do
    pub description: String
  , /// Ordered parameters; order is kept verbatim in the prompt
    #[serde(default)]
    pub parameters: Vec<Parameter>
  , /// Destination handle passed through to the store
    #[serde(default)]
    pub output_directory: OutputDirectory
  , /// File name override; derived from kind and description if absent
    #[serde(default)]
    pub artifact_name: Option<String>
}

impl GenerationRequest
{   pub fn new(
      kind: ArtifactKind
    , description: impl Into<String>
    ) -> Self
    {   GenerationRequest
        {   kind
          , description: description.into()
          , parameters: Vec::new()
          , output_directory: OutputDirectory::default()
          , artifact_name: None
        }
    }

    /// Append a positional token
    #[must_use]
    pub fn with_positional(mut self, token: impl Into<String>) -> Self
    {   self.parameters.push(Parameter::Positional(token.into()));
        self
    }

    /// Append several positional tokens, keeping their order
    #[must_use]
    pub fn with_positionals<I, S>(mut self, tokens: I) -> Self
    where
      I: IntoIterator<Item = S>
    , S: Into<String>
    {   self.parameters.extend(
          tokens.into_iter().map(|t| Parameter::Positional(t.into()))
        );
        self
    }

    /// Append a named slot value
    #[must_use]
    pub fn with_named(
      mut self
    , key: impl Into<String>
    , value: impl Into<String>
    ) -> Self
    {   self.parameters.push(Parameter::Named
        {   key: key.into()
          , value: value.into()
        });
        self
    }

    #[must_use]
    pub fn with_output_directory(mut self, dir: impl Into<String>) -> Self
    {   self.output_directory = OutputDirectory(dir.into());
        self
    }

    #[must_use]
    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self
    {   self.artifact_name = Some(name.into());
        self
    }

    /// Positional tokens in insertion order
    pub fn positionals(&self) -> impl Iterator<Item = &str>
    {   self.parameters.iter().filter_map(|p| match p
        {   Parameter::Positional(token) => Some(token.as_str())
          , Parameter::Named { .. } => None
        })
    }

    /// Last value given for a named slot
    pub fn named(&self, key: &str) -> Option<&str>
    {   self.parameters.iter().rev().find_map(|p| match p
        {   Parameter::Named { key: k, value } if k == key => {
              Some(value.as_str())
            }
          , _ => None
        })
    }

    /// Name the store receives for this request's artifact
    pub fn artifact_name(&self) -> ArtifactName
    {   let file_name = match &self.artifact_name
        {   Some(name) if !name.trim().is_empty() => name.trim().to_string()
          , _ => self.derived_file_name()
        };
        ArtifactName
        {   directory: self.output_directory.clone()
          , file_name
        }
    }

    /// Enhancements are named after the object they extend
    fn derived_file_name(&self) -> String
    {   match (self.kind, self.named(BASE_OBJECT_SLOT))
        {   (ArtifactKind::Enhancement, Some(base)) if !base.trim().is_empty() => {
              derive_file_name(self.kind, base, ENHANCEMENT_NAME_MAX_CHARS)
            }
          , _ => derive_file_name(self.kind, &self.description, DERIVED_NAME_MAX_CHARS)
        }
    }
}

fn derive_file_name(kind: ArtifactKind, source: &str, max_chars: usize) -> String
{   let slug: String = source
      .trim()
      .to_lowercase()
      .replace(' ', "_")
      .chars()
      .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
      .take(max_chars)
      .collect();
    let slug = if slug.is_empty() { "artifact".to_string() } else { slug };
    format!("{}{}{}", kind.file_prefix(), slug, ARTIFACT_EXTENSION)
}

/// Directory handle plus file name handed to the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactName
{   pub directory: OutputDirectory
  , pub file_name: String
}

/// Generated text that passed structural validation.
///
/// Only `ResponseValidator` constructs these, so holding one proves the
/// body was checked against the rules for its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedArtifact
{   kind: ArtifactKind
  , body: String
  , generated_at: DateTime<Utc>
  , provider_used: String
}

impl ValidatedArtifact
{   pub(crate) fn new(
      kind: ArtifactKind
    , body: String
    , provider_used: impl Into<String>
    ) -> Self
    {   ValidatedArtifact
        {   kind
          , body
          , generated_at: Utc::now()
          , provider_used: provider_used.into()
        }
    }

    pub fn kind(&self) -> ArtifactKind
    {   self.kind
    }

    pub fn body(&self) -> &str
    {   &self.body
    }

    pub fn generated_at(&self) -> DateTime<Utc>
    {   self.generated_at
    }

    /// Name of the adapter whose text was accepted
    pub fn provider_used(&self) -> &str
    {   &self.provider_used
    }
}

/// What one adapter call came to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AttemptResult
{   /// Text passed validation
    Accepted
  , /// Adapter reported a failure
    Failed(ProviderFailure)
  , /// Text came back but failed validation
    Rejected(ValidationDefect)
}

/// One adapter call made during a `generate()` run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord
{   pub provider: String
  , /// 1-based attempt number on this provider
    pub attempt: usize
  , pub result: AttemptResult
}
