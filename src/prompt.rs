//! Slot resolution from a request and a template into a finalized prompt

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::request::GenerationRequest;
use crate::templates::{PromptTemplate, Segment, parse_segments};

const DESCRIPTION_SLOT: &str = "description";
const LIST_SEPARATOR: &str = ", ";

/// System and user message pair sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt
{   pub system_text: String
  , pub user_text: String
  , /// Overrides the adapter's sampling temperature when set
    #[serde(default)]
    pub temperature: Option<f32>
  , /// Overrides the adapter's completion token limit when set
    #[serde(default)]
    pub max_tokens: Option<u32>
}

/// Renders prompts; pure and deterministic
pub struct PromptBuilder;

impl PromptBuilder
{   /// Resolve every slot of `template` from `request`.
    ///
    /// `{description}` takes the request description, the template's list
    /// slot takes the positional parameters joined in insertion order, and
    /// any other slot takes the named parameter with the same key. A named
    /// parameter also overrides the description or list slot. A slot that
    /// resolves to blank text falls back to the template's default for it,
    /// and is a `MissingParameter` when there is none.
    pub fn build(
      request: &GenerationRequest
    , template: &PromptTemplate
    ) -> Result<Prompt, BuildError>
    {   if request.kind != template.kind
        {   return Err(BuildError::KindMismatch
            {   requested: request.kind
              , template: template.kind
            });
        }

        let system_text
          = render(&template.system_preamble, request, template)?;
        let user_text
          = render(&template.user_instruction_format, request, template)?;

        trace!(
          "Built {} prompt ({} + {} chars)",
          request.kind,
          system_text.len(),
          user_text.len()
        );
        Ok(Prompt
        {   system_text
          , user_text
          , temperature: template.temperature
          , max_tokens: template.max_tokens
        })
    }
}

fn render(
  text: &str
, request: &GenerationRequest
, template: &PromptTemplate
) -> Result<String, BuildError>
{   let mut out = String::with_capacity(text.len());
    for segment in parse_segments(text)
    {   match segment
        {   Segment::Literal(literal) => out.push_str(literal)
          , Segment::Slot(name) => {
              out.push_str(&resolve_slot(name, request, template)?)
            }
        }
    }
    Ok(out)
}

fn resolve_slot(
  name: &str
, request: &GenerationRequest
, template: &PromptTemplate
) -> Result<String, BuildError>
{   let value = if let Some(named) = request.named(name)
    {   named.trim().to_string()
    } else if name == DESCRIPTION_SLOT
    {   request.description.trim().to_string()
    } else if name == template.list_slot
    {   request
          .positionals()
          .map(str::trim)
          .filter(|token| !token.is_empty())
          .collect::<Vec<_>>()
          .join(LIST_SEPARATOR)
    } else
    {   String::new()
    };

    if !value.is_empty()
    {   return Ok(value);
    }
    template
      .default_for(name)
      .map(str::to_string)
      .ok_or_else(|| BuildError::MissingParameter(name.to_string()))
}
