//! Prompt templates, one per artifact kind

use std::collections::HashMap;

use log::debug;

use crate::ArtifactKind;
use crate::error::{BuildError, CatalogError};

/// Preamble sent as the system message for every kind
const SYSTEM_PREAMBLE: &str = "\
You are an assistant specialised in ABAP programming. Your goal is to \
produce clean, efficient ABAP that follows SAP best practice.

GUIDELINES:
1. Produce only valid, working ABAP code.
2. Follow SAP naming conventions (Z prefix for custom objects).
3. Add explanatory comments to the code.
4. Structure the code logically and clearly.
5. Handle errors where appropriate.
6. Prefer modern ABAP syntax.
7. For ALV output use CL_SALV_TABLE or the SALV_* classes, never the old REUSE_ALV_* functions.
8. For object-oriented code follow the SOLID principles.
9. Every generated source starts with a comment block stating that it was produced by abapgen.

Reply ONLY with the complete ABAP source, without further explanation.";

const ALV_FORMAT: &str = "\
Create an ABAP report that displays its result with CL_SALV_TABLE.

- Description: {description}
- Tables involved: {tables}

Include:
1. An appropriate selection screen
2. Processing logic
3. A data structure for the ALV display
4. Full ALV configuration (title, column headers, optimisation)
5. Error handling

Use modern ABAP and SAP programming best practice.";

const REPORT_FORMAT: &str = "\
Create an ABAP list report.

- Description: {description}
- Tables involved: {tables}

Include:
1. An appropriate selection screen
2. Processing logic
3. Report structure
4. Formatted output of the data
5. Error handling

Use modern ABAP and SAP programming best practice.";

const CLASS_FORMAT: &str = "\
Create an ABAP class.

- Description/purpose: {description}
- Methods to implement, in this order: {methods}

Include:
1. The complete class definition
2. Required attributes
3. Public and private methods
4. Method implementations
5. ABAP Doc comments
6. Exception handling

Use modern ABAP and SAP programming best practice, including the SOLID principles.";

const FUNCTION_MODULE_FORMAT: &str = "\
Create an ABAP function module.

- Description/purpose: {description}
- Parameters (NAME:TYPE:DIRECTION, in this order): {params}

Include:
1. The complete FUNCTION ... ENDFUNCTION block
2. The local interface comment block listing every parameter
3. The implementation logic
4. Exception handling
5. Validation of the input parameters

Use modern ABAP and SAP programming best practice.";

const STRUCTURE_FORMAT: &str = "\
Create an ABAP data structure.

- Description/purpose: {description}
- Fields, in this order: {fields}

Include:
1. The structure definition with TYPES BEGIN OF ... END OF
2. Appropriate data types
3. Explanatory comments
4. Related definitions (constants, table types)

Use modern ABAP and SAP programming best practice.";

const UNIT_TEST_FORMAT: &str = "\
Create an ABAP Unit test class for:

- Class or function module under test: {target}
- Notes: {description}

Include:
1. A complete local test class declared FOR TESTING
2. A SETUP method
3. Test methods for the main cases
4. Suitable assertions (CL_ABAP_UNIT_ASSERT)
5. A TEARDOWN method

Use modern ABAP and unit testing best practice.";

const CUSTOM_PROGRAM_FORMAT: &str = "\
Create a custom ABAP program from the following requirements.

- Requirements: {description}
- Program type: {program_type}
- Main features: {main_features}
- Entities and tables involved: {entities}
- Integrations: {integrations}
- Business rules: {business_rules}
- Performance requirements: {performance_requirements}
- Security requirements: {security_requirements}
- Usability requirements: {usability_requirements}

Include:
1. The complete skeleton for the requested program type
2. Data declarations and, where applicable, a selection screen
3. An implementation of every listed feature and business rule
4. AUTHORITY-CHECK statements covering the security requirements
5. Error handling with meaningful messages

Use modern ABAP and SAP programming best practice.";

const ENHANCEMENT_FORMAT: &str = "\
Create an ABAP enhancement.

- Base object: {base_object}
- Enhancement type: {enhancement_type}
- Functionality to add: {description}
- Enhancement points: {enhancement_points}

Include:
1. The implementation matching the enhancement type (BAdI class, ENHANCEMENT block or exit include)
2. The added functionality
3. Comments naming the object and point the code attaches to
4. Error handling

Use modern ABAP and SAP enhancement framework best practice.";

const CUSTOM_PROGRAM_TEMPERATURE: f32 = 0.8;
const CUSTOM_PROGRAM_MAX_TOKENS: u32 = 8192;

/// Prompt template for one artifact kind
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate
{   pub kind: ArtifactKind
  , /// System message text
    pub system_preamble: String
  , /// User message with `{slot}` placeholders
    pub user_instruction_format: String
  , /// Slot filled from the request's positional parameters
    pub list_slot: String
  , /// Values used when the request leaves a slot blank
    pub defaults: Vec<(String, String)>
  , /// Sampling temperature for this kind, over the adapter's own
    pub temperature: Option<f32>
  , /// Completion token limit for this kind, over the adapter's own
    pub max_tokens: Option<u32>
}

impl PromptTemplate
{   pub fn new(
      kind: ArtifactKind
    , system_preamble: impl Into<String>
    , user_instruction_format: impl Into<String>
    , list_slot: impl Into<String>
    ) -> Self
    {   PromptTemplate
        {   kind
          , system_preamble: system_preamble.into()
          , user_instruction_format: user_instruction_format.into()
          , list_slot: list_slot.into()
          , defaults: Vec::new()
          , temperature: None
          , max_tokens: None
        }
    }

    /// Fill `slot` with `value` when the request gives nothing for it
    #[must_use]
    pub fn with_default(
      mut self
    , slot: impl Into<String>
    , value: impl Into<String>
    ) -> Self
    {   self.defaults.push((slot.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self
    {   self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn default_for(&self, slot: &str) -> Option<&str>
    {   self.defaults
          .iter()
          .find(|(name, _)| name == slot)
          .map(|(_, value)| value.as_str())
    }

    /// Slot names in order of first appearance in either message
    pub fn slots(&self) -> Vec<String>
    {   let mut names: Vec<String> = Vec::new();
        for text in [&self.system_preamble, &self.user_instruction_format]
        {   for segment in parse_segments(text)
            {   if let Segment::Slot(name) = segment
                {   if !names.iter().any(|n| n == name)
                    {   names.push(name.to_string());
                    }
                }
            }
        }
        names
    }
}

/// Piece of a template: literal text or a `{slot}` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment<'a>
{   Literal(&'a str)
  , Slot(&'a str)
}

fn is_slot_char(c: char) -> bool
{   c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
}

/// Split a template into literals and slots.
///
/// `{name}` with `name` in `[a-z0-9_]+` is a slot, `{{` and `}}` are
/// escaped braces, any other brace is literal text.
pub(crate) fn parse_segments(text: &str) -> Vec<Segment<'_>>
{   let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;
    let bytes = text.as_bytes();

    while i < bytes.len()
    {   match bytes[i]
        {   b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
              // keep one brace of the pair as literal text
              if literal_start < i + 1
              {   segments.push(Segment::Literal(&text[literal_start..i + 1]));
              }
              i += 2;
              literal_start = i;
            }
          , b'{' => {
              let rest = &text[i + 1..];
              let name_len = rest
                .find(|c: char| !is_slot_char(c))
                .unwrap_or(rest.len());
              if name_len > 0 && rest[name_len..].starts_with('}')
              {   if literal_start < i
                  {   segments.push(Segment::Literal(&text[literal_start..i]));
                  }
                  segments.push(Segment::Slot(&rest[..name_len]));
                  i += name_len + 2;
                  literal_start = i;
              } else
              {   i += 1;
              }
            }
          , _ => i += 1
        }
    }
    if literal_start < text.len()
    {   segments.push(Segment::Literal(&text[literal_start..]));
    }
    segments
}

/// One template per artifact kind, fixed at startup
#[derive(Debug, Clone)]
pub struct TemplateCatalog
{   templates: HashMap<ArtifactKind, PromptTemplate>
}

impl TemplateCatalog
{   /// Catalog with the built-in ABAP templates
    pub fn builtin() -> Result<Self, CatalogError>
    {   Self::from_templates(builtin_templates())
    }

    /// Build a catalog, checking that every kind has exactly one template
    pub fn from_templates(
      templates: Vec<PromptTemplate>
    ) -> Result<Self, CatalogError>
    {   let mut by_kind = HashMap::new();
        for template in templates
        {   let kind = template.kind;
            if !template.slots().iter().any(|s| *s == template.list_slot)
            {   return Err(CatalogError::UnusedListSlot
                {   kind
                  , slot: template.list_slot.clone()
                });
            }
            if by_kind.insert(kind, template).is_some()
            {   return Err(CatalogError::DuplicateTemplate(kind));
            }
        }
        for kind in ArtifactKind::ALL
        {   if !by_kind.contains_key(&kind)
            {   return Err(CatalogError::MissingTemplate(kind));
            }
        }
        debug!("Template catalog ready with {} templates", by_kind.len());
        Ok(TemplateCatalog { templates: by_kind })
    }

    pub fn template_for(
      &self
    , kind: ArtifactKind
    ) -> Result<&PromptTemplate, BuildError>
    {   self.templates
          .get(&kind)
          .ok_or(BuildError::UnknownKind(kind))
    }

    pub fn len(&self) -> usize
    {   self.templates.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.templates.is_empty()
    }
}

fn builtin_templates() -> Vec<PromptTemplate>
{   let mut templates: Vec<PromptTemplate> = [
      (ArtifactKind::AlvReport, ALV_FORMAT, "tables")
    , (ArtifactKind::Report, REPORT_FORMAT, "tables")
    , (ArtifactKind::Class, CLASS_FORMAT, "methods")
    , (ArtifactKind::FunctionModule, FUNCTION_MODULE_FORMAT, "params")
    , (ArtifactKind::Structure, STRUCTURE_FORMAT, "fields")
    ]
    .into_iter()
    .map(|(kind, format, slot)| {
      PromptTemplate::new(kind, SYSTEM_PREAMBLE, format, slot)
    })
    .collect();

    templates.push(
      PromptTemplate::new(ArtifactKind::UnitTest, SYSTEM_PREAMBLE, UNIT_TEST_FORMAT, "target")
        .with_default("description", "none")
    );
    templates.push(
      PromptTemplate::new(
        ArtifactKind::CustomProgram,
        SYSTEM_PREAMBLE,
        CUSTOM_PROGRAM_FORMAT,
        "main_features"
      )
      .with_default("program_type", "Report")
      .with_default("entities", "not specified")
      .with_default("integrations", "none")
      .with_default("business_rules", "not specified")
      .with_default("performance_requirements", "standard")
      .with_default("security_requirements", "standard authorization checks")
      .with_default("usability_requirements", "intuitive interface")
      .with_sampling(CUSTOM_PROGRAM_TEMPERATURE, CUSTOM_PROGRAM_MAX_TOKENS)
    );
    templates.push(
      PromptTemplate::new(
        ArtifactKind::Enhancement,
        SYSTEM_PREAMBLE,
        ENHANCEMENT_FORMAT,
        "enhancement_points"
      )
      .with_default("enhancement_points", "the most suitable standard points")
    );
    templates
}
