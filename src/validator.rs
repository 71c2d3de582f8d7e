//! Structural checks on generated ABAP source
//!
//! Checks are structural, not semantic: the body must be non-empty, contain
//! the markers configured for its kind, and keep every configured block
//! pair balanced. Text is scanned statement by statement after removing
//! comments and blanking string literals.

use std::collections::HashMap;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::ArtifactKind;
use crate::error::{CatalogError, ValidationDefect};
use crate::request::ValidatedArtifact;

const ALTERNATIVE_SEPARATOR: char = '|';
const FOLLOW_SEPARATOR: &str = "..";
const FENCE: &str = "```";

/// A pair of statements that must balance, e.g. `IF` / `ENDIF`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRule
{   /// Opening phrase, one or more words
    pub open: String
  , /// Closing phrase
    pub close: String
  , /// Match the phrase anywhere in a statement, not just at its start
    #[serde(default)]
    pub anywhere: bool
  , /// Statements containing any of these phrases are not counted
    #[serde(default)]
    pub skip_if: Vec<String>
}

impl BlockRule
{   pub fn statement(open: &str, close: &str) -> Self
    {   BlockRule
        {   open: open.to_string()
          , close: close.to_string()
          , anywhere: false
          , skip_if: Vec::new()
        }
    }

    #[must_use]
    pub fn anywhere(mut self) -> Self
    {   self.anywhere = true;
        self
    }

    #[must_use]
    pub fn skip_if(mut self, words: &[&str]) -> Self
    {   self.skip_if = words.iter().map(|w| w.to_string()).collect();
        self
    }
}

/// Validation rules for one artifact kind.
///
/// A required marker is a pattern: leading words a statement must start
/// with, optionally followed by `..` and words that must appear later in
/// the same statement, in order. `|` separates alternatives, so
/// `"CLASS .. DEFINITION"` or `"IMPORTING|EXPORTING"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSet
{   pub required: Vec<String>
  , #[serde(default)]
    pub blocks: Vec<BlockRule>
}

#[derive(Debug, Clone)]
struct Pattern
{   lead: Vec<String>
  , follows: Vec<String>
}

impl Pattern
{   fn matches(&self, statement: &[String]) -> bool
    {   if statement.len() < self.lead.len()
          || statement.iter().zip(&self.lead).any(|(a, b)| a != b)
        {   return false;
        }
        let mut rest = statement[self.lead.len()..].iter();
        self.follows
          .iter()
          .all(|word| rest.any(|token| token == word))
    }
}

#[derive(Debug, Clone)]
struct Marker
{   label: String
  , alternatives: Vec<Pattern>
}

#[derive(Debug, Clone)]
struct CompiledBlock
{   open: Vec<String>
  , close: Vec<String>
  , anywhere: bool
  , skip_if: Vec<Vec<String>>
}

#[derive(Debug, Clone)]
struct CompiledRules
{   required: Vec<Marker>
  , blocks: Vec<CompiledBlock>
}

fn words(text: &str) -> Vec<String>
{   text.split_whitespace().map(str::to_ascii_uppercase).collect()
}

fn compile_marker(pattern: &str) -> Result<Marker, CatalogError>
{   let mut alternatives = Vec::new();
    for alternative in pattern.split(ALTERNATIVE_SEPARATOR)
    {   let (lead, follows) = match alternative.split_once(FOLLOW_SEPARATOR)
        {   Some((lead, follows)) => (words(lead), words(follows))
          , None => (words(alternative), Vec::new())
        };
        if lead.is_empty() && follows.is_empty()
        {   return Err(CatalogError::InvalidMarker(pattern.to_string()));
        }
        alternatives.push(Pattern { lead, follows });
    }
    Ok(Marker
    {   label: pattern.trim().to_string()
      , alternatives
    })
}

fn compile(set: &MarkerSet) -> Result<CompiledRules, CatalogError>
{   let required = set.required
      .iter()
      .map(|p| compile_marker(p))
      .collect::<Result<Vec<_>, _>>()?;
    let mut blocks = Vec::with_capacity(set.blocks.len());
    for rule in &set.blocks
    {   let open = words(&rule.open);
        let close = words(&rule.close);
        if open.is_empty() || close.is_empty()
        {   return Err(CatalogError::InvalidMarker(
              format!("{} / {}", rule.open, rule.close)
            ));
        }
        blocks.push(CompiledBlock
        {   open
          , close
          , anywhere: rule.anywhere
          , skip_if: rule.skip_if
              .iter()
              .map(|phrase| words(phrase))
              .filter(|phrase| !phrase.is_empty())
              .collect()
        });
    }
    Ok(CompiledRules { required, blocks })
}

/// Accepts or rejects raw provider text for a given kind
#[derive(Debug, Clone)]
pub struct ResponseValidator
{   /// Indexed by `ArtifactKind::index`
    rules: Vec<CompiledRules>
}

impl ResponseValidator
{   /// Validator with the built-in ABAP marker sets
    pub fn builtin() -> Result<Self, CatalogError>
    {   Self::with_rules(builtin_marker_sets())
    }

    /// Validator with caller-supplied marker sets; every kind must have one
    pub fn with_rules(
      mut sets: HashMap<ArtifactKind, MarkerSet>
    ) -> Result<Self, CatalogError>
    {   let mut rules = Vec::with_capacity(ArtifactKind::ALL.len());
        for kind in ArtifactKind::ALL
        {   let set = sets
              .remove(&kind)
              .ok_or(CatalogError::MissingRules(kind))?;
            rules.push(compile(&set)?);
        }
        Ok(ResponseValidator { rules })
    }

    /// Check `raw_text` and wrap it as an artifact from `provider`.
    ///
    /// A response holding exactly one Markdown code block is reduced to
    /// that block first; anything else is kept byte for byte.
    pub fn validate(
      &self
    , kind: ArtifactKind
    , raw_text: &str
    , provider: &str
    ) -> Result<ValidatedArtifact, ValidationDefect>
    {   let body = unfence(raw_text);
        if body.trim().is_empty()
        {   return Err(ValidationDefect::Empty);
        }

        let rules = &self.rules[kind.index()];
        let scanned = scan(body);
        trace!(
          "Scanned {} statements and {} interface lines",
          scanned.code.len(),
          scanned.interface.len()
        );

        for marker in &rules.required
        {   let found = scanned.code
              .iter()
              .chain(&scanned.interface)
              .any(|statement| {
                marker.alternatives.iter().any(|p| p.matches(statement))
              });
            if !found
            {   debug!("{} response lacks marker '{}'", kind, marker.label);
                return Err(ValidationDefect::MissingMarker(
                  marker.label.clone()
                ));
            }
        }

        for block in &rules.blocks
        {   check_balance(block, &scanned.code)?;
        }

        Ok(ValidatedArtifact::new(kind, body.to_string(), provider))
    }
}

fn check_balance(
  block: &CompiledBlock
, statements: &[Vec<String>]
) -> Result<(), ValidationDefect>
{   let mut opened = 0usize;
    let mut closed = 0usize;
    let mut depth = 0isize;

    for statement in statements
    {   if block.skip_if.iter().any(|phrase| count_phrase(statement, phrase) > 0)
        {   continue;
        }
        let (opens, closes) = if block.anywhere
        {   (
              count_phrase(statement, &block.open)
            , count_phrase(statement, &block.close)
            )
        } else
        {   (
              usize::from(statement.starts_with(&block.open))
            , usize::from(statement.starts_with(&block.close))
            )
        };
        opened += opens;
        closed += closes;
        depth += opens as isize;
        depth -= closes as isize;
        if depth < 0
        {   break;
        }
    }

    if depth != 0 || opened != closed
    {   return Err(ValidationDefect::UnbalancedBlocks
        {   open: block.open.join(" ")
          , close: block.close.join(" ")
          , opened
          , closed
        });
    }
    Ok(())
}

fn count_phrase(statement: &[String], phrase: &[String]) -> usize
{   statement
      .windows(phrase.len())
      .filter(|window| *window == phrase)
      .count()
}

/// Body of the only fenced code block in `raw`, or `raw` itself when
/// there is no such block or more than one
pub(crate) fn unfence(raw: &str) -> &str
{   let mut fences = Vec::new();
    let mut offset = 0;
    for line in raw.split_inclusive('\n')
    {   if line.trim_start().starts_with(FENCE)
        {   fences.push((offset, offset + line.len()));
        }
        offset += line.len();
    }
    let [(_, open_end), (close_start, _)] = fences.as_slice() else
    {   return raw;
    };
    let inner = &raw[*open_end..*close_start];
    match inner.strip_suffix('\n')
    {   Some(line) => line.strip_suffix('\r').unwrap_or(line)
      , None => inner
    }
}

/// Uppercased statements from code, and from `*"` interface comment lines
#[derive(Debug, Default)]
struct Scanned
{   code: Vec<Vec<String>>
  , interface: Vec<Vec<String>>
}

fn scan(text: &str) -> Scanned
{   let mut scanned = Scanned::default();
    let mut code = String::with_capacity(text.len());

    for line in text.lines()
    {   let start = line.trim_start();
        if let Some(rest) = start.strip_prefix("*\"")
        {   scanned.interface.extend(statements(&strip_comments_and_literals(rest)));
        } else if start.starts_with('*')
        {   continue;
        } else
        {   code.push_str(&strip_comments_and_literals(line));
            code.push('\n');
        }
    }

    scanned.code = statements(&code);
    scanned
}

/// Drop a trailing `"` comment and blank out string literals
fn strip_comments_and_literals(line: &str) -> String
{   let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    for c in line.chars()
    {   match quote
        {   Some(q) => {
              if c == q
              {   quote = None;
              }
              out.push(' ');
            }
          , None => match c
            {   '"' => break
              , '\'' | '`' | '|' => {
                  quote = Some(c);
                  out.push(' ');
                }
              , _ => out.push(c)
            }
        }
    }
    out
}

fn is_token_char(c: char) -> bool
{   c.is_alphanumeric() || matches!(c, '_' | '-' | '/')
}

/// Split on statement and chain delimiters, then into uppercase tokens
fn statements(code: &str) -> Vec<Vec<String>>
{   code.split(|c: char| matches!(c, '.' | ':' | ','))
      .map(|segment| {
        segment
          .split(|c: char| !is_token_char(c))
          .filter(|t| !t.is_empty())
          .map(str::to_ascii_uppercase)
          .collect::<Vec<_>>()
      })
      .filter(|tokens| !tokens.is_empty())
      .collect()
}

fn common_blocks() -> Vec<BlockRule>
{   vec![
      BlockRule::statement("IF", "ENDIF")
    , BlockRule::statement("CASE", "ENDCASE")
    , BlockRule::statement("DO", "ENDDO")
    , BlockRule::statement("WHILE", "ENDWHILE")
    , BlockRule::statement("LOOP", "ENDLOOP")
    , BlockRule::statement("TRY", "ENDTRY")
    , BlockRule::statement("METHOD", "ENDMETHOD")
    , BlockRule::statement("FORM", "ENDFORM")
    , BlockRule::statement("CLASS", "ENDCLASS")
        .skip_if(&["DEFERRED", "LOAD", "LOCAL FRIENDS"])
    , BlockRule::statement("INTERFACE", "ENDINTERFACE").skip_if(&["DEFERRED", "LOAD"])
    , BlockRule::statement("BEGIN OF", "END OF").anywhere().skip_if(&["AT"])
    ]
}

fn marker_set(required: &[&str], extra_blocks: Vec<BlockRule>) -> MarkerSet
{   let mut blocks = common_blocks();
    blocks.extend(extra_blocks);
    MarkerSet
    {   required: required.iter().map(|r| r.to_string()).collect()
      , blocks
    }
}

/// Default marker sets for every kind
pub fn builtin_marker_sets() -> HashMap<ArtifactKind, MarkerSet>
{   let report_blocks = || vec![BlockRule::statement("MODULE", "ENDMODULE")];
    HashMap::from([
      (
        ArtifactKind::AlvReport
      , marker_set(&["REPORT|PROGRAM", "..CL_SALV_TABLE"], report_blocks())
      )
    , (
        ArtifactKind::Report
      , marker_set(&["REPORT|PROGRAM"], report_blocks())
      )
    , (
        ArtifactKind::Class
      , marker_set(
          &["CLASS .. DEFINITION", "CLASS .. IMPLEMENTATION", "ENDCLASS"],
          Vec::new()
        )
      )
    , (
        ArtifactKind::FunctionModule
      , marker_set(
          &[
            "FUNCTION"
          , "ENDFUNCTION"
          , "IMPORTING|EXPORTING|CHANGING|TABLES|EXCEPTIONS"
          ],
          vec![BlockRule::statement("FUNCTION", "ENDFUNCTION")]
        )
      )
    , (
        ArtifactKind::Structure
      , marker_set(&["..BEGIN OF", "..END OF"], Vec::new())
      )
    , (
        ArtifactKind::UnitTest
      , marker_set(
          &["CLASS .. FOR TESTING", "CLASS .. IMPLEMENTATION", "ENDCLASS"],
          Vec::new()
        )
      )
    , (
        ArtifactKind::CustomProgram
      , marker_set(
          &["REPORT|PROGRAM|FUNCTION-POOL|FUNCTION|CLASS .. DEFINITION|INTERFACE"],
          vec![
            BlockRule::statement("MODULE", "ENDMODULE")
          , BlockRule::statement("FUNCTION", "ENDFUNCTION")
          ]
        )
      )
    , (
        ArtifactKind::Enhancement
      , marker_set(
          &[
            "ENHANCEMENT|ENHANCEMENT-POINT|ENHANCEMENT-SECTION\
             |CLASS .. IMPLEMENTATION|METHOD|FORM|FUNCTION|INCLUDE"
          ],
          vec![
            BlockRule::statement("ENHANCEMENT", "ENDENHANCEMENT")
          , BlockRule::statement("ENHANCEMENT-SECTION", "END-ENHANCEMENT-SECTION")
          ]
        )
      )
    ])
}
