//! Item transformers.
//!
//! Each transformer is a pure function from a value list to a value list.
//! Items apply their transformers in declaration order.
//!
//! | Transformer | Effect |
//! |-------------|--------|
//! | `lowercase` / `uppercase` | Case normalization |
//! | `trim` | Strip surrounding whitespace, dropping values left empty |
//! | `to_date` | Reformat a date string (`input_format` to `output_format`) |
//! | `default` | Supply values when the input is empty |
//! | `replace` | Literal substring replacement |
//! | `regex_replace` | Regular expression replacement |
//! | `script` | Rhai expression evaluated once per value, bound to `value` |

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use rhai::{Dynamic, Engine, Scope};
use serde::{Deserialize, Serialize};

use crate::error::MappingError;

/// Maximum number of Rhai operations per script evaluation.
const SCRIPT_MAX_OPERATIONS: u64 = 10_000;

/// A single value transformation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformer {
    Lowercase,
    Uppercase,
    Trim,
    ToDate {
        input_format: String,
        output_format: String,
    },
    Default {
        values: Vec<String>,
    },
    Replace {
        from: String,
        to: String,
    },
    RegexReplace {
        pattern: String,
        replacement: String,
    },
    Script {
        expression: String,
    },
}

impl Transformer {
    /// Identifier used in configuration and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Transformer::Lowercase => "lowercase",
            Transformer::Uppercase => "uppercase",
            Transformer::Trim => "trim",
            Transformer::ToDate { .. } => "to_date",
            Transformer::Default { .. } => "default",
            Transformer::Replace { .. } => "replace",
            Transformer::RegexReplace { .. } => "regex_replace",
            Transformer::Script { .. } => "script",
        }
    }

    /// Apply this transformer to the values of `attribute`.
    pub fn apply(&self, attribute: &str, values: Vec<String>) -> Result<Vec<String>, MappingError> {
        let fail = |message: String| MappingError::Transformer {
            attribute: attribute.to_string(),
            transformer: self.name().to_string(),
            message,
        };

        match self {
            Transformer::Lowercase => Ok(values.into_iter().map(|v| v.to_lowercase()).collect()),
            Transformer::Uppercase => Ok(values.into_iter().map(|v| v.to_uppercase()).collect()),
            Transformer::Trim => Ok(values
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()),
            Transformer::ToDate {
                input_format,
                output_format,
            } => values
                .iter()
                .map(|v| reformat_date(v, input_format, output_format).ok_or_else(|| {
                    fail(format!("'{v}' does not match format '{input_format}'"))
                }))
                .collect(),
            Transformer::Default { values: defaults } => {
                if values.is_empty() {
                    Ok(defaults.clone())
                } else {
                    Ok(values)
                }
            }
            Transformer::Replace { from, to } => Ok(values
                .into_iter()
                .map(|v| v.replace(from.as_str(), to))
                .collect()),
            Transformer::RegexReplace {
                pattern,
                replacement,
            } => {
                let regex = Regex::new(pattern).map_err(|e| fail(e.to_string()))?;
                Ok(values
                    .iter()
                    .map(|v| regex.replace_all(v, replacement.as_str()).into_owned())
                    .collect())
            }
            Transformer::Script { expression } => {
                let engine = script_engine();
                let ast = engine
                    .compile(expression)
                    .map_err(|e| fail(format!("compilation error: {e}")))?;
                values
                    .into_iter()
                    .map(|v| {
                        let mut scope = Scope::new();
                        scope.push("value", v);
                        engine
                            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
                            .map(|result| result.to_string())
                            .map_err(|e| fail(format!("runtime error: {e}")))
                    })
                    .collect()
            }
        }
    }
}

/// Apply a chain of transformers in order.
pub fn apply_chain(
    attribute: &str,
    transformers: &[Transformer],
    values: Vec<String>,
) -> Result<Vec<String>, MappingError> {
    transformers
        .iter()
        .try_fold(values, |values, transformer| transformer.apply(attribute, values))
}

fn reformat_date(value: &str, input_format: &str, output_format: &str) -> Option<String> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, input_format) {
        return Some(dt.format(output_format).to_string());
    }
    NaiveDate::parse_from_str(value, input_format)
        .ok()
        .map(|d| d.format(output_format).to_string())
}

/// Sandboxed Rhai engine for script transformers.
fn script_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(SCRIPT_MAX_OPERATIONS);
    engine.set_max_call_levels(16);
    engine.set_max_string_size(65536);
    engine.set_strict_variables(true);
    engine
}
