//! Output schemas for structured judge replies.
//!
//! Every schema is a closed JSON Schema (Draft 2020-12) object. Replies are
//! validated against it whether they came from native structured output or
//! from the prompt-embedded fallback.

use std::sync::{Arc, OnceLock};

use jsonschema::Draft;
use serde_json::{json, Value};

use crate::errors::EvalError;
use crate::model::VerdictLabel;

#[derive(Clone)]
pub struct OutputSchema {
    name: String,
    schema: Value,
    validator: Arc<OnceLock<Result<jsonschema::Validator, String>>>,
}

impl std::fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSchema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl PartialEq for OutputSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.schema == other.schema
    }
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            validator: Arc::new(OnceLock::new()),
        }
    }

    /// `{ "<key>": [string, ...] }`
    pub fn string_list(name: impl Into<String>, key: &str) -> Self {
        Self::object(
            name,
            json!({ key: { "type": "array", "items": { "type": "string" } } }),
            &[key],
        )
    }

    /// `{ "verdicts": [{ "verdict": <label>, "reason": string|null }, ...] }`
    pub fn verdicts(name: impl Into<String>, labels: &[VerdictLabel]) -> Self {
        let labels: Vec<&str> = labels.iter().map(VerdictLabel::as_str).collect();
        Self::object(
            name,
            json!({
                "verdicts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "verdict": { "type": "string", "enum": labels },
                            "reason": { "type": ["string", "null"] }
                        },
                        "required": ["verdict"],
                        "additionalProperties": false
                    }
                }
            }),
            &["verdicts"],
        )
    }

    /// `{ "reason": string }`
    pub fn reason(name: impl Into<String>) -> Self {
        Self::object(name, json!({ "reason": { "type": "string" } }), &["reason"])
    }

    /// Closed object with the given properties.
    pub fn object(name: impl Into<String>, properties: Value, required: &[&str]) -> Self {
        Self::new(
            name,
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn json_schema(&self) -> &Value {
        &self.schema
    }

    /// True when the schema rejects fields it does not name.
    pub fn is_closed(&self) -> bool {
        self.schema.get("additionalProperties") == Some(&Value::Bool(false))
    }

    /// Prompt for judges without native structured output.
    pub fn embed_in_prompt(&self, prompt: &str) -> String {
        format!(
            "{}\n\nRespond ONLY with a JSON value matching this JSON Schema, \
             with no extra keys and no commentary:\n{}",
            prompt, self.schema
        )
    }

    pub fn validate(&self, instance: &Value) -> Result<(), EvalError> {
        let validator = self
            .validator
            .get_or_init(|| {
                jsonschema::options()
                    .with_draft(Draft::Draft202012)
                    .build(&self.schema)
                    .map_err(|e| format!("failed to compile schema '{}': {}", self.name, e))
            })
            .as_ref()
            .map_err(|e| EvalError::Unhandled(e.clone()))?;

        if validator.is_valid(instance) {
            return Ok(());
        }

        const MAX_ERRORS: usize = 5;
        let detail = validator
            .iter_errors(instance)
            .take(MAX_ERRORS)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(EvalError::schema_violation(&self.name, detail))
    }
}
