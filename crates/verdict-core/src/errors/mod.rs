pub mod similarity;

use crate::model::Field;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy of the evaluation engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("missing required fields for '{metric}': {}", join_fields(.fields))]
    MissingParams { metric: String, fields: Vec<Field> },

    /// Opaque failure reported by the judge adapter (network, auth, rate limit).
    #[error("judge adapter error: {0}")]
    Adapter(String),

    #[error("judge response violated schema '{schema}': {detail}")]
    SchemaViolation { schema: String, detail: String },

    #[error("evaluation timed out")]
    Timeout,

    #[error("unhandled exception: {0}")]
    Unhandled(String),

    #[error("config error: {0}")]
    Config(String),
}

fn join_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(Field::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingParams,
    AdapterError,
    SchemaViolation,
    Timeout,
    UnhandledException,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingParams => "missing_params",
            ErrorKind::AdapterError => "adapter_error",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnhandledException => "unhandled_exception",
            ErrorKind::ConfigError => "config_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::MissingParams { .. } => ErrorKind::MissingParams,
            EvalError::Adapter(_) => ErrorKind::AdapterError,
            EvalError::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            EvalError::Timeout => ErrorKind::Timeout,
            EvalError::Unhandled(_) => ErrorKind::UnhandledException,
            EvalError::Config(_) => ErrorKind::ConfigError,
        }
    }

    pub fn missing_params(metric: impl Into<String>, fields: Vec<Field>) -> Self {
        EvalError::MissingParams {
            metric: metric.into(),
            fields,
        }
    }

    pub fn schema_violation(schema: impl Into<String>, detail: impl Into<String>) -> Self {
        EvalError::SchemaViolation {
            schema: schema.into(),
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        EvalError::Config(detail.into())
    }

    /// Keeps the whole context chain of an adapter failure.
    pub fn adapter(err: &anyhow::Error) -> Self {
        EvalError::Adapter(format!("{:#}", err))
    }

    /// Fields named by a `missing_params` error; empty for every other kind.
    pub fn missing_fields(&self) -> &[Field] {
        match self {
            EvalError::MissingParams { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Payload shape shared by telemetry and synthesized failure results.
    pub fn to_json(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "kind": self.kind().as_str(),
            "message": self.to_string(),
        });
        if let EvalError::MissingParams { fields, .. } = self {
            payload["fields"] = serde_json::json!(fields);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_params_lists_every_field() {
        let err =
            EvalError::missing_params("faithfulness", vec![Field::ActualOutput, Field::Context]);
        assert_eq!(err.kind(), ErrorKind::MissingParams);
        assert_eq!(
            err.to_string(),
            "missing required fields for 'faithfulness': actual_output, context"
        );
        assert_eq!(err.to_json()["fields"], serde_json::json!(["actual_output", "context"]));
    }

    #[test]
    fn adapter_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("HTTP 429").context("judge call failed");
        let err = EvalError::adapter(&inner);
        assert_eq!(err.kind().as_str(), "adapter_error");
        assert!(err.to_string().contains("judge call failed: HTTP 429"));
    }
}
