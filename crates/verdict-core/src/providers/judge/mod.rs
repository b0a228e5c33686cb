//! Judge adapter boundary: the only place metrics talk to a model.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EvalError;

pub mod fake;
pub mod openai;
pub mod parse;
pub mod registry;
pub mod schema;
pub mod tracing;

pub use fake::{FakeJudge, FakeResponse};
pub use openai::OpenAiJudge;
pub use registry::AdapterRegistry;
pub use schema::OutputSchema;
pub use self::tracing::TracingJudge;

/// Per-call generation knobs. `None` means "adapter default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A judge reply plus the cost the adapter reported for it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeReply<T> {
    pub value: T,
    pub cost: Option<f64>,
}

impl<T> JudgeReply<T> {
    pub fn new(value: T) -> Self {
        Self { value, cost: None }
    }

    pub fn with_cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> JudgeReply<U> {
        JudgeReply {
            value: f(self.value),
            cost: self.cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopLogProb {
    pub token: String,
    pub logprob: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenLogProb {
    pub token: String,
    pub logprob: f64,
    pub top: Vec<TopLogProb>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogProbCompletion {
    pub text: String,
    pub tokens: Vec<TokenLogProb>,
}

/// A model that can be asked to judge.
///
/// Implementations report transport, auth and rate-limit failures as `Err`;
/// the engine surfaces them as `adapter_error`.
#[async_trait]
pub trait JudgeAdapter: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions)
        -> anyhow::Result<JudgeReply<String>>;

    /// Native structured output. Only called when `supports_structured_outputs`.
    async fn generate_with_schema(
        &self,
        _prompt: &str,
        _schema: &OutputSchema,
        _options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<Value>> {
        anyhow::bail!("{} judge does not support structured outputs", self.provider_name())
    }

    /// Completion with per-token log-probabilities. Only called when `supports_log_probs`.
    async fn generate_with_log_probs(
        &self,
        _prompt: &str,
        _top_logprobs: usize,
        _options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<LogProbCompletion>> {
        anyhow::bail!("{} judge does not support log probabilities", self.provider_name())
    }

    fn model_name(&self, options: &GenerateOptions) -> String;

    fn provider_name(&self) -> &'static str;

    fn supports_structured_outputs(&self) -> bool {
        false
    }

    fn supports_log_probs(&self) -> bool {
        false
    }

    fn supports_multimodal(&self) -> bool {
        false
    }
}

/// Free-text judge call with adapter failures mapped into the engine taxonomy.
pub async fn request_text(
    judge: &dyn JudgeAdapter,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<JudgeReply<String>, EvalError> {
    judge
        .generate(prompt, options)
        .await
        .map_err(|e| EvalError::adapter(&e))
}

/// Structured judge call.
///
/// Uses native structured output when the adapter has it, otherwise embeds
/// the schema in the prompt and parses the reply leniently. Either way the
/// value is validated against `schema` before it is returned.
pub async fn request_structured(
    judge: &dyn JudgeAdapter,
    prompt: &str,
    schema: &OutputSchema,
    options: &GenerateOptions,
) -> Result<JudgeReply<Value>, EvalError> {
    let reply = if judge.supports_structured_outputs() {
        judge
            .generate_with_schema(prompt, schema, options)
            .await
            .map_err(|e| EvalError::adapter(&e))?
    } else {
        let prompt = schema.embed_in_prompt(prompt);
        let reply = request_text(judge, &prompt, options).await?;
        let value = parse::extract_json(&reply.value)
            .map_err(|detail| EvalError::schema_violation(schema.name(), detail))?;
        JudgeReply {
            value,
            cost: reply.cost,
        }
    };

    schema.validate(&reply.value)?;
    Ok(reply)
}

/// `request_structured` followed by deserialization into `T`.
pub async fn request_typed<T: DeserializeOwned>(
    judge: &dyn JudgeAdapter,
    prompt: &str,
    schema: &OutputSchema,
    options: &GenerateOptions,
) -> Result<JudgeReply<T>, EvalError> {
    let reply = request_structured(judge, prompt, schema, options).await?;
    let value = serde_json::from_value(reply.value)
        .map_err(|e| EvalError::schema_violation(schema.name(), e.to_string()))?;
    Ok(JudgeReply {
        value,
        cost: reply.cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    fn claims() -> OutputSchema {
        OutputSchema::string_list("claims", "claims")
    }

    #[tokio::test]
    async fn fallback_parses_fenced_reply() {
        let judge = FakeJudge::new("fake-model")
            .without_structured_outputs()
            .otherwise(FakeResponse::text("```json\n{\"claims\": [\"sky is blue\"]}\n```"));

        let reply = request_structured(
            &judge,
            "Extract claims.",
            &claims(),
            &GenerateOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(reply.value, json!({"claims": ["sky is blue"]}));

        let calls = judge.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.contains("JSON Schema"));
    }

    #[tokio::test]
    async fn native_reply_is_still_validated() {
        let judge =
            FakeJudge::new("fake-model").otherwise(FakeResponse::json(json!({"claims": "nope"})));
        let err = request_structured(
            &judge,
            "Extract claims.",
            &claims(),
            &GenerateOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
    }

    #[tokio::test]
    async fn unparseable_fallback_is_schema_violation() {
        let judge = FakeJudge::new("fake-model")
            .without_structured_outputs()
            .otherwise(FakeResponse::text("I'd rather not."));
        let err = request_structured(
            &judge,
            "Extract claims.",
            &claims(),
            &GenerateOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
    }

    #[tokio::test]
    async fn adapter_failure_is_adapter_error() {
        let judge = FakeJudge::new("fake-model").otherwise(FakeResponse::error("HTTP 503"));
        let err = request_structured(
            &judge,
            "Extract claims.",
            &claims(),
            &GenerateOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AdapterError);
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn typed_reply_carries_cost() {
        #[derive(Deserialize)]
        struct Claims {
            claims: Vec<String>,
        }

        let judge = FakeJudge::new("fake-model")
            .with_cost(0.25)
            .otherwise(FakeResponse::json(json!({"claims": ["x"]})));
        let reply: JudgeReply<Claims> =
            request_typed(&judge, "Extract claims.", &claims(), &GenerateOptions::default())
                .await
                .unwrap();
        assert_eq!(reply.value.claims, vec!["x".to_string()]);
        assert_eq!(reply.cost, Some(0.25));
    }
}
