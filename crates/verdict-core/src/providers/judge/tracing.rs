use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info_span, Instrument, Span};

use super::{GenerateOptions, JudgeAdapter, JudgeReply, LogProbCompletion, OutputSchema};

/// Wraps a judge so every call runs inside a `judge.request` span.
pub struct TracingJudge {
    inner: Arc<dyn JudgeAdapter>,
}

impl TracingJudge {
    pub fn new(inner: Arc<dyn JudgeAdapter>) -> Self {
        Self { inner }
    }

    fn span(&self, mode: &'static str, options: &GenerateOptions) -> Span {
        info_span!(
            "judge.request",
            "judge.provider" = self.inner.provider_name(),
            "judge.model" = self.inner.model_name(options).as_str(),
            "judge.mode" = mode,
            "judge.schema" = tracing::field::Empty,
            "judge.cost" = tracing::field::Empty,
            "error" = tracing::field::Empty,
            "error.message" = tracing::field::Empty
        )
    }
}

fn record<T>(result: &anyhow::Result<JudgeReply<T>>) {
    let span = Span::current();
    match result {
        Ok(reply) => {
            if let Some(cost) = reply.cost {
                span.record("judge.cost", cost);
            }
        }
        Err(e) => {
            span.record("error", true);
            span.record("error.message", format!("{:#}", e).as_str());
            tracing::debug!(error = %e, "judge request failed");
        }
    }
}

#[async_trait]
impl JudgeAdapter for TracingJudge {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<String>> {
        async move {
            let result = self.inner.generate(prompt, options).await;
            record(&result);
            result
        }
        .instrument(self.span("text", options))
        .await
    }

    async fn generate_with_schema(
        &self,
        prompt: &str,
        schema: &OutputSchema,
        options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<Value>> {
        let span = self.span("structured", options);
        span.record("judge.schema", schema.name());
        async move {
            let result = self.inner.generate_with_schema(prompt, schema, options).await;
            record(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn generate_with_log_probs(
        &self,
        prompt: &str,
        top_logprobs: usize,
        options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<LogProbCompletion>> {
        async move {
            let result = self
                .inner
                .generate_with_log_probs(prompt, top_logprobs, options)
                .await;
            record(&result);
            result
        }
        .instrument(self.span("log_probs", options))
        .await
    }

    fn model_name(&self, options: &GenerateOptions) -> String {
        self.inner.model_name(options)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn supports_structured_outputs(&self) -> bool {
        self.inner.supports_structured_outputs()
    }

    fn supports_log_probs(&self) -> bool {
        self.inner.supports_log_probs()
    }

    fn supports_multimodal(&self) -> bool {
        self.inner.supports_multimodal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::judge::{FakeJudge, FakeResponse};

    #[tokio::test]
    async fn forwards_calls_and_capabilities() {
        let fake = Arc::new(
            FakeJudge::new("m")
                .without_structured_outputs()
                .otherwise(FakeResponse::text("hi")),
        );
        let judge = TracingJudge::new(fake.clone());
        assert!(!judge.supports_structured_outputs());
        assert_eq!(judge.provider_name(), "fake");

        let reply = judge.generate("hello", &GenerateOptions::default()).await.unwrap();
        assert_eq!(reply.value, "hi");
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let judge = TracingJudge::new(Arc::new(
            FakeJudge::new("m").otherwise(FakeResponse::error("boom")),
        ));
        let err = judge.generate("x", &GenerateOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
