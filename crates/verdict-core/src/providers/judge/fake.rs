//! Scripted judge for tests and offline runs.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{
    parse, GenerateOptions, JudgeAdapter, JudgeReply, LogProbCompletion, OutputSchema,
};

#[derive(Debug, Clone, PartialEq)]
pub enum FakeResponse {
    Text(String),
    Json(Value),
    LogProbs(LogProbCompletion),
    Error(String),
}

impl FakeResponse {
    pub fn text(text: impl Into<String>) -> Self {
        FakeResponse::Text(text.into())
    }

    pub fn json(value: Value) -> Self {
        FakeResponse::Json(value)
    }

    pub fn error(message: impl Into<String>) -> Self {
        FakeResponse::Error(message.into())
    }

    fn as_text(&self) -> anyhow::Result<String> {
        match self {
            FakeResponse::Text(t) => Ok(t.clone()),
            FakeResponse::Json(v) => Ok(v.to_string()),
            FakeResponse::LogProbs(c) => Ok(c.text.clone()),
            FakeResponse::Error(e) => anyhow::bail!("{}", e),
        }
    }
}

#[derive(Debug)]
enum Matcher {
    Pattern(Regex),
    Literal(String),
}

impl Matcher {
    /// Invalid regexes degrade to a substring match.
    fn new(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Matcher::Pattern(re),
            Err(_) => Matcher::Literal(pattern.to_string()),
        }
    }

    fn is_match(&self, prompt: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(prompt),
            Matcher::Literal(s) => prompt.contains(s.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Text,
    Structured,
    LogProbs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub mode: CallMode,
    pub schema: Option<String>,
}

/// Answers prompts from an ordered list of `(pattern, response)` rules; the
/// first matching rule wins.
#[derive(Debug)]
pub struct FakeJudge {
    model: String,
    rules: Vec<(Matcher, FakeResponse)>,
    fallback: Option<FakeResponse>,
    structured: bool,
    log_probs: bool,
    delay: Option<Duration>,
    cost: Option<f64>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeJudge {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            rules: Vec::new(),
            fallback: None,
            structured: true,
            log_probs: false,
            delay: None,
            cost: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, pattern: &str, response: FakeResponse) -> Self {
        self.rules.push((Matcher::new(pattern), response));
        self
    }

    pub fn on_json(self, pattern: &str, value: Value) -> Self {
        self.on(pattern, FakeResponse::Json(value))
    }

    pub fn on_text(self, pattern: &str, text: impl Into<String>) -> Self {
        self.on(pattern, FakeResponse::Text(text.into()))
    }

    pub fn on_error(self, pattern: &str, message: impl Into<String>) -> Self {
        self.on(pattern, FakeResponse::Error(message.into()))
    }

    /// Response used when no rule matches.
    pub fn otherwise(mut self, response: FakeResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn without_structured_outputs(mut self) -> Self {
        self.structured = false;
        self
    }

    pub fn with_log_probs(mut self, enabled: bool) -> Self {
        self.log_probs = enabled;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cost reported on every successful reply.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    async fn respond(
        &self,
        prompt: &str,
        mode: CallMode,
        schema: Option<&OutputSchema>,
    ) -> anyhow::Result<FakeResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                mode,
                schema: schema.map(|s| s.name().to_string()),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.rules
            .iter()
            .find(|(matcher, _)| matcher.is_match(prompt))
            .map(|(_, response)| response.clone())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow::anyhow!("fake judge: no response scripted for prompt"))
    }
}

#[async_trait]
impl JudgeAdapter for FakeJudge {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<String>> {
        let response = self.respond(prompt, CallMode::Text, None).await?;
        Ok(JudgeReply::new(response.as_text()?).with_cost(self.cost))
    }

    async fn generate_with_schema(
        &self,
        prompt: &str,
        schema: &OutputSchema,
        _options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<Value>> {
        if !self.structured {
            anyhow::bail!("fake judge configured without structured outputs");
        }
        let value = match self.respond(prompt, CallMode::Structured, Some(schema)).await? {
            FakeResponse::Json(v) => v,
            other => parse::extract_json(&other.as_text()?).map_err(|e| anyhow::anyhow!(e))?,
        };
        Ok(JudgeReply::new(value).with_cost(self.cost))
    }

    async fn generate_with_log_probs(
        &self,
        prompt: &str,
        _top_logprobs: usize,
        _options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<LogProbCompletion>> {
        if !self.log_probs {
            anyhow::bail!("fake judge configured without log probabilities");
        }
        let completion = match self.respond(prompt, CallMode::LogProbs, None).await? {
            FakeResponse::LogProbs(c) => c,
            other => LogProbCompletion {
                text: other.as_text()?,
                tokens: Vec::new(),
            },
        };
        Ok(JudgeReply::new(completion).with_cost(self.cost))
    }

    fn model_name(&self, options: &GenerateOptions) -> String {
        options.model.clone().unwrap_or_else(|| self.model.clone())
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn supports_structured_outputs(&self) -> bool {
        self.structured
    }

    fn supports_log_probs(&self) -> bool {
        self.log_probs
    }
}
