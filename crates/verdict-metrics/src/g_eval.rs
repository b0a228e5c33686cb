//! G-Eval: criteria-driven LLM scoring on an integer scale.
//!
//! Evaluation steps are either supplied up front or generated from the
//! criteria, then applied to the selected test-case fields in one scoring
//! call. When the judge exposes token log-probabilities the integer score is
//! replaced by the probability-weighted mean over the candidate scores.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use verdict_core::metrics_api::resolve_judge;
use verdict_core::providers::judge::{parse, OutputSchema, TokenLogProb};
use verdict_core::{
    EvalError, Field, JudgeAdapter, Metric, MetricConfig, MetricOptions, MetricResult, TestCase,
};

use crate::protocol::{numbered, JudgeSession};

pub const NAME: &str = "g_eval";
pub const DEFAULT_PARAMS: &[Field] = &[Field::Input, Field::ActualOutput];
pub const DEFAULT_RANGE: (i64, i64) = (0, 10);
const TOP_LOGPROBS: usize = 20;

#[derive(Debug, Deserialize)]
struct ScoreReply {
    score: i64,
    reason: String,
}

pub struct GEval {
    config: MetricConfig,
    judge: Option<Arc<dyn JudgeAdapter>>,
    criteria: Option<String>,
    steps: Vec<String>,
    range: (i64, i64),
    use_log_probs: bool,
}

impl GEval {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: MetricConfig::new(name, 0.5, DEFAULT_PARAMS),
            judge: None,
            criteria: None,
            steps: Vec::new(),
            range: DEFAULT_RANGE,
            use_log_probs: true,
        }
    }

    pub fn criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = Some(criteria.into());
        self
    }

    pub fn evaluation_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Fields rendered into the scoring prompt; they are also the required fields.
    pub fn evaluation_params(mut self, params: &[Field]) -> Self {
        self.config.required_fields = params.to_vec();
        self
    }

    pub fn score_range(mut self, min: i64, max: i64) -> Self {
        self.range = (min, max);
        self
    }

    pub fn use_log_probs(mut self, enabled: bool) -> Self {
        self.use_log_probs = enabled;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn JudgeAdapter>) -> Self {
        self.judge = Some(judge);
        self
    }

    fn score_schema(&self) -> OutputSchema {
        let (min, max) = self.range;
        OutputSchema::object(
            "g_eval_score",
            json!({
                "score": { "type": "integer", "minimum": min, "maximum": max },
                "reason": { "type": "string" }
            }),
            &["score", "reason"],
        )
    }

    async fn steps(&self, session: &JudgeSession<'_>) -> Result<Vec<String>, EvalError> {
        if !self.steps.is_empty() {
            return Ok(self.steps.clone());
        }
        let criteria = self
            .criteria
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                EvalError::config(format!(
                    "g_eval '{}' needs criteria or evaluation steps",
                    self.config.name
                ))
            })?;
        let steps = session.extract(&steps_prompt(criteria), "steps").await?;
        if steps.is_empty() {
            return Err(EvalError::schema_violation(
                "steps",
                "judge returned no evaluation steps",
            ));
        }
        Ok(steps)
    }

    /// Returns the integer score, the weighted score if log-probs were usable, and the reason.
    async fn judge_score(
        &self,
        session: &JudgeSession<'_>,
        prompt: &str,
    ) -> Result<(i64, Option<f64>, String), EvalError> {
        let schema = self.score_schema();
        let judge = session.judge();

        if !(self.use_log_probs && judge.supports_log_probs()) {
            let reply: ScoreReply = session.structured(prompt, &schema).await?;
            return Ok((reply.score, None, reply.reason));
        }

        let reply = judge
            .generate_with_log_probs(
                &schema.embed_in_prompt(prompt),
                TOP_LOGPROBS,
                session.options(),
            )
            .await
            .map_err(|e| EvalError::adapter(&e))?;
        session.add_cost(reply.cost);

        let value = parse::extract_json(&reply.value.text)
            .map_err(|detail| EvalError::schema_violation(schema.name(), detail))?;
        schema.validate(&value)?;
        let parsed: ScoreReply = serde_json::from_value(value)
            .map_err(|e| EvalError::schema_violation(schema.name(), e.to_string()))?;

        let weighted = weighted_score(&reply.value.tokens, parsed.score, self.range);
        Ok((parsed.score, weighted, parsed.reason))
    }
}

/// `(raw - min) / (max - min)`, clamped to `[0, 1]`.
pub fn normalize_score(raw: f64, (min, max): (i64, i64)) -> f64 {
    let span = (max - min) as f64;
    if span <= 0.0 {
        return 0.0;
    }
    ((raw - min as f64) / span).clamp(0.0, 1.0)
}

/// `Σ s·p(s) / Σ p(s)` over the alternatives at the score token that parse as
/// integers inside `range`. The score token is the first integer token after the
/// `"score"` key, so a number in an earlier field is never mistaken for it.
/// `None` when that token is missing, disagrees with `raw` or has no usable
/// alternatives.
pub fn weighted_score(tokens: &[TokenLogProb], raw: i64, (min, max): (i64, i64)) -> Option<f64> {
    let at_score = score_token(tokens)?;
    if parse_int(&at_score.token) != Some(raw) {
        return None;
    }

    let (mut weighted, mut total) = (0.0, 0.0);
    for alt in &at_score.top {
        let Some(s) = parse_int(&alt.token) else {
            continue;
        };
        if s < min || s > max {
            continue;
        }
        let p = alt.logprob.exp();
        weighted += s as f64 * p;
        total += p;
    }
    (total > 0.0).then(|| weighted / total)
}

/// First token ending past the colon of the `"score"` key that reads as an integer.
fn score_token(tokens: &[TokenLogProb]) -> Option<&TokenLogProb> {
    let text: String = tokens.iter().map(|t| t.token.as_str()).collect();
    let value_start = score_value_offset(&text)?;

    let mut end = 0;
    tokens.iter().find(|t| {
        end += t.token.len();
        end > value_start && parse_int(&t.token).is_some()
    })
}

/// Byte offset just past the `:` that follows the `"score"` key.
fn score_value_offset(text: &str) -> Option<usize> {
    const KEY: &str = "\"score\"";
    let mut from = 0;
    while let Some(pos) = text[from..].find(KEY) {
        let after_key = from + pos + KEY.len();
        let rest = &text[after_key..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with(':') {
            return Some(after_key + (rest.len() - trimmed.len()) + 1);
        }
        from = after_key;
    }
    None
}

fn parse_int(token: &str) -> Option<i64> {
    token.trim().trim_end_matches([',', '}']).trim().parse().ok()
}

fn steps_prompt(criteria: &str) -> String {
    format!(
        "Given the evaluation criteria below, write 3 to 4 concise evaluation steps a reviewer \
         should follow to grade a response.\n\nCriteria:\n{criteria}"
    )
}

fn render_case(tc: &TestCase, params: &[Field]) -> String {
    params
        .iter()
        .map(|field| {
            let value = match field {
                Field::Input => tc.input.clone(),
                Field::ActualOutput => tc.output().to_string(),
                Field::ExpectedOutput => tc.expected().to_string(),
                Field::Context => numbered(tc.passages()),
            };
            format!("{}:\n{}", field.label(), value)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn score_prompt(
    criteria: Option<&str>,
    steps: &[String],
    case: &str,
    (min, max): (i64, i64),
) -> String {
    let criteria = criteria
        .map(|c| format!("Criteria:\n{c}\n\n"))
        .unwrap_or_default();
    format!(
        "Grade the test case using the evaluation steps. Give an integer score from {min} (worst) \
         to {max} (best) and a short reason that cites specifics from the test case.\n\n\
         {criteria}Evaluation steps:\n{}\n\nTest case:\n{case}",
        numbered(steps)
    )
}

#[async_trait]
impl Metric for GEval {
    fn config(&self) -> &MetricConfig {
        &self.config
    }

    fn is_judge_backed(&self) -> bool {
        true
    }

    fn judge(&self) -> Option<Arc<dyn JudgeAdapter>> {
        self.judge.clone()
    }

    async fn score(
        &self,
        tc: &TestCase,
        options: &MetricOptions,
    ) -> Result<MetricResult, EvalError> {
        let (min, max) = self.range;
        if min >= max {
            return Err(EvalError::config(format!(
                "g_eval '{}': score range min ({}) must be below max ({})",
                self.config.name, min, max
            )));
        }

        let session = JudgeSession::new(resolve_judge(self, options)?, &options.generate);
        let steps = self.steps(&session).await?;

        let case = render_case(tc, &self.config.required_fields);
        let prompt = score_prompt(self.criteria.as_deref(), &steps, &case, self.range);
        let (raw, weighted, reason) = self.judge_score(&session, &prompt).await?;

        let score = normalize_score(weighted.unwrap_or(raw as f64), self.range);
        Ok(
            MetricResult::scored(&self.config, score, options.threshold_or(self.config.threshold))
                .with_reason(options.include_reason.then_some(reason))
                .with_cost(session.cost())
                .with_metadata(json!({
                    "evaluation_steps": steps,
                    "raw_score": raw,
                    "weighted_score": weighted,
                    "score_range": [min, max],
                })),
        )
    }
}
