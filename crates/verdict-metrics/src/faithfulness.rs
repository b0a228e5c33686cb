use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use verdict_core::metrics_api::resolve_judge;
use verdict_core::{
    EvalError, Field, JudgeAdapter, Metric, MetricConfig, MetricOptions, MetricResult, TestCase,
    Verdict, VerdictLabel,
};

use crate::protocol::{count_label, numbered, ratio, reasons_for, JudgeSession};

pub const NAME: &str = "faithfulness";
pub const REQUIRED: &[Field] = &[Field::Input, Field::ActualOutput, Field::Context];
const LABELS: &[VerdictLabel] = &[VerdictLabel::Yes, VerdictLabel::No, VerdictLabel::Idk];

/// Share of claims in the output that the retrieval context does not contradict.
pub struct Faithfulness {
    config: MetricConfig,
    judge: Option<Arc<dyn JudgeAdapter>>,
    truths_limit: Option<usize>,
}

impl Default for Faithfulness {
    fn default() -> Self {
        Self::new()
    }
}

impl Faithfulness {
    pub fn new() -> Self {
        Self {
            config: MetricConfig::new(NAME, 0.5, REQUIRED),
            judge: None,
            truths_limit: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
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

    /// Caps how many truths are extracted from the context.
    pub fn with_truths_limit(mut self, limit: usize) -> Self {
        self.truths_limit = Some(limit);
        self
    }
}

/// `count(verdict != no) / total`; 1.0 with no claims.
pub fn faithfulness_score(verdicts: &[Verdict]) -> f64 {
    let supported = verdicts.len() - count_label(verdicts, VerdictLabel::No);
    ratio(supported, verdicts.len(), 1.0)
}

fn truths_prompt(context: &[String], limit: Option<usize>) -> String {
    let limit = limit
        .map(|n| format!(" Return at most {} truths, the most important first.", n))
        .unwrap_or_default();
    format!(
        "Extract the factual truths stated in the context passages below. \
         Each truth must be a standalone statement that the context explicitly supports.{limit}\n\n\
         Context:\n{}",
        numbered(context)
    )
}

fn claims_prompt(input: &str, output: &str) -> String {
    format!(
        "Extract every factual claim made in the answer below. \
         Include only claims the answer itself asserts, not the question.\n\n\
         Question:\n{input}\n\nAnswer:\n{output}"
    )
}

fn verdicts_prompt(truths: &[String], claims: &[String]) -> String {
    format!(
        "Judge each claim against the truths. \
         For every claim answer \"yes\" if the truths support it, \
         \"no\" if the truths contradict it, or \"idk\" if the truths say nothing about it. \
         Give a short reason for every \"no\". Return exactly {} verdicts in claim order.\n\n\
         Truths:\n{}\n\nClaims:\n{}",
        claims.len(),
        numbered(truths),
        numbered(claims)
    )
}

fn reason_prompt(score: f64, contradictions: &[String]) -> String {
    format!(
        "Explain in one or two sentences why the faithfulness score is {:.2}. \
         Contradictions found:\n{}",
        score,
        if contradictions.is_empty() {
            "none".to_string()
        } else {
            numbered(contradictions)
        }
    )
}

#[async_trait]
impl Metric for Faithfulness {
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
        let session = JudgeSession::new(resolve_judge(self, options)?, &options.generate);

        let truths_prompt = truths_prompt(tc.passages(), self.truths_limit);
        let claims_prompt = claims_prompt(&tc.input, tc.output());
        let (truths, claims) = tokio::try_join!(
            session.extract(&truths_prompt, "truths"),
            session.extract(&claims_prompt, "claims"),
        )?;
        let truths: Vec<String> = match self.truths_limit {
            Some(n) => truths.into_iter().take(n).collect(),
            None => truths,
        };

        let verdicts = if claims.is_empty() {
            Vec::new()
        } else {
            session
                .verdicts(
                    &verdicts_prompt(&truths, &claims),
                    "faithfulness_verdicts",
                    LABELS,
                    claims.len(),
                )
                .await?
        };

        let score = faithfulness_score(&verdicts);
        let reason = if options.include_reason {
            let contradictions = reasons_for(&verdicts, VerdictLabel::No);
            Some(session.reason(&reason_prompt(score, &contradictions)).await?)
        } else {
            None
        };

        Ok(
            MetricResult::scored(&self.config, score, options.threshold_or(self.config.threshold))
                .with_reason(reason)
                .with_cost(session.cost())
                .with_metadata(json!({
                    "truths": truths,
                    "claims": claims,
                    "verdicts": verdicts,
                })),
        )
    }
}
