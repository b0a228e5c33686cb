use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use verdict_core::metrics_api::resolve_judge;
use verdict_core::{
    EvalError, Field, JudgeAdapter, Metric, MetricConfig, MetricOptions, MetricResult, TestCase,
    Verdict, VerdictLabel,
};

use crate::protocol::{count_label, numbered, ratio, reasons_for, JudgeSession};

pub const NAME: &str = "hallucination";
pub const REQUIRED: &[Field] = &[Field::Input, Field::ActualOutput, Field::Context];
const LABELS: &[VerdictLabel] = &[VerdictLabel::Yes, VerdictLabel::No];

/// Share of context passages the output contradicts. Lower is better.
pub struct Hallucination {
    config: MetricConfig,
    judge: Option<Arc<dyn JudgeAdapter>>,
}

impl Default for Hallucination {
    fn default() -> Self {
        Self::new()
    }
}

impl Hallucination {
    pub fn new() -> Self {
        Self {
            config: MetricConfig::new(NAME, 0.5, REQUIRED).lower_is_better(),
            judge: None,
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
}

/// `count(verdict == no) / total`; 0.0 with no contexts.
pub fn hallucination_score(verdicts: &[Verdict]) -> f64 {
    ratio(count_label(verdicts, VerdictLabel::No), verdicts.len(), 0.0)
}

fn verdicts_prompt(output: &str, contexts: &[String]) -> String {
    format!(
        "Compare the output with each context passage. \
         For every passage answer \"yes\" if the output agrees with it \
         or \"no\" if the output contradicts it. Missing detail is not a contradiction. \
         Give a short reason for every \"no\". Return exactly {} verdicts in passage order.\n\n\
         Output:\n{output}\n\nContexts:\n{}",
        contexts.len(),
        numbered(contexts)
    )
}

fn reason_prompt(score: f64, contradictions: &[String], alignments: &[String]) -> String {
    format!(
        "Explain in one or two sentences why the hallucination score is {:.2} \
         (lower is better).\n\n\
         Contradictions:\n{}\n\nAgreements:\n{}",
        score,
        if contradictions.is_empty() {
            "none".to_string()
        } else {
            numbered(contradictions)
        },
        if alignments.is_empty() { "none".to_string() } else { numbered(alignments) },
    )
}

#[async_trait]
impl Metric for Hallucination {
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
        let contexts = tc.passages();

        let verdicts = session
            .verdicts(
                &verdicts_prompt(tc.output(), contexts),
                "hallucination_verdicts",
                LABELS,
                contexts.len(),
            )
            .await?;

        let score = hallucination_score(&verdicts);
        let reason = if options.include_reason {
            let prompt = reason_prompt(
                score,
                &reasons_for(&verdicts, VerdictLabel::No),
                &reasons_for(&verdicts, VerdictLabel::Yes),
            );
            Some(session.reason(&prompt).await?)
        } else {
            None
        };

        Ok(
            MetricResult::scored(&self.config, score, options.threshold_or(self.config.threshold))
                .with_reason(reason)
                .with_cost(session.cost())
                .with_metadata(json!({ "verdicts": verdicts })),
        )
    }
}
