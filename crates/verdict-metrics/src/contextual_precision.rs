use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use verdict_core::metrics_api::resolve_judge;
use verdict_core::{
    EvalError, Field, JudgeAdapter, Metric, MetricConfig, MetricOptions, MetricResult, TestCase,
    Verdict, VerdictLabel,
};

use crate::protocol::{numbered, JudgeSession};

pub const NAME: &str = "contextual_precision";
pub const REQUIRED: &[Field] = &[Field::Input, Field::Context, Field::ExpectedOutput];
const LABELS: &[VerdictLabel] = &[VerdictLabel::Yes, VerdictLabel::No];

/// Whether useful passages are ranked ahead of useless ones.
pub struct ContextualPrecision {
    config: MetricConfig,
    judge: Option<Arc<dyn JudgeAdapter>>,
}

impl Default for ContextualPrecision {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextualPrecision {
    pub fn new() -> Self {
        Self {
            config: MetricConfig::new(NAME, 0.5, REQUIRED),
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

/// Weighted precision over ranked verdicts.
///
/// At each "yes" position `k` (1-based) adds `yes_so_far / k`; the sum is
/// divided by the number of "yes" verdicts. 0.0 when there are none.
pub fn precision_score(verdicts: &[Verdict]) -> f64 {
    let mut relevant = 0usize;
    let mut sum = 0.0;
    for (i, v) in verdicts.iter().enumerate() {
        if v.verdict == VerdictLabel::Yes {
            relevant += 1;
            sum += relevant as f64 / (i + 1) as f64;
        }
    }
    if relevant == 0 {
        0.0
    } else {
        sum / relevant as f64
    }
}

fn verdicts_prompt(input: &str, expected: &str, contexts: &[String]) -> String {
    format!(
        "Rate each retrieved passage, in the order given, on whether it was useful for arriving at \
         the expected answer to the question. Answer \"yes\" if it was useful, otherwise \"no\", \
         with a short reason. Return exactly {} verdicts in passage order.\n\n\
         Question:\n{input}\n\nExpected answer:\n{expected}\n\nPassages:\n{}",
        contexts.len(),
        numbered(contexts)
    )
}

fn reason_prompt(score: f64, verdicts: &[Verdict]) -> String {
    let ranked = verdicts
        .iter()
        .enumerate()
        .map(|(i, v)| {
            format!(
                "{}. {}{}",
                i + 1,
                v.verdict.as_str(),
                v.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Explain in one or two sentences why the contextual precision score is {:.2}, \
         referring to where the useful passages are ranked.\n\nRanked verdicts:\n{}",
        score, ranked
    )
}

#[async_trait]
impl Metric for ContextualPrecision {
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
                &verdicts_prompt(&tc.input, tc.expected(), contexts),
                "contextual_precision_verdicts",
                LABELS,
                contexts.len(),
            )
            .await?;

        let score = precision_score(&verdicts);
        let reason = if options.include_reason {
            Some(session.reason(&reason_prompt(score, &verdicts)).await?)
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

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::providers::judge::FakeJudge;

    fn v(labels: &str) -> Vec<Verdict> {
        labels
            .chars()
            .map(|c| if c == 'y' { Verdict::yes() } else { Verdict::no() })
            .collect()
    }

    #[test]
    fn order_matters() {
        assert!((precision_score(&v("yyn")) - 1.0).abs() < 1e-9);
        assert!((precision_score(&v("yny")) - 5.0 / 6.0).abs() < 1e-9);
        assert!((precision_score(&v("nyy")) - 7.0 / 12.0).abs() < 1e-9);
        assert_eq!(precision_score(&v("nnn")), 0.0);
        assert_eq!(precision_score(&[]), 0.0);
    }

    #[tokio::test]
    async fn useless_first_passage_drags_score() {
        let judge = FakeJudge::new("m")
            .on_json(
                "^Rate each retrieved passage",
                json!({"verdicts": [
                    {"verdict": "no", "reason": "about Lyon"},
                    {"verdict": "yes"},
                    {"verdict": "yes"}
                ]}),
            )
            .on_json("^Explain", json!({"reason": "The top passage is irrelevant."}));
        let tc = TestCase::new("What is the capital of France?")
            .with_expected_output("Paris.")
            .with_retrieval_context([
                "Lyon is a city.",
                "Paris is the capital.",
                "France's capital is Paris.",
            ]);

        let result = ContextualPrecision::new()
            .with_judge(Arc::new(judge))
            .score(&tc, &MetricOptions::default())
            .await
            .unwrap();
        assert!((result.score - 7.0 / 12.0).abs() < 1e-9);
        assert!(result.success);
        assert_eq!(result.reason.as_deref(), Some("The top passage is irrelevant."));
    }
}
