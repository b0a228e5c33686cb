use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use verdict_core::metrics_api::resolve_judge;
use verdict_core::{
    EvalError, Field, JudgeAdapter, Metric, MetricConfig, MetricOptions, MetricResult, TestCase,
    Verdict, VerdictLabel,
};

use crate::protocol::{count_label, numbered, ratio, reasons_for, JudgeSession};

pub const NAME: &str = "answer_relevancy";
pub const REQUIRED: &[Field] = &[Field::Input, Field::ActualOutput];
const LABELS: &[VerdictLabel] = &[VerdictLabel::Yes, VerdictLabel::No, VerdictLabel::Idk];

/// Share of output statements that address the input.
pub struct AnswerRelevancy {
    config: MetricConfig,
    judge: Option<Arc<dyn JudgeAdapter>>,
}

impl Default for AnswerRelevancy {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerRelevancy {
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

/// `count(verdict != no) / total`; 1.0 with no statements.
pub fn relevancy_score(verdicts: &[Verdict]) -> f64 {
    let relevant = verdicts.len() - count_label(verdicts, VerdictLabel::No);
    ratio(relevant, verdicts.len(), 1.0)
}

fn statements_prompt(output: &str) -> String {
    format!(
        "Break the answer below into short standalone statements. \
         Keep every piece of information, drop filler.\n\nAnswer:\n{output}"
    )
}

fn verdicts_prompt(input: &str, statements: &[String]) -> String {
    format!(
        "Decide whether each statement is relevant to the question. \
         Answer \"yes\" if it helps answer the question, \"no\" if it is off-topic, \
         or \"idk\" if it is supporting detail that is neither. \
         Give a short reason for every \"no\". Return exactly {} verdicts in statement order.\n\n\
         Question:\n{input}\n\nStatements:\n{}",
        statements.len(),
        numbered(statements)
    )
}

fn reason_prompt(score: f64, input: &str, irrelevant: &[String]) -> String {
    format!(
        "Explain in one or two sentences why the answer relevancy score is {:.2} for the question \
         \"{}\". Irrelevant statements:\n{}",
        score,
        input,
        if irrelevant.is_empty() { "none".to_string() } else { numbered(irrelevant) }
    )
}

#[async_trait]
impl Metric for AnswerRelevancy {
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

        let statements = session
            .extract(&statements_prompt(tc.output()), "statements")
            .await?;
        let verdicts = if statements.is_empty() {
            Vec::new()
        } else {
            session
                .verdicts(
                    &verdicts_prompt(&tc.input, &statements),
                    "answer_relevancy_verdicts",
                    LABELS,
                    statements.len(),
                )
                .await?
        };

        let score = relevancy_score(&verdicts);
        let reason = if options.include_reason {
            let irrelevant = reasons_for(&verdicts, VerdictLabel::No);
            Some(session.reason(&reason_prompt(score, &tc.input, &irrelevant)).await?)
        } else {
            None
        };

        Ok(
            MetricResult::scored(&self.config, score, options.threshold_or(self.config.threshold))
                .with_reason(reason)
                .with_cost(session.cost())
                .with_metadata(json!({
                    "statements": statements,
                    "verdicts": verdicts,
                })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::providers::judge::FakeJudge;

    #[test]
    fn idk_counts_as_relevant() {
        assert!((relevancy_score(&[Verdict::idk(), Verdict::no()]) - 0.5).abs() < 1e-9);
        assert!((relevancy_score(&[]) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn off_topic_statement_lowers_score() {
        let judge = FakeJudge::new("m")
            .on_json(
                "^Break the answer",
                json!({"statements": [
                    "Paris is the capital.",
                    "I like croissants.",
                    "It has 2M people."
                ]}),
            )
            .on_json(
                "^Decide whether each statement",
                json!({"verdicts": [
                    {"verdict": "yes"},
                    {"verdict": "no", "reason": "personal preference"},
                    {"verdict": "idk"}
                ]}),
            )
            .on_json("^Explain", json!({"reason": "One statement is off-topic."}));
        let tc = TestCase::new("What is the capital of France?")
            .with_actual_output("Paris is the capital. I like croissants. It has 2M people.");

        let result = AnswerRelevancy::new()
            .with_judge(Arc::new(judge))
            .score(&tc, &MetricOptions::default())
            .await
            .unwrap();

        assert!((result.score - 2.0 / 3.0).abs() < 1e-9);
        assert!(result.success);
        assert_eq!(result.metadata["statements"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn threshold_override_applies() {
        let judge = FakeJudge::new("m")
            .on_json("^Break the answer", json!({"statements": ["a", "b"]}))
            .on_json(
                "^Decide whether each statement",
                json!({"verdicts": [{"verdict": "yes"}, {"verdict": "no"}]}),
            );
        let tc = TestCase::new("q").with_actual_output("a. b.");
        let opts = MetricOptions::default()
            .with_include_reason(false)
            .with_threshold(0.9);

        let result = AnswerRelevancy::new()
            .with_judge(Arc::new(judge))
            .score(&tc, &opts)
            .await
            .unwrap();
        assert!(!result.success);
        assert!((result.threshold - 0.9).abs() < 1e-12);
    }
}
