use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use verdict_core::metrics_api::resolve_judge;
use verdict_core::{
    EvalError, Field, JudgeAdapter, Metric, MetricConfig, MetricOptions, MetricResult, TestCase,
    Verdict, VerdictLabel,
};

use crate::protocol::{count_label, numbered, ratio, reasons_for, JudgeSession};

pub const NAME: &str = "contextual_recall";
pub const REQUIRED: &[Field] = &[Field::Input, Field::Context, Field::ExpectedOutput];
const LABELS: &[VerdictLabel] = &[VerdictLabel::Yes, VerdictLabel::No];

/// Share of expected-output sentences attributable to the retrieval context.
pub struct ContextualRecall {
    config: MetricConfig,
    judge: Option<Arc<dyn JudgeAdapter>>,
}

impl Default for ContextualRecall {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextualRecall {
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

/// `count(verdict == yes) / total`; 0.0 with no sentences.
pub fn recall_score(verdicts: &[Verdict]) -> f64 {
    ratio(count_label(verdicts, VerdictLabel::Yes), verdicts.len(), 0.0)
}

/// Splits on `.`, `!` or `?` followed by whitespace or end of text.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            sentences.push(&text[start..end]);
            start = end;
        }
    }
    sentences.push(&text[start..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn verdicts_prompt(contexts: &[String], sentences: &[String]) -> String {
    format!(
        "For each sentence of the expected answer, decide whether it can be attributed to the \
         retrieval context. Answer \"yes\" if some passage supports it, otherwise \"no\". \
         Return exactly {} verdicts in sentence order.\n\n\
         Retrieval context:\n{}\n\nSentences:\n{}",
        sentences.len(),
        numbered(contexts),
        numbered(sentences)
    )
}

fn reason_prompt(score: f64, supported: &[String], unsupported: &[String]) -> String {
    format!(
        "Explain in one or two sentences why the contextual recall score is {:.2}.\n\n\
         Attributable:\n{}\n\nNot attributable:\n{}",
        score,
        if supported.is_empty() { "none".to_string() } else { numbered(supported) },
        if unsupported.is_empty() { "none".to_string() } else { numbered(unsupported) },
    )
}

#[async_trait]
impl Metric for ContextualRecall {
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
        let sentences = split_sentences(tc.expected());

        let verdicts = session
            .verdicts(
                &verdicts_prompt(tc.passages(), &sentences),
                "contextual_recall_verdicts",
                LABELS,
                sentences.len(),
            )
            .await?;

        let score = recall_score(&verdicts);
        let reason = if options.include_reason {
            let prompt = reason_prompt(
                score,
                &reasons_for(&verdicts, VerdictLabel::Yes),
                &reasons_for(&verdicts, VerdictLabel::No),
            );
            Some(session.reason(&prompt).await?)
        } else {
            None
        };

        Ok(
            MetricResult::scored(&self.config, score, options.threshold_or(self.config.threshold))
                .with_reason(reason)
                .with_cost(session.cost())
                .with_metadata(json!({
                    "sentences": sentences,
                    "verdicts": verdicts,
                })),
        )
    }
}
