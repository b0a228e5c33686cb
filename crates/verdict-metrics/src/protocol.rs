//! Extract / verdict / reason steps shared by the judge-backed metrics.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use verdict_core::providers::judge::{
    request_structured, request_typed, GenerateOptions, JudgeAdapter, JudgeReply, OutputSchema,
};
use verdict_core::{EvalError, Verdict, VerdictLabel};

#[derive(Deserialize)]
struct Verdicts {
    verdicts: Vec<Verdict>,
}

#[derive(Deserialize)]
struct Reason {
    reason: String,
}

/// One metric run's conversation with the judge. Sums reported costs.
pub(crate) struct JudgeSession<'a> {
    judge: Arc<dyn JudgeAdapter>,
    options: &'a GenerateOptions,
    cost: Mutex<Option<f64>>,
}

impl<'a> JudgeSession<'a> {
    pub fn new(judge: Arc<dyn JudgeAdapter>, options: &'a GenerateOptions) -> Self {
        Self {
            judge,
            options,
            cost: Mutex::new(None),
        }
    }

    pub fn judge(&self) -> &dyn JudgeAdapter {
        self.judge.as_ref()
    }

    pub fn options(&self) -> &GenerateOptions {
        self.options
    }

    pub fn cost(&self) -> Option<f64> {
        self.cost.lock().ok().and_then(|c| *c)
    }

    pub fn add_cost(&self, cost: Option<f64>) {
        if let (Some(cost), Ok(mut total)) = (cost, self.cost.lock()) {
            *total = Some(total.unwrap_or(0.0) + cost);
        }
    }

    pub async fn structured<T: serde::de::DeserializeOwned>(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<T, EvalError> {
        let reply: JudgeReply<T> = request_typed(self.judge(), prompt, schema, self.options).await?;
        self.add_cost(reply.cost);
        Ok(reply.value)
    }

    /// `{ "<key>": [string] }` extraction.
    pub async fn extract(&self, prompt: &str, key: &str) -> Result<Vec<String>, EvalError> {
        let schema = OutputSchema::string_list(key, key);
        let reply = request_structured(self.judge(), prompt, &schema, self.options).await?;
        self.add_cost(reply.cost);
        let items = reply
            .value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }

    /// Exactly one verdict per item, in item order.
    pub async fn verdicts(
        &self,
        prompt: &str,
        schema_name: &str,
        labels: &[VerdictLabel],
        expected: usize,
    ) -> Result<Vec<Verdict>, EvalError> {
        let schema = OutputSchema::verdicts(schema_name, labels);
        let reply: Verdicts = self.structured(prompt, &schema).await?;
        if reply.verdicts.len() != expected {
            return Err(EvalError::schema_violation(
                schema_name,
                format!(
                    "expected {} verdicts, judge returned {}",
                    expected,
                    reply.verdicts.len()
                ),
            ));
        }
        Ok(reply.verdicts)
    }

    pub async fn reason(&self, prompt: &str) -> Result<String, EvalError> {
        let reply: Reason = self.structured(prompt, &OutputSchema::reason("reason")).await?;
        Ok(reply.reason)
    }
}

/// `count / total`, or `empty` when there is nothing to count.
pub fn ratio(count: usize, total: usize, empty: f64) -> f64 {
    if total == 0 {
        empty
    } else {
        count as f64 / total as f64
    }
}

pub fn count_label(verdicts: &[Verdict], label: VerdictLabel) -> usize {
    verdicts.iter().filter(|v| v.verdict == label).count()
}

pub fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reasons attached to verdicts with the given label.
pub fn reasons_for(verdicts: &[Verdict], label: VerdictLabel) -> Vec<String> {
    verdicts
        .iter()
        .filter(|v| v.verdict == label)
        .filter_map(|v| v.reason.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use verdict_core::providers::judge::{FakeJudge, FakeResponse};
    use verdict_core::ErrorKind;

    #[test]
    fn ratio_guards_zero() {
        assert_eq!(ratio(0, 0, 1.0), 1.0);
        assert_eq!(ratio(0, 0, 0.0), 0.0);
        assert!((ratio(2, 3, 0.0) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn numbered_list() {
        assert_eq!(numbered(&["a".into(), "b".into()]), "1. a\n2. b");
    }

    #[tokio::test]
    async fn verdict_count_mismatch_is_schema_violation() {
        let judge = Arc::new(FakeJudge::new("m").otherwise(FakeResponse::json(
            json!({"verdicts": [{"verdict": "yes"}]}),
        )));
        let opts = GenerateOptions::default();
        let session = JudgeSession::new(judge, &opts);
        let err = session
            .verdicts("judge", "v", &[VerdictLabel::Yes, VerdictLabel::No], 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
        assert!(err.to_string().contains("expected 2 verdicts"));
    }

    #[tokio::test]
    async fn costs_accumulate_across_calls() {
        let judge = Arc::new(
            FakeJudge::new("m")
                .with_cost(0.5)
                .on_json("extract", json!({"claims": [" a ", ""]}))
                .on_json("explain", json!({"reason": "because"})),
        );
        let opts = GenerateOptions::default();
        let session = JudgeSession::new(judge, &opts);

        let claims = session.extract("extract", "claims").await.unwrap();
        assert_eq!(claims, vec!["a".to_string()]);
        assert_eq!(session.reason("explain").await.unwrap(), "because");
        assert_eq!(session.cost(), Some(1.0));
    }

    #[tokio::test]
    async fn no_reported_cost_stays_none() {
        let judge =
            Arc::new(FakeJudge::new("m").otherwise(FakeResponse::json(json!({"reason": "r"}))));
        let opts = GenerateOptions::default();
        let session = JudgeSession::new(judge, &opts);
        session.reason("x").await.unwrap();
        assert_eq!(session.cost(), None);
    }
}
