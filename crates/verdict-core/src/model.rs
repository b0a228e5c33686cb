use crate::errors::{ErrorKind, EvalError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Tolerance applied in the favourable direction of a threshold comparison.
pub const THRESHOLD_EPSILON: f64 = 1e-9;

fn new_case_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One input/output/context bundle to be scored.
///
/// `retrieval_context` and `context` are synonyms; the explicit
/// `retrieval_context` wins when present (see [`TestCase::context_passages`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    #[serde(default = "new_case_id")]
    pub id: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_context: Option<Vec<String>>,
    /// Legacy name for `retrieval_context`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl TestCase {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            id: new_case_id(),
            input: input.into(),
            actual_output: None,
            expected_output: None,
            retrieval_context: None,
            context: None,
            metadata: serde_json::Map::new(),
            name: None,
            tags: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_actual_output(mut self, output: impl Into<String>) -> Self {
        self.actual_output = Some(output.into());
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_retrieval_context<I, S>(mut self, passages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retrieval_context = Some(passages.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_context<I, S>(mut self, passages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = Some(passages.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Context passages after alias reconciliation: explicit field first, then the alias.
    pub fn context_passages(&self) -> Option<&[String]> {
        self.retrieval_context
            .as_deref()
            .or(self.context.as_deref())
    }

    pub fn output(&self) -> &str {
        self.actual_output.as_deref().unwrap_or_default()
    }

    pub fn expected(&self) -> &str {
        self.expected_output.as_deref().unwrap_or_default()
    }

    pub fn passages(&self) -> &[String] {
        self.context_passages().unwrap_or_default()
    }

    /// Absent, empty string and empty list all count as missing. Whitespace is a value.
    pub fn has_field(&self, field: Field) -> bool {
        match field {
            Field::Input => !self.input.is_empty(),
            Field::ActualOutput => non_empty(self.actual_output.as_deref()),
            Field::ExpectedOutput => non_empty(self.expected_output.as_deref()),
            Field::Context => self
                .context_passages()
                .is_some_and(|passages| !passages.is_empty()),
        }
    }

    /// Every required field that is missing, in the order given.
    pub fn missing_fields(&self, required: &[Field]) -> Vec<Field> {
        required
            .iter()
            .copied()
            .filter(|f| !self.has_field(*f))
            .collect()
    }
}

fn non_empty(s: Option<&str>) -> bool {
    s.is_some_and(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Input,
    #[serde(alias = "output")]
    ActualOutput,
    #[serde(alias = "expected")]
    ExpectedOutput,
    #[serde(alias = "retrieval_context")]
    Context,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Input => "input",
            Field::ActualOutput => "actual_output",
            Field::ExpectedOutput => "expected_output",
            Field::Context => "context",
        }
    }

    /// Human label used when rendering a case into a judge prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Input => "Input",
            Field::ActualOutput => "Actual Output",
            Field::ExpectedOutput => "Expected Output",
            Field::Context => "Context",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

impl Polarity {
    pub fn is_success(&self, score: f64, threshold: f64) -> bool {
        match self {
            Polarity::HigherIsBetter => score + THRESHOLD_EPSILON >= threshold,
            Polarity::LowerIsBetter => score <= threshold + THRESHOLD_EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub threshold: f64,
    pub polarity: Polarity,
    pub required_fields: Vec<Field>,
}

impl MetricConfig {
    pub fn new(name: impl Into<String>, threshold: f64, required_fields: &[Field]) -> Self {
        Self {
            name: name.into(),
            threshold,
            polarity: Polarity::HigherIsBetter,
            required_fields: required_fields.to_vec(),
        }
    }

    pub fn lower_is_better(mut self) -> Self {
        self.polarity = Polarity::LowerIsBetter;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    Yes,
    No,
    Idk,
}

impl VerdictLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictLabel::Yes => "yes",
            VerdictLabel::No => "no",
            VerdictLabel::Idk => "idk",
        }
    }
}

/// A labelled judgment about one extracted item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn new(verdict: VerdictLabel) -> Self {
        Self {
            verdict,
            reason: None,
        }
    }

    pub fn yes() -> Self {
        Self::new(VerdictLabel::Yes)
    }

    pub fn no() -> Self {
        Self::new(VerdictLabel::No)
    }

    pub fn idk() -> Self {
        Self::new(VerdictLabel::Idk)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Outcome of one (test case, metric) evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: String,
    pub score: f64,
    pub success: bool,
    pub threshold: f64,
    pub polarity: Polarity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Set only on results synthesized from an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl MetricResult {
    /// Result whose success is derived from `score`, `threshold` and the config's polarity.
    pub fn scored(config: &MetricConfig, score: f64, threshold: f64) -> Self {
        Self {
            metric: config.name.clone(),
            score,
            success: config.polarity.is_success(score, threshold),
            threshold,
            polarity: config.polarity,
            reason: None,
            metadata: serde_json::json!({}),
            cost: None,
            latency_ms: None,
            error_kind: None,
        }
    }

    /// Synthetic failure standing in for a metric that could not produce a score.
    pub fn failure(metric: &str, err: &EvalError) -> Self {
        Self {
            metric: metric.to_string(),
            score: 0.0,
            success: false,
            threshold: 0.0,
            polarity: Polarity::HigherIsBetter,
            reason: Some(err.to_string()),
            metadata: serde_json::json!({
                "error": {
                    "kind": err.kind().as_str(),
                    "message": err.to_string(),
                }
            }),
            cost: None,
            latency_ms: None,
            error_kind: Some(err.kind()),
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_secs_f64() * 1000.0);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }

    /// Success as implied by `(score, threshold, polarity)`; error results never succeed.
    pub fn recompute_success(&self) -> bool {
        !self.is_error() && self.polarity.is_success(self.score, self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_retrieval_context_wins_over_alias() {
        let tc = TestCase::new("q")
            .with_context(["legacy"])
            .with_retrieval_context(["explicit"]);
        assert_eq!(tc.context_passages(), Some(&["explicit".to_string()][..]));

        let legacy_only = TestCase::new("q").with_context(["legacy"]);
        assert_eq!(
            legacy_only.context_passages(),
            Some(&["legacy".to_string()][..])
        );
    }

    #[test]
    fn empty_values_count_as_missing() {
        let tc = TestCase::new("q")
            .with_actual_output("")
            .with_retrieval_context(Vec::<String>::new());
        let missing = tc.missing_fields(&[
            Field::Input,
            Field::ActualOutput,
            Field::ExpectedOutput,
            Field::Context,
        ]);
        assert_eq!(
            missing,
            vec![Field::ActualOutput, Field::ExpectedOutput, Field::Context]
        );
    }

    #[test]
    fn whitespace_only_values_are_present() {
        let tc = TestCase::new(" ")
            .with_actual_output("   ")
            .with_expected_output("\n");
        let missing =
            tc.missing_fields(&[Field::Input, Field::ActualOutput, Field::ExpectedOutput]);
        assert!(missing.is_empty());
        assert!(!TestCase::new("").has_field(Field::Input));
    }

    #[test]
    fn polarity_decides_success_direction() {
        assert!(Polarity::HigherIsBetter.is_success(0.5, 0.5));
        assert!(!Polarity::HigherIsBetter.is_success(0.4, 0.5));
        assert!(Polarity::LowerIsBetter.is_success(0.5, 0.5));
        assert!(!Polarity::LowerIsBetter.is_success(0.6, 0.5));
    }

    #[test]
    fn failure_result_never_recomputes_to_success() {
        let r = MetricResult::failure("faithfulness", &EvalError::Timeout);
        assert_eq!(r.score, 0.0);
        assert!(!r.success);
        assert!(!r.recompute_success());
        assert_eq!(r.reason.as_deref(), Some("evaluation timed out"));
        assert_eq!(r.metadata["error"]["kind"], "timeout");
    }

    #[test]
    fn deserializes_legacy_field_names() {
        let tc: TestCase = serde_yaml::from_str(
            "input: what?\nactual_output: this\ncontext: [a, b]\nname: case-1\n",
        )
        .unwrap();
        assert_eq!(tc.passages(), &["a".to_string(), "b".to_string()]);
        assert!(!tc.id.is_empty());

        let fields: Vec<Field> =
            serde_yaml::from_str("[input, output, retrieval_context]").unwrap();
        assert_eq!(
            fields,
            vec![Field::Input, Field::ActualOutput, Field::Context]
        );
    }
}
