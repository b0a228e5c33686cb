use async_trait::async_trait;
use serde_json::json;
use verdict_core::{EvalError, Field, Metric, MetricConfig, MetricOptions, MetricResult, TestCase};

pub const NAME: &str = "exact_match";
pub const REQUIRED: &[Field] = &[Field::Input, Field::ActualOutput, Field::ExpectedOutput];

/// 1.0 when the normalized output equals the normalized expected output.
pub struct ExactMatch {
    config: MetricConfig,
    case_sensitive: bool,
    normalize_whitespace: bool,
}

impl Default for ExactMatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ExactMatch {
    pub fn new() -> Self {
        Self {
            config: MetricConfig::new(NAME, 1.0, REQUIRED),
            case_sensitive: true,
            normalize_whitespace: false,
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

    pub fn case_sensitive(mut self, enabled: bool) -> Self {
        self.case_sensitive = enabled;
        self
    }

    pub fn normalize_whitespace(mut self, enabled: bool) -> Self {
        self.normalize_whitespace = enabled;
        self
    }
}

/// Trims, optionally collapses whitespace runs, optionally lowercases.
pub fn normalize(text: &str, case_sensitive: bool, normalize_whitespace: bool) -> String {
    let text = text.trim();
    let text = if normalize_whitespace {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        text.to_string()
    };
    if case_sensitive {
        text
    } else {
        text.to_lowercase()
    }
}

pub fn exact_match_score(
    actual: &str,
    expected: &str,
    case_sensitive: bool,
    normalize_whitespace: bool,
) -> f64 {
    let equal = normalize(actual, case_sensitive, normalize_whitespace)
        == normalize(expected, case_sensitive, normalize_whitespace);
    if equal {
        1.0
    } else {
        0.0
    }
}

#[async_trait]
impl Metric for ExactMatch {
    fn config(&self) -> &MetricConfig {
        &self.config
    }

    async fn score(
        &self,
        tc: &TestCase,
        options: &MetricOptions,
    ) -> Result<MetricResult, EvalError> {
        let case_sensitive = options.case_sensitive.unwrap_or(self.case_sensitive);
        let normalize_whitespace = options
            .normalize_whitespace
            .unwrap_or(self.normalize_whitespace);

        let score =
            exact_match_score(tc.output(), tc.expected(), case_sensitive, normalize_whitespace);
        let reason = options.include_reason.then(|| {
            if score >= 1.0 {
                "actual output matches the expected output".to_string()
            } else {
                "actual output differs from the expected output".to_string()
            }
        });

        Ok(
            MetricResult::scored(&self.config, score, options.threshold_or(self.config.threshold))
                .with_reason(reason)
                .with_metadata(json!({
                    "case_sensitive": case_sensitive,
                    "normalize_whitespace": normalize_whitespace,
                })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(actual: &str, expected: &str) -> TestCase {
        TestCase::new("q")
            .with_actual_output(actual)
            .with_expected_output(expected)
    }

    #[tokio::test]
    async fn trims_but_is_case_sensitive_by_default() {
        let m = ExactMatch::new();
        let hit = m.score(&case("  Paris \n", "Paris"), &MetricOptions::default()).await.unwrap();
        assert_eq!(hit.score, 1.0);
        assert!(hit.success);

        let miss = m.score(&case("paris", "Paris"), &MetricOptions::default()).await.unwrap();
        assert_eq!(miss.score, 0.0);
        assert!(!miss.success);
    }

    #[tokio::test]
    async fn case_insensitive_at_construction_or_per_call() {
        let built = ExactMatch::new().case_sensitive(false);
        let r = built.score(&case("A", "a"), &MetricOptions::default()).await.unwrap();
        assert!(r.success);

        let opts = MetricOptions {
            case_sensitive: Some(false),
            ..Default::default()
        };
        let r = ExactMatch::new().score(&case("A", "a"), &opts).await.unwrap();
        assert!(r.success);
        assert_eq!(r.metadata["case_sensitive"], false);
    }

    #[test]
    fn whitespace_runs_collapse_only_when_enabled() {
        assert_eq!(exact_match_score("a  b", "a b", true, false), 0.0);
        assert_eq!(exact_match_score("a \t\n b", "a b", true, true), 1.0);
    }

    #[test]
    fn normalization_is_idempotent() {
        for text in ["  Hello   World ", "x", "MiXeD\tcase "] {
            for (cs, ws) in [(true, false), (false, true), (false, false), (true, true)] {
                let once = normalize(text, cs, ws);
                assert_eq!(normalize(&once, cs, ws), once);
            }
        }
    }

    #[tokio::test]
    async fn default_threshold_is_one_and_reason_optional() {
        let m = ExactMatch::new();
        assert_eq!(m.config().threshold, 1.0);
        let r = m
            .score(&case("a", "b"), &MetricOptions::default().with_include_reason(false))
            .await
            .unwrap();
        assert!(r.reason.is_none());
    }
}
