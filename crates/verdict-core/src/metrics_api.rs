use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::EvalError;
use crate::model::{Field, MetricConfig, MetricResult, TestCase};
use crate::providers::judge::{GenerateOptions, JudgeAdapter};

/// Per-call options handed to `Metric::score`.
#[derive(Clone)]
pub struct MetricOptions {
    /// Overrides the metric's configured threshold.
    pub threshold: Option<f64>,
    pub include_reason: bool,
    /// Overrides the metric's own judge.
    pub judge: Option<Arc<dyn JudgeAdapter>>,
    pub generate: GenerateOptions,
    /// Text-comparison overrides for metrics that compare strings.
    pub case_sensitive: Option<bool>,
    pub normalize_whitespace: Option<bool>,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            include_reason: true,
            judge: None,
            generate: GenerateOptions::default(),
            case_sensitive: None,
            normalize_whitespace: None,
        }
    }
}

impl std::fmt::Debug for MetricOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricOptions")
            .field("threshold", &self.threshold)
            .field("include_reason", &self.include_reason)
            .field("judge", &self.judge.as_ref().map(|j| j.provider_name()))
            .field("generate", &self.generate)
            .field("case_sensitive", &self.case_sensitive)
            .field("normalize_whitespace", &self.normalize_whitespace)
            .finish()
    }
}

impl MetricOptions {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_include_reason(mut self, include_reason: bool) -> Self {
        self.include_reason = include_reason;
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn JudgeAdapter>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn threshold_or(&self, configured: f64) -> f64 {
        self.threshold.unwrap_or(configured)
    }
}

/// A scoring function over one test case.
///
/// `score` may assume the fields in `required_fields` are present; the
/// runner checks them first.
#[async_trait]
pub trait Metric: Send + Sync {
    fn config(&self) -> &MetricConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    fn required_fields(&self) -> &[Field] {
        &self.config().required_fields
    }

    fn is_judge_backed(&self) -> bool {
        false
    }

    /// Judge bound at construction, if any.
    fn judge(&self) -> Option<Arc<dyn JudgeAdapter>> {
        None
    }

    async fn score(
        &self,
        tc: &TestCase,
        options: &MetricOptions,
    ) -> Result<MetricResult, EvalError>;
}

/// Judge for this call: the per-call override, else the metric's own.
pub fn resolve_judge(
    metric: &dyn Metric,
    options: &MetricOptions,
) -> Result<Arc<dyn JudgeAdapter>, EvalError> {
    options
        .judge
        .clone()
        .or_else(|| metric.judge())
        .ok_or_else(|| {
            EvalError::config(format!("metric '{}' needs a judge adapter", metric.name()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::judge::FakeJudge;

    struct Constant(MetricConfig);

    #[async_trait]
    impl Metric for Constant {
        fn config(&self) -> &MetricConfig {
            &self.0
        }

        async fn score(
            &self,
            _tc: &TestCase,
            options: &MetricOptions,
        ) -> Result<MetricResult, EvalError> {
            let threshold = options.threshold_or(self.0.threshold);
            Ok(MetricResult::scored(&self.0, 1.0, threshold))
        }
    }

    #[test]
    fn defaults_include_reason() {
        let opts = MetricOptions::default();
        assert!(opts.include_reason);
        assert!(opts.judge.is_none());
        assert!((opts.threshold_or(0.3) - 0.3).abs() < 1e-12);
        assert!((opts.with_threshold(0.9).threshold_or(0.3) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn trait_defaults_come_from_config() {
        let m = Constant(MetricConfig::new("constant", 0.5, &[Field::Input]));
        assert_eq!(m.name(), "constant");
        assert_eq!(m.required_fields(), &[Field::Input]);
        assert!(!m.is_judge_backed());
    }

    #[test]
    fn judge_resolution() {
        let m = Constant(MetricConfig::new("constant", 0.5, &[]));
        assert!(resolve_judge(&m, &MetricOptions::default()).is_err());
        let opts = MetricOptions::default().with_judge(Arc::new(FakeJudge::new("m")));
        assert_eq!(resolve_judge(&m, &opts).unwrap().provider_name(), "fake");
    }
}
