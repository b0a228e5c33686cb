use std::sync::Arc;

use verdict_core::config::MetricSpec;
use verdict_core::errors::similarity::with_hint;
use verdict_core::{EvalError, Field, Metric, Polarity};

pub mod answer_relevancy;
pub mod contextual_precision;
pub mod contextual_recall;
pub mod exact_match;
pub mod faithfulness;
pub mod g_eval;
pub mod hallucination;
mod protocol;

pub use answer_relevancy::AnswerRelevancy;
pub use contextual_precision::ContextualPrecision;
pub use contextual_recall::ContextualRecall;
pub use exact_match::ExactMatch;
pub use faithfulness::Faithfulness;
pub use g_eval::GEval;
pub use hallucination::Hallucination;

/// A metric kind selectable by name from configuration.
pub struct MetricKind {
    pub kind: &'static str,
    pub required_fields: &'static [Field],
    pub polarity: Polarity,
    pub default_threshold: f64,
    pub judge_backed: bool,
    build: fn(&MetricSpec) -> Result<Arc<dyn Metric>, EvalError>,
}

static REGISTRY: &[MetricKind] = &[
    MetricKind {
        kind: faithfulness::NAME,
        required_fields: faithfulness::REQUIRED,
        polarity: Polarity::HigherIsBetter,
        default_threshold: 0.5,
        judge_backed: true,
        build: build_faithfulness,
    },
    MetricKind {
        kind: hallucination::NAME,
        required_fields: hallucination::REQUIRED,
        polarity: Polarity::LowerIsBetter,
        default_threshold: 0.5,
        judge_backed: true,
        build: build_hallucination,
    },
    MetricKind {
        kind: answer_relevancy::NAME,
        required_fields: answer_relevancy::REQUIRED,
        polarity: Polarity::HigherIsBetter,
        default_threshold: 0.5,
        judge_backed: true,
        build: build_answer_relevancy,
    },
    MetricKind {
        kind: contextual_recall::NAME,
        required_fields: contextual_recall::REQUIRED,
        polarity: Polarity::HigherIsBetter,
        default_threshold: 0.5,
        judge_backed: true,
        build: build_contextual_recall,
    },
    MetricKind {
        kind: contextual_precision::NAME,
        required_fields: contextual_precision::REQUIRED,
        polarity: Polarity::HigherIsBetter,
        default_threshold: 0.5,
        judge_backed: true,
        build: build_contextual_precision,
    },
    MetricKind {
        kind: exact_match::NAME,
        required_fields: exact_match::REQUIRED,
        polarity: Polarity::HigherIsBetter,
        default_threshold: 1.0,
        judge_backed: false,
        build: build_exact_match,
    },
    MetricKind {
        kind: g_eval::NAME,
        required_fields: g_eval::DEFAULT_PARAMS,
        polarity: Polarity::HigherIsBetter,
        default_threshold: 0.5,
        judge_backed: true,
        build: build_g_eval,
    },
];

pub fn available_metrics() -> &'static [MetricKind] {
    REGISTRY
}

/// Resolves `spec.kind` through the registry. Unknown kinds are config errors.
pub fn build_metric(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let entry = REGISTRY.iter().find(|k| k.kind == spec.kind).ok_or_else(|| {
        EvalError::config(with_hint(
            format!("unknown metric kind '{}'", spec.kind),
            &spec.kind,
            REGISTRY.iter().map(|k| k.kind),
        ))
    })?;
    if let Some(threshold) = spec.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EvalError::config(format!(
                "metric '{}': threshold {} is outside [0, 1]",
                spec.kind, threshold
            )));
        }
    }
    warn_ignored(spec);
    (entry.build)(spec)
}

pub fn build_metrics(specs: &[MetricSpec]) -> Result<Vec<Arc<dyn Metric>>, EvalError> {
    specs.iter().map(build_metric).collect()
}

fn warn_ignored(spec: &MetricSpec) {
    let is_g_eval = spec.kind == g_eval::NAME;
    let ignored = [
        ("criteria", spec.criteria.is_some() && !is_g_eval),
        ("evaluation_steps", spec.evaluation_steps.is_some() && !is_g_eval),
        ("evaluation_params", spec.evaluation_params.is_some() && !is_g_eval),
        ("score_range", spec.score_range.is_some() && !is_g_eval),
        ("use_log_probs", spec.use_log_probs.is_some() && !is_g_eval),
        ("case_sensitive", spec.case_sensitive.is_some() && spec.kind != exact_match::NAME),
        (
            "normalize_whitespace",
            spec.normalize_whitespace.is_some() && spec.kind != exact_match::NAME,
        ),
        ("truths_limit", spec.truths_limit.is_some() && spec.kind != faithfulness::NAME),
    ];
    for (key, set) in ignored {
        if set {
            tracing::warn!(
                metric = %spec.kind,
                key,
                "option not used by this metric kind; ignoring"
            );
        }
    }
}

fn build_faithfulness(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let mut m = Faithfulness::new();
    if let Some(name) = &spec.name {
        m = m.with_name(name.clone());
    }
    if let Some(t) = spec.threshold {
        m = m.with_threshold(t);
    }
    if let Some(n) = spec.truths_limit {
        m = m.with_truths_limit(n);
    }
    Ok(Arc::new(m))
}

fn build_hallucination(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let mut m = Hallucination::new();
    if let Some(name) = &spec.name {
        m = m.with_name(name.clone());
    }
    if let Some(t) = spec.threshold {
        m = m.with_threshold(t);
    }
    Ok(Arc::new(m))
}

fn build_answer_relevancy(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let mut m = AnswerRelevancy::new();
    if let Some(name) = &spec.name {
        m = m.with_name(name.clone());
    }
    if let Some(t) = spec.threshold {
        m = m.with_threshold(t);
    }
    Ok(Arc::new(m))
}

fn build_contextual_recall(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let mut m = ContextualRecall::new();
    if let Some(name) = &spec.name {
        m = m.with_name(name.clone());
    }
    if let Some(t) = spec.threshold {
        m = m.with_threshold(t);
    }
    Ok(Arc::new(m))
}

fn build_contextual_precision(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let mut m = ContextualPrecision::new();
    if let Some(name) = &spec.name {
        m = m.with_name(name.clone());
    }
    if let Some(t) = spec.threshold {
        m = m.with_threshold(t);
    }
    Ok(Arc::new(m))
}

fn build_exact_match(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let mut m = ExactMatch::new()
        .case_sensitive(spec.case_sensitive.unwrap_or(true))
        .normalize_whitespace(spec.normalize_whitespace.unwrap_or(false));
    if let Some(name) = &spec.name {
        m = m.with_name(name.clone());
    }
    if let Some(t) = spec.threshold {
        m = m.with_threshold(t);
    }
    Ok(Arc::new(m))
}

fn build_g_eval(spec: &MetricSpec) -> Result<Arc<dyn Metric>, EvalError> {
    let name = spec.name.clone().unwrap_or_else(|| g_eval::NAME.to_string());
    let has_criteria = spec.criteria.as_deref().is_some_and(|c| !c.trim().is_empty());
    let has_steps = spec.evaluation_steps.as_ref().is_some_and(|s| !s.is_empty());
    if !has_criteria && !has_steps {
        return Err(EvalError::config(format!(
            "g_eval '{}' needs criteria or evaluation_steps",
            name
        )));
    }

    let mut m = GEval::new(name);
    if let Some(c) = &spec.criteria {
        m = m.criteria(c.clone());
    }
    if let Some(steps) = &spec.evaluation_steps {
        m = m.evaluation_steps(steps.iter().cloned());
    }
    if let Some(params) = &spec.evaluation_params {
        if params.is_empty() {
            return Err(EvalError::config("g_eval evaluation_params must not be empty"));
        }
        m = m.evaluation_params(params);
    }
    if let Some([min, max]) = spec.score_range {
        if min >= max {
            return Err(EvalError::config(format!(
                "g_eval score_range min ({}) must be below max ({})",
                min, max
            )));
        }
        m = m.score_range(min, max);
    }
    if let Some(enabled) = spec.use_log_probs {
        m = m.use_log_probs(enabled);
    }
    if let Some(t) = spec.threshold {
        m = m.with_threshold(t);
    }
    Ok(Arc::new(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_builds_with_defaults() {
        for kind in available_metrics() {
            let mut spec = MetricSpec::new(kind.kind);
            if kind.kind == g_eval::NAME {
                spec.criteria = Some("Is it good?".into());
            }
            let metric = build_metric(&spec).unwrap();
            assert_eq!(metric.name(), kind.kind);
            assert_eq!(metric.required_fields(), kind.required_fields);
            assert_eq!(metric.config().polarity, kind.polarity);
            assert!((metric.config().threshold - kind.default_threshold).abs() < 1e-12);
            assert_eq!(metric.is_judge_backed(), kind.judge_backed);
        }
    }

    #[test]
    fn unknown_kind_suggests_nearest() {
        let err = build_metric(&MetricSpec::new("faithfullness")).err().unwrap();
        assert_eq!(err.kind(), verdict_core::ErrorKind::ConfigError);
        assert!(err.to_string().contains("did you mean 'faithfulness'"));
    }

    #[test]
    fn spec_overrides_apply() {
        let spec = MetricSpec {
            name: Some("strict_match".into()),
            ..MetricSpec::new("exact_match").with_threshold(0.5)
        };
        let metric = build_metric(&spec).unwrap();
        assert_eq!(metric.name(), "strict_match");
        assert!((metric.config().threshold - 0.5).abs() < 1e-12);
    }

    #[test]
    fn g_eval_params_and_range_are_checked() {
        let spec = MetricSpec {
            criteria: Some("c".into()),
            evaluation_params: Some(vec![Field::ExpectedOutput]),
            ..MetricSpec::new("g_eval")
        };
        let metric = build_metric(&spec).unwrap();
        assert_eq!(metric.required_fields(), &[Field::ExpectedOutput]);

        let bad = MetricSpec {
            criteria: Some("c".into()),
            score_range: Some([5, 5]),
            ..MetricSpec::new("g_eval")
        };
        assert!(build_metric(&bad).is_err());
        assert!(build_metric(&MetricSpec::new("g_eval")).is_err());
    }

    #[test]
    fn threshold_out_of_range() {
        assert!(build_metric(&MetricSpec::new("faithfulness").with_threshold(1.5)).is_err());
    }
}
