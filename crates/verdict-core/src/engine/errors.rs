use std::sync::Arc;

use crate::errors::EvalError;
use crate::metrics_api::Metric;
use crate::model::MetricResult;

/// Failure result for one metric, logged where it is synthesized.
pub(crate) fn failure_result(metric: &dyn Metric, unit_id: &str, err: &EvalError) -> MetricResult {
    tracing::warn!(
        metric = metric.name(),
        unit_id,
        kind = err.kind().as_str(),
        error = %err,
        "metric failed; recording synthetic result"
    );
    MetricResult::failure(metric.name(), err)
}

/// A full row of identical failures, one per metric, in metric order.
pub(crate) fn failure_row(metrics: &[Arc<dyn Metric>], err: &EvalError) -> Vec<MetricResult> {
    metrics
        .iter()
        .map(|m| MetricResult::failure(m.name(), err))
        .collect()
}
