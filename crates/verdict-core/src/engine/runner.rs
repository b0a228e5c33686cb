use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use super::errors::{failure_result, failure_row};
use super::lifecycle::MetricRunner;
use crate::errors::EvalError;
use crate::metrics_api::{Metric, MetricOptions};
use crate::model::{MetricResult, TestCase};
use crate::providers::judge::{AdapterRegistry, JudgeAdapter};
use crate::telemetry::{Event, Telemetry};

pub fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        * 2
}

#[derive(Debug, Clone)]
pub struct EvaluateOptions {
    /// Unit tasks in flight at once.
    pub max_concurrency: usize,
    /// Budget for all metrics of one unit.
    pub timeout_per_unit: Duration,
    /// Name of a registered adapter to use for every judge-backed metric.
    pub judge_adapter_selector: Option<String>,
    pub metric: MetricOptions,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_per_unit: Duration::from_secs(60),
            judge_adapter_selector: None,
            metric: MetricOptions::default(),
        }
    }
}

impl EvaluateOptions {
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_unit = timeout;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.metric.threshold = Some(threshold);
        self
    }

    pub fn with_include_reason(mut self, include_reason: bool) -> Self {
        self.metric.include_reason = include_reason;
        self
    }

    pub fn with_judge_selector(mut self, selector: impl Into<String>) -> Self {
        self.judge_adapter_selector = Some(selector.into());
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn JudgeAdapter>) -> Self {
        self.metric.judge = Some(judge);
        self
    }
}

/// Runs metric grids over batches of test cases.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    runner: MetricRunner,
    telemetry: Telemetry,
    adapters: Arc<AdapterRegistry>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.runner = MetricRunner::new(telemetry.clone());
        self.telemetry = telemetry;
        self
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = Arc::new(adapters);
        self
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Scores every case with every metric.
    ///
    /// Rows come back in case order, results within a row in metric order.
    /// Per-unit failures never abort the batch; only configuration errors
    /// return `Err`, and they do so before any metric runs.
    pub async fn evaluate(
        &self,
        cases: &[TestCase],
        metrics: &[Arc<dyn Metric>],
        options: &EvaluateOptions,
    ) -> Result<Vec<Vec<MetricResult>>, EvalError> {
        let metric_options = Arc::new(self.prepare(metrics, options)?);
        let metrics: Arc<[Arc<dyn Metric>]> = Arc::from(metrics.to_vec());
        let budget = options.timeout_per_unit;

        let started = Instant::now();
        self.telemetry.emit(Event::BatchStart {
            unit_count: cases.len(),
            metric_count: metrics.len(),
        });

        let sem = Arc::new(Semaphore::new(options.max_concurrency));
        let mut join_set = JoinSet::new();
        let mut positions = HashMap::with_capacity(cases.len());

        for (idx, tc) in cases.iter().enumerate() {
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| EvalError::Unhandled(e.to_string()))?;
            let runner = self.runner.clone();
            let metrics = metrics.clone();
            let metric_options = metric_options.clone();
            let tc = tc.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                let unit = evaluate_case(&runner, &tc, &metrics, &metric_options);
                let row = match timeout(budget, unit).await {
                    Ok(row) => row,
                    Err(_) => {
                        tracing::warn!(
                            unit_id = %tc.id,
                            budget_ms = budget.as_millis() as u64,
                            "unit exceeded time budget"
                        );
                        failure_row(&metrics, &EvalError::Timeout)
                    }
                };
                (idx, row)
            });
            positions.insert(handle.id(), idx);
        }

        let mut rows: Vec<Option<Vec<MetricResult>>> = vec![None; cases.len()];
        while let Some(res) = join_set.join_next_with_id().await {
            match res {
                Ok((_, (idx, row))) => rows[idx] = Some(row),
                Err(e) => {
                    let err = EvalError::Unhandled(format!("unit task failed: {}", e));
                    tracing::warn!(error = %err, "unit task did not complete");
                    if let Some(&idx) = positions.get(&e.id()) {
                        rows[idx] = Some(failure_row(&metrics, &err));
                    }
                }
            }
        }

        let rows: Vec<Vec<MetricResult>> = rows
            .into_iter()
            .map(|row| {
                row.unwrap_or_else(|| {
                    failure_row(&metrics, &EvalError::Unhandled("unit result lost".into()))
                })
            })
            .collect();

        self.telemetry.emit(Event::BatchStop {
            unit_count: rows.len(),
            duration: started.elapsed(),
        });
        Ok(rows)
    }

    /// Single-case entry point; same timeout and failure conversion as `evaluate`.
    pub async fn evaluate_one(
        &self,
        tc: &TestCase,
        metrics: &[Arc<dyn Metric>],
        options: &EvaluateOptions,
    ) -> Result<Vec<MetricResult>, EvalError> {
        let mut rows = self
            .evaluate(std::slice::from_ref(tc), metrics, options)
            .await?;
        Ok(rows.pop().unwrap_or_default())
    }

    /// Validates options and resolves the judge every metric will see.
    fn prepare(
        &self,
        metrics: &[Arc<dyn Metric>],
        options: &EvaluateOptions,
    ) -> Result<MetricOptions, EvalError> {
        if metrics.is_empty() {
            return Err(EvalError::config("no metrics to evaluate"));
        }
        if options.max_concurrency == 0 {
            return Err(EvalError::config("max_concurrency must be at least 1"));
        }
        if options.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(EvalError::config(format!(
                "max_concurrency {} exceeds the limit of {}",
                options.max_concurrency,
                Semaphore::MAX_PERMITS
            )));
        }
        if options.timeout_per_unit.is_zero() {
            return Err(EvalError::config("timeout_per_unit must be greater than 0"));
        }

        let mut metric_options = options.metric.clone();
        if let Some(selector) = &options.judge_adapter_selector {
            metric_options.judge = Some(self.adapters.resolve(selector)?);
        }

        if metric_options.judge.is_none() {
            if let Some(m) = metrics
                .iter()
                .find(|m| m.is_judge_backed() && m.judge().is_none())
            {
                return Err(EvalError::config(format!(
                    "metric '{}' needs a judge adapter but none was configured",
                    m.name()
                )));
            }
        }
        Ok(metric_options)
    }
}

async fn evaluate_case(
    runner: &MetricRunner,
    tc: &TestCase,
    metrics: &[Arc<dyn Metric>],
    options: &MetricOptions,
) -> Vec<MetricResult> {
    let mut row = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let result = match runner.run(metric.as_ref(), tc, options).await {
            Ok(result) => result,
            Err(err) => failure_result(metric.as_ref(), &tc.id, &err),
        };
        row.push(result);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::model::{Field, MetricConfig};
    use crate::providers::judge::FakeJudge;
    use async_trait::async_trait;

    struct Needy(MetricConfig);

    #[async_trait]
    impl Metric for Needy {
        fn config(&self) -> &MetricConfig {
            &self.0
        }

        fn is_judge_backed(&self) -> bool {
            true
        }

        async fn score(
            &self,
            _tc: &TestCase,
            _o: &MetricOptions,
        ) -> Result<MetricResult, EvalError> {
            Ok(MetricResult::scored(&self.0, 1.0, 0.5))
        }
    }

    fn needy() -> Arc<dyn Metric> {
        Arc::new(Needy(MetricConfig::new("needy", 0.5, &[Field::Input])))
    }

    #[tokio::test]
    async fn config_errors_fail_fast() {
        let eval = Evaluator::new();
        let cases = [TestCase::new("q")];

        let err = eval.evaluate(&cases, &[], &EvaluateOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let opts = EvaluateOptions::default().with_max_concurrency(0);
        assert!(eval.evaluate(&cases, &[needy()], &opts).await.is_err());

        let opts = EvaluateOptions::default().with_timeout(Duration::ZERO);
        assert!(eval.evaluate(&cases, &[needy()], &opts).await.is_err());
    }

    #[tokio::test]
    async fn oversized_concurrency_is_config_error() {
        let eval = Evaluator::new();
        let opts = EvaluateOptions::default()
            .with_judge(Arc::new(FakeJudge::new("m")))
            .with_max_concurrency(usize::MAX);

        let err = eval.evaluate(&[TestCase::new("q")], &[needy()], &opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(err.to_string().contains("exceeds the limit"));

        let opts = opts.with_max_concurrency(Semaphore::MAX_PERMITS);
        let rows = eval.evaluate(&[TestCase::new("q")], &[needy()], &opts).await.unwrap();
        assert!(rows[0][0].success);
    }

    #[tokio::test]
    async fn judge_backed_metric_needs_adapter() {
        let eval = Evaluator::new();
        let err = eval
            .evaluate(&[TestCase::new("q")], &[needy()], &EvaluateOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("needy"));
    }

    #[tokio::test]
    async fn selector_resolves_through_registry() {
        let eval = Evaluator::new()
            .with_adapters(AdapterRegistry::new().with("fake", Arc::new(FakeJudge::new("m"))));

        let opts = EvaluateOptions::default().with_judge_selector("fake");
        let rows = eval.evaluate(&[TestCase::new("q")], &[needy()], &opts).await.unwrap();
        assert!(rows[0][0].success);

        let opts = EvaluateOptions::default().with_judge_selector("nope");
        let err = eval.evaluate(&[TestCase::new("q")], &[needy()], &opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_grid() {
        let eval = Evaluator::new();
        let opts = EvaluateOptions::default().with_judge(Arc::new(FakeJudge::new("m")));
        let rows = eval.evaluate(&[], &[needy()], &opts).await.unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn default_concurrency_is_positive() {
        assert!(default_max_concurrency() >= 2);
    }
}
