use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tracing::{info_span, Instrument};

use crate::errors::EvalError;
use crate::metrics_api::{Metric, MetricOptions};
use crate::model::{MetricResult, TestCase};
use crate::telemetry::{Event, Telemetry};

/// Wraps any [`Metric`] with field validation, timing, telemetry and panic capture.
#[derive(Debug, Clone, Default)]
pub struct MetricRunner {
    telemetry: Telemetry,
}

impl MetricRunner {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub async fn run(
        &self,
        metric: &dyn Metric,
        tc: &TestCase,
        options: &MetricOptions,
    ) -> Result<MetricResult, EvalError> {
        let missing = tc.missing_fields(metric.required_fields());
        if !missing.is_empty() {
            return Err(EvalError::missing_params(metric.name(), missing));
        }

        let span = info_span!("metric.measure", metric = metric.name(), unit_id = %tc.id);
        async move {
            self.telemetry.emit(Event::MetricStart {
                metric: metric.name().to_string(),
                unit_id: tc.id.clone(),
            });

            let started = Instant::now();
            let outcome = AssertUnwindSafe(metric.score(tc, options))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(EvalError::Unhandled(panic_message(panic.as_ref()))));
            let duration = started.elapsed();

            match outcome {
                Ok(result) => {
                    let result = result.with_latency(duration);
                    self.telemetry.emit(Event::MetricStop {
                        metric: metric.name().to_string(),
                        unit_id: tc.id.clone(),
                        duration,
                        score: result.score,
                    });
                    Ok(result)
                }
                Err(err) => {
                    self.telemetry.emit(Event::MetricException {
                        metric: metric.name().to_string(),
                        unit_id: tc.id.clone(),
                        duration,
                        error: err.to_json(),
                    });
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "metric panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::model::{Field, MetricConfig};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    enum Behaviour {
        Score(f64),
        Fail,
        Panic,
    }

    struct Scripted {
        config: MetricConfig,
        behaviour: Behaviour,
    }

    impl Scripted {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                config: MetricConfig::new(
                    "scripted",
                    0.5,
                    &[Field::Input, Field::ActualOutput, Field::Context],
                ),
                behaviour,
            }
        }
    }

    #[async_trait]
    impl Metric for Scripted {
        fn config(&self) -> &MetricConfig {
            &self.config
        }

        async fn score(
            &self,
            _tc: &TestCase,
            options: &MetricOptions,
        ) -> Result<MetricResult, EvalError> {
            match self.behaviour {
                Behaviour::Score(s) => Ok(MetricResult::scored(
                    &self.config,
                    s,
                    options.threshold_or(0.5),
                )),
                Behaviour::Fail => Err(EvalError::schema_violation(
                    "verdicts",
                    "2 verdicts for 3 items",
                )),
                Behaviour::Panic => panic!("scoring bug"),
            }
        }
    }

    fn recording() -> (Telemetry, Arc<Mutex<Vec<&'static str>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let telemetry = Telemetry::new().with_sink(Arc::new(move |e: &Event| {
            sink.lock().unwrap().push(e.name());
        }));
        (telemetry, seen)
    }

    fn full_case() -> TestCase {
        TestCase::new("q").with_actual_output("a").with_retrieval_context(["c"])
    }

    #[tokio::test]
    async fn success_emits_start_and_stop_with_latency() {
        let (telemetry, seen) = recording();
        let runner = MetricRunner::new(telemetry);
        let result = runner
            .run(&Scripted::new(Behaviour::Score(0.8)), &full_case(), &MetricOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.latency_ms.is_some());
        assert_eq!(*seen.lock().unwrap(), vec!["metric.start", "metric.stop"]);
    }

    #[tokio::test]
    async fn missing_fields_are_reported_together_without_events() {
        let (telemetry, seen) = recording();
        let runner = MetricRunner::new(telemetry);
        let tc = TestCase::new("q").with_actual_output("");
        let err = runner
            .run(&Scripted::new(Behaviour::Score(1.0)), &tc, &MetricOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.missing_fields(), &[Field::ActualOutput, Field::Context]);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_context_missing() {
        let runner = MetricRunner::default();
        let tc = TestCase::new("q").with_actual_output("a");
        let err = runner
            .run(&Scripted::new(Behaviour::Score(1.0)), &tc, &MetricOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.missing_fields(), &[Field::Context]);
    }

    #[tokio::test]
    async fn scoring_error_emits_exception() {
        let (telemetry, seen) = recording();
        let runner = MetricRunner::new(telemetry);
        let err = runner
            .run(&Scripted::new(Behaviour::Fail), &full_case(), &MetricOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
        assert_eq!(*seen.lock().unwrap(), vec!["metric.start", "metric.exception"]);
    }

    #[tokio::test]
    async fn panic_becomes_unhandled_exception() {
        let runner = MetricRunner::default();
        let err = runner
            .run(&Scripted::new(Behaviour::Panic), &full_case(), &MetricOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnhandledException);
        assert!(err.to_string().contains("scoring bug"));
    }

    #[tokio::test]
    async fn panicking_observer_does_not_affect_result() {
        let telemetry = Telemetry::new().with_sink(Arc::new(|_: &Event| panic!("observer")));
        let runner = MetricRunner::new(telemetry);
        let result = runner
            .run(&Scripted::new(Behaviour::Score(0.2)), &full_case(), &MetricOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
    }
}
