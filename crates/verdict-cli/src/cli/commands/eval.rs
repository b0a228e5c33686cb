use std::sync::Arc;
use std::time::Duration;

use verdict_core::config::{load_config, EvalSettings, MetricSpec};
use verdict_core::providers::judge::registry::build_adapter;
use verdict_core::providers::judge::AdapterRegistry;
use verdict_core::{EvalError, Evaluator, Event, Telemetry};
use verdict_metrics::build_metrics;

use super::super::args::EvalArgs;
use super::report::EvalReport;
use crate::dataset::load_dataset;
use crate::exit_codes::{CONFIG_ERROR, SUCCESS};

pub async fn run(args: EvalArgs) -> anyhow::Result<i32> {
    let settings = match resolve_settings(&args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(CONFIG_ERROR);
        }
    };

    let metrics = match build_metrics(&settings.metrics) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(CONFIG_ERROR);
        }
    };

    let cases = match load_dataset(&args.dataset) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("dataset error: {e:#}");
            return Ok(CONFIG_ERROR);
        }
    };
    if cases.is_empty() {
        tracing::warn!(dataset = %args.dataset.display(), "dataset has no test cases");
    }

    let adapter = match build_adapter(&settings.judge) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("config error: {e:#}");
            return Ok(CONFIG_ERROR);
        }
    };

    let mut options = settings.evaluate_options();
    if let Some(t) = args.threshold {
        options = options.with_threshold(t);
    }
    let mut registry = AdapterRegistry::new();
    let judge_label = adapter
        .as_ref()
        .map(|a| format!("{}:{}", a.provider_name(), a.model_name(&options.metric.generate)));
    if let Some(adapter) = adapter {
        registry.register(settings.judge.provider.clone(), adapter);
        options = options.with_judge_selector(settings.judge.provider.clone());
    }

    let evaluator = Evaluator::new()
        .with_telemetry(Telemetry::new().with_sink(Arc::new(progress_sink)))
        .with_adapters(registry);

    let rows = match evaluator.evaluate(&cases, &metrics, &options).await {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(CONFIG_ERROR);
        }
    };

    let report = EvalReport::new(&cases, rows, judge_label);
    for line in report.summary_lines() {
        eprintln!("{}", line);
    }
    let s = &report.summary;
    eprintln!(
        "{} cases, {} results: {} passed, {} failed, {} errored",
        s.cases, s.results, s.passed, s.failed, s.errored
    );
    report.write(args.output.as_deref())?;

    Ok(if cases.is_empty() { SUCCESS } else { report.exit_code() })
}

/// Config file (or defaults) with command-line overrides applied, validated.
pub(crate) fn resolve_settings(args: &EvalArgs) -> Result<EvalSettings, EvalError> {
    let mut settings = match &args.config {
        Some(path) => load_config(path)?,
        None => EvalSettings::default(),
    };

    if !args.metrics.is_empty() {
        settings.metrics = args.metrics.iter().map(MetricSpec::new).collect();
    }
    if settings.metrics.is_empty() {
        return Err(EvalError::config(
            "no metrics configured; list them under 'metrics:' or pass --metric",
        ));
    }
    if let Some(n) = args.max_concurrency {
        settings.max_concurrency = Some(n);
    }
    if let Some(secs) = args.timeout_seconds {
        settings.timeout_seconds = secs;
    }
    if args.no_reason {
        settings.include_reason = false;
    }
    if let Some(t) = args.threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(EvalError::config(format!("--threshold {} is outside [0, 1]", t)));
        }
    }

    let judge = &args.judge;
    if let Some(provider) = &judge.judge {
        settings.judge.provider = provider.clone();
    }
    if let Some(model) = &judge.judge_model {
        settings.judge.model = Some(model.clone());
    }
    if let Some(t) = judge.judge_temperature {
        settings.judge.temperature = t;
    }
    if let Some(n) = judge.judge_max_tokens {
        settings.judge.max_tokens = n;
    }
    if let Some(url) = &judge.judge_base_url {
        settings.judge.base_url = Some(url.clone());
    }

    settings.validate()?;
    Ok(settings)
}

fn progress_sink(event: &Event) {
    match event {
        Event::BatchStart {
            unit_count,
            metric_count,
        } => eprintln!("Evaluating {} cases x {} metrics...", unit_count, metric_count),
        Event::BatchStop { duration, .. } => {
            tracing::info!(elapsed_ms = duration_ms(*duration), "evaluation finished")
        }
        Event::MetricException { metric, unit_id, error, .. } => {
            tracing::debug!(metric = %metric, unit_id = %unit_id, error = %error, "metric raised")
        }
        _ => {}
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::JudgeArgs;
    use std::io::Write;
    use std::path::PathBuf;

    fn args(config: Option<PathBuf>) -> EvalArgs {
        EvalArgs {
            config,
            dataset: PathBuf::from("cases.yaml"),
            metrics: Vec::new(),
            judge: JudgeArgs::default(),
            max_concurrency: None,
            timeout_seconds: None,
            no_reason: false,
            threshold: None,
            output: None,
        }
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "timeout_seconds: 30\nmetrics:\n  - kind: faithfulness\njudge:\n  provider: openai\n"
        )
        .unwrap();

        let mut a = args(Some(file.path().to_path_buf()));
        a.metrics = vec!["exact_match".into()];
        a.timeout_seconds = Some(5);
        a.no_reason = true;
        a.judge.judge = Some("fake".into());

        let s = resolve_settings(&a).unwrap();
        assert_eq!(s.metrics, vec![MetricSpec::new("exact_match")]);
        assert_eq!(s.timeout_seconds, 5);
        assert!(!s.include_reason);
        assert_eq!(s.judge.provider, "fake");
    }

    #[test]
    fn no_metrics_is_a_config_error() {
        let err = resolve_settings(&args(None)).unwrap_err();
        assert_eq!(err.kind(), verdict_core::ErrorKind::ConfigError);
    }

    #[test]
    fn overrides_are_validated() {
        let mut a = args(None);
        a.metrics = vec!["exact_match".into()];
        a.max_concurrency = Some(0);
        assert!(resolve_settings(&a).is_err());

        a.max_concurrency = None;
        a.judge.judge = Some("opneai".into());
        let err = resolve_settings(&a).unwrap_err();
        assert!(err.to_string().contains("did you mean 'openai'"));
    }
}
