use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::engine::{default_max_concurrency, EvaluateOptions};
use crate::errors::similarity::with_hint;
use crate::errors::EvalError;
use crate::metrics_api::MetricOptions;
use crate::model::Field;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const JUDGE_PROVIDERS: &[&str] = &["none", "fake", "openai"];

/// Top-level evaluation settings, usually loaded from `verdict.yaml`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EvalSettings {
    pub version: u32,
    /// Defaults to twice the available parallelism.
    pub max_concurrency: Option<usize>,
    pub timeout_seconds: u64,
    pub include_reason: bool,
    pub judge: JudgeSettings,
    pub metrics: Vec<MetricSpec>,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            max_concurrency: None,
            timeout_seconds: 60,
            include_reason: true,
            judge: JudgeSettings::default(),
            metrics: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct JudgeSettings {
    /// "none", "fake" or "openai".
    pub provider: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: Option<String>,
    /// Scripted replies for the "fake" provider, first match wins.
    pub fake_responses: Vec<FakeRule>,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            model: None,
            temperature: 0.0,
            max_tokens: 800,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            fake_responses: Vec::new(),
        }
    }
}

impl JudgeSettings {
    pub fn is_enabled(&self) -> bool {
        self.provider != "none"
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FakeRule {
    pub pattern: String,
    pub json: Option<Value>,
    pub text: Option<String>,
    pub error: Option<String>,
}

/// One metric entry of the config. `kind` picks the implementation; the
/// remaining keys are only read by the kinds that understand them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricSpec {
    pub kind: String,
    pub name: Option<String>,
    pub threshold: Option<f64>,
    pub criteria: Option<String>,
    pub evaluation_steps: Option<Vec<String>>,
    pub evaluation_params: Option<Vec<Field>>,
    pub score_range: Option<[i64; 2]>,
    pub use_log_probs: Option<bool>,
    pub case_sensitive: Option<bool>,
    pub normalize_whitespace: Option<bool>,
    pub truths_limit: Option<usize>,
}

impl MetricSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

impl EvalSettings {
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.version != SUPPORTED_CONFIG_VERSION {
            return Err(EvalError::config(format!(
                "unsupported config version {} (supported: {})",
                self.version, SUPPORTED_CONFIG_VERSION
            )));
        }
        match self.max_concurrency {
            Some(0) => return Err(EvalError::config("max_concurrency must be at least 1")),
            Some(n) if n > Semaphore::MAX_PERMITS => {
                return Err(EvalError::config(format!(
                    "max_concurrency {} exceeds the limit of {}",
                    n,
                    Semaphore::MAX_PERMITS
                )));
            }
            _ => {}
        }
        if self.timeout_seconds == 0 {
            return Err(EvalError::config("timeout_seconds must be greater than 0"));
        }
        if !JUDGE_PROVIDERS.contains(&self.judge.provider.as_str()) {
            return Err(EvalError::config(with_hint(
                format!("unknown judge provider '{}'", self.judge.provider),
                &self.judge.provider,
                JUDGE_PROVIDERS.iter().copied(),
            )));
        }
        for (i, rule) in self.judge.fake_responses.iter().enumerate() {
            let set = [rule.json.is_some(), rule.text.is_some(), rule.error.is_some()]
                .iter()
                .filter(|b| **b)
                .count();
            if set != 1 {
                return Err(EvalError::config(format!(
                    "judge.fake_responses[{}] must set exactly one of json, text, error",
                    i
                )));
            }
        }
        for spec in &self.metrics {
            if spec.kind.trim().is_empty() {
                return Err(EvalError::config("metric entry without 'kind'"));
            }
            if spec.kind == "g_eval"
                && spec.criteria.as_deref().map_or(true, |c| c.trim().is_empty())
                && spec.evaluation_steps.as_ref().map_or(true, Vec::is_empty)
            {
                return Err(EvalError::config(format!(
                    "metric '{}': g_eval needs criteria or evaluation_steps",
                    spec.name.as_deref().unwrap_or("g_eval")
                )));
            }
            if let Some([min, max]) = spec.score_range {
                if min >= max {
                    return Err(EvalError::config(format!(
                        "metric '{}': score_range min ({}) must be below max ({})",
                        spec.kind, min, max
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn evaluate_options(&self) -> EvaluateOptions {
        EvaluateOptions {
            max_concurrency: self.max_concurrency.unwrap_or_else(default_max_concurrency),
            timeout_per_unit: Duration::from_secs(self.timeout_seconds),
            judge_adapter_selector: None,
            metric: MetricOptions::default().with_include_reason(self.include_reason),
        }
    }
}

pub fn load_config(path: &Path) -> Result<EvalSettings, EvalError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        EvalError::config(format!("failed to read config {}: {}", path.display(), e))
    })?;
    let cfg: EvalSettings = serde_yaml::from_str(&raw)
        .map_err(|e| EvalError::config(format!("failed to parse YAML: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}
