use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FakeJudge, FakeResponse, JudgeAdapter, OpenAiJudge, TracingJudge};
use crate::config::JudgeSettings;
use crate::errors::similarity::with_hint;
use crate::errors::EvalError;

/// Named judge adapters an evaluation can select by string.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn JudgeAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, adapter: Arc<dyn JudgeAdapter>) -> Self {
        self.register(name, adapter);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn JudgeAdapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JudgeAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Like `get`, but an unknown selector is a config error.
    pub fn resolve(&self, selector: &str) -> Result<Arc<dyn JudgeAdapter>, EvalError> {
        self.get(selector).ok_or_else(|| {
            EvalError::config(with_hint(
                format!("unknown judge adapter '{}'", selector),
                selector,
                self.names(),
            ))
        })
    }
}

/// Builds the judge described by settings; `Ok(None)` for provider "none".
pub fn build_adapter(settings: &JudgeSettings) -> anyhow::Result<Option<Arc<dyn JudgeAdapter>>> {
    let adapter: Arc<dyn JudgeAdapter> = match settings.provider.as_str() {
        "none" => return Ok(None),
        "openai" => {
            let key = std::env::var(&settings.api_key_env).map_err(|_| {
                anyhow::anyhow!(
                    "judge provider openai selected but {} is not set",
                    settings.api_key_env
                )
            })?;
            let model = settings
                .model
                .clone()
                .unwrap_or_else(|| super::openai::DEFAULT_MODEL.to_string());
            let mut judge = OpenAiJudge::new(model, key)
                .with_temperature(settings.temperature)
                .with_max_tokens(settings.max_tokens);
            if let Some(url) = &settings.base_url {
                judge = judge.with_base_url(url.clone());
            }
            Arc::new(judge)
        }
        "fake" => {
            let model = settings.model.clone().unwrap_or_else(|| "fake-judge".to_string());
            let judge = settings
                .fake_responses
                .iter()
                .fold(FakeJudge::new(model), |judge, rule| {
                    let response = match (&rule.json, &rule.text, &rule.error) {
                        (Some(v), _, _) => FakeResponse::json(v.clone()),
                        (_, Some(t), _) => FakeResponse::text(t.clone()),
                        (_, _, Some(e)) => FakeResponse::error(e.clone()),
                        _ => FakeResponse::error("fake rule has no reply"),
                    };
                    judge.on(&rule.pattern, response)
                });
            Arc::new(judge)
        }
        other => anyhow::bail!("unknown judge provider: {}", other),
    };
    Ok(Some(Arc::new(TracingJudge::new(adapter))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FakeRule;
    use crate::providers::judge::GenerateOptions;

    #[test]
    fn resolve_unknown_selector_hints() {
        let registry = AdapterRegistry::new().with("fake", Arc::new(FakeJudge::new("m")));
        assert!(registry.resolve("fake").is_ok());
        let err = registry.resolve("fak").err().unwrap();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ConfigError);
        assert!(err.to_string().contains("did you mean 'fake'"));
    }

    #[test]
    fn none_builds_nothing() {
        assert!(build_adapter(&JudgeSettings::default()).unwrap().is_none());
    }

    #[test]
    fn openai_requires_key() {
        let settings = JudgeSettings {
            provider: "openai".into(),
            api_key_env: "VERDICT_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        let err = build_adapter(&settings).err().unwrap();
        assert!(err.to_string().contains("VERDICT_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[tokio::test]
    async fn fake_from_rules() {
        let settings = JudgeSettings {
            provider: "fake".into(),
            fake_responses: vec![FakeRule {
                pattern: "hello".into(),
                text: Some("world".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let judge = build_adapter(&settings).unwrap().unwrap();
        assert_eq!(judge.provider_name(), "fake");
        let reply = judge.generate("hello there", &GenerateOptions::default()).await.unwrap();
        assert_eq!(reply.value, "world");
    }
}
