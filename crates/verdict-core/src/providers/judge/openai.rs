use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    GenerateOptions, JudgeAdapter, JudgeReply, LogProbCompletion, OutputSchema, TokenLogProb,
    TopLogProb,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// USD per million tokens (input, output). Longest matching prefix wins.
const PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("o3-mini", 1.10, 4.40),
];

/// Chat-completions judge.
pub struct OpenAiJudge {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiJudge {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            max_tokens: 800,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn body(&self, prompt: &str, options: &GenerateOptions) -> Value {
        json!({
            "model": self.model_name(options),
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature.unwrap_or(self.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        })
    }

    async fn chat(&self, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI chat API error (status {}): {}", status, error_text);
        }

        Ok(resp.json().await?)
    }
}

fn content(json: &Value) -> anyhow::Result<&str> {
    json.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("OpenAI API response missing content"))
}

/// Dollar cost from the `usage` block, when the model is in the price table.
pub fn cost_of(model: &str, usage: Option<&Value>) -> Option<f64> {
    let usage = usage?;
    let input = usage.get("prompt_tokens")?.as_f64()?;
    let output = usage.get("completion_tokens")?.as_f64()?;
    let (_, in_price, out_price) = PRICING
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())?;
    Some((input * in_price + output * out_price) / 1_000_000.0)
}

/// OpenAI strict mode needs every object closed with all properties required.
fn strict_compatible(schema: &Value) -> bool {
    match schema {
        Value::Object(map) => {
            if let Some(props) = map.get("properties").and_then(Value::as_object) {
                let closed = map.get("additionalProperties") == Some(&Value::Bool(false));
                let required: Vec<&str> = map
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                if !closed || props.keys().any(|k| !required.contains(&k.as_str())) {
                    return false;
                }
            }
            map.values().all(strict_compatible)
        }
        Value::Array(items) => items.iter().all(strict_compatible),
        _ => true,
    }
}

fn parse_logprobs(json: &Value) -> Vec<TokenLogProb> {
    json.pointer("/choices/0/logprobs/content")
        .and_then(Value::as_array)
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(|t| {
                    Some(TokenLogProb {
                        token: t.get("token")?.as_str()?.to_string(),
                        logprob: t.get("logprob")?.as_f64()?,
                        top: t
                            .get("top_logprobs")
                            .and_then(Value::as_array)
                            .map(|top| {
                                top.iter()
                                    .filter_map(|c| {
                                        Some(TopLogProb {
                                            token: c.get("token")?.as_str()?.to_string(),
                                            logprob: c.get("logprob")?.as_f64()?,
                                        })
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl JudgeAdapter for OpenAiJudge {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<String>> {
        let json = self.chat(&self.body(prompt, options)).await?;
        let text = content(&json)?.to_string();
        Ok(JudgeReply::new(text).with_cost(cost_of(&self.model_name(options), json.get("usage"))))
    }

    async fn generate_with_schema(
        &self,
        prompt: &str,
        schema: &OutputSchema,
        options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<Value>> {
        let mut body = self.body(prompt, options);
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name(),
                "schema": schema.json_schema(),
                "strict": strict_compatible(schema.json_schema()),
            }
        });

        let json = self.chat(&body).await?;
        let value: Value = serde_json::from_str(content(&json)?)
            .map_err(|e| anyhow::anyhow!("OpenAI structured output is not JSON: {}", e))?;
        Ok(JudgeReply::new(value).with_cost(cost_of(&self.model_name(options), json.get("usage"))))
    }

    async fn generate_with_log_probs(
        &self,
        prompt: &str,
        top_logprobs: usize,
        options: &GenerateOptions,
    ) -> anyhow::Result<JudgeReply<LogProbCompletion>> {
        let mut body = self.body(prompt, options);
        body["logprobs"] = json!(true);
        body["top_logprobs"] = json!(top_logprobs.min(20));

        let json = self.chat(&body).await?;
        let completion = LogProbCompletion {
            text: content(&json)?.to_string(),
            tokens: parse_logprobs(&json),
        };
        Ok(JudgeReply::new(completion)
            .with_cost(cost_of(&self.model_name(options), json.get("usage"))))
    }

    fn model_name(&self, options: &GenerateOptions) -> String {
        options.model.clone().unwrap_or_else(|| self.model.clone())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn supports_structured_outputs(&self) -> bool {
        true
    }

    fn supports_log_probs(&self) -> bool {
        true
    }

    fn supports_multimodal(&self) -> bool {
        self.model.starts_with("gpt-4o") || self.model.starts_with("gpt-4.1")
    }
}
