use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "verdict",
    version,
    about = "Score LLM outputs with judge-backed and deterministic metrics"
)]
pub struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate a dataset of test cases against the configured metrics
    Eval(EvalArgs),
    /// List the metric kinds that can be named in a config
    Metrics(MetricsArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct EvalArgs {
    /// YAML config file. Without it, built-in defaults apply and --metric is required.
    #[arg(long, env = "VERDICT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Test cases: YAML list, JSON array, or JSONL (one case per line)
    #[arg(long)]
    pub dataset: PathBuf,

    /// Metric kind to run; repeatable. Replaces the metrics listed in the config.
    #[arg(long = "metric", value_name = "KIND")]
    pub metrics: Vec<String>,

    #[command(flatten)]
    pub judge: JudgeArgs,

    /// Maximum number of test cases scored concurrently
    #[arg(long, env = "VERDICT_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Time budget per test case, covering all of its metrics
    #[arg(long, env = "VERDICT_TIMEOUT_SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Skip the judge call that explains each score
    #[arg(long)]
    pub no_reason: bool,

    /// Override every metric's threshold
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Write the JSON report here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct JudgeArgs {
    /// Judge provider for LLM-backed metrics
    /// - none: judge-backed metrics are rejected
    /// - openai: live calls to an OpenAI-compatible endpoint
    /// - fake: scripted replies from the config (tests/dev)
    #[arg(long, env = "VERDICT_JUDGE")]
    pub judge: Option<String>,

    /// Judge model identifier (provider-specific), e.g. gpt-4o-mini
    #[arg(long, env = "VERDICT_JUDGE_MODEL")]
    pub judge_model: Option<String>,

    #[arg(long, env = "VERDICT_JUDGE_TEMPERATURE")]
    pub judge_temperature: Option<f32>,

    #[arg(long, env = "VERDICT_JUDGE_MAX_TOKENS")]
    pub judge_max_tokens: Option<u32>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "VERDICT_JUDGE_BASE_URL")]
    pub judge_base_url: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MetricsArgs {
    /// Print the table as JSON
    #[arg(long)]
    pub json: bool,
}
