pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics_api;
pub mod model;
pub mod providers;
pub mod telemetry;

pub use engine::{EvaluateOptions, Evaluator, MetricRunner};
pub use errors::{ErrorKind, EvalError};
pub use metrics_api::{Metric, MetricOptions};
pub use model::{Field, MetricConfig, MetricResult, Polarity, TestCase, Verdict, VerdictLabel};
pub use providers::judge::{GenerateOptions, JudgeAdapter, JudgeReply};
pub use telemetry::{Event, EventSink, Telemetry};
