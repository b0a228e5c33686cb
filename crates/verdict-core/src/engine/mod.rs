pub(crate) mod errors;
pub mod lifecycle;
pub mod runner;

pub use lifecycle::MetricRunner;
pub use runner::{default_max_concurrency, EvaluateOptions, Evaluator};
