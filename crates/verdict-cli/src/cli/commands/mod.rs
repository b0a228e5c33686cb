use super::args::{Cli, Command};

pub mod eval;
pub mod metrics;
pub(crate) mod report;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Eval(args) => eval::run(args).await,
        Command::Metrics(args) => metrics::run(args),
    }
}
