use serde_json::json;
use verdict_core::{Field, Polarity};
use verdict_metrics::available_metrics;

use super::super::args::MetricsArgs;
use crate::exit_codes::SUCCESS;

pub fn run(args: MetricsArgs) -> anyhow::Result<i32> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics_json())?);
    } else {
        print!("{}", metrics_table());
    }
    Ok(SUCCESS)
}

fn polarity_label(p: Polarity) -> &'static str {
    match p {
        Polarity::HigherIsBetter => "higher",
        Polarity::LowerIsBetter => "lower",
    }
}

fn fields(required: &[Field]) -> String {
    required.iter().map(Field::as_str).collect::<Vec<_>>().join(",")
}

pub(crate) fn metrics_table() -> String {
    let mut out = format!(
        "{:<22} {:<7} {:<9} {:<6} {}\n",
        "KIND", "BETTER", "THRESHOLD", "JUDGE", "REQUIRED"
    );
    for kind in available_metrics() {
        out.push_str(&format!(
            "{:<22} {:<7} {:<9.2} {:<6} {}\n",
            kind.kind,
            polarity_label(kind.polarity),
            kind.default_threshold,
            if kind.judge_backed { "yes" } else { "no" },
            fields(kind.required_fields)
        ));
    }
    out
}

pub(crate) fn metrics_json() -> serde_json::Value {
    available_metrics()
        .iter()
        .map(|kind| {
            json!({
                "kind": kind.kind,
                "polarity": kind.polarity,
                "default_threshold": kind.default_threshold,
                "judge_backed": kind.judge_backed,
                "required_fields": kind.required_fields,
            })
        })
        .collect()
}
