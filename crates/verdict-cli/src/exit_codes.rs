//! Process exit codes. Scripts and CI gates depend on these values.

pub const SUCCESS: i32 = 0;
/// At least one metric result did not succeed (includes synthesized error rows).
pub const METRIC_FAILED: i32 = 1;
/// Bad flags, unreadable config or dataset, or a rejected configuration.
pub const CONFIG_ERROR: i32 = 2;
