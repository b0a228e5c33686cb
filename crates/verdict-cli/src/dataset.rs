//! Test-case files. The format follows the extension: `.jsonl` is one case
//! per line, `.json` is an array, anything else is read as a YAML list.

use anyhow::Context;
use std::collections::HashSet;
use std::path::Path;
use verdict_core::TestCase;

pub fn load_dataset(path: &Path) -> anyhow::Result<Vec<TestCase>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let cases = match ext.as_deref() {
        Some("jsonl") | Some("ndjson") => parse_jsonl(&raw)?,
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse JSON dataset {}", path.display()))?,
        _ => parse_yaml(&raw)
            .with_context(|| format!("failed to parse YAML dataset {}", path.display()))?,
    };
    check_ids(&cases)?;
    Ok(cases)
}

fn parse_jsonl(raw: &str) -> anyhow::Result<Vec<TestCase>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid test case on line {}", i + 1))
        })
        .collect()
}

fn parse_yaml(raw: &str) -> anyhow::Result<Vec<TestCase>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str(raw)?)
}

/// Explicit ids must be unique; generated ones always are.
fn check_ids(cases: &[TestCase]) -> anyhow::Result<()> {
    let mut seen = HashSet::with_capacity(cases.len());
    for tc in cases {
        if !seen.insert(tc.id.as_str()) {
            anyhow::bail!("duplicate test case id '{}'", tc.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn yaml_list_with_context_alias() {
        let f = write(
            ".yaml",
            r#"
- id: paris
  input: "Capital of France?"
  actual_output: "Paris"
  context: ["Paris is the capital of France."]
- input: "2+2?"
  actual_output: "4"
  expected_output: "4"
"#,
        );
        let cases = load_dataset(f.path()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id, "paris");
        assert_eq!(cases[0].passages(), ["Paris is the capital of France.".to_string()]);
        assert!(!cases[1].id.is_empty());
    }

    #[test]
    fn jsonl_skips_blank_lines_and_reports_bad_line() {
        let f = write(".jsonl", "{\"input\": \"a\"}\n\n{\"input\": \"b\"}\n");
        assert_eq!(load_dataset(f.path()).unwrap().len(), 2);

        let bad = write(".jsonl", "{\"input\": \"a\"}\n{\"nope\": 1}\n");
        let err = load_dataset(bad.path()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn json_array() {
        let f = write(".json", r#"[{"id": "x", "input": "q", "retrieval_context": ["c"]}]"#);
        let cases = load_dataset(f.path()).unwrap();
        assert_eq!(cases[0].passages().len(), 1);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let f = write(".json", r#"[{"id": "x", "input": "a"}, {"id": "x", "input": "b"}]"#);
        let err = load_dataset(f.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate test case id 'x'"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_dataset(Path::new("/definitely/not/here.yaml")).is_err());
    }
}
