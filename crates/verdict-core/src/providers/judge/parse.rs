//! Lenient JSON extraction for judges without native structured output.

use serde_json::Value;

/// Pulls the first JSON value out of free-form judge text.
///
/// Markdown fences and leading chatter are tolerated; anything after the
/// first complete value is ignored.
pub fn extract_json(text: &str) -> Result<Value, String> {
    let text = strip_fences(text.trim());
    let start = match (text.find('{'), text.find('[')) {
        (Some(o), Some(a)) => o.min(a),
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return Err("no JSON start ({ or [) found in judge output".to_string()),
    };
    let segment = &text[start..];

    serde_json::Deserializer::from_str(segment)
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| "no JSON value found in judge output".to_string())?
        .map_err(|e| format!("invalid JSON: {}", e))
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (```json) up to the first newline.
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_object() {
        assert_eq!(extract_json(r#"{"claims": []}"#).unwrap(), json!({"claims": []}));
    }

    #[test]
    fn fenced_with_chatter() {
        let text = "Sure, here you go:\n```json\n{\"verdicts\": [{\"verdict\": \"yes\"}]}\n```\n\
                    Anything else?";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"verdicts": [{"verdict": "yes"}]})
        );
    }

    #[test]
    fn fence_at_start() {
        let text = "```json\n{\"reason\": \"ok\"}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"reason": "ok"}));
    }

    #[test]
    fn trailing_text_after_value_is_ignored() {
        assert_eq!(extract_json(r#"{"score": 7} and that's final"#).unwrap(), json!({"score": 7}));
    }

    #[test]
    fn array_before_object() {
        assert_eq!(extract_json(r#"["a", {"b": 1}]"#).unwrap(), json!(["a", {"b": 1}]));
    }

    #[test]
    fn no_json() {
        let err = extract_json("I cannot answer that.").unwrap_err();
        assert!(err.contains("no JSON start"));
    }

    #[test]
    fn truncated_json() {
        let err = extract_json(r#"{"claims": ["a", "#).unwrap_err();
        assert!(err.starts_with("invalid JSON"));
    }
}
