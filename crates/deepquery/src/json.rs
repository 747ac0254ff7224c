// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Lenient extraction of structured data from free-form LLM text.
//!
//! No assumption is made that a model reply is valid JSON. The rule,
//! applied uniformly at every call site: try a strict parse, then take
//! the first balanced `{…}` or `[…]` substring and parse that. Callers
//! apply their own documented fallback when both fail.

use serde_json::Value;

use crate::error::{Error, Result};

/// Extract a JSON value from free-form text.
///
/// Tries a strict parse of the whole input first, then falls back to the
/// first balanced `{…}` or `[…]` substring. String literals and escapes
/// are honored while scanning, so braces inside quoted text do not
/// confuse the balancer.
pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(candidate) = first_balanced(trimmed) {
        return serde_json::from_str(candidate)
            .map_err(|e| Error::parse(format!("embedded JSON invalid: {e}")));
    }

    Err(Error::parse("no JSON object or array found in reply"))
}

/// Extract a JSON object and return it, erroring on arrays or scalars.
pub fn extract_object(text: &str) -> Result<serde_json::Map<String, Value>> {
    match extract_json(text)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::parse(format!(
            "expected JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

/// Extract a JSON array field from an object reply, tolerating a bare
/// array reply as well.
pub fn extract_array(text: &str, field: &str) -> Result<Vec<Value>> {
    match extract_json(text)? {
        Value::Array(items) => Ok(items),
        Value::Object(map) => match map.get(field) {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(Error::parse(format!(
                "field '{field}' is {}, not an array",
                kind_of(other)
            ))),
            None => Err(Error::parse(format!("field '{field}' missing from reply"))),
        },
        other => Err(Error::parse(format!(
            "expected object or array, got {}",
            kind_of(&other)
        ))),
    }
}

/// Parse a comma-separated index list, e.g. `"0, 3, 7"`. The literal
/// token `NONE` (any case) yields an empty list. Returns an error when no
/// token parses as an index, so callers can distinguish "model said
/// nothing relevant" from "model said something unparseable".
pub fn parse_index_list(text: &str) -> Result<Vec<usize>> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }

    let indices: Vec<usize> = trimmed
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok())
        .collect();

    if indices.is_empty() {
        let preview: String = trimmed.chars().take(80).collect();
        return Err(Error::parse(format!("no indices found in reply: {preview:?}")));
    }
    Ok(indices)
}

/// Find the first balanced `{…}` or `[…]` substring.
fn first_balanced(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_parse() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_embedded_object() {
        let text = "Sure! Here is the analysis:\n```json\n{\"patterns\": []}\n```\nHope it helps.";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"patterns": []}));
    }

    #[test]
    fn test_embedded_array() {
        let value = extract_json("the indices are [1, 2, 3] as requested").unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"prefix {"note": "uses } inside", "n": 2} suffix"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json("no structure here at all").is_err());
    }

    #[test]
    fn test_unterminated() {
        assert!(extract_json(r#"{"a": 1"#).is_err());
    }

    #[test]
    fn test_extract_array_field() {
        let items = extract_array(r#"{"patterns": [{"name": "x"}]}"#, "patterns").unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_extract_array_bare() {
        let items = extract_array("[1, 2]", "whatever").unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_extract_array_missing_field() {
        assert!(extract_array(r#"{"other": []}"#, "patterns").is_err());
    }

    #[test]
    fn test_index_list() {
        assert_eq!(parse_index_list("0, 3, 7").unwrap(), vec![0, 3, 7]);
        assert_eq!(parse_index_list("1 2 3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_index_list("NONE").unwrap(), Vec::<usize>::new());
        assert_eq!(parse_index_list("none").unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_index_list_with_noise() {
        assert_eq!(parse_index_list("Indices: 2, 5.").unwrap(), vec![2, 5]);
    }

    #[test]
    fn test_index_list_unparseable() {
        assert!(parse_index_list("I cannot determine relevance").is_err());
        assert!(parse_index_list("").is_err());
    }
}
