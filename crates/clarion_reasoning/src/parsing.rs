//! Lenient JSON extraction from LLM output.
//!
//! Models wrap JSON in prose, markdown fences, or emit it with trailing
//! commas. Parsing tries, in order:
//! 1. Direct parse of the trimmed text
//! 2. The first markdown code block
//! 3. The outermost balanced `{...}`, raw then repaired
//! 4. The full text, repaired

use regex::Regex;
use serde::de::DeserializeOwned;

pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Strategy 1: Direct parse
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Some(value);
    }

    // Strategy 2: Markdown code block
    if let Ok(code_block_re) = Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?\s*```") {
        if let Some(caps) = code_block_re.captures(trimmed) {
            let inner = caps.get(1).map_or("", |m| m.as_str()).trim();
            if let Ok(value) = serde_json::from_str::<T>(inner) {
                return Some(value);
            }
        }
    }

    // Strategy 3: Outermost {...}
    if let Some(json_str) = extract_balanced_braces(trimmed) {
        if let Ok(value) = serde_json::from_str::<T>(&json_str) {
            return Some(value);
        }
        if let Ok(value) = serde_json::from_str::<T>(&repair_json(&json_str)) {
            return Some(value);
        }
    }

    // Strategy 4: Full text repair
    if let Ok(value) = serde_json::from_str::<T>(&repair_json(trimmed)) {
        return Some(value);
    }

    tracing::debug!(
        "Could not parse model output as JSON: {}",
        trimmed.chars().take(200).collect::<String>()
    );
    None
}

/// Extract the outermost balanced `{...}` substring.
fn extract_balanced_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove trailing commas; swap single quotes when no double quotes exist.
fn repair_json(text: &str) -> String {
    let mut result = text.to_string();
    if let Ok(trailing_comma) = Regex::new(r",\s*([}\]])") {
        result = trailing_comma.replace_all(&result, "$1").to_string();
    }
    if !result.contains('"') {
        result = result.replace('\'', "\"");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        text: String,
    }

    #[test]
    fn test_parse_clean_json() {
        let r: Reply = parse_lenient(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(r.text, "hi");
    }

    #[test]
    fn test_parse_code_block() {
        let r: Reply = parse_lenient("Sure:\n```json\n{\"text\": \"hi\"}\n```").unwrap();
        assert_eq!(r.text, "hi");
    }

    #[test]
    fn test_parse_embedded_with_trailing_comma() {
        let r: Reply = parse_lenient(r#"Here you go {"text": "a {b}",} thanks"#).unwrap();
        assert_eq!(r.text, "a {b}");
    }

    #[test]
    fn test_parse_single_quotes() {
        let r: Reply = parse_lenient("{'text': 'hi'}").unwrap();
        assert_eq!(r.text, "hi");
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(parse_lenient::<Reply>("no json here"), None);
        assert_eq!(parse_lenient::<Reply>("   "), None);
    }
}
