//! Lenient extraction of JSON arrays from model replies.

use serde_json::Value;

/// Removes a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parses the reply as a JSON array. Prose around the array is tolerated;
/// any other JSON value is rejected.
pub fn parse_json_array(text: &str) -> Result<Vec<Value>, String> {
    let body = strip_code_fences(text);

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => return Ok(items),
        Ok(other) => return Err(format!("expected an array, got {}", kind(&other))),
        Err(_) => {}
    }

    let (Some(open), Some(close)) = (body.find('['), body.rfind(']')) else {
        return Err("no JSON array found".to_string());
    };
    if close <= open {
        return Err("no JSON array found".to_string());
    }
    match serde_json::from_str::<Value>(&body[open..=close]) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(format!("expected an array, got {}", kind(&other))),
        Err(err) => Err(err.to_string()),
    }
}

/// Reads an integer that may have been written as a string.
pub fn as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
