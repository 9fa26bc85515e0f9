//! Lenient decoding of tool arguments. Models send numbers as strings and
//! keyword lists as comma-separated text often enough to accept both.

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;
use timeline_core::tools::ToolError;

pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    // Hosts pass `null` for tools called without arguments.
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|err| ToolError::InvalidArguments(err.to_string()))
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// A non-negative integer given as a number or a numeric string.
pub fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_u64(&value)
        .ok_or_else(|| D::Error::custom(format!("expected a non-negative integer, got {}", value)))
}

pub fn flexible_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = flexible_u64(deserializer)?;
    usize::try_from(value).map_err(D::Error::custom)
}

/// Keywords given as an array or as comma-separated text.
pub fn flexible_keys<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let keys = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(None),
        Value::String(text) => text.split(',').map(str::to_string).collect::<Vec<_>>(),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => text,
                other => other.to_string(),
            })
            .collect(),
        other => return Err(D::Error::custom(format!("expected keywords, got {}", other))),
    };
    Ok(Some(
        keys.into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect(),
    ))
}

/// Turns literal `\n` sequences into line breaks.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\\r\\n", "\n").replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Args {
        #[serde(deserialize_with = "flexible_usize")]
        chapter: usize,
        #[serde(default, deserialize_with = "flexible_keys")]
        key: Option<Vec<String>>,
    }

    #[test]
    fn accepts_numeric_strings_and_comma_lists() {
        let args: Args = parse_args(json!({"chapter": "3", "key": "sword, blade ,"})).unwrap();
        assert_eq!(args.chapter, 3);
        assert_eq!(args.key.unwrap(), vec!["sword", "blade"]);

        let args: Args = parse_args(json!({"chapter": 2.0, "key": ["a", " b "]})).unwrap();
        assert_eq!(args.chapter, 2);
        assert_eq!(args.key.unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn rejects_negative_and_missing_values() {
        assert!(parse_args::<Args>(json!({"chapter": -1})).is_err());
        let err = parse_args::<Args>(json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(message) if message.contains("chapter")));
    }

    #[test]
    fn literal_newlines_become_line_breaks() {
        assert_eq!(normalize_newlines("a\\nb\\r\\nc"), "a\nb\nc");
    }
}
