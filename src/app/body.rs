//! Request body decoding for the appsec monitor.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("empty body")]
    Empty,

    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes `body` into a JSON value according to its content type.
///
/// `application/x-www-form-urlencoded` becomes an object of strings, with
/// repeated keys collected into arrays. Anything else is read as JSON.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, BodyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(BodyError::Empty);
    }

    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if mime == "application/x-www-form-urlencoded" {
        return Ok(parse_form(body));
    }
    Ok(serde_json::from_slice(body)?)
}

fn parse_form(body: &[u8]) -> Value {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(&*key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_by_default() {
        let value = parse_body(None, br#"{"a":[1,"x"]}"#).unwrap();
        assert_eq!(value, json!({"a": [1, "x"]}));
        let value = parse_body(Some("application/vnd.api+json; charset=utf-8"), b"[true]").unwrap();
        assert_eq!(value, json!([true]));
    }

    #[test]
    fn form_collects_repeated_keys() {
        let value = parse_body(
            Some("application/x-www-form-urlencoded"),
            b"q=1%27+OR+1%3D1&tag=a&tag=b&tag=c",
        )
        .unwrap();
        assert_eq!(value, json!({"q": "1' OR 1=1", "tag": ["a", "b", "c"]}));
    }

    #[test]
    fn empty_and_garbage_are_errors() {
        assert!(matches!(parse_body(None, b""), Err(BodyError::Empty)));
        assert!(matches!(parse_body(None, b"  \n"), Err(BodyError::Empty)));
        assert!(matches!(parse_body(Some("text/plain"), b"not json"), Err(BodyError::Json(_))));
    }
}
