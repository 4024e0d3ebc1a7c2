//! Fallback-tolerant payload extraction.
//!
//! Event bodies are free-form JSON. Extraction is a contract over key
//! preference, not a schema: the first present key wins, and a body that is
//! not JSON at all degrades to `("unknown", <raw text>)`. Keys are looked up
//! at the top level first and then inside the `d` envelope, so both bare
//! events and full webhook packets extract the same way.

use serde_json::Value;

/// Extract `(user_id, message)` from a raw event body.
///
/// User id: `author.id`, then `user_id`, else `"unknown"`.
/// Message: `content`, then `message`, else the raw body as text.
pub fn extract(body: &[u8]) -> (String, String) {
    let raw = || String::from_utf8_lossy(body).into_owned();

    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return ("unknown".to_string(), raw());
    };

    let user_id = find_user_id(&value)
        .unwrap_or("unknown")
        .to_string();
    let message = find_message(&value).map(str::to_string).unwrap_or_else(raw);

    (user_id, message)
}

fn find_user_id(value: &Value) -> Option<&str> {
    lookup_user_id(value).or_else(|| value.get("d").and_then(lookup_user_id))
}

fn lookup_user_id(value: &Value) -> Option<&str> {
    value
        .get("author")
        .and_then(|author| author.get("id"))
        .and_then(Value::as_str)
        .or_else(|| value.get("user_id").and_then(Value::as_str))
}

fn find_message(value: &Value) -> Option<&str> {
    lookup_message(value).or_else(|| value.get("d").and_then(lookup_message))
}

fn lookup_message(value: &Value) -> Option<&str> {
    value
        .get("content")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
}
