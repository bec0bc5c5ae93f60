//! Log sanitisation and response normalisation.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const HIDDEN: &str = "<hidden>";

static BODY_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)("\w*?(?:apikey|password|secret|token)\w*?"\s*:\s*)"(?:[^"\\]|\\.)*""#)
        .expect("Invalid body secret regex")
});

static URL_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\b\w*?(?:apikey|password|secret|token)\w*?=)[^&]*")
        .expect("Invalid URL secret regex")
});

/// Mask secret-looking string values in a JSON body.
#[must_use]
pub fn sanitize_body(body: &str) -> String {
    BODY_SECRET
        .replace_all(body, format!("${{1}}\"{}\"", HIDDEN).as_str())
        .into_owned()
}

/// Mask secret-looking query parameters in a URL.
#[must_use]
pub fn sanitize_url(url: &str) -> String {
    URL_SECRET
        .replace_all(url, format!("${{1}}{}", HIDDEN).as_str())
        .into_owned()
}

/// Normalise an API payload in place.
///
/// Every object carrying a storage `_id` also gets a generic `id` with the
/// same value, recursively through nested objects and arrays.
pub fn normalize_response(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (_, child) in map.iter_mut() {
                normalize_response(child);
            }
            if let Some(id) = map.get("_id").cloned() {
                map.insert("id".to_string(), id);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_response),
        _ => {}
    }
}
