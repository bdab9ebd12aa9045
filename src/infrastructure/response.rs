//! Response normalizer for the platform's duck-typed page shapes
//!
//! Every known raw shape is mapped into one canonical page struct at the
//! fetch-client boundary: items at the root, under `items`, under `result`
//! or under `result.items`; the next cursor under `next`, `result.next` or
//! `result.result.next`; plus an optional `more` boolean. No other
//! component ever sees raw shapes.

use serde_json::Value;

use super::remote::RemoteError;

#[derive(Debug, Clone, Default)]
pub struct NormalizedPage {
    pub items: Vec<Value>,
    pub next: Option<u64>,
    /// "More items available" flag some endpoints return instead of a
    /// concrete cursor.
    pub more: bool,
}

pub fn normalize_page(method: &str, raw: &Value) -> Result<NormalizedPage, RemoteError> {
    if !matches!(raw, Value::Object(_) | Value::Array(_)) {
        return Err(RemoteError::Shape {
            method: method.to_string(),
            message: format!("expected object or array page, got {raw}"),
        });
    }

    Ok(NormalizedPage {
        items: extract_items(raw),
        next: extract_next(raw),
        more: extract_more(raw),
    })
}

fn extract_items(raw: &Value) -> Vec<Value> {
    if let Some(arr) = raw.as_array() {
        return arr.clone();
    }
    for path in [&["items"][..], &["result"][..], &["result", "items"][..]] {
        if let Some(arr) = walk(raw, path).and_then(Value::as_array) {
            return arr.clone();
        }
    }
    Vec::new()
}

fn extract_next(raw: &Value) -> Option<u64> {
    for path in [
        &["next"][..],
        &["result", "next"][..],
        &["result", "result", "next"][..],
    ] {
        if let Some(cursor) = walk(raw, path).and_then(as_cursor) {
            return Some(cursor);
        }
    }
    None
}

fn extract_more(raw: &Value) -> bool {
    for path in [&["more"][..], &["result", "more"][..]] {
        if let Some(flag) = walk(raw, path).and_then(as_bool_like) {
            return flag;
        }
    }
    false
}

fn walk<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = raw;
    for key in path {
        cur = cur.get(key)?;
    }
    Some(cur)
}

fn as_cursor(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool_like(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "Y" | "1" => Some(true),
            "false" | "N" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
