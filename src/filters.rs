use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::MinidustResult;
use crate::value::Value;

pub(crate) type FilterFn = fn(&Value) -> MinidustResult<Value>;

/// Filters every engine starts with. `s` is handled by the compiler.
pub(crate) const BUILTIN: &[(&str, FilterFn)] = &[
    ("h", html),
    ("j", js_string),
    ("u", uri),
    ("uc", uri_component),
    #[cfg(feature = "serde")]
    ("js", json_stringify),
    #[cfg(feature = "serde")]
    ("jp", json_parse),
];

/// Left alone by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Left alone by `encodeURI`.
const URI: &AsciiSet = &URI_COMPONENT
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'#');

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Only strings are escaped; other values pass through.
fn html(value: &Value) -> MinidustResult<Value> {
    Ok(match value {
        Value::String(text) => Value::String(escape_html(text)),
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::Array(_)
        | Value::Object(_)
        | Value::Function(_)) => other.clone(),
    })
}

fn js_string(value: &Value) -> MinidustResult<Value> {
    Ok(match value {
        Value::String(text) => Value::String(escape_js(text)),
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::Array(_)
        | Value::Object(_)
        | Value::Function(_)) => other.clone(),
    })
}

fn uri(value: &Value) -> MinidustResult<Value> {
    Ok(Value::String(
        utf8_percent_encode(&value.to_string(), URI).to_string(),
    ))
}

fn uri_component(value: &Value) -> MinidustResult<Value> {
    Ok(Value::String(
        utf8_percent_encode(&value.to_string(), URI_COMPONENT).to_string(),
    ))
}

#[cfg(feature = "serde")]
fn json_stringify(value: &Value) -> MinidustResult<Value> {
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|e| crate::MinidustError::helper(e.to_string()))
}

#[cfg(feature = "serde")]
fn json_parse(value: &Value) -> MinidustResult<Value> {
    serde_json::from_str::<serde_json::Value>(&value.to_string())
        .map(Value::from)
        .map_err(|e| crate::MinidustError::helper(e.to_string()))
}
