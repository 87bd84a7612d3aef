//! `{{key}}` placeholder resolution for URLs, query values, and headers,
//! plus tera-based rendering for request bodies (which may need conditional
//! or loop blocks that flat substitution cannot express).

use crate::types::FieldMap;
use serde_json::Value;
use tera::{Context, Tera};

/// Placeholder substituted with the fetched bearer token in header templates.
pub const ACCESS_TOKEN_PLACEHOLDER: &str = "access_token";

/// Replace every `{{key}}` with the string form of the corresponding field
/// value. Missing or null keys render as the empty string.
pub fn resolve_template(template: &str, fields: &FieldMap) -> String {
    substitute(template, |key| Some(field_string(fields, key)), false)
}

/// Like [`resolve_template`] but URL-encodes substituted values.
pub fn resolve_template_encoded(template: &str, fields: &FieldMap) -> String {
    substitute(
        template,
        |key| Some(urlencoding::encode(&field_string(fields, key)).into_owned()),
        false,
    )
}

/// Replace `{{preconditions[i].path}}` references against captured
/// precondition results. Placeholders that are not precondition references
/// are left untouched for a later field-substitution pass.
pub fn resolve_precondition_refs(template: &str, captures: &[Value], encode: bool) -> String {
    substitute(
        template,
        |key| {
            let value = precondition_ref(key, captures)?;
            let text = value_to_string(&value);
            Some(if encode {
                urlencoding::encode(&text).into_owned()
            } else {
                text
            })
        },
        true,
    )
}

/// Resolve one header template: the dynamic-token placeholder first, then
/// precondition references, then field placeholders.
pub fn resolve_header(
    template: &str,
    token: &str,
    fields: &FieldMap,
    captures: &[Value],
) -> String {
    let with_token = substitute(
        template,
        |key| (key == ACCESS_TOKEN_PLACEHOLDER).then(|| token.to_string()),
        true,
    );
    let with_refs = resolve_precondition_refs(&with_token, captures, false);
    resolve_template(&with_refs, fields)
}

/// Append query parameters, choosing `?` or `&` based on whether the URL
/// already carries a query string.
pub fn append_query(url: &str, pairs: &[(String, String)]) -> String {
    let mut out = url.to_string();
    for (key, value) in pairs {
        let sep = if out.contains('?') { '&' } else { '?' };
        out.push(sep);
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Render a request-body template and require the result to parse as JSON.
/// The context exposes every field by name plus the `preconditions` capture
/// array. A template that does not produce valid JSON is a configuration
/// error surfaced as `Err`.
pub fn render_body(template: &str, fields: &FieldMap, captures: &[Value]) -> Result<Value, String> {
    let mut context = Context::new();
    for (key, value) in fields {
        context.insert(key.as_str(), value);
    }
    context.insert("preconditions", captures);

    let rendered = Tera::one_off(template, &context, false)
        .map_err(|e| format!("body template failed to render: {}", e))?;
    serde_json::from_str(&rendered)
        .map_err(|e| format!("rendered body is not valid JSON: {}", e))
}

/// String form of a field value: strings verbatim, scalars via display,
/// string arrays comma-joined, anything else compact JSON, null empty.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if items.iter().all(|i| i.is_string()) => items
            .iter()
            .filter_map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn field_string(fields: &FieldMap, key: &str) -> String {
    fields.get(key).map(value_to_string).unwrap_or_default()
}

/// Parse `preconditions[i].some.path` and walk the capture at position i.
fn precondition_ref(key: &str, captures: &[Value]) -> Option<Value> {
    let rest = key.strip_prefix("preconditions[")?;
    let close = rest.find(']')?;
    let index: usize = rest[..close].trim().parse().ok()?;
    let capture = captures.get(index)?;

    let mut current = capture;
    let path = rest[close + 1..].trim_start_matches('.');
    if path.is_empty() {
        return Some(capture.clone());
    }
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn substitute(
    template: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
    keep_unmatched: bool,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match lookup(key) {
            Some(value) => out.push_str(&value),
            None if keep_unmatched => {
                out.push_str(&rest[start..start + 2 + end + 2]);
            }
            None => {}
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
