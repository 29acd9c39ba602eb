//! COPY text-format lines.

use serde_json::Value;

/// NULL marker of the COPY text format.
pub const COPY_NULL: &str = "\\N";

/// One tab-separated line holding `fields` of `record`, in order.
pub fn copy_line(fields: &[String], record: &Value) -> String {
    fields
        .iter()
        .map(|field| copy_field(record.get(field)))
        .collect::<Vec<_>>()
        .join("\t")
}

fn copy_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => COPY_NULL.to_string(),
        Some(Value::String(s)) => escape(s),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(container) => escape(&container.to_string()),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}
