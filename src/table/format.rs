// src/table/format.rs
//
// Cell formatters: turn a cell's text into styled segments that render as
// plain text (terminal, copy buffer) or HTML markup (log view).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::dictionary::{Dictionary, SymbolTable};

// ============================================================================
// Styled Text
// ============================================================================

/// Visual class of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    ControlChar,
    JsonKey,
    JsonString,
    JsonNumber,
    JsonBoolean,
    JsonNull,
    JsonBrace,
    JsonBracket,
}

impl Style {
    /// CSS classes used by the log view.
    pub fn css_class(&self) -> &'static str {
        match self {
            Style::ControlChar => "text-red-300",
            Style::JsonKey => "text-left text-fuchsia-500",
            Style::JsonString => "text-left text-violet-700",
            Style::JsonNumber => "text-left text-red-700",
            Style::JsonBoolean => "text-left text-pink-600",
            Style::JsonNull => "text-left text-teal-600",
            Style::JsonBrace => "text-left text-slate-500",
            Style::JsonBracket => "text-left text-sky-600",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,
}

/// A run of segments. Adjacent unstyled text is merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StyledText {
    segments: Vec<Segment>,
}

impl StyledText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unstyled text.
    pub fn raw(text: &str) -> Self {
        let mut s = Self::new();
        s.push(text, None);
        s
    }

    pub fn push(&mut self, text: &str, style: Option<Style>) {
        if text.is_empty() {
            return;
        }
        if style.is_none() {
            if let Some(last) = self.segments.last_mut().filter(|s| s.style.is_none()) {
                last.text.push_str(text);
                return;
            }
        }
        self.segments.push(Segment {
            text: text.to_string(),
            style,
        });
    }

    pub fn append(&mut self, other: StyledText) {
        for seg in other.segments {
            self.push(&seg.text, seg.style);
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Text without styling.
    pub fn plain(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// HTML markup: styled segments become `<span class=...>`, newlines `<br>`.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            let body = escape_html(&seg.text);
            match seg.style {
                Some(style) => {
                    out.push_str(&format!("<span class=\"{}\">{}</span>", style.css_class(), body))
                }
                None => out.push_str(&body),
            }
        }
        out
    }
}

impl fmt::Display for StyledText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plain())
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("<br>"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Formatters
// ============================================================================

/// Printable ASCII (32..=126) passes through; every other character becomes
/// `[0xHH]`.
pub fn format_control_chars(text: &str) -> StyledText {
    let mut out = StyledText::new();
    let mut buf = [0u8; 4];
    for c in text.chars() {
        if (' '..='~').contains(&c) {
            out.push(c.encode_utf8(&mut buf), None);
        } else {
            out.push(&format!("[0x{:02X}]", c as u32), Some(Style::ControlChar));
        }
    }
    out
}

/// Pretty-print a JSON value. `indent` is the indentation of this level's
/// entries; nested levels add two spaces.
pub fn format_json(value: &Value, indent: usize) -> StyledText {
    let mut out = StyledText::new();
    write_json(&mut out, value, indent);
    out
}

fn write_json(out: &mut StyledText, value: &Value, indent: usize) {
    let pad = " ".repeat(indent);
    let close_pad = " ".repeat(indent.saturating_sub(2));
    match value {
        Value::Object(map) if map.is_empty() => out.push("{}", Some(Style::JsonBrace)),
        Value::Object(map) => {
            out.push("{", Some(Style::JsonBrace));
            out.push("\n", None);
            for (i, (key, val)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(",\n", None);
                }
                out.push(&pad, None);
                out.push(&format!("{}:", Value::String(key.clone())), Some(Style::JsonKey));
                out.push(" ", None);
                write_json(out, val, indent + 2);
            }
            out.push("\n", None);
            out.push(&close_pad, None);
            out.push("}", Some(Style::JsonBrace));
        }
        Value::Array(items) if items.is_empty() => out.push("[]", Some(Style::JsonBracket)),
        Value::Array(items) => {
            out.push("[", Some(Style::JsonBracket));
            out.push("\n", None);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(",\n", None);
                }
                out.push(&pad, None);
                write_json(out, item, indent + 2);
            }
            out.push("\n", None);
            out.push(&close_pad, None);
            out.push("]", Some(Style::JsonBracket));
        }
        Value::String(_) => out.push(&value.to_string(), Some(Style::JsonString)),
        Value::Number(n) => out.push(&n.to_string(), Some(Style::JsonNumber)),
        Value::Bool(b) => out.push(&b.to_string(), Some(Style::JsonBoolean)),
        Value::Null => out.push("null", Some(Style::JsonNull)),
    }
}

/// Pretty-print JSON text; text that does not parse is returned unchanged.
pub fn format_json_text(text: &str) -> StyledText {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => format_json(&value, 2),
        Err(_) => StyledText::raw(text),
    }
}

/// Replace a numeric code with its dictionary name. Leading zeros are
/// ignored; anything that is not a known code comes back unchanged.
pub fn resolve_symbol(dict: &Dictionary, table: SymbolTable, text: &str) -> String {
    let trimmed = text.trim();
    let digits = trimmed.trim_start_matches('0');
    let digits = if digits.is_empty() && !trimmed.is_empty() { "0" } else { digits };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return text.to_string();
    }
    digits
        .parse::<u32>()
        .ok()
        .and_then(|code| dict.reverse_lookup(table, code))
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string())
}

// ============================================================================
// Column Formatters
// ============================================================================

/// Per-column cell formatter. The name identifies it in the serialized
/// column schema.
pub trait CellFormatter: Send + Sync {
    fn name(&self) -> &'static str;
    fn format(&self, text: &str) -> StyledText;
}

pub struct ControlCharFormatter;

impl CellFormatter for ControlCharFormatter {
    fn name(&self) -> &'static str {
        "control_chars"
    }

    fn format(&self, text: &str) -> StyledText {
        format_control_chars(text)
    }
}

pub struct JsonFormatter;

impl CellFormatter for JsonFormatter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn format(&self, text: &str) -> StyledText {
        format_json_text(text)
    }
}

/// Shows header or argument codes by name.
pub struct SymbolFormatter {
    dict: Arc<Dictionary>,
    table: SymbolTable,
}

impl SymbolFormatter {
    pub fn new(dict: Arc<Dictionary>, table: SymbolTable) -> Self {
        SymbolFormatter { dict, table }
    }
}

impl CellFormatter for SymbolFormatter {
    fn name(&self) -> &'static str {
        match self.table {
            SymbolTable::Header => "header_symbol",
            SymbolTable::Argument => "argument_symbol",
        }
    }

    fn format(&self, text: &str) -> StyledText {
        StyledText::raw(&resolve_symbol(&self.dict, self.table, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_chars_boundaries() {
        assert_eq!(format_control_chars("").plain(), "");
        assert_eq!(format_control_chars("\0").plain(), "[0x00]");
        assert_eq!(format_control_chars("\x7f").plain(), "[0x7F]");
        assert_eq!(format_control_chars("~ ").plain(), "~ ");
        assert_eq!(format_control_chars("a\r\nb").plain(), "a[0x0D][0x0A]b");
        assert_eq!(format_control_chars("é").plain(), "[0xE9]");
        assert_eq!(format_control_chars("т").plain(), "[0x442]");
    }

    #[test]
    fn test_control_chars_idempotent_on_printable() {
        let once = format_control_chars("ok\x01").plain();
        assert_eq!(format_control_chars(&once).plain(), once);
    }

    #[test]
    fn test_control_chars_html() {
        let html = format_control_chars("a\x07<").to_html();
        assert_eq!(html, "a<span class=\"text-red-300\">[0x07]</span>&lt;");
    }

    #[test]
    fn test_json_object_styles() {
        let v = json!({"name": "x", "n": 5, "ok": true, "none": null});
        let t = format_json(&v, 2);
        assert_eq!(
            t.plain(),
            "{\n  \"name\": \"x\",\n  \"n\": 5,\n  \"ok\": true,\n  \"none\": null\n}"
        );
        let styles: Vec<Style> = t.segments().iter().filter_map(|s| s.style).collect();
        assert_eq!(
            styles,
            vec![
                Style::JsonBrace,
                Style::JsonKey,
                Style::JsonString,
                Style::JsonKey,
                Style::JsonNumber,
                Style::JsonKey,
                Style::JsonBoolean,
                Style::JsonKey,
                Style::JsonNull,
                Style::JsonBrace,
            ]
        );
    }

    #[test]
    fn test_json_nested_indent() {
        let v = json!({"a": [1, {"b": false}]});
        assert_eq!(
            format_json(&v, 2).plain(),
            "{\n  \"a\": [\n    1,\n    {\n      \"b\": false\n    }\n  ]\n}"
        );
    }

    #[test]
    fn test_json_empty_containers() {
        assert_eq!(format_json(&json!({}), 2).plain(), "{}");
        assert_eq!(format_json(&json!({"l": []}), 2).plain(), "{\n  \"l\": []\n}");
    }

    #[test]
    fn test_json_text_mixed_document() {
        let t = format_json_text(r#"{"a":1,"b":[true,null]}"#);
        assert_eq!(
            t.plain(),
            "{\n  \"a\": 1,\n  \"b\": [\n    true,\n    null\n  ]\n}"
        );
        let styled = |text: &str| {
            t.segments()
                .iter()
                .find(|s| s.text == text)
                .and_then(|s| s.style)
        };
        assert_eq!(styled("1"), Some(Style::JsonNumber));
        assert_eq!(styled("true"), Some(Style::JsonBoolean));
        assert_eq!(styled("null"), Some(Style::JsonNull));
        assert_eq!(styled("["), Some(Style::JsonBracket));
    }

    #[test]
    fn test_json_text_invalid_unchanged() {
        let t = format_json_text("{invalid");
        assert_eq!(t.plain(), "{invalid");
        assert!(t.segments().iter().all(|s| s.style.is_none()));
    }

    #[test]
    fn test_json_text_passthrough() {
        assert_eq!(format_json_text("not json").plain(), "not json");
        assert_eq!(format_json_text("").plain(), "");
        let t = format_json_text("{\"k\":\"<v>\"}");
        assert!(t.to_html().contains("&lt;v&gt;"));
        assert!(t.to_html().contains("<br>"));
    }

    #[test]
    fn test_resolve_symbol() {
        let dict = Dictionary::standard();
        assert_eq!(resolve_symbol(&dict, SymbolTable::Argument, "0026"), "ModuleStream-1");
        assert_eq!(resolve_symbol(&dict, SymbolTable::Argument, "000"), "Restart");
        assert_eq!(resolve_symbol(&dict, SymbolTable::Header, " 2 "), "OK");
        assert_eq!(resolve_symbol(&dict, SymbolTable::Argument, "0007"), "0007");
        assert_eq!(resolve_symbol(&dict, SymbolTable::Argument, "abc"), "abc");
        assert_eq!(resolve_symbol(&dict, SymbolTable::Argument, ""), "");
    }

    #[test]
    fn test_cell_formatters() {
        let sym = SymbolFormatter::new(Dictionary::shared(), SymbolTable::Header);
        assert_eq!(sym.name(), "header_symbol");
        assert_eq!(sym.format("3").plain(), "ERR");
        assert_eq!(JsonFormatter.format("[]").plain(), "[]");
        assert_eq!(ControlCharFormatter.format("\t").plain(), "[0x09]");
    }
}
