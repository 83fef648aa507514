// src/table/mod.rs
//
// Frame table model: a declarative column schema per protocol and the
// row-rendering contract used by the log view.
//
// - format.rs  - cell formatters (control chars, JSON, symbol names)
// - columns.rs - per-protocol columns and record-to-row projection

pub mod columns;
pub mod format;

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Serialize, Serializer};

pub use columns::{CanRowProjector, PoeCanableRow};
pub use format::{CellFormatter, StyledText};

use crate::dictionary::Dictionary;
use crate::protocol::{IncomingRecord, ProtocolKind};

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Center,
    Right,
}

/// How a cell that does not fit is handled, and how it is formatted.
#[derive(Clone, Default)]
pub struct Overflow {
    pub truncated: bool,
    pub copy: bool,
    /// Full content can be opened in a detail view.
    pub expand: bool,
    pub formatter: Option<Arc<dyn CellFormatter>>,
}

#[derive(Serialize)]
struct OverflowSchema<'a> {
    truncated: bool,
    copy: bool,
    expand: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    formatter: Option<&'a str>,
}

impl Serialize for Overflow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        OverflowSchema {
            truncated: self.truncated,
            copy: self.copy,
            expand: self.expand,
            formatter: self.formatter.as_ref().map(|f| f.name()),
        }
        .serialize(serializer)
    }
}

impl std::fmt::Debug for Overflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overflow")
            .field("truncated", &self.truncated)
            .field("copy", &self.copy)
            .field("expand", &self.expand)
            .field("formatter", &self.formatter.as_ref().map(|f| f.name()))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub key: &'static str,
    pub label: &'static str,
    /// CSS track size, e.g. `3rem` or `1fr`.
    pub width: &'static str,
    pub align: Align,
    pub sortable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overflow: Option<Overflow>,
}

/// A record viewed as a row of named cells.
pub trait TableRow {
    /// Text for the column `key`; `None` renders an empty cell.
    fn cell(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedCell {
    pub key: &'static str,
    pub content: StyledText,
}

impl RenderedCell {
    pub fn plain(&self) -> String {
        self.content.plain()
    }

    pub fn html(&self) -> String {
        self.content.to_html()
    }
}

// ============================================================================
// Frame Table
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FrameTable {
    pub protocol: ProtocolKind,
    pub columns: Vec<Column>,
}

impl FrameTable {
    pub fn for_protocol(protocol: ProtocolKind, dict: Arc<Dictionary>) -> Self {
        let columns = match protocol {
            ProtocolKind::SimpleSerial => columns::simple_serial_columns(),
            ProtocolKind::PoeSerial => columns::poe_serial_columns(dict),
            ProtocolKind::PoeCanable | ProtocolKind::PoeCanableFd => {
                columns::poe_canable_columns(dict)
            }
        };
        FrameTable { protocol, columns }
    }

    /// Render one row. Only the column's own formatter touches the text.
    pub fn render_row(&self, row: &dyn TableRow) -> Vec<RenderedCell> {
        self.columns
            .iter()
            .map(|col| {
                let text = row.cell(col.key).unwrap_or_default();
                let content = match col.overflow.as_ref().and_then(|o| o.formatter.as_ref()) {
                    Some(formatter) => formatter.format(&text),
                    None => StyledText::raw(&text),
                };
                RenderedCell {
                    key: col.key,
                    content,
                }
            })
            .collect()
    }

    /// Column schema for the UI.
    pub fn schema_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize schema: {}", e))
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Renders decoded records as rows of one frame table.
pub struct RecordRenderer {
    table: FrameTable,
    projector: CanRowProjector,
}

impl RecordRenderer {
    pub fn new(table: FrameTable) -> Self {
        RecordRenderer {
            table,
            projector: CanRowProjector::new(),
        }
    }

    pub fn table(&self) -> &FrameTable {
        &self.table
    }

    pub fn render(&mut self, record: &IncomingRecord) -> Vec<RenderedCell> {
        match record {
            IncomingRecord::SimpleSerial(r) => self.table.render_row(r),
            IncomingRecord::PoeSerial(r) => self.table.render_row(r),
            IncomingRecord::PoeCanable(m) => {
                let row = self.projector.project(m);
                self.table.render_row(&row)
            }
        }
    }

    /// Forget the previous timestamp used for Δt.
    pub fn reset(&mut self) {
        self.projector.reset();
    }
}

// ============================================================================
// Log View
// ============================================================================

/// Default number of rows kept by a log view.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Scrolling, bounded list of rendered rows for one connection.
pub struct LogView {
    renderer: RecordRenderer,
    rows: VecDeque<Vec<RenderedCell>>,
    capacity: usize,
}

impl LogView {
    pub fn new(table: FrameTable, capacity: usize) -> Self {
        LogView {
            renderer: RecordRenderer::new(table),
            rows: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn table(&self) -> &FrameTable {
        self.renderer.table()
    }

    /// Render a decoded record and append it; the oldest row is dropped
    /// when full. Returns the rendered row.
    pub fn push_record(&mut self, record: &IncomingRecord) -> Vec<RenderedCell> {
        let cells = self.renderer.render(record);
        self.push_row(cells.clone());
        cells
    }

    /// Append an already rendered row.
    pub fn push_row(&mut self, cells: Vec<RenderedCell>) {
        if self.rows.len() == self.capacity {
            self.rows.pop_front();
        }
        self.rows.push_back(cells);
    }

    pub fn rows(&self) -> impl Iterator<Item = &Vec<RenderedCell>> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.renderer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PoeSerialRecord, SimpleSerialRecord};

    #[test]
    fn test_render_row_applies_only_column_formatter() {
        let table = FrameTable::for_protocol(ProtocolKind::PoeSerial, Dictionary::shared());
        let record = PoeSerialRecord {
            header: "2".to_string(),
            argument: "0026".to_string(),
            value: "{\"a\":1}".to_string(),
            crc_hex: "0A".to_string(),
            free_heap_size: "\u{1}".to_string(),
            crc_valid: Some(true),
        };
        let cells = table.render_row(&record);
        let keys: Vec<&str> = cells.iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["header", "argument", "value", "crc_hex", "free_heap_size"]);
        assert_eq!(cells[0].plain(), "OK");
        assert_eq!(cells[1].plain(), "ModuleStream-1");
        assert_eq!(cells[2].plain(), "{\n  \"a\": 1\n}");
        assert_eq!(cells[3].plain(), "0A");
        // No formatter on FHS: control char passes through untouched
        assert_eq!(cells[4].plain(), "\u{1}");
    }

    #[test]
    fn test_schema_serializes_formatter_names() {
        let table = FrameTable::for_protocol(ProtocolKind::SimpleSerial, Dictionary::shared());
        let v: serde_json::Value = serde_json::from_str(&table.schema_json().unwrap()).unwrap();
        assert_eq!(v["protocol"], "SimpleSerial");
        let col = &v["columns"][0];
        assert_eq!(col["key"], "data");
        assert_eq!(col["width"], "1fr");
        assert_eq!(col["sortable"], false);
        assert_eq!(col["overflow"]["formatter"], "control_chars");
        assert_eq!(col["overflow"]["copy"], true);
        assert_eq!(col["overflow"]["expand"], false);
    }

    #[test]
    fn test_log_view_capacity() {
        let table = FrameTable::for_protocol(ProtocolKind::SimpleSerial, Dictionary::shared());
        let mut view = LogView::new(table, 2);
        for text in ["a", "b\x1b", "c"] {
            view.push_record(&IncomingRecord::SimpleSerial(SimpleSerialRecord {
                data: text.to_string(),
            }));
        }
        assert_eq!(view.len(), 2);
        let texts: Vec<String> = view.rows().map(|r| r[0].plain()).collect();
        assert_eq!(texts, vec!["b[0x1B]", "c"]);
        view.clear();
        assert!(view.is_empty());
    }
}
