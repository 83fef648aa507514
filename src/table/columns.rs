// src/table/columns.rs
//
// Column layouts per protocol and the projections from decoded records to
// table rows.

use std::sync::Arc;

use serde::Serialize;

use super::format::{ControlCharFormatter, JsonFormatter, SymbolFormatter};
use super::{Align, Column, Overflow, TableRow};
use crate::dictionary::{Dictionary, SymbolTable};
use crate::protocol::poe_canable::EMPTY_JSON;
use crate::protocol::{MessageData, PoeSerialRecord, SimpleSerialRecord};

fn column(key: &'static str, label: &'static str, width: &'static str, align: Align) -> Column {
    Column {
        key,
        label,
        width,
        align,
        sortable: true,
        overflow: None,
    }
}

fn symbol_overflow(dict: &Arc<Dictionary>, table: SymbolTable) -> Option<Overflow> {
    Some(Overflow {
        truncated: true,
        formatter: Some(Arc::new(SymbolFormatter::new(dict.clone(), table))),
        ..Default::default()
    })
}

// ============================================================================
// Layouts
// ============================================================================

pub fn simple_serial_columns() -> Vec<Column> {
    vec![Column {
        sortable: false,
        overflow: Some(Overflow {
            truncated: true,
            copy: true,
            expand: false,
            formatter: Some(Arc::new(ControlCharFormatter)),
        }),
        ..column("data", "Data", "1fr", Align::Left)
    }]
}

pub fn poe_serial_columns(dict: Arc<Dictionary>) -> Vec<Column> {
    vec![
        Column {
            overflow: symbol_overflow(&dict, SymbolTable::Header),
            ..column("header", "Header", "3.5rem", Align::Left)
        },
        Column {
            overflow: symbol_overflow(&dict, SymbolTable::Argument),
            ..column("argument", "Argument", "8.5rem", Align::Left)
        },
        Column {
            overflow: Some(Overflow {
                truncated: true,
                copy: true,
                expand: true,
                formatter: Some(Arc::new(JsonFormatter)),
            }),
            ..column("value", "Value", "1fr", Align::Left)
        },
        column("crc_hex", "CRC", "3rem", Align::Left),
        column("free_heap_size", "FHS", "5.5rem", Align::Left),
    ]
}

pub fn poe_canable_columns(dict: Arc<Dictionary>) -> Vec<Column> {
    vec![
        column("time_delta", "Δt", "4rem", Align::Center),
        column("length", "Len", "3rem", Align::Center),
        Column {
            overflow: symbol_overflow(&dict, SymbolTable::Header),
            ..column("header", "H", "1.5rem", Align::Center)
        },
        Column {
            overflow: symbol_overflow(&dict, SymbolTable::Argument),
            ..column("argument", "Arg", "3rem", Align::Left)
        },
        column("targetID", "T", "3rem", Align::Left),
        column("returnID", "R", "3rem", Align::Left),
        Column {
            overflow: Some(Overflow {
                truncated: true,
                copy: true,
                expand: true,
                formatter: None,
            }),
            ..column("data", "Data", "1fr", Align::Left)
        },
    ]
}

// ============================================================================
// Rows
// ============================================================================

impl TableRow for SimpleSerialRecord {
    fn cell(&self, key: &str) -> Option<String> {
        match key {
            "data" => Some(self.data.clone()),
            _ => None,
        }
    }
}

impl TableRow for PoeSerialRecord {
    fn cell(&self, key: &str) -> Option<String> {
        match key {
            "header" => Some(self.header.clone()),
            "argument" => Some(self.argument.clone()),
            "value" => Some(self.value.clone()),
            "crc_hex" => Some(self.crc_hex.clone()),
            "free_heap_size" => Some(self.free_heap_size.clone()),
            _ => None,
        }
    }
}

/// Flattened, display-only view of a POECanable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoeCanableRow {
    pub time_delta: String,
    pub length: String,
    pub header: String,
    pub argument: String,
    #[serde(rename = "targetID")]
    pub target_id: String,
    #[serde(rename = "returnID")]
    pub return_id: String,
    pub data: String,
}

impl TableRow for PoeCanableRow {
    fn cell(&self, key: &str) -> Option<String> {
        let value = match key {
            "time_delta" => &self.time_delta,
            "length" => &self.length,
            "header" => &self.header,
            "argument" => &self.argument,
            "targetID" => &self.target_id,
            "returnID" => &self.return_id,
            "data" => &self.data,
            _ => return None,
        };
        Some(value.clone())
    }
}

/// Projects messages to rows; remembers the previous timestamp for Δt.
#[derive(Debug, Default)]
pub struct CanRowProjector {
    last_timestamp: Option<u64>,
}

impl CanRowProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_timestamp = None;
    }

    pub fn project(&mut self, message: &MessageData) -> PoeCanableRow {
        let delta_ms = self
            .last_timestamp
            .map_or(0, |last| message.timestamp.saturating_sub(last));
        self.last_timestamp = Some(message.timestamp);

        let id = &message.full_id;
        PoeCanableRow {
            time_delta: format!("{:.3}", delta_ms as f64 / 1000.0),
            length: message.can_data.len().to_string(),
            header: id.header_code.to_string(),
            argument: format!("{:04}", id.argument_code),
            target_id: format!("{:03}", id.target_id),
            return_id: format!("{:03}", id.return_id),
            data: payload_text(message),
        }
    }
}

/// JSON when the payload is a document, readable text when it is UTF-8,
/// otherwise spaced hex.
fn payload_text(message: &MessageData) -> String {
    if message.json != EMPTY_JSON {
        return message.json.clone();
    }
    if message.is_remote {
        return "(remote)".to_string();
    }
    match std::str::from_utf8(&message.can_data) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            text.to_string()
        }
        _ => spaced_hex(&message.can_data),
    }
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}
