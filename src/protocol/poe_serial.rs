// src/protocol/poe_serial.rs
//
// POESerial request/response framing.
//
// Outgoing:  [SOH] HEADER [US] ARGUMENT [STX] VALUE [ETX] CRC8 [EOT]
// Incoming:  [SOH] HEADER [US] ARGUMENT [STX] VALUE [ETX] CRC8 [US] FREE_HEAP [EOT]
//
// HEADER and ARGUMENT travel as decimal codes. CRC8 is two uppercase hex
// digits of CRC-8/MAXIM over HEADER ‖ ARGUMENT ‖ VALUE.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{now_ms, CodecError, DecodeResult, Decoded, ProtocolCodec};
use crate::checksums::crc8_maxim_checksum;
use crate::dictionary::{Dictionary, Symbol, SymbolTable};
use crate::logging::LogLevel;
use crate::tlog;

// ============================================================================
// Constants
// ============================================================================

pub const SOH: u8 = 0x01;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const EOT: u8 = 0x04;
pub const US: u8 = 0x1F;

/// How long an unterminated packet may wait for the rest of its bytes.
pub const DEFAULT_PARTIAL_TIMEOUT_MS: u64 = 500;

/// Upper bound on buffered bytes of a single unterminated packet.
const MAX_PENDING_BYTES: usize = 64 * 1024;

const PROTOCOL: &str = "POESerial";

// ============================================================================
// Types
// ============================================================================

/// Outgoing POESerial command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoeSerialCommand {
    pub header: Symbol,
    pub argument: Symbol,
    #[serde(default)]
    pub value: String,
    /// Explicit checksum as hex; computed when absent.
    #[serde(default, alias = "crc_hex", skip_serializing_if = "Option::is_none")]
    pub crc: Option<String>,
    /// Device-reported field; carried for saved commands, never transmitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_heap_size: Option<String>,
}

impl PoeSerialCommand {
    pub fn new(header: impl Into<Symbol>, argument: impl Into<Symbol>, value: &str) -> Self {
        PoeSerialCommand {
            header: header.into(),
            argument: argument.into(),
            value: value.to_string(),
            crc: None,
            free_heap_size: None,
        }
    }
}

/// One decoded device packet, fields as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoeSerialRecord {
    pub header: String,
    pub argument: String,
    pub value: String,
    pub crc_hex: String,
    pub free_heap_size: String,
    /// `None` when the checksum field is not parseable hex.
    pub crc_valid: Option<bool>,
}

pub struct PoeSerialCodec {
    dict: Arc<Dictionary>,
    partial_timeout_ms: u64,
    buffer: Vec<u8>,
    /// Arrival time of the most recent chunk that left bytes buffered; the
    /// partial timeout runs from the last byte received.
    pending_since: Option<u64>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Checksum the device expects for the given text fields.
pub fn frame_checksum(header: &str, argument: &str, value: &str) -> u8 {
    let mut data = Vec::with_capacity(header.len() + argument.len() + value.len());
    data.extend_from_slice(header.as_bytes());
    data.extend_from_slice(argument.as_bytes());
    data.extend_from_slice(value.as_bytes());
    crc8_maxim_checksum(&data)
}

fn find(haystack: &[u8], needle: u8, from: usize) -> Option<usize> {
    haystack[from..].iter().position(|&b| b == needle).map(|i| i + from)
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse the bytes between SOH and EOT (both excluded).
fn parse_packet(body: &[u8]) -> Result<PoeSerialRecord, CodecError> {
    let us = find(body, US, 0)
        .ok_or_else(|| CodecError::malformed(PROTOCOL, "missing US after header"))?;
    let stx = find(body, STX, us + 1)
        .ok_or_else(|| CodecError::malformed(PROTOCOL, "missing STX before value"))?;
    let etx = find(body, ETX, stx + 1)
        .ok_or_else(|| CodecError::malformed(PROTOCOL, "missing ETX after value"))?;

    let header = text(&body[..us]);
    let argument = text(&body[us + 1..stx]);
    let value = text(&body[stx + 1..etx]);

    let trailer = &body[etx + 1..];
    let (crc_hex, free_heap_size) = match find(trailer, US, 0) {
        Some(sep) => (text(&trailer[..sep]), text(&trailer[sep + 1..])),
        None => (text(trailer), String::new()),
    };

    let crc_valid = u8::from_str_radix(crc_hex.trim(), 16)
        .ok()
        .map(|received| received == frame_checksum(&header, &argument, &value));

    Ok(PoeSerialRecord {
        header,
        argument,
        value,
        crc_hex,
        free_heap_size,
        crc_valid,
    })
}

// ============================================================================
// Codec
// ============================================================================

impl PoeSerialCodec {
    pub fn new(dict: Arc<Dictionary>, partial_timeout_ms: u64) -> Self {
        PoeSerialCodec {
            dict,
            partial_timeout_ms,
            buffer: Vec::new(),
            pending_since: None,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop an unterminated packet that has waited longer than the timeout.
    pub fn evict_expired(&mut self, now_ms: u64) -> usize {
        match self.pending_since {
            Some(since) if now_ms.saturating_sub(since) > self.partial_timeout_ms => {
                tlog!(
                    LogLevel::Info,
                    "[poe_serial] discarding {} stale bytes after {} ms",
                    self.buffer.len(),
                    now_ms - since
                );
                self.reset();
                1
            }
            _ => 0,
        }
    }

    /// Decode with an explicit arrival time (for replay and tests).
    pub fn decode_at(&mut self, raw: &[u8], now_ms: u64) -> Vec<DecodeResult<PoeSerialRecord>> {
        if self.buffer.is_empty() && !raw.is_empty() {
            self.pending_since = Some(now_ms);
        }
        self.buffer.extend_from_slice(raw);

        let mut results = Vec::new();
        loop {
            let soh = match find(&self.buffer, SOH, 0) {
                Some(i) => i,
                None => {
                    if !self.buffer.is_empty() {
                        tlog!(
                            LogLevel::Debug,
                            "[poe_serial] discarding {} bytes outside any packet",
                            self.buffer.len()
                        );
                    }
                    self.buffer.clear();
                    break;
                }
            };
            if soh > 0 {
                tlog!(LogLevel::Debug, "[poe_serial] skipping {} bytes before SOH", soh);
                self.buffer.drain(..soh);
            }

            let eot = match find(&self.buffer, EOT, 1) {
                Some(i) => i,
                None => break,
            };

            // A second SOH before EOT means the first packet was cut short
            let restart = self.buffer[1..eot].iter().rposition(|&b| b == SOH).map(|i| i + 1);
            if let Some(start) = restart {
                let truncated = self.buffer.drain(..start).count();
                results.push(Err(CodecError::malformed(
                    PROTOCOL,
                    format!("packet truncated after {} bytes by a new SOH", truncated),
                )));
                continue;
            }

            let packet: Vec<u8> = self.buffer.drain(..=eot).collect();
            match parse_packet(&packet[1..packet.len() - 1]) {
                Ok(record) => {
                    if record.crc_valid == Some(false) {
                        tlog!(
                            LogLevel::Warning,
                            "[poe_serial] checksum mismatch for header={} argument={}",
                            record.header,
                            record.argument
                        );
                    }
                    results.push(Ok(Decoded::Complete(record)));
                }
                Err(e) => {
                    tlog!(LogLevel::Warning, "[poe_serial] {}", e);
                    results.push(Err(e));
                }
            }
        }

        if self.buffer.len() > MAX_PENDING_BYTES {
            results.push(Err(CodecError::malformed(
                PROTOCOL,
                format!("no EOT within {} bytes", MAX_PENDING_BYTES),
            )));
            self.buffer.clear();
        }

        if self.buffer.is_empty() {
            self.pending_since = None;
        } else {
            self.pending_since = Some(now_ms);
            results.push(Ok(Decoded::Incomplete));
        }
        results
    }
}

impl ProtocolCodec for PoeSerialCodec {
    type Command = PoeSerialCommand;
    type Record = PoeSerialRecord;

    fn encode_outgoing(&self, command: &PoeSerialCommand) -> Result<Vec<Vec<u8>>, CodecError> {
        if matches!(&command.header, Symbol::Symbolic(s) if s.trim().is_empty()) {
            return Err(CodecError::MissingField {
                protocol: PROTOCOL,
                field: "header",
            });
        }
        if matches!(&command.argument, Symbol::Symbolic(s) if s.trim().is_empty()) {
            return Err(CodecError::MissingField {
                protocol: PROTOCOL,
                field: "argument",
            });
        }

        let header = command.header.resolve(&self.dict, SymbolTable::Header)?.to_string();
        let argument = command
            .argument
            .resolve(&self.dict, SymbolTable::Argument)?
            .to_string();

        let crc = match command.crc.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(hex) => u8::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|_| {
                CodecError::InvalidField {
                    protocol: PROTOCOL,
                    field: "crc",
                    reason: format!("'{}' is not a one-byte hex value", hex),
                }
            })?,
            None => frame_checksum(&header, &argument, &command.value),
        };

        let mut out = Vec::with_capacity(header.len() + argument.len() + command.value.len() + 7);
        out.push(SOH);
        out.extend_from_slice(header.as_bytes());
        out.push(US);
        out.extend_from_slice(argument.as_bytes());
        out.push(STX);
        out.extend_from_slice(command.value.as_bytes());
        out.push(ETX);
        out.extend_from_slice(format!("{:02X}", crc).as_bytes());
        out.push(EOT);

        tlog!(
            LogLevel::Debug,
            "[poe_serial] encoded header={} argument={} crc=0x{:02X}",
            header,
            argument,
            crc
        );
        Ok(vec![out])
    }

    fn decode_incoming(&mut self, raw: &[u8]) -> Vec<DecodeResult<PoeSerialRecord>> {
        self.decode_at(raw, now_ms())
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.pending_since = None;
    }
}
