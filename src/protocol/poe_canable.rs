// src/protocol/poe_canable.rs
//
// POECanable: POE commands over CAN / CAN-FD through an slcan adapter.
//
// Routing and command live in the 29-bit identifier (see full_id.rs); the
// payload is split across as many frames as needed, the last one carrying
// isFullPacket = 1. Payloads are UTF-8 text, usually JSON, optionally
// base64-encoded with a NUL terminator.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::full_id::{self, FullId};
use super::reassembly::{PushOutcome, ReassemblyKey, ReassemblyLimits, Reassembler};
use super::slcan::{self, CanFrame, LineBuffer, SlcanLine, CLASSIC_MAX_DATA, FD_MAX_DATA};
use super::{now_ms, CodecError, DecodeResult, Decoded, ProtocolCodec};
use crate::dictionary::{Dictionary, Symbol, SymbolTable};
use crate::logging::LogLevel;
use crate::tlog;

const PROTOCOL: &str = "POECanable";

/// `json` value of a message whose payload is not a JSON document.
pub const EMPTY_JSON: &str = "{}";

// ============================================================================
// Types
// ============================================================================

/// Outgoing POECanable command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoeCanableCommand {
    pub header: Symbol,
    pub argument: Symbol,
    pub target_id: Symbol,
    pub return_id: Symbol,
    /// Informational; the frame lengths are derived from `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    /// Blank or absent sends a remote frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// 1 = base64 mode (hex bytes are base64-encoded, NUL appended).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert_to_base64: Option<u8>,
}

impl PoeCanableCommand {
    pub fn new(
        header: impl Into<Symbol>,
        argument: impl Into<Symbol>,
        target_id: u32,
        return_id: u32,
        data: Option<&str>,
    ) -> Self {
        PoeCanableCommand {
            header: header.into(),
            argument: argument.into(),
            target_id: Symbol::Numeric(target_id),
            return_id: Symbol::Numeric(return_id),
            length: None,
            data: data.map(str::to_string),
            convert_to_base64: None,
        }
    }
}

/// One complete POECanable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    /// Arrival of the first fragment, ms since UNIX epoch.
    pub timestamp: u64,
    pub full_id: FullId,
    #[serde(rename = "mainID")]
    pub main_id: u32,
    pub can_data: Vec<u8>,
    /// The payload when it is a JSON document, otherwise `"{}"`.
    pub json: String,
    pub is_remote: bool,
    pub is_complete: bool,
}

pub struct PoeCanableCodec {
    dict: Arc<Dictionary>,
    fd: bool,
    lines: LineBuffer,
    reassembler: Arc<Reassembler>,
}

// ============================================================================
// Payload Helpers
// ============================================================================

/// Bytes to transmit for a command's data field.
fn outgoing_payload(data: &str, convert_to_base64: Option<u8>) -> Result<Vec<u8>, CodecError> {
    match convert_to_base64.unwrap_or(0) {
        0 => Ok(data.as_bytes().to_vec()),
        1 => {
            let parsed: Result<Vec<u8>, _> = data
                .split_whitespace()
                .map(|tok| u8::from_str_radix(tok.trim_start_matches("0x"), 16))
                .collect();
            let mut payload = match parsed {
                Ok(bytes) if !bytes.is_empty() => BASE64_STANDARD.encode(bytes).into_bytes(),
                _ => data.as_bytes().to_vec(),
            };
            payload.push(0);
            Ok(payload)
        }
        other => Err(CodecError::InvalidField {
            protocol: PROTOCOL,
            field: "convert_to_base64",
            reason: format!("expected 0 or 1, got {}", other),
        }),
    }
}

/// Target/return ids are plain numbers, given as a number or decimal text.
fn resolve_address(symbol: &Symbol, field: &'static str) -> Result<u32, CodecError> {
    match symbol {
        Symbol::Numeric(n) => Ok(*n),
        Symbol::Symbolic(text) => text.trim().parse::<u32>().map_err(|_| CodecError::InvalidField {
            protocol: PROTOCOL,
            field,
            reason: format!("'{}' is not a number", text),
        }),
    }
}

/// The JSON document carried by a payload, if it is one.
fn json_document(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let text = text.trim_end_matches('\0');
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.is_object() || value.is_array() => Some(text.to_string()),
        _ => None,
    }
}

/// Decode a payload that is nothing but standard base64 text.
fn base64_payload(bytes: &[u8]) -> Option<Vec<u8>> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let text = &bytes[..end];
    let is_alphabet = |b: &u8| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=');
    if text.is_empty() || text.len() % 4 != 0 || !text.iter().all(is_alphabet) {
        return None;
    }
    BASE64_STANDARD.decode(text).ok()
}

// ============================================================================
// Codec
// ============================================================================

impl PoeCanableCodec {
    pub fn new(dict: Arc<Dictionary>, fd: bool, limits: ReassemblyLimits) -> Self {
        PoeCanableCodec {
            dict,
            fd,
            lines: LineBuffer::new(),
            reassembler: Arc::new(Reassembler::new(limits)),
        }
    }

    pub fn is_fd(&self) -> bool {
        self.fd
    }

    /// Shared handle to the reassembly buffer (for eviction from a timer).
    pub fn reassembler(&self) -> Arc<Reassembler> {
        self.reassembler.clone()
    }

    pub fn evict_expired(&self, now_ms: u64) -> usize {
        self.reassembler.evict_expired(now_ms)
    }

    /// Build the frames for a command, in transmit order.
    pub fn encode_frames(&self, command: &PoeCanableCommand) -> Result<Vec<CanFrame>, CodecError> {
        let id = FullId {
            is_full_packet: 0,
            header_code: command.header.resolve(&self.dict, SymbolTable::Header)?,
            argument_code: command.argument.resolve(&self.dict, SymbolTable::Argument)?,
            target_id: resolve_address(&command.target_id, "target_id")?,
            return_id: resolve_address(&command.return_id, "return_id")?,
        };
        let partial_id = id.encode()?;
        let final_id = id.with_full_packet(true).encode()?;

        let data = command.data.as_deref().unwrap_or("");
        if data.trim().is_empty() {
            return Ok(vec![CanFrame {
                id: final_id,
                is_extended: true,
                is_remote: true,
                ..Default::default()
            }]);
        }

        let payload = outgoing_payload(data, command.convert_to_base64)?;
        if let Some(declared) = command.length.as_deref().and_then(|l| l.trim().parse::<usize>().ok()) {
            if declared != payload.len() {
                tlog!(
                    LogLevel::Debug,
                    "[poe_canable] declared length {} differs from payload length {}",
                    declared,
                    payload.len()
                );
            }
        }

        let chunk_size = if self.fd { FD_MAX_DATA } else { CLASSIC_MAX_DATA };
        let count = payload.chunks(chunk_size).count();
        Ok(payload
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| CanFrame {
                id: if i + 1 == count { final_id } else { partial_id },
                data: chunk.to_vec(),
                dlc: 0,
                is_extended: true,
                is_fd: self.fd,
                is_brs: self.fd,
                is_remote: false,
            })
            .collect())
    }

    /// Feed one received frame.
    pub fn decode_frame(&self, frame: &CanFrame, now_ms: u64) -> DecodeResult<MessageData> {
        let main_id = full_id::main_id(frame.id, frame.is_extended);

        let mut bytes = frame.data.clone();
        if frame.is_fd {
            // FD frames are padded to the DLC size
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            bytes.truncate(end);
        }

        if !frame.is_extended {
            // Not a POE identifier: surface as-is
            return Ok(Decoded::Complete(finish(FullId::default(), main_id, bytes, now_ms, frame.is_remote)));
        }

        let id = FullId::decode(frame.id);
        if frame.is_remote {
            return Ok(Decoded::Complete(MessageData {
                timestamp: now_ms,
                full_id: id,
                main_id,
                can_data: Vec::new(),
                json: EMPTY_JSON.to_string(),
                is_remote: true,
                is_complete: true,
            }));
        }

        let key = ReassemblyKey::new(id, main_id);
        match self.reassembler.push(key, &bytes, id.is_full(), now_ms) {
            PushOutcome::Pending => Ok(Decoded::Incomplete),
            PushOutcome::Complete { data, started_ms } => {
                Ok(Decoded::Complete(finish(id, main_id, data, started_ms, false)))
            }
            PushOutcome::Dropped { size } => Err(CodecError::malformed(
                PROTOCOL,
                format!(
                    "message main_id={} exceeded {} bytes ({}), dropped",
                    main_id,
                    self.reassembler.limits().max_partial_bytes,
                    size
                ),
            )),
        }
    }

    /// Decode with an explicit arrival time (for replay and tests).
    pub fn decode_at(&mut self, raw: &[u8], now_ms: u64) -> Vec<DecodeResult<MessageData>> {
        let mut results = Vec::new();
        for line in self.lines.push(raw) {
            match line {
                SlcanLine::Text(text) => {
                    // Empty = OK reply, z/Z = transmit acknowledged
                    if text.is_empty() || text.starts_with('z') || text.starts_with('Z') {
                        continue;
                    }
                    match slcan::decode_line(&text) {
                        Ok(frame) => results.push(self.decode_frame(&frame, now_ms)),
                        Err(e) => {
                            tlog!(LogLevel::Warning, "[poe_canable] {}", e);
                            results.push(Err(e));
                        }
                    }
                }
                SlcanLine::Nack => {
                    tlog!(LogLevel::Warning, "[poe_canable] adapter rejected a command");
                    results.push(Err(CodecError::malformed("slcan", "adapter replied BEL")));
                }
                SlcanLine::Overflow(len) => {
                    results.push(Err(CodecError::malformed(
                        "slcan",
                        format!("line of {} bytes exceeds any frame, discarded", len),
                    )));
                }
            }
        }
        if self.lines.pending_len() > 0 {
            results.push(Ok(Decoded::Incomplete));
        }
        results
    }
}

/// Turn a reassembled payload into a message. JSON is tried on the raw
/// bytes first; a base64 payload is then decoded and, if the raw bytes were
/// not JSON, the decoded bytes are tried.
fn finish(id: FullId, main_id: u32, data: Vec<u8>, timestamp: u64, is_remote: bool) -> MessageData {
    let mut json = json_document(&data);
    let mut can_data = data;
    if let Some(decoded) = base64_payload(&can_data) {
        tlog!(LogLevel::Debug, "[poe_canable] decoded base64 payload for main_id={}", main_id);
        if json.is_none() {
            json = json_document(&decoded);
        }
        can_data = decoded;
    }
    MessageData {
        timestamp,
        full_id: id,
        main_id,
        can_data,
        json: json.unwrap_or_else(|| EMPTY_JSON.to_string()),
        is_remote,
        is_complete: true,
    }
}

impl ProtocolCodec for PoeCanableCodec {
    type Command = PoeCanableCommand;
    type Record = MessageData;

    fn encode_outgoing(&self, command: &PoeCanableCommand) -> Result<Vec<Vec<u8>>, CodecError> {
        let frames = self.encode_frames(command)?;
        tlog!(
            LogLevel::Debug,
            "[poe_canable] encoded {} frame(s), id=0x{:08X}",
            frames.len(),
            frames.last().map_or(0, |f| f.id)
        );
        frames.iter().map(slcan::encode_frame).collect()
    }

    fn decode_incoming(&mut self, raw: &[u8]) -> Vec<DecodeResult<MessageData>> {
        self.decode_at(raw, now_ms())
    }

    fn reset(&mut self) {
        self.lines.clear();
        let dropped = self.reassembler.discard_all();
        if dropped > 0 {
            tlog!(LogLevel::Info, "[poe_canable] discarded {} partial message(s)", dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(fd: bool) -> PoeCanableCodec {
        PoeCanableCodec::new(Dictionary::shared(), fd, ReassemblyLimits::default())
    }

    fn lines(writes: &[Vec<u8>]) -> Vec<String> {
        writes.iter().map(|w| String::from_utf8(w.clone()).unwrap()).collect()
    }

    fn complete(results: Vec<DecodeResult<MessageData>>) -> Vec<MessageData> {
        results
            .into_iter()
            .filter_map(|r| r.ok().and_then(Decoded::complete))
            .collect()
    }

    #[test]
    fn test_encode_blank_data_is_remote() {
        let cmd = PoeCanableCommand::new("GET", "ModuleList", 1, 2, Some("   "));
        let out = lines(&codec(false).encode_outgoing(&cmd).unwrap());
        // isFullPacket=1, header=0, argument=20, target=1, return=2
        assert_eq!(out, vec!["R101401020\r".to_string()]);
    }

    #[test]
    fn test_encode_splits_classic_frames() {
        let cmd = PoeCanableCommand::new("SET", "ModuleMode", 3, 4, Some("0123456789"));
        let out = lines(&codec(false).encode_outgoing(&cmd).unwrap());
        assert_eq!(
            out,
            vec![
                "T0417030483031323334353637\r".to_string(),
                "T1417030423839\r".to_string(),
            ]
        );
    }

    #[test]
    fn test_encode_fd_uses_brs_frames() {
        let data = "x".repeat(70);
        let cmd = PoeCanableCommand::new(1u32, 23u32, 0, 0, Some(&data));
        let frames = codec(true).encode_frames(&cmd).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data.len(), 64);
        assert!(!FullId::decode(frames[0].id).is_full());
        assert!(FullId::decode(frames[1].id).is_full());
        let out = lines(&codec(true).encode_outgoing(&cmd).unwrap());
        assert!(out[0].starts_with("B04170000F"));
        assert!(out[1].starts_with("B141700006"));
    }

    #[test]
    fn test_encode_base64_mode() {
        let mut cmd = PoeCanableCommand::new("SET", "ModuleConfig", 0, 0, Some("DE AD be ef"));
        cmd.convert_to_base64 = Some(1);
        let frames = codec(true).encode_frames(&cmd).unwrap();
        assert_eq!(frames[0].data, b"3q2+7w==\0".to_vec());

        // Not hex: the text itself is sent, NUL terminated
        cmd.data = Some("hello world".to_string());
        let frames = codec(true).encode_frames(&cmd).unwrap();
        assert_eq!(frames[0].data, b"hello world\0".to_vec());

        cmd.convert_to_base64 = Some(2);
        assert!(matches!(
            codec(true).encode_frames(&cmd).unwrap_err(),
            CodecError::InvalidField { field: "convert_to_base64", .. }
        ));
    }

    #[test]
    fn test_encode_range_and_symbol_errors() {
        let c = codec(false);
        let cmd = PoeCanableCommand::new("GET", "ModuleList", 256, 0, None);
        assert_eq!(
            c.encode_frames(&cmd).unwrap_err(),
            CodecError::FieldOverflow {
                field: "target_id",
                value: 256,
                width: 8
            }
        );
        let cmd = PoeCanableCommand::new("GET", 1024u32, 0, 0, None);
        assert!(matches!(c.encode_frames(&cmd).unwrap_err(), CodecError::FieldOverflow { .. }));
        let cmd = PoeCanableCommand::new("PUT", "ModuleList", 0, 0, None);
        assert!(matches!(c.encode_frames(&cmd).unwrap_err(), CodecError::UnknownSymbol { .. }));

        let mut cmd = PoeCanableCommand::new("GET", "ModuleList", 0, 0, None);
        cmd.return_id = Symbol::from("abc");
        assert!(matches!(
            c.encode_frames(&cmd).unwrap_err(),
            CodecError::InvalidField { field: "return_id", .. }
        ));
    }

    #[test]
    fn test_decode_two_fragments() {
        let mut c = codec(false);
        let first = c.decode_at(b"T0816010267B2261223A31\r", 1_000);
        assert_eq!(first, vec![Ok(Decoded::Incomplete)]);
        let out = complete(c.decode_at(b"T1816010217D\r", 1_050));
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.can_data, br#"{"a":1}"#.to_vec());
        assert_eq!(m.json, r#"{"a":1}"#);
        assert_eq!(m.timestamp, 1_000);
        assert_eq!(m.main_id, (2 << 10) | 22);
        assert_eq!(m.full_id.header_code, 2);
        assert_eq!(m.full_id.argument_code, 22);
        assert_eq!(m.full_id.target_id, 1);
        assert_eq!(m.full_id.return_id, 2);
        assert!(m.is_complete && !m.is_remote);
    }

    #[test]
    fn test_decode_line_noise_is_reported_not_fatal() {
        let mut c = codec(false);
        let mut raw = b"T1417030".to_vec();
        raw.extend_from_slice("ж".as_bytes());
        raw.push(b'\r');
        raw.extend_from_slice(b"t12\xFF1AA\r\xC0\xC1\xFE\r");
        // A good frame after the noise still decodes
        raw.extend_from_slice(b"R101401020\r");

        let out = c.decode_at(&raw, 0);
        assert_eq!(out.len(), 4);
        for result in &out[..3] {
            assert!(matches!(result, Err(CodecError::MalformedFrame { .. })));
        }
        let msgs = complete(out);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_remote);
    }

    #[test]
    fn test_decode_remote_and_acks() {
        let mut c = codec(false);
        let out = c.decode_at(b"\rz\rR101401020\r", 0);
        let msgs = complete(out);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_remote);
        assert_eq!(msgs[0].json, "{}");
        assert!(msgs[0].can_data.is_empty());
    }

    #[test]
    fn test_decode_fd_strips_padding_and_base64() {
        let mut c = codec(true);
        // "eyJvayI6MX0=" is base64 of {"ok":1}, NUL terminated, padded to 16
        let payload = b"eyJvayI6MX0=\0";
        let mut data = payload.to_vec();
        data.resize(16, 0);
        let line = format!("B10170000A{}\r", hex::encode_upper(&data));
        let msgs = complete(c.decode_at(line.as_bytes(), 0));
        assert_eq!(msgs[0].can_data, br#"{"ok":1}"#.to_vec());
        assert_eq!(msgs[0].json, r#"{"ok":1}"#);
    }

    #[test]
    fn test_decode_plain_text_payload() {
        let mut c = codec(false);
        let msgs = complete(c.decode_at(b"T1017000002hi\r", 0));
        // "hi" is not hex, so the line is malformed and nothing completes
        assert!(msgs.is_empty());

        let msgs = complete(c.decode_at(b"T10170000026869\r", 0));
        assert_eq!(msgs[0].can_data, b"hi".to_vec());
        assert_eq!(msgs[0].json, "{}");
    }

    #[test]
    fn test_decode_standard_frame_passthrough() {
        let mut c = codec(false);
        let msgs = complete(c.decode_at(b"t7FF10A\r", 0));
        assert_eq!(msgs[0].main_id, 0x7FF);
        assert_eq!(msgs[0].full_id, FullId::default());
        assert_eq!(msgs[0].can_data, vec![0x0A]);
    }

    #[test]
    fn test_decode_errors_do_not_stop_stream() {
        let mut c = codec(false);
        let out = c.decode_at(b"Q123\r\x07T10170000026869\r", 0);
        assert!(matches!(out[0], Err(CodecError::MalformedFrame { .. })));
        assert!(matches!(out[1], Err(CodecError::MalformedFrame { .. })));
        assert_eq!(complete(out).len(), 1);
    }

    #[test]
    fn test_oversize_reassembly_reported() {
        let limits = ReassemblyLimits {
            max_partial_bytes: 8,
            ..Default::default()
        };
        let mut c = PoeCanableCodec::new(Dictionary::shared(), false, limits);
        c.decode_at(b"T0017000080000000000000000\r", 0);
        let out = c.decode_at(b"T00170000101\r", 0);
        assert!(matches!(out[0], Err(CodecError::MalformedFrame { .. })));
    }

    #[test]
    fn test_reset_discards_partials() {
        let mut c = codec(false);
        c.decode_at(b"T00170000141\r", 0);
        assert_eq!(c.reassembler().in_flight(), 1);
        c.reset();
        assert_eq!(c.reassembler().in_flight(), 0);
    }

    #[test]
    fn test_message_data_serializes_main_id() {
        let m = MessageData {
            timestamp: 1,
            full_id: FullId::default(),
            main_id: 7,
            can_data: vec![],
            json: "{}".to_string(),
            is_remote: false,
            is_complete: true,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["mainID"], 7);
        assert_eq!(v["full_id"]["isFullPacket"], 0);
    }
}
