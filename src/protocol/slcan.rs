// src/protocol/slcan.rs
//
// slcan (Serial Line CAN) ASCII protocol codec, as spoken by CANable
// adapters including the CAN-FD extension.
//
// Frame formats:
//   Standard: t<ID:3hex><DLC:1hex><DATA:2hex*len>\r
//   Extended: T<ID:8hex><DLC:1hex><DATA:2hex*len>\r
//   RTR:      r<ID:3hex><DLC:1hex>\r / R<ID:8hex><DLC:1hex>\r
//   FD:       d/D (no bit-rate switch), b/B (bit-rate switch)
//
// Adapter replies: bare \r = OK, BEL = error, z/Z = transmit ack.

use serde::{Deserialize, Serialize};

use super::full_id::{EXTENDED_ID_MASK, STANDARD_ID_MASK};
use super::{CodecError, ProtocolKind};
use crate::settings::SerialConfig;

const PROTOCOL: &str = "slcan";

const BEL: u8 = 0x07;

/// Longest legal line: B + 8 id + dlc + 64 bytes of hex.
const MAX_LINE_LEN: usize = 1 + 8 + 1 + 128;

pub const CLASSIC_MAX_DATA: usize = 8;
pub const FD_MAX_DATA: usize = 64;

// ============================================================================
// Bitrate Tables
// ============================================================================

/// Classic CAN bitrates: display name, adapter command.
pub const CAN_BITRATES: &[(&str, &str)] = &[
    ("10k", "S0"),
    ("20k", "S1"),
    ("50k", "S2"),
    ("100k", "S3"),
    ("125k", "S4"),
    ("250k", "S5"),
    ("500k", "S6"),
    ("750k", "S7"),
    ("1M", "S8"),
];

/// CAN-FD nominal (arbitration phase) bitrates.
pub const CANFD_NOMINAL_BITRATES: &[(&str, &str)] = &[
    ("250k", "S042F0C"),
    ("500k", "S022F0C"),
    ("1M", "S012F0C"),
];

/// CAN-FD data phase bitrates.
pub const CANFD_DATA_BITRATES: &[(&str, &str)] = &[
    ("1M", "Y021706"),
    ("2M", "Y011706"),
    ("4M", "Y010B03"),
];

/// Look up a bitrate by display name or by its raw command.
pub fn bitrate_command(
    table: &'static [(&'static str, &'static str)],
    field: &'static str,
    value: &str,
) -> Result<&'static str, CodecError> {
    let value = value.trim();
    table
        .iter()
        .find(|(name, cmd)| name.eq_ignore_ascii_case(value) || *cmd == value)
        .map(|(_, cmd)| *cmd)
        .ok_or_else(|| CodecError::InvalidField {
            protocol: PROTOCOL,
            field,
            reason: format!("unsupported bitrate '{}'", value),
        })
}

/// Commands that bring the adapter on bus for the configured protocol.
/// Non-CAN protocols need none.
pub fn open_commands(config: &SerialConfig) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut cmds: Vec<String> = Vec::new();
    match config.protocol {
        ProtocolKind::SimpleSerial | ProtocolKind::PoeSerial => return Ok(Vec::new()),
        ProtocolKind::PoeCanable => {
            let rate = required(&config.can_bitrate, "can_bitrate")?;
            cmds.push("C".to_string());
            cmds.push(bitrate_command(CAN_BITRATES, "can_bitrate", rate)?.to_string());
        }
        ProtocolKind::PoeCanableFd => {
            let nominal = required(&config.canfd_bitrate, "canfd_bitrate")?;
            let data = required(&config.canfd_data_bitrate, "canfd_data_bitrate")?;
            cmds.push("C".to_string());
            cmds.push(
                bitrate_command(CANFD_NOMINAL_BITRATES, "canfd_bitrate", nominal)?.to_string(),
            );
            cmds.push(
                bitrate_command(CANFD_DATA_BITRATES, "canfd_data_bitrate", data)?.to_string(),
            );
        }
    }
    // Normal mode, auto-retransmit off, open
    cmds.extend(["M0", "A0", "O"].iter().map(|s| s.to_string()));
    Ok(cmds.into_iter().map(|c| format!("{}\r", c).into_bytes()).collect())
}

/// Command that takes the adapter off bus.
pub fn close_commands() -> Vec<Vec<u8>> {
    vec![b"C\r".to_vec()]
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, CodecError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(CodecError::MissingField {
            protocol: PROTOCOL,
            field,
        })
}

// ============================================================================
// Frames
// ============================================================================

/// One CAN or CAN-FD frame as carried on an slcan line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8>,
    /// Raw DLC code. For remote frames this is the requested length; for
    /// data frames it is derived from `data` when encoding.
    pub dlc: u8,
    pub is_extended: bool,
    pub is_fd: bool,
    pub is_brs: bool,
    pub is_remote: bool,
}

/// Payload length for a DLC code.
pub fn dlc_to_len(dlc: u8, is_fd: bool) -> usize {
    match (dlc, is_fd) {
        (0..=8, _) => dlc as usize,
        (_, false) => CLASSIC_MAX_DATA,
        (9, true) => 12,
        (10, true) => 16,
        (11, true) => 20,
        (12, true) => 24,
        (13, true) => 32,
        (14, true) => 48,
        _ => 64,
    }
}

/// Smallest DLC code whose payload holds `len` bytes (FD rounds up).
pub fn len_to_dlc(len: usize) -> u8 {
    match len {
        0..=8 => len as u8,
        9..=12 => 9,
        13..=16 => 10,
        17..=20 => 11,
        21..=24 => 12,
        25..=32 => 13,
        33..=48 => 14,
        _ => 15,
    }
}

impl CanFrame {
    fn prefix(&self) -> char {
        let c = if self.is_remote {
            'r'
        } else if self.is_fd && self.is_brs {
            'b'
        } else if self.is_fd {
            'd'
        } else {
            't'
        };
        if self.is_extended {
            c.to_ascii_uppercase()
        } else {
            c
        }
    }
}

/// Decode one slcan frame line (without the trailing `\r`).
///
/// Examples:
///   `t1234AABBCCDD` -> Standard frame, ID=0x123, DLC=4, data=AA BB CC DD
///   `T123456782AABB` -> Extended frame, ID=0x12345678, DLC=2
///   `B1401000090102030405060708090A0B0C` -> Extended FD frame, 12 bytes
pub fn decode_line(line: &str) -> Result<CanFrame, CodecError> {
    let bytes = line.as_bytes();
    if bytes.is_empty() {
        return Err(CodecError::malformed(PROTOCOL, "empty frame"));
    }

    let (is_extended, is_remote, is_fd, is_brs) = match bytes[0] {
        b't' => (false, false, false, false),
        b'T' => (true, false, false, false),
        b'r' => (false, true, false, false),
        b'R' => (true, true, false, false),
        b'd' => (false, false, true, false),
        b'D' => (true, false, true, false),
        b'b' => (false, false, true, true),
        b'B' => (true, false, true, true),
        c => {
            return Err(CodecError::malformed(
                PROTOCOL,
                format!("invalid frame prefix: '{}'", c as char),
            ))
        }
    };

    let id_len = if is_extended { 8 } else { 3 };
    let min_len = 1 + id_len + 1; // prefix + ID + DLC
    if bytes.len() < min_len {
        return Err(CodecError::malformed(
            PROTOCOL,
            format!("frame too short: {} bytes, need at least {}", bytes.len(), min_len),
        ));
    }

    let id_bytes = &bytes[1..1 + id_len];
    let id_str = std::str::from_utf8(id_bytes)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(|| {
            CodecError::malformed(PROTOCOL, format!("invalid hex ID: {:02X?}", id_bytes))
        })?;
    let id = u32::from_str_radix(id_str, 16)
        .map_err(|_| CodecError::malformed(PROTOCOL, format!("invalid hex ID: {}", id_str)))?;
    let id_mask = if is_extended { EXTENDED_ID_MASK } else { STANDARD_ID_MASK };
    if id & !id_mask != 0 {
        return Err(CodecError::malformed(
            PROTOCOL,
            format!("ID 0x{:X} out of range", id),
        ));
    }

    let dlc_char = bytes[1 + id_len] as char;
    let dlc = dlc_char.to_digit(16).ok_or_else(|| {
        CodecError::malformed(PROTOCOL, format!("invalid DLC character: '{}'", dlc_char))
    })? as u8;
    if !is_fd && dlc > 8 {
        return Err(CodecError::malformed(
            PROTOCOL,
            format!("invalid DLC: {} (max 8)", dlc),
        ));
    }

    let mut data = Vec::new();
    if !is_remote {
        let len = dlc_to_len(dlc, is_fd);
        let data_start = min_len;
        let expected_len = data_start + len * 2;
        if bytes.len() < expected_len {
            return Err(CodecError::malformed(
                PROTOCOL,
                format!("incomplete data: {} bytes, need {}", bytes.len(), expected_len),
            ));
        }
        data = hex::decode(&bytes[data_start..expected_len])
            .map_err(|e| CodecError::malformed(PROTOCOL, format!("invalid data hex: {}", e)))?;
    }

    Ok(CanFrame {
        id,
        data,
        dlc,
        is_extended,
        is_fd,
        is_brs,
        is_remote,
    })
}

/// Encode a frame as an slcan line including the trailing `\r`.
/// FD payloads are zero-padded up to the next DLC size.
pub fn encode_frame(frame: &CanFrame) -> Result<Vec<u8>, CodecError> {
    let max = if frame.is_fd { FD_MAX_DATA } else { CLASSIC_MAX_DATA };
    if frame.data.len() > max {
        return Err(CodecError::InvalidField {
            protocol: PROTOCOL,
            field: "data",
            reason: format!("{} bytes exceeds frame capacity {}", frame.data.len(), max),
        });
    }
    if frame.is_remote && frame.is_fd {
        return Err(CodecError::InvalidField {
            protocol: PROTOCOL,
            field: "is_remote",
            reason: "CAN-FD has no remote frames".to_string(),
        });
    }

    let mut line = String::with_capacity(MAX_LINE_LEN + 1);
    line.push(frame.prefix());
    if frame.is_extended {
        line.push_str(&format!("{:08X}", frame.id & EXTENDED_ID_MASK));
    } else {
        line.push_str(&format!("{:03X}", frame.id & STANDARD_ID_MASK));
    }

    if frame.is_remote {
        line.push_str(&format!("{:X}", frame.dlc.min(8)));
    } else {
        let dlc = len_to_dlc(frame.data.len());
        line.push_str(&format!("{:X}", dlc));
        let mut padded = frame.data.clone();
        padded.resize(dlc_to_len(dlc, frame.is_fd), 0);
        line.push_str(&hex::encode_upper(&padded));
    }

    line.push('\r');
    Ok(line.into_bytes())
}

// ============================================================================
// Line Buffer
// ============================================================================

/// A unit of adapter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlcanLine {
    /// A `\r`-terminated line, terminator removed. May be empty (OK reply).
    Text(String),
    /// BEL: the adapter rejected the last command.
    Nack,
    /// Line exceeded the longest legal frame and was discarded.
    Overflow(usize),
}

/// Splits the adapter byte stream into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, raw: &[u8]) -> Vec<SlcanLine> {
        let mut lines = Vec::new();
        for &byte in raw {
            match byte {
                b'\r' => {
                    let bytes: Vec<u8> = self.buffer.drain(..).collect();
                    lines.push(SlcanLine::Text(String::from_utf8_lossy(&bytes).into_owned()));
                }
                b'\n' => {}
                BEL => {
                    self.buffer.clear();
                    lines.push(SlcanLine::Nack);
                }
                _ => {
                    self.buffer.push(byte);
                    if self.buffer.len() > MAX_LINE_LEN {
                        lines.push(SlcanLine::Overflow(self.buffer.len()));
                        self.buffer.clear();
                    }
                }
            }
        }
        lines
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(id: u32, data: &[u8], is_fd: bool) -> CanFrame {
        CanFrame {
            id,
            data: data.to_vec(),
            dlc: 0,
            is_extended: true,
            is_fd,
            is_brs: is_fd,
            is_remote: false,
        }
    }

    #[test]
    fn test_slcan_decode_standard_frame() {
        let frame = decode_line("t1234AABBCCDD").unwrap();
        assert_eq!(frame.id, 0x123);
        assert_eq!(frame.dlc, 4);
        assert_eq!(frame.data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(!frame.is_extended);
        assert!(!frame.is_fd);
    }

    #[test]
    fn test_slcan_decode_extended_frame() {
        let frame = decode_line("T123456782AABB").unwrap();
        assert_eq!(frame.id, 0x12345678);
        assert_eq!(frame.data, vec![0xAA, 0xBB]);
        assert!(frame.is_extended);
    }

    #[test]
    fn test_slcan_decode_rtr() {
        let frame = decode_line("R100000000").unwrap();
        assert!(frame.is_remote);
        assert!(frame.is_extended);
        assert!(frame.data.is_empty());

        let frame = decode_line("r1234").unwrap();
        assert_eq!(frame.dlc, 4);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_slcan_decode_fd_dlc_table() {
        let payload: String = (0..12).map(|i| format!("{:02X}", i)).collect();
        let frame = decode_line(&format!("B141612349{}", payload)).unwrap();
        assert!(frame.is_fd && frame.is_brs && frame.is_extended);
        assert_eq!(frame.data.len(), 12);
        assert_eq!(frame.data[11], 11);

        let frame = decode_line(&format!("d123F{}", "00".repeat(64))).unwrap();
        assert!(frame.is_fd && !frame.is_brs && !frame.is_extended);
        assert_eq!(frame.data.len(), 64);
    }

    #[test]
    fn test_slcan_decode_errors() {
        assert!(decode_line("").is_err());
        assert!(decode_line("x1234AABB").is_err());
        assert!(decode_line("t12").is_err());
        assert!(decode_line("t1239").is_err()); // classic DLC > 8
        assert!(decode_line("t1232AA").is_err()); // short data
        assert!(decode_line("t1231ZZ").is_err());
        assert!(decode_line("T3FFFFFFF0").is_err()); // beyond 29 bits
    }

    #[test]
    fn test_slcan_decode_non_ascii_is_malformed() {
        let malformed = |line: &str| {
            matches!(decode_line(line), Err(CodecError::MalformedFrame { .. }))
        };
        // Multi-byte character straddling the end of the ID
        assert!(malformed("T1417030ж"));
        assert!(malformed("tж231AA"));
        // Replacement character from lossy decoding, in the ID and in the data
        assert!(malformed("t12\u{FFFD}1AA"));
        assert!(malformed("t1231\u{FFFD}"));
        assert!(malformed("t1232AAж"));
        // Sign prefixes are not hex digits
        assert!(malformed("t+121AA"));
    }

    #[test]
    fn test_slcan_encode_classic() {
        let encoded = encode_frame(&ext(0x12345678, &[0xAA, 0xBB], false)).unwrap();
        assert_eq!(encoded, b"T123456782AABB\r");

        let std = CanFrame {
            id: 0x123,
            data: vec![1, 2, 3],
            ..Default::default()
        };
        assert_eq!(encode_frame(&std).unwrap(), b"t1233010203\r");
    }

    #[test]
    fn test_slcan_encode_remote() {
        let frame = CanFrame {
            id: 0x1000_0000,
            is_extended: true,
            is_remote: true,
            ..Default::default()
        };
        assert_eq!(encode_frame(&frame).unwrap(), b"R100000000\r");
    }

    #[test]
    fn test_slcan_encode_fd_pads_to_dlc() {
        let encoded = encode_frame(&ext(0x1, &[0x11; 10], true)).unwrap();
        let line = std::str::from_utf8(&encoded).unwrap();
        assert!(line.starts_with("B000000019"));
        // 12 bytes on the wire, two of them padding
        assert_eq!(line.len(), 1 + 8 + 1 + 24 + 1);
        assert!(line.ends_with("11110000\r"));
    }

    #[test]
    fn test_slcan_encode_rejects_oversize() {
        assert!(encode_frame(&ext(0x1, &[0; 9], false)).is_err());
        assert!(encode_frame(&ext(0x1, &[0; 65], true)).is_err());
    }

    #[test]
    fn test_slcan_roundtrip() {
        let original = CanFrame {
            id: 0x7FF,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
            dlc: 4,
            ..Default::default()
        };
        let encoded = encode_frame(&original).unwrap();
        let line = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(decode_line(line).unwrap(), original);
    }

    #[test]
    fn test_line_buffer_splits_and_flags() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"t1230\rT12");
        assert_eq!(lines, vec![SlcanLine::Text("t1230".to_string())]);
        assert_eq!(buf.pending_len(), 3);

        let lines = buf.push(b"3456780\r\r\x07");
        assert_eq!(
            lines,
            vec![
                SlcanLine::Text("T123456780".to_string()),
                SlcanLine::Text(String::new()),
                SlcanLine::Nack,
            ]
        );

        let lines = buf.push(&[b'0'; MAX_LINE_LEN + 1]);
        assert_eq!(lines, vec![SlcanLine::Overflow(MAX_LINE_LEN + 1)]);
    }

    #[test]
    fn test_bitrate_lookup() {
        assert_eq!(bitrate_command(CAN_BITRATES, "can_bitrate", "500k").unwrap(), "S6");
        assert_eq!(bitrate_command(CAN_BITRATES, "can_bitrate", "S8").unwrap(), "S8");
        assert_eq!(
            bitrate_command(CANFD_DATA_BITRATES, "canfd_data_bitrate", "2m").unwrap(),
            "Y011706"
        );
        // Names are only valid within their own table
        assert!(bitrate_command(CANFD_NOMINAL_BITRATES, "canfd_bitrate", "S6").is_err());
        assert!(bitrate_command(CAN_BITRATES, "can_bitrate", "33k").is_err());
    }

    #[test]
    fn test_open_commands() {
        let mut config = SerialConfig::default();
        config.protocol = ProtocolKind::PoeCanable;
        config.can_bitrate = Some("1M".to_string());
        let cmds = open_commands(&config).unwrap();
        let text: Vec<&str> = cmds.iter().map(|c| std::str::from_utf8(c).unwrap()).collect();
        assert_eq!(text, vec!["C\r", "S8\r", "M0\r", "A0\r", "O\r"]);

        config.protocol = ProtocolKind::PoeCanableFd;
        config.canfd_bitrate = Some("500k".to_string());
        config.canfd_data_bitrate = None;
        assert_eq!(
            open_commands(&config).unwrap_err(),
            CodecError::MissingField {
                protocol: "slcan",
                field: "canfd_data_bitrate"
            }
        );
        config.canfd_data_bitrate = Some("4M".to_string());
        let cmds = open_commands(&config).unwrap();
        assert_eq!(cmds[1], b"S022F0C\r");
        assert_eq!(cmds[2], b"Y010B03\r");

        config.protocol = ProtocolKind::SimpleSerial;
        assert!(open_commands(&config).unwrap().is_empty());
        assert_eq!(close_commands(), vec![b"C\r".to_vec()]);
    }
}
