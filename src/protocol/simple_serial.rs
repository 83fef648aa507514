// src/protocol/simple_serial.rs
//
// SimpleSerial: plain text lines. Outgoing data gets a line terminator
// appended; incoming bytes are split on CR or LF.

use serde::{Deserialize, Serialize};

use super::{CodecError, DecodeResult, Decoded, ProtocolCodec};
use crate::logging::LogLevel;
use crate::tlog;

/// Terminator used when neither the command nor the settings name one.
pub const DEFAULT_END_PACKAGE: &str = "\r\n";

/// Forced split length for a line that never terminates.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Outgoing SimpleSerial command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleSerialCommand {
    pub data: String,
    /// Line terminator; falls back to the codec default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_package: Option<String>,
}

/// One received line, terminator removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleSerialRecord {
    pub data: String,
}

pub struct SimpleSerialCodec {
    end_package: String,
    max_line_length: usize,
    buffer: Vec<u8>,
    /// Last byte seen was CR, so an immediately following LF closes nothing.
    after_cr: bool,
}

impl SimpleSerialCodec {
    pub fn new(end_package: String, max_line_length: usize) -> Self {
        SimpleSerialCodec {
            end_package,
            max_line_length: max_line_length.max(1),
            buffer: Vec::new(),
            after_cr: false,
        }
    }

    /// Emit the unterminated remainder, if any, as a record.
    pub fn flush(&mut self) -> Option<SimpleSerialRecord> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = self.take_line();
        tlog!(LogLevel::Debug, "[simple_serial] flushed unterminated data: {:?}", line.data);
        Some(line)
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn take_line(&mut self) -> SimpleSerialRecord {
        let bytes: Vec<u8> = self.buffer.drain(..).collect();
        SimpleSerialRecord {
            data: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

impl Default for SimpleSerialCodec {
    fn default() -> Self {
        SimpleSerialCodec::new(DEFAULT_END_PACKAGE.to_string(), DEFAULT_MAX_LINE_LENGTH)
    }
}

impl ProtocolCodec for SimpleSerialCodec {
    type Command = SimpleSerialCommand;
    type Record = SimpleSerialRecord;

    fn encode_outgoing(&self, command: &SimpleSerialCommand) -> Result<Vec<Vec<u8>>, CodecError> {
        let end = command.end_package.as_deref().unwrap_or(&self.end_package);
        let mut out = Vec::with_capacity(command.data.len() + end.len());
        out.extend_from_slice(command.data.as_bytes());
        out.extend_from_slice(end.as_bytes());
        tlog!(
            LogLevel::Debug,
            "[simple_serial] encoded {} bytes (terminator {:?})",
            out.len(),
            end
        );
        Ok(vec![out])
    }

    fn decode_incoming(&mut self, raw: &[u8]) -> Vec<DecodeResult<SimpleSerialRecord>> {
        let mut results = Vec::new();

        for &byte in raw {
            match byte {
                b'\n' if self.after_cr => {
                    // Second half of CRLF
                    self.after_cr = false;
                }
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    results.push(Ok(Decoded::Complete(self.take_line())));
                }
                _ => {
                    self.after_cr = false;
                    self.buffer.push(byte);
                    if self.buffer.len() >= self.max_line_length {
                        tlog!(
                            LogLevel::Warning,
                            "[simple_serial] line exceeded {} bytes, forcing split",
                            self.max_line_length
                        );
                        results.push(Ok(Decoded::Complete(self.take_line())));
                    }
                }
            }
        }

        if !self.buffer.is_empty() {
            results.push(Ok(Decoded::Incomplete));
        }
        results
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.after_cr = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(results: Vec<DecodeResult<SimpleSerialRecord>>) -> Vec<String> {
        results
            .into_iter()
            .filter_map(|r| r.unwrap().complete())
            .map(|r| r.data)
            .collect()
    }

    #[test]
    fn test_encode_appends_terminator() {
        let codec = SimpleSerialCodec::default();
        let cmd = SimpleSerialCommand {
            data: "AT+RST".to_string(),
            end_package: Some("\n".to_string()),
        };
        assert_eq!(codec.encode_outgoing(&cmd).unwrap(), vec![b"AT+RST\n".to_vec()]);
    }

    #[test]
    fn test_encode_default_and_empty_terminator() {
        let codec = SimpleSerialCodec::default();
        let cmd = SimpleSerialCommand {
            data: "ping".to_string(),
            end_package: None,
        };
        assert_eq!(codec.encode_outgoing(&cmd).unwrap(), vec![b"ping\r\n".to_vec()]);

        let cmd = SimpleSerialCommand {
            data: "raw".to_string(),
            end_package: Some(String::new()),
        };
        assert_eq!(codec.encode_outgoing(&cmd).unwrap(), vec![b"raw".to_vec()]);
    }

    #[test]
    fn test_decode_splits_on_cr_lf_and_crlf() {
        let mut codec = SimpleSerialCodec::default();
        let out = lines(codec.decode_incoming(b"one\ntwo\rthree\r\nfour\n"));
        assert_eq!(out, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_decode_keeps_empty_lines() {
        let mut codec = SimpleSerialCodec::default();
        let out = lines(codec.decode_incoming(b"a\n\nb\n"));
        assert_eq!(out, vec!["a", "", "b"]);
    }

    #[test]
    fn test_decode_across_chunks() {
        let mut codec = SimpleSerialCodec::default();
        let first = codec.decode_incoming(b"hel");
        assert_eq!(first, vec![Ok(Decoded::Incomplete)]);
        let out = lines(codec.decode_incoming(b"lo\r"));
        assert_eq!(out, vec!["hello"]);
        // LF of a split CRLF must not produce an empty line
        assert!(codec.decode_incoming(b"\n").is_empty());
    }

    #[test]
    fn test_decode_multibyte_split() {
        let mut codec = SimpleSerialCodec::default();
        let bytes = "тест\n".as_bytes();
        codec.decode_incoming(&bytes[..3]);
        let out = lines(codec.decode_incoming(&bytes[3..]));
        assert_eq!(out, vec!["тест"]);
    }

    #[test]
    fn test_flush_and_reset() {
        let mut codec = SimpleSerialCodec::default();
        codec.decode_incoming(b"partial");
        assert_eq!(codec.pending_len(), 7);
        assert_eq!(codec.flush().unwrap().data, "partial");
        assert!(codec.flush().is_none());

        codec.decode_incoming(b"gone");
        codec.reset();
        assert_eq!(codec.pending_len(), 0);
    }

    #[test]
    fn test_forced_split_on_max_length() {
        let mut codec = SimpleSerialCodec::new("\n".to_string(), 4);
        let out = lines(codec.decode_incoming(b"abcdefgh"));
        assert_eq!(out, vec!["abcd", "efgh"]);
    }
}
