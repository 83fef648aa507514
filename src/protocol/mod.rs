// src/protocol/mod.rs
//
// Protocol codecs for the three device transports and the enum that lets the
// rest of the application drive any of them through one interface.
//
// Each protocol's codec lives in its own module:
// - simple_serial.rs - line-oriented text
// - poe_serial.rs    - SOH/US/STX/ETX/EOT framed request/response
// - poe_canable.rs   - POE commands over CAN / CAN-FD via an slcan adapter
//
// slcan.rs is the ASCII line codec underneath POECanable, full_id.rs the
// identifier bitfield and reassembly.rs the multi-frame buffer.

mod error;
pub mod full_id;
pub mod poe_canable;
pub mod poe_serial;
pub mod reassembly;
pub mod simple_serial;
pub mod slcan;

pub use error::CodecError;
pub use full_id::FullId;
pub use poe_canable::{MessageData, PoeCanableCodec, PoeCanableCommand};
pub use poe_serial::{PoeSerialCodec, PoeSerialCommand, PoeSerialRecord};
pub use reassembly::{ReassemblyKey, ReassemblyLimits, Reassembler};
pub use simple_serial::{SimpleSerialCodec, SimpleSerialCommand, SimpleSerialRecord};
pub use slcan::CanFrame;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dictionary::Dictionary;
use crate::settings::AppSettings;

// ============================================================================
// Codec Trait
// ============================================================================

/// Result of feeding raw data to a codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<R> {
    /// A fully decoded record.
    Complete(R),
    /// Data was consumed but the record is not finished yet. Not an error.
    Incomplete,
}

impl<R> Decoded<R> {
    pub fn complete(self) -> Option<R> {
        match self {
            Decoded::Complete(r) => Some(r),
            Decoded::Incomplete => None,
        }
    }

    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> Decoded<T> {
        match self {
            Decoded::Complete(r) => Decoded::Complete(f(r)),
            Decoded::Incomplete => Decoded::Incomplete,
        }
    }
}

/// Per-item outcome of `decode_incoming`. Errors are per frame: the stream
/// continues after a malformed frame.
pub type DecodeResult<R> = Result<Decoded<R>, CodecError>;

/// Trait for transport protocol codecs.
///
/// The associated types are the transport-specific outgoing command and
/// decoded incoming record.
pub trait ProtocolCodec {
    type Command;
    type Record;

    /// Encode a command into the writes to hand to the transport, in order.
    fn encode_outgoing(&self, command: &Self::Command) -> Result<Vec<Vec<u8>>, CodecError>;

    /// Feed raw bytes from the transport. Returns one item per frame
    /// completed, pending or rejected by this chunk.
    fn decode_incoming(&mut self, raw: &[u8]) -> Vec<DecodeResult<Self::Record>>;

    /// Drop all buffered partial input (connection closed or abandoned).
    fn reset(&mut self);
}

/// Current time in milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Protocol Selection
// ============================================================================

/// Protocol spoken over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    SimpleSerial,
    #[serde(rename = "POESerial")]
    PoeSerial,
    #[serde(rename = "POECanable")]
    PoeCanable,
    #[serde(rename = "POECanableFD")]
    PoeCanableFd,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::SimpleSerial => "SimpleSerial",
            ProtocolKind::PoeSerial => "POESerial",
            ProtocolKind::PoeCanable => "POECanable",
            ProtocolKind::PoeCanableFd => "POECanableFD",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "SimpleSerial" => Ok(ProtocolKind::SimpleSerial),
            "POESerial" => Ok(ProtocolKind::PoeSerial),
            "POECanable" => Ok(ProtocolKind::PoeCanable),
            "POECanableFD" => Ok(ProtocolKind::PoeCanableFd),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }

    /// Whether the connection talks to an slcan CAN adapter.
    pub fn is_can(&self) -> bool {
        matches!(self, ProtocolKind::PoeCanable | ProtocolKind::PoeCanableFd)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing command for any protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutgoingCommand {
    SimpleSerial(SimpleSerialCommand),
    #[serde(rename = "POESerial")]
    PoeSerial(PoeSerialCommand),
    #[serde(rename = "POECanable")]
    PoeCanable(PoeCanableCommand),
}

impl OutgoingCommand {
    fn protocol_name(&self) -> &'static str {
        match self {
            OutgoingCommand::SimpleSerial(_) => "SimpleSerial",
            OutgoingCommand::PoeSerial(_) => "POESerial",
            OutgoingCommand::PoeCanable(_) => "POECanable",
        }
    }
}

/// Decoded incoming record from any protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IncomingRecord {
    SimpleSerial(SimpleSerialRecord),
    #[serde(rename = "POESerial")]
    PoeSerial(PoeSerialRecord),
    #[serde(rename = "POECanable")]
    PoeCanable(MessageData),
}

/// A codec for whichever protocol the connection was opened with.
pub enum Codec {
    SimpleSerial(SimpleSerialCodec),
    PoeSerial(PoeSerialCodec),
    PoeCanable(PoeCanableCodec),
}

impl Codec {
    /// Build the codec for `kind` using the configured limits.
    pub fn for_protocol(kind: ProtocolKind, dict: Arc<Dictionary>, settings: &AppSettings) -> Self {
        match kind {
            ProtocolKind::SimpleSerial => Codec::SimpleSerial(SimpleSerialCodec::new(
                settings.simple_serial.end_package.as_str().to_string(),
                settings.simple_serial.max_line_length,
            )),
            ProtocolKind::PoeSerial => Codec::PoeSerial(PoeSerialCodec::new(
                dict,
                settings.poe_serial.partial_timeout_ms,
            )),
            ProtocolKind::PoeCanable | ProtocolKind::PoeCanableFd => {
                Codec::PoeCanable(PoeCanableCodec::new(
                    dict,
                    kind == ProtocolKind::PoeCanableFd,
                    settings.reassembly.limits(),
                ))
            }
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            Codec::SimpleSerial(_) => ProtocolKind::SimpleSerial,
            Codec::PoeSerial(_) => ProtocolKind::PoeSerial,
            Codec::PoeCanable(c) if c.is_fd() => ProtocolKind::PoeCanableFd,
            Codec::PoeCanable(_) => ProtocolKind::PoeCanable,
        }
    }

    /// Encode a command; the command must belong to this codec's protocol.
    pub fn encode(&self, command: &OutgoingCommand) -> Result<Vec<Vec<u8>>, CodecError> {
        match (self, command) {
            (Codec::SimpleSerial(c), OutgoingCommand::SimpleSerial(cmd)) => c.encode_outgoing(cmd),
            (Codec::PoeSerial(c), OutgoingCommand::PoeSerial(cmd)) => c.encode_outgoing(cmd),
            (Codec::PoeCanable(c), OutgoingCommand::PoeCanable(cmd)) => c.encode_outgoing(cmd),
            (codec, cmd) => Err(CodecError::ProtocolMismatch {
                expected: codec.kind().as_str(),
                got: cmd.protocol_name(),
            }),
        }
    }

    pub fn decode(&mut self, raw: &[u8]) -> Vec<DecodeResult<IncomingRecord>> {
        match self {
            Codec::SimpleSerial(c) => lift(c.decode_incoming(raw), IncomingRecord::SimpleSerial),
            Codec::PoeSerial(c) => lift(c.decode_incoming(raw), IncomingRecord::PoeSerial),
            Codec::PoeCanable(c) => lift(c.decode_incoming(raw), IncomingRecord::PoeCanable),
        }
    }

    /// Emit whatever unterminated text SimpleSerial is holding. Other
    /// protocols never surface partial frames.
    pub fn flush(&mut self) -> Option<IncomingRecord> {
        match self {
            Codec::SimpleSerial(c) => c.flush().map(IncomingRecord::SimpleSerial),
            _ => None,
        }
    }

    /// Drop partial input older than the configured timeouts. Returns the
    /// number of discarded partial frames.
    pub fn evict_expired(&mut self, now_ms: u64) -> usize {
        match self {
            Codec::SimpleSerial(_) => 0,
            Codec::PoeSerial(c) => c.evict_expired(now_ms),
            Codec::PoeCanable(c) => c.evict_expired(now_ms),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Codec::SimpleSerial(c) => c.reset(),
            Codec::PoeSerial(c) => c.reset(),
            Codec::PoeCanable(c) => c.reset(),
        }
    }
}

fn lift<R>(
    results: Vec<DecodeResult<R>>,
    wrap: fn(R) -> IncomingRecord,
) -> Vec<DecodeResult<IncomingRecord>> {
    results.into_iter().map(|r| r.map(|d| d.map(wrap))).collect()
}
