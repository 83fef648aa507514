// src/protocol/error.rs
//
// Typed errors for the codec layer. Every variant is recoverable at the call
// site: a failed encode sends nothing, a malformed frame is dropped and
// reported, the stream keeps going.

use thiserror::Error;

use crate::dictionary::SymbolTable;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Symbolic name not present in the dictionary table.
    #[error("unknown {table} symbol: '{name}'")]
    UnknownSymbol { table: SymbolTable, name: String },

    /// Identifier field value does not fit its bit width.
    #[error("{field} value {value} exceeds {width}-bit field (max {})", field_max(.width))]
    FieldOverflow {
        field: &'static str,
        value: u32,
        width: u32,
    },

    /// Incoming bytes do not match the expected structure.
    #[error("{protocol}: malformed frame: {reason}")]
    MalformedFrame {
        protocol: &'static str,
        reason: String,
    },

    /// Outgoing record lacks a field the protocol requires.
    #[error("{protocol}: missing required field '{field}'")]
    MissingField {
        protocol: &'static str,
        field: &'static str,
    },

    /// Outgoing field is present but unusable.
    #[error("{protocol}: invalid field '{field}': {reason}")]
    InvalidField {
        protocol: &'static str,
        field: &'static str,
        reason: String,
    },

    /// A command for one protocol was handed to another protocol's codec.
    #[error("{got} command cannot be sent over {expected}")]
    ProtocolMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// Codec or adapter configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn field_max(width: &u32) -> u64 {
    (1u64 << *width) - 1
}

impl CodecError {
    pub fn malformed(protocol: &'static str, reason: impl Into<String>) -> Self {
        CodecError::MalformedFrame {
            protocol,
            reason: reason.into(),
        }
    }
}

impl From<CodecError> for String {
    fn from(e: CodecError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = CodecError::UnknownSymbol {
            table: SymbolTable::Argument,
            name: "Reboot".to_string(),
        };
        assert_eq!(e.to_string(), "unknown argument symbol: 'Reboot'");

        let e = CodecError::FieldOverflow {
            field: "header_code",
            value: 4,
            width: 2,
        };
        assert_eq!(e.to_string(), "header_code value 4 exceeds 2-bit field (max 3)");

        let e = CodecError::malformed("slcan", "empty frame");
        assert_eq!(e.to_string(), "slcan: malformed frame: empty frame");
    }
}
