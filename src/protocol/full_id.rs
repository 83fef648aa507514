// src/protocol/full_id.rs
//
// POECanable extended identifier codec.
//
// 29-bit layout (shared with device firmware, do not change on one side):
//
//   bit  28      isFullPacket   (1 bit)
//   bits 26..27  header_code    (2 bits)
//   bits 16..25  argument_code  (10 bits)
//   bits  8..15  target_id      (8 bits)
//   bits  0..7   return_id      (8 bits)
//
// The session ("main") id is bits 16..27, i.e. header + argument.

use serde::{Deserialize, Serialize};

use super::CodecError;

const FULL_PACKET_SHIFT: u32 = 28;
const HEADER_SHIFT: u32 = 26;
const ARGUMENT_SHIFT: u32 = 16;
const TARGET_SHIFT: u32 = 8;
const RETURN_SHIFT: u32 = 0;

pub const FULL_PACKET_BITS: u32 = 1;
pub const HEADER_BITS: u32 = 2;
pub const ARGUMENT_BITS: u32 = 10;
pub const TARGET_BITS: u32 = 8;
pub const RETURN_BITS: u32 = 8;

/// Mask of a valid 29-bit extended CAN identifier.
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;
/// Mask of an 11-bit standard CAN identifier.
pub const STANDARD_ID_MASK: u32 = 0x7FF;

const fn mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

/// Decoded POECanable identifier fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FullId {
    /// 1 = self-contained or final fragment, 0 = continuation follows.
    #[serde(rename = "isFullPacket")]
    pub is_full_packet: u32,
    pub header_code: u32,
    pub argument_code: u32,
    pub target_id: u32,
    pub return_id: u32,
}

impl FullId {
    /// Pack the fields into an identifier word.
    ///
    /// Fails with `FieldOverflow` when a field exceeds its width; nothing is
    /// truncated.
    pub fn encode(&self) -> Result<u32, CodecError> {
        check_width("isFullPacket", self.is_full_packet, FULL_PACKET_BITS)?;
        check_width("header_code", self.header_code, HEADER_BITS)?;
        check_width("argument_code", self.argument_code, ARGUMENT_BITS)?;
        check_width("target_id", self.target_id, TARGET_BITS)?;
        check_width("return_id", self.return_id, RETURN_BITS)?;

        Ok((self.is_full_packet << FULL_PACKET_SHIFT)
            | (self.header_code << HEADER_SHIFT)
            | (self.argument_code << ARGUMENT_SHIFT)
            | (self.target_id << TARGET_SHIFT)
            | (self.return_id << RETURN_SHIFT))
    }

    /// Unpack an identifier word. Bits above 28 are ignored.
    pub fn decode(id: u32) -> FullId {
        FullId {
            is_full_packet: (id >> FULL_PACKET_SHIFT) & mask(FULL_PACKET_BITS),
            header_code: (id >> HEADER_SHIFT) & mask(HEADER_BITS),
            argument_code: (id >> ARGUMENT_SHIFT) & mask(ARGUMENT_BITS),
            target_id: (id >> TARGET_SHIFT) & mask(TARGET_BITS),
            return_id: (id >> RETURN_SHIFT) & mask(RETURN_BITS),
        }
    }

    pub fn is_full(&self) -> bool {
        self.is_full_packet == 1
    }

    /// Same routing fields with the fragment flag set or cleared.
    pub fn with_full_packet(self, full: bool) -> FullId {
        FullId {
            is_full_packet: full as u32,
            ..self
        }
    }
}

/// Session id of an identifier: header + argument bits for extended frames,
/// the raw 11-bit id for standard frames.
pub fn main_id(can_id: u32, is_extended: bool) -> u32 {
    if is_extended {
        (can_id >> ARGUMENT_SHIFT) & mask(HEADER_BITS + ARGUMENT_BITS)
    } else {
        can_id & STANDARD_ID_MASK
    }
}

fn check_width(field: &'static str, value: u32, width: u32) -> Result<(), CodecError> {
    if value > mask(width) {
        return Err(CodecError::FieldOverflow {
            field,
            value,
            width,
        });
    }
    Ok(())
}
