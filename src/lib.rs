// src/lib.rs
//
// POE Terminal core: device protocol codecs (SimpleSerial, POESerial,
// POECanable over slcan), the symbol dictionary, display formatters and the
// frame table model. The serial port itself and the UI live outside this
// crate; `session` connects the two through the `Transport` trait.

pub mod checksums;
pub mod dictionary;
pub mod logging;
pub mod protocol;
pub mod saved;
pub mod session;
pub mod settings;
pub mod table;

pub use dictionary::{Dictionary, Symbol, SymbolTable};
pub use protocol::{Codec, CodecError, IncomingRecord, OutgoingCommand, ProtocolKind};
pub use settings::AppSettings;
pub use table::{FrameTable, LogView, RenderedCell};
