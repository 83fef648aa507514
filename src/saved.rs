// src/saved.rs
//
// Saved command records. One entry can hold a variant per protocol; the
// operator picks a name and sends whichever variant matches the open
// connection. Storage is left to the caller; this module only owns the
// record shapes and their conversion to outgoing commands.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dictionary::Symbol;
use crate::protocol::{
    OutgoingCommand, PoeCanableCommand, PoeSerialCommand, ProtocolKind, SimpleSerialCommand,
};
use crate::settings::EndPackage;

#[derive(Debug, Error)]
pub enum SavedCommandError {
    #[error("failed to parse saved commands: {0}")]
    Json(#[from] serde_json::Error),

    #[error("saved command '{name}' has no {protocol} variant")]
    NoVariant {
        name: String,
        protocol: ProtocolKind,
    },
}

fn shown() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSimpleSerial {
    pub data: String,
    /// Terminator name: LF, CR, CRLF or None. Empty uses the connection default.
    #[serde(default)]
    pub end_package: String,
    #[serde(default = "shown")]
    pub is_shown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPoeSerial {
    pub header: String,
    pub argument: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "shown")]
    pub is_shown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPoeCanable {
    pub header: String,
    pub argument: String,
    #[serde(rename = "targetID")]
    pub target_id: String,
    #[serde(rename = "returnID")]
    pub return_id: String,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "isShown", default = "shown")]
    pub is_shown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCommand {
    pub name: String,
    #[serde(rename = "SimpleSerial", default, skip_serializing_if = "Option::is_none")]
    pub simple_serial: Option<SavedSimpleSerial>,
    #[serde(rename = "POESerial", default, skip_serializing_if = "Option::is_none")]
    pub poe_serial: Option<SavedPoeSerial>,
    #[serde(rename = "POECanable", default, skip_serializing_if = "Option::is_none")]
    pub poe_canable: Option<SavedPoeCanable>,
}

impl SavedCommand {
    pub fn new(name: &str) -> Self {
        SavedCommand {
            name: name.to_string(),
            simple_serial: None,
            poe_serial: None,
            poe_canable: None,
        }
    }

    /// Whether this entry should be listed for a connection using `protocol`.
    pub fn is_shown_for(&self, protocol: ProtocolKind) -> bool {
        match protocol {
            ProtocolKind::SimpleSerial => self.simple_serial.as_ref().is_some_and(|s| s.is_shown),
            ProtocolKind::PoeSerial => self.poe_serial.as_ref().is_some_and(|s| s.is_shown),
            ProtocolKind::PoeCanable | ProtocolKind::PoeCanableFd => {
                self.poe_canable.as_ref().is_some_and(|s| s.is_shown)
            }
        }
    }

    /// Build the command to send over a connection using `protocol`.
    pub fn to_outgoing(&self, protocol: ProtocolKind) -> Result<OutgoingCommand, SavedCommandError> {
        let missing = || SavedCommandError::NoVariant {
            name: self.name.clone(),
            protocol,
        };
        match protocol {
            ProtocolKind::SimpleSerial => {
                let s = self.simple_serial.as_ref().ok_or_else(missing)?;
                Ok(OutgoingCommand::SimpleSerial(SimpleSerialCommand {
                    data: s.data.clone(),
                    end_package: end_package(&s.end_package),
                }))
            }
            ProtocolKind::PoeSerial => {
                let s = self.poe_serial.as_ref().ok_or_else(missing)?;
                Ok(OutgoingCommand::PoeSerial(PoeSerialCommand::new(
                    s.header.as_str(),
                    s.argument.as_str(),
                    &s.value,
                )))
            }
            ProtocolKind::PoeCanable | ProtocolKind::PoeCanableFd => {
                let s = self.poe_canable.as_ref().ok_or_else(missing)?;
                Ok(OutgoingCommand::PoeCanable(PoeCanableCommand {
                    header: Symbol::from(s.header.as_str()),
                    argument: Symbol::from(s.argument.as_str()),
                    target_id: Symbol::from(s.target_id.as_str()),
                    return_id: Symbol::from(s.return_id.as_str()),
                    length: None,
                    data: Some(s.data.clone()),
                    convert_to_base64: None,
                }))
            }
        }
    }
}

/// Named terminators map to their bytes; anything else is sent literally.
fn end_package(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    match EndPackage::from_name(name) {
        Ok(end) => Some(end.as_str().to_string()),
        Err(_) => Some(name.to_string()),
    }
}

pub fn parse_saved_commands(json: &str) -> Result<Vec<SavedCommand>, SavedCommandError> {
    Ok(serde_json::from_str(json)?)
}

pub fn saved_commands_to_json(commands: &[SavedCommand]) -> Result<String, SavedCommandError> {
    Ok(serde_json::to_string_pretty(commands)?)
}
