// src/dictionary.rs
//
// Symbol dictionary: bidirectional mapping between command names and their
// numeric wire codes. Built once at startup and shared read-only.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::protocol::CodecError;

// ============================================================================
// Tables
// ============================================================================

const HEADER_CODES: &[(&str, u32)] = &[("GET", 0), ("SET", 1), ("OK", 2), ("ERR", 3)];

const ARGUMENT_CODES: &[(&str, u32)] = &[
    // Service
    ("Restart", 0),
    ("DefaultConfig", 1),
    ("CreateBackup", 2),
    ("UpgradeDevice", 3),
    ("UpgradeByBinFile", 4),
    ("DeleteFile", 5),
    // Local network
    ("CheckWebSocket", 10),
    ("APList", 11),
    ("DeviceList", 12),
    ("FSInfo", 13),
    // Modules within a device
    ("ModuleList", 20),
    ("ModuleCapture", 21),
    ("ModuleInfo", 22),
    ("ModuleMode", 23),
    ("ModuleConfig", 24),
    ("ModuleTelemetry", 25),
    ("ModuleStream-1", 26),
    ("ModuleStream-2", 27),
    ("ModuleStream-3", 28),
    // Firmware update
    ("UpdateStart", 50),
    ("UpdateProcess", 51),
    ("UpdateCompleted", 52),
    ("UpdateError", 53),
];

static SHARED: Lazy<Arc<Dictionary>> = Lazy::new(|| Arc::new(Dictionary::standard()));

/// Which of the two independent code tables a symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolTable {
    Header,
    Argument,
}

impl fmt::Display for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolTable::Header => write!(f, "header"),
            SymbolTable::Argument => write!(f, "argument"),
        }
    }
}

/// A header/argument field as entered by the operator: either a dictionary
/// name or a raw code. Deserializes from a JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Symbol {
    Numeric(u32),
    Symbolic(String),
}

impl Symbol {
    /// Resolve to the canonical wire code. Decimal text is accepted as a code.
    pub fn resolve(&self, dict: &Dictionary, table: SymbolTable) -> Result<u32, CodecError> {
        match self {
            Symbol::Numeric(code) => Ok(*code),
            Symbol::Symbolic(name) => {
                let trimmed = name.trim();
                if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
                    return trimmed.parse::<u32>().map_err(|_| CodecError::UnknownSymbol {
                        table,
                        name: name.clone(),
                    });
                }
                dict.resolve(table, trimmed)
            }
        }
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::Symbolic(s.to_string())
    }
}

impl From<u32> for Symbol {
    fn from(code: u32) -> Self {
        Symbol::Numeric(code)
    }
}

// ============================================================================
// Dictionary
// ============================================================================

/// Immutable name/code tables. Entries keep declaration order so reverse
/// lookups and option lists are stable.
#[derive(Debug, Clone)]
pub struct Dictionary {
    headers: Vec<(String, u32)>,
    arguments: Vec<(String, u32)>,
}

impl Dictionary {
    /// The dictionary shared by the whole process.
    pub fn shared() -> Arc<Dictionary> {
        SHARED.clone()
    }

    /// The device firmware's command tables.
    pub fn standard() -> Self {
        Dictionary {
            headers: to_entries(HEADER_CODES),
            arguments: to_entries(ARGUMENT_CODES),
        }
    }

    /// Build a dictionary from custom tables, rejecting duplicate names or codes.
    pub fn from_tables(
        headers: Vec<(String, u32)>,
        arguments: Vec<(String, u32)>,
    ) -> Result<Self, CodecError> {
        check_unique(SymbolTable::Header, &headers)?;
        check_unique(SymbolTable::Argument, &arguments)?;
        Ok(Dictionary { headers, arguments })
    }

    fn table(&self, table: SymbolTable) -> &[(String, u32)] {
        match table {
            SymbolTable::Header => &self.headers,
            SymbolTable::Argument => &self.arguments,
        }
    }

    /// Name to code. Fails with `UnknownSymbol` when absent.
    pub fn resolve(&self, table: SymbolTable, name: &str) -> Result<u32, CodecError> {
        self.table(table)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, code)| *code)
            .ok_or_else(|| CodecError::UnknownSymbol {
                table,
                name: name.to_string(),
            })
    }

    /// Code to name, if the code has one.
    pub fn reverse_lookup(&self, table: SymbolTable, code: u32) -> Option<&str> {
        self.table(table)
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(n, _)| n.as_str())
    }

    /// Code to display text: the name when known, otherwise the decimal code.
    pub fn display_name(&self, table: SymbolTable, code: u32) -> String {
        self.reverse_lookup(table, code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string())
    }

    /// All entries of a table in declaration order (for option lists).
    pub fn entries(&self, table: SymbolTable) -> impl Iterator<Item = (&str, u32)> {
        self.table(table).iter().map(|(n, c)| (n.as_str(), *c))
    }
}

fn to_entries(raw: &[(&str, u32)]) -> Vec<(String, u32)> {
    raw.iter().map(|(n, c)| (n.to_string(), *c)).collect()
}

fn check_unique(table: SymbolTable, entries: &[(String, u32)]) -> Result<(), CodecError> {
    for (i, (name, code)) in entries.iter().enumerate() {
        for (other_name, other_code) in &entries[i + 1..] {
            if name == other_name {
                return Err(CodecError::InvalidConfig(format!(
                    "duplicate {} name '{}'",
                    table, name
                )));
            }
            if code == other_code {
                return Err(CodecError::InvalidConfig(format!(
                    "duplicate {} code {} ('{}' and '{}')",
                    table, code, name, other_name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_names() {
        let dict = Dictionary::standard();
        assert_eq!(dict.resolve(SymbolTable::Header, "SET").unwrap(), 1);
        assert_eq!(dict.resolve(SymbolTable::Header, "ERR").unwrap(), 3);
        assert_eq!(dict.resolve(SymbolTable::Argument, "ModuleMode").unwrap(), 23);
        assert_eq!(dict.resolve(SymbolTable::Argument, "UpdateError").unwrap(), 53);
    }

    #[test]
    fn test_resolve_unknown_name() {
        let dict = Dictionary::standard();
        let err = dict.resolve(SymbolTable::Argument, "SelfDestruct").unwrap_err();
        assert_eq!(
            err,
            CodecError::UnknownSymbol {
                table: SymbolTable::Argument,
                name: "SelfDestruct".to_string()
            }
        );
        // Tables are independent
        assert!(dict.resolve(SymbolTable::Header, "ModuleMode").is_err());
    }

    #[test]
    fn test_round_trip_every_entry() {
        let dict = Dictionary::standard();
        for table in [SymbolTable::Header, SymbolTable::Argument] {
            let names: Vec<(String, u32)> =
                dict.entries(table).map(|(n, c)| (n.to_string(), c)).collect();
            for (name, code) in names {
                let resolved = dict.resolve(table, &name).unwrap();
                assert_eq!(resolved, code);
                assert_eq!(dict.reverse_lookup(table, resolved), Some(name.as_str()));
            }
        }
    }

    #[test]
    fn test_reverse_lookup_gap() {
        let dict = Dictionary::standard();
        assert_eq!(dict.reverse_lookup(SymbolTable::Argument, 7), None);
        assert_eq!(dict.display_name(SymbolTable::Argument, 7), "7");
        assert_eq!(dict.display_name(SymbolTable::Argument, 26), "ModuleStream-1");
    }

    #[test]
    fn test_symbol_resolution() {
        let dict = Dictionary::standard();
        assert_eq!(Symbol::from("SET").resolve(&dict, SymbolTable::Header).unwrap(), 1);
        assert_eq!(Symbol::from(23).resolve(&dict, SymbolTable::Argument).unwrap(), 23);
        assert_eq!(Symbol::from("23").resolve(&dict, SymbolTable::Argument).unwrap(), 23);
        assert!(Symbol::from("Nope").resolve(&dict, SymbolTable::Argument).is_err());
    }

    #[test]
    fn test_symbol_deserializes_from_name_or_code() {
        let s: Symbol = serde_json::from_str("\"ModuleInfo\"").unwrap();
        assert_eq!(s, Symbol::Symbolic("ModuleInfo".to_string()));
        let s: Symbol = serde_json::from_str("22").unwrap();
        assert_eq!(s, Symbol::Numeric(22));
    }

    #[test]
    fn test_from_tables_rejects_duplicates() {
        let dup_code = Dictionary::from_tables(
            vec![("A".to_string(), 0), ("B".to_string(), 0)],
            vec![],
        );
        assert!(dup_code.is_err());

        let dup_name = Dictionary::from_tables(
            vec![],
            vec![("X".to_string(), 1), ("X".to_string(), 2)],
        );
        assert!(dup_name.is_err());
    }

    #[test]
    fn test_shared_is_single_instance() {
        let a = Dictionary::shared();
        let b = Dictionary::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
