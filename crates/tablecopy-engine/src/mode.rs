//! Write modes and key-column derivation

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use tablecopy_core::{ColumnDescriptor, normalize_identifier};

use crate::error::CopyError;
use crate::mapping::MappingDefinition;

/// How each source row is written to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CopyMode {
    /// `insert`
    #[default]
    InsertOnly,
    /// `update`
    UpdateOnly,
    /// `insert,update`: insert, update when the key already exists
    InsertThenUpdate,
    /// `update,insert`: update, insert when no row matched
    UpdateThenInsert,
}

impl CopyMode {
    /// Parse one of the four mode literals. Surrounding whitespace and
    /// letter case are ignored; nothing else is accepted.
    pub fn parse(mode: &str) -> Result<Self, CopyError> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(CopyMode::InsertOnly),
            "update" => Ok(CopyMode::UpdateOnly),
            "insert,update" => Ok(CopyMode::InsertThenUpdate),
            "update,insert" => Ok(CopyMode::UpdateThenInsert),
            _ => Err(CopyError::InvalidMode(mode.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CopyMode::InsertOnly => "insert",
            CopyMode::UpdateOnly => "update",
            CopyMode::InsertThenUpdate => "insert,update",
            CopyMode::UpdateThenInsert => "update,insert",
        }
    }

    pub fn involves_update(&self) -> bool {
        !matches!(self, CopyMode::InsertOnly)
    }

    pub fn involves_insert(&self) -> bool {
        !matches!(self, CopyMode::UpdateOnly)
    }

    /// Whether a row may need a second statement after the first one fails
    pub fn is_combined(&self) -> bool {
        matches!(self, CopyMode::InsertThenUpdate | CopyMode::UpdateThenInsert)
    }
}

impl FromStr for CopyMode {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CopyMode::parse(s)
    }
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where key columns come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeySelection {
    /// Mapped target columns flagged as primary key
    #[default]
    PrimaryKey,
    /// Explicit target column names, replacing the primary-key flags
    Columns(Vec<String>),
}

impl KeySelection {
    /// An empty override list means "use the primary key".
    pub fn from_override(columns: Vec<String>) -> Self {
        if columns.is_empty() {
            KeySelection::PrimaryKey
        } else {
            KeySelection::Columns(columns)
        }
    }
}

/// Derive the key columns for `mode` from the mapped target columns and
/// validate them. Runs before any row moves.
pub fn derive_keys(
    mode: CopyMode,
    mapping: &MappingDefinition,
    selection: &KeySelection,
) -> Result<Vec<ColumnDescriptor>, CopyError> {
    let mut keys: Vec<ColumnDescriptor> = match selection {
        KeySelection::PrimaryKey => mapping
            .target_columns
            .iter()
            .filter(|c| c.is_primary_key)
            .cloned()
            .collect(),
        KeySelection::Columns(names) => names
            .iter()
            .map(|name| {
                let key = normalize_identifier(name);
                mapping
                    .target_columns
                    .iter()
                    .find(|c| c.key() == key)
                    .cloned()
                    .ok_or_else(|| {
                        CopyError::Configuration(format!(
                            "Key column '{}' is not a mapped target column",
                            name
                        ))
                    })
            })
            .collect::<Result<_, _>>()?,
    };
    // Names differing only in case resolve to the same column
    let mut seen = HashSet::new();
    keys.retain(|k| seen.insert(k.key()));

    if mode.involves_update() {
        if keys.is_empty() {
            return Err(CopyError::MissingKeyColumns(mode.to_string()));
        }
        if keys.len() >= mapping.len() {
            return Err(CopyError::NoUpdatableColumns(mode.to_string()));
        }
    }

    Ok(keys)
}
