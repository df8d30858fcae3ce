//! Column descriptors and SQL type codes
//!
//! A `ColumnDescriptor` is produced by a column catalog (or by describing a
//! statement) and is treated as an immutable snapshot for the duration of a
//! copy. Two descriptors identify the same column when their quote-stripped
//! names are equal ignoring case.

use serde::{Deserialize, Serialize};

/// Store-independent SQL type code.
///
/// This is deliberately coarse: it only needs to be precise enough to coerce
/// textual values into the right `Value` variant and to stage a new table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Char,
    Varchar,
    Text,
    Binary,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    #[default]
    Other,
}

impl SqlType {
    /// Map a declared type name (`VARCHAR(20)`, `bigint`, `DOUBLE PRECISION`)
    /// onto a type code.
    pub fn from_type_name(type_name: &str) -> Self {
        let upper = type_name.trim().to_uppercase();
        let base = upper
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .trim_end_matches(" UNSIGNED");

        match base {
            "BOOLEAN" | "BOOL" | "BIT" => SqlType::Boolean,
            "TINYINT" | "SMALLINT" | "INT2" => SqlType::SmallInt,
            "INT" | "INTEGER" | "MEDIUMINT" | "INT4" => SqlType::Integer,
            "BIGINT" | "INT8" => SqlType::BigInt,
            "REAL" | "FLOAT" | "FLOAT4" => SqlType::Real,
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => SqlType::Double,
            "DECIMAL" | "NUMERIC" | "MONEY" => SqlType::Decimal,
            "CHAR" | "CHARACTER" | "NCHAR" => SqlType::Char,
            "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" | "VARCHAR2" => SqlType::Varchar,
            "TEXT" | "CLOB" | "STRING" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => SqlType::Text,
            "BLOB" | "BINARY" | "VARBINARY" | "BYTEA" | "LONGBLOB" => SqlType::Binary,
            "DATE" => SqlType::Date,
            "TIME" => SqlType::Time,
            "DATETIME" | "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => SqlType::Timestamp,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => SqlType::TimestampTz,
            "UUID" | "UNIQUEIDENTIFIER" => SqlType::Uuid,
            "JSON" | "JSONB" => SqlType::Json,
            _ => {
                // SQLite-style affinity rules for free-form declarations
                if base.contains("INT") {
                    SqlType::BigInt
                } else if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
                    SqlType::Text
                } else if base.contains("BLOB") {
                    SqlType::Binary
                } else if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") {
                    SqlType::Double
                } else {
                    SqlType::Other
                }
            }
        }
    }

    /// Canonical type name used when a type must be spelled out and no
    /// declared name is available.
    pub fn default_type_name(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE",
            SqlType::Decimal => "DECIMAL",
            SqlType::Char => "CHAR",
            SqlType::Varchar => "VARCHAR",
            SqlType::Text => "TEXT",
            SqlType::Binary => "BLOB",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMPTZ",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
            SqlType::Other => "TEXT",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Real
                | SqlType::Double
                | SqlType::Decimal
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self, SqlType::Char | SqlType::Varchar | SqlType::Text)
    }
}

/// Metadata for one column of a table or a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as reported by the store
    pub name: String,
    /// Type code
    pub sql_type: SqlType,
    /// Declared type name (store-specific)
    pub type_name: String,
    /// Character length or numeric precision
    #[serde(default)]
    pub size: Option<u32>,
    /// Numeric scale
    #[serde(default)]
    pub scale: Option<u32>,
    /// Whether the column accepts NULL
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Whether the column is part of the primary key
    #[serde(default)]
    pub is_primary_key: bool,
    /// Position in the table or select list (0-based)
    #[serde(default)]
    pub ordinal: usize,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDescriptor {
    /// Create a nullable, non-key column, deriving the type code and any
    /// size/scale from the declared type name.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let (size, scale) = parse_size_scale(&type_name);
        Self {
            name: name.into(),
            sql_type: SqlType::from_type_name(&type_name),
            type_name,
            size,
            scale,
            nullable: true,
            is_primary_key: false,
            ordinal: 0,
        }
    }

    pub fn with_primary_key(mut self, is_primary_key: bool) -> Self {
        self.is_primary_key = is_primary_key;
        if is_primary_key {
            self.nullable = false;
        }
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Identity key: the name with surrounding quotes removed, lowercased.
    pub fn key(&self) -> String {
        normalize_identifier(&self.name)
    }

    /// Whether `other` names the same column.
    pub fn same_name(&self, other: &ColumnDescriptor) -> bool {
        self.key() == other.key()
    }

    /// Copy type code, declared type, size and scale from `other`.
    pub fn adopt_type_of(&mut self, other: &ColumnDescriptor) {
        self.sql_type = other.sql_type;
        self.type_name = other.type_name.clone();
        self.size = other.size;
        self.scale = other.scale;
    }
}

/// Strip one level of identifier quoting (`"x"`, `` `x` ``, `[x]`) and
/// lowercase the result.
pub fn normalize_identifier(name: &str) -> String {
    let trimmed = name.trim();
    let unquoted = if trimmed.len() >= 2 {
        let first = trimmed.chars().next();
        let last = trimmed.chars().last();
        match (first, last) {
            (Some('"'), Some('"')) | (Some('`'), Some('`')) | (Some('['), Some(']')) => {
                &trimmed[1..trimmed.len() - 1]
            }
            _ => trimmed,
        }
    } else {
        trimmed
    };
    unquoted.to_lowercase()
}

fn parse_size_scale(type_name: &str) -> (Option<u32>, Option<u32>) {
    let Some(start) = type_name.find('(') else {
        return (None, None);
    };
    let Some(end) = type_name[start..].find(')') else {
        return (None, None);
    };
    let inner = &type_name[start + 1..start + end];
    let mut parts = inner.split(',').map(|s| s.trim());
    let size = parts.next().and_then(|p| p.parse().ok());
    let scale = parts.next().and_then(|s| s.parse().ok());
    (size, scale)
}
