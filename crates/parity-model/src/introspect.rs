//! Database introspection profiles
//!
//! Built by the harness from live catalog queries, consumed by the state
//! variant synthesizer. Plain data so synthesis stays testable without a
//! database.

use serde::{Deserialize, Serialize};

/// Coarse column type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    /// User-defined enum; values live in [`ColumnProfile::enum_values`]
    Enum,
    Timestamp,
    Text,
    Integer,
    Numeric,
    Uuid,
    Json,
    Other(String),
}

impl ColumnType {
    /// Map a Postgres `data_type` / `udt_name` pair
    #[must_use]
    pub fn from_pg(data_type: &str, udt_name: &str) -> Self {
        match data_type {
            "boolean" => Self::Boolean,
            "USER-DEFINED" => Self::Enum,
            "timestamp with time zone" | "timestamp without time zone" | "date" => Self::Timestamp,
            "text" | "character varying" | "character" => Self::Text,
            "integer" | "bigint" | "smallint" => Self::Integer,
            "numeric" | "real" | "double precision" => Self::Numeric,
            "uuid" => Self::Uuid,
            "json" | "jsonb" => Self::Json,
            _ => Self::Other(udt_name.to_string()),
        }
    }
}

/// Foreign key from a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyProfile {
    pub ref_table: String,
    pub ref_column: String,
    /// Referenced values when the target table is small enough to enumerate
    pub values: Option<Vec<String>>,
}

/// One column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub enum_values: Vec<String>,
    pub foreign_key: Option<ForeignKeyProfile>,
}

impl ColumnProfile {
    /// Column of a plain type
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            enum_values: Vec::new(),
            foreign_key: None,
        }
    }

    /// With enum values (also sets the type to `Enum`)
    #[must_use]
    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.column_type = ColumnType::Enum;
        self.enum_values = values;
        self
    }

    /// With foreign key
    #[must_use]
    pub fn with_foreign_key(mut self, fk: ForeignKeyProfile) -> Self {
        self.foreign_key = Some(fk);
        self
    }
}

/// One table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProfile {
    pub table: String,
    pub columns: Vec<ColumnProfile>,
}

impl TableProfile {
    /// Column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// True when every named column exists
    #[must_use]
    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.column(n).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pg_types_map() {
        assert_eq!(ColumnType::from_pg("boolean", "bool"), ColumnType::Boolean);
        assert_eq!(ColumnType::from_pg("USER-DEFINED", "payment_status"), ColumnType::Enum);
        assert_eq!(
            ColumnType::from_pg("timestamp with time zone", "timestamptz"),
            ColumnType::Timestamp
        );
        assert_eq!(ColumnType::from_pg("ARRAY", "_text"), ColumnType::Other("_text".into()));
    }

    #[test]
    fn has_columns() {
        let table = TableProfile {
            table: "payments".into(),
            columns: vec![
                ColumnProfile::new("id", ColumnType::Uuid),
                ColumnProfile::new("status", ColumnType::Text),
            ],
        };
        assert!(table.has_columns(&["id", "status"]));
        assert!(!table.has_columns(&["paid_at"]));
    }
}
