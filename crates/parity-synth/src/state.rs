//! State variants from live column metadata
//!
//! Generated variants push one state-named column of the primary resource
//! row to another value: a boolean toggle, each enum value, each value of a
//! small-cardinality foreign key, or a timestamp in the past/future. Columns
//! whose name carries no state word get no generated variant of any kind. Curated
//! composite variants for known resource kinds come first (see
//! [`crate::curated`]).

use crate::curated;
use crate::rules;
use indexmap::IndexMap;
use parity_model::{ColumnProfile, ColumnType, ColumnUpdate, DbVariant, TableProfile, VariantValue};

/// Upper bound on enum values turned into variants per column
pub const MAX_ENUM_VALUES: usize = 8;

/// Upper bound on foreign-key values turned into variants per column
pub const MAX_FK_VALUES: usize = 5;

/// Days used for past/future timestamp variants
pub const TIMESTAMP_SHIFT_DAYS: i64 = 30;

/// All variants for a table: curated first, then generated
///
/// `has_table` reports whether an auxiliary table exists; curated variants
/// that need a missing one are left out.
#[must_use]
pub fn variants_for(table: &TableProfile, has_table: impl Fn(&str) -> bool) -> Vec<DbVariant> {
    let mut by_label: IndexMap<String, DbVariant> = IndexMap::new();
    for variant in curated::curated_variants(table, has_table)
        .into_iter()
        .chain(generated_variants(table))
    {
        by_label.entry(variant.label.clone()).or_insert(variant);
    }
    by_label.into_values().collect()
}

/// Single-column variants derived from the table's columns
#[must_use]
pub fn generated_variants(table: &TableProfile) -> Vec<DbVariant> {
    table
        .columns
        .iter()
        .filter(|c| !rules::PROTECTED_COLUMNS.contains(&c.name.as_str()))
        .flat_map(column_variants)
        .collect()
}

fn column_variants(column: &ColumnProfile) -> Vec<DbVariant> {
    let name = column.name.as_str();
    if !rules::is_state_name(name) {
        return Vec::new();
    }

    if let Some(fk) = &column.foreign_key {
        return match &fk.values {
            Some(values) if values.len() <= MAX_FK_VALUES => values
                .iter()
                .map(|v| {
                    DbVariant::new(
                        format!("{name}.{v}"),
                        vec![ColumnUpdate::literal(name, v.as_str())],
                    )
                })
                .collect(),
            _ => Vec::new(),
        };
    }

    match &column.column_type {
        ColumnType::Enum => column
            .enum_values
            .iter()
            .take(MAX_ENUM_VALUES)
            .map(|v| {
                DbVariant::new(
                    format!("{name}.{v}"),
                    vec![ColumnUpdate::literal(name, v.as_str())],
                )
            })
            .collect(),
        ColumnType::Boolean => vec![DbVariant::new(
            format!("{name}.toggled"),
            vec![ColumnUpdate::computed(name, VariantValue::Toggle)],
        )],
        ColumnType::Timestamp => [("past", -TIMESTAMP_SHIFT_DAYS), ("future", TIMESTAMP_SHIFT_DAYS)]
            .into_iter()
            .map(|(when, days)| {
                DbVariant::new(
                    format!("{name}.{when}"),
                    vec![ColumnUpdate::computed(name, VariantValue::TimestampOffset { days })],
                )
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_model::ForeignKeyProfile;
    use pretty_assertions::assert_eq;

    fn labels(variants: &[DbVariant]) -> Vec<&str> {
        variants.iter().map(|v| v.label.as_str()).collect()
    }

    fn sessions() -> TableProfile {
        TableProfile {
            table: "sessions".into(),
            columns: vec![
                ColumnProfile::new("id", ColumnType::Uuid),
                ColumnProfile::new("is_cancelled", ColumnType::Boolean),
                ColumnProfile::new("is_public", ColumnType::Boolean),
                ColumnProfile::new("status", ColumnType::Enum)
                    .with_enum(vec!["scheduled".into(), "done".into()]),
                ColumnProfile::new("ends_at", ColumnType::Timestamp),
                ColumnProfile::new("created_at", ColumnType::Timestamp),
                ColumnProfile::new("location_id", ColumnType::Uuid).with_foreign_key(ForeignKeyProfile {
                    ref_table: "locations".into(),
                    ref_column: "id".into(),
                    values: Some(vec!["loc-1".into()]),
                }),
                ColumnProfile::new("coach_id", ColumnType::Uuid).with_foreign_key(ForeignKeyProfile {
                    ref_table: "users".into(),
                    ref_column: "id".into(),
                    values: None,
                }),
            ],
        }
    }

    #[test]
    fn generates_from_column_kinds() {
        let variants = generated_variants(&sessions());
        assert_eq!(
            labels(&variants),
            vec![
                "is_cancelled.toggled",
                "status.scheduled",
                "status.done",
                "ends_at.past",
                "ends_at.future",
            ]
        );
    }

    #[test]
    fn only_state_named_columns_get_variants() {
        let table = TableProfile {
            table: "memberships".into(),
            columns: vec![
                ColumnProfile::new("phase", ColumnType::Enum).with_enum(vec!["trial".into(), "active".into()]),
                ColumnProfile::new("type", ColumnType::Enum).with_enum(vec!["monthly".into()]),
                ColumnProfile::new("tier", ColumnType::Enum).with_enum(vec!["gold".into()]),
                ColumnProfile::new("location_id", ColumnType::Uuid).with_foreign_key(ForeignKeyProfile {
                    ref_table: "locations".into(),
                    ref_column: "id".into(),
                    values: Some(vec!["loc-1".into()]),
                }),
                ColumnProfile::new("status_id", ColumnType::Uuid).with_foreign_key(ForeignKeyProfile {
                    ref_table: "membership_statuses".into(),
                    ref_column: "id".into(),
                    values: Some(vec!["st-1".into(), "st-2".into()]),
                }),
                ColumnProfile::new("is_public", ColumnType::Boolean),
            ],
        };
        assert_eq!(
            labels(&generated_variants(&table)),
            vec!["phase.trial", "phase.active", "type.monthly", "status_id.st-1", "status_id.st-2"]
        );
    }

    #[test]
    fn protected_columns_are_skipped() {
        let variants = generated_variants(&sessions());
        assert!(variants.iter().all(|v| !v.label.starts_with("created_at")));
    }

    #[test]
    fn enum_values_are_capped() {
        let many: Vec<String> = (0..20).map(|i| format!("v{i}")).collect();
        let table = TableProfile {
            table: "things".into(),
            columns: vec![ColumnProfile::new("type", ColumnType::Enum).with_enum(many)],
        };
        assert_eq!(generated_variants(&table).len(), MAX_ENUM_VALUES);
    }

    #[test]
    fn curated_come_first_and_labels_are_unique() {
        let table = TableProfile {
            table: "payments".into(),
            columns: vec![
                ColumnProfile::new("status", ColumnType::Text),
                ColumnProfile::new("amount", ColumnType::Integer),
                ColumnProfile::new("refunded_amount", ColumnType::Integer),
                ColumnProfile::new("paid_at", ColumnType::Timestamp),
            ],
        };
        let variants = variants_for(&table, |_| false);
        let l = labels(&variants);
        assert_eq!(l[0], "paid");
        let mut sorted = l.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), l.len());
        assert!(l.contains(&"paid_at.past"));
    }
}
