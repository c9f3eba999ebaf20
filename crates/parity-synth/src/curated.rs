//! Curated composite variants for known resource kinds
//!
//! Payment, booking, subscription, invitation and session rows carry states
//! that span several columns (`status` plus a matching timestamp or amount).
//! Each curated variant names its required updates, optional updates that
//! are applied only when the column exists, and an optional auxiliary row.

use parity_model::{
    ColumnType, ColumnUpdate, DbVariant, TableProfile, VariantSetup, VariantValue,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// One curated state
struct Curated {
    label: &'static str,
    required: Vec<ColumnUpdate>,
    optional: Vec<ColumnUpdate>,
    setup: Option<VariantSetup>,
}

impl Curated {
    fn new(label: &'static str, required: Vec<ColumnUpdate>) -> Self {
        Self {
            label,
            required,
            optional: Vec::new(),
            setup: None,
        }
    }

    fn also(mut self, update: ColumnUpdate) -> Self {
        self.optional.push(update);
        self
    }

    fn with_setup(mut self, setup: VariantSetup) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Variant for `table`, or `None` when a required column is missing
    fn resolve(self, table: &TableProfile, has_table: &impl Fn(&str) -> bool) -> Option<DbVariant> {
        if !self.required.iter().all(|u| applicable(table, u)) {
            return None;
        }
        let mut updates = self.required;
        updates.extend(self.optional.into_iter().filter(|u| applicable(table, u)));
        if updates.is_empty() {
            return None;
        }
        let mut variant = DbVariant::new(self.label, updates);
        if let Some(setup) = self.setup {
            if has_table(&setup.table) {
                variant = variant.with_setup(setup);
            }
        }
        Some(variant)
    }
}

/// Column exists, its source columns exist, and literal values fit its enum
fn applicable(table: &TableProfile, update: &ColumnUpdate) -> bool {
    let Some(column) = table.column(&update.column) else {
        return false;
    };
    match &update.value {
        VariantValue::Literal {
            value: Value::String(s),
        } if column.column_type == ColumnType::Enum && !column.enum_values.is_empty() => {
            column.enum_values.contains(s)
        }
        VariantValue::CopyColumn { column: source }
        | VariantValue::ScaledColumn { column: source, .. } => table.column(source).is_some(),
        _ => true,
    }
}

fn now(column: &str) -> ColumnUpdate {
    ColumnUpdate::computed(column, VariantValue::TimestampOffset { days: 0 })
}

fn shifted(column: &str, days: i64) -> ColumnUpdate {
    ColumnUpdate::computed(column, VariantValue::TimestampOffset { days })
}

fn status(value: &str) -> ColumnUpdate {
    ColumnUpdate::literal("status", value)
}

fn payments() -> Vec<Curated> {
    let refund_row = VariantSetup {
        table: "refunds".into(),
        link_column: "payment_id".into(),
        values: BTreeMap::from([
            (
                "amount".to_string(),
                VariantValue::CopyColumn {
                    column: "amount".into(),
                },
            ),
            ("created_at".to_string(), VariantValue::TimestampOffset { days: 0 }),
        ]),
    };
    vec![
        Curated::new("paid", vec![status("paid")]).also(now("paid_at")),
        Curated::new("refunded_full", vec![status("refunded")])
            .also(ColumnUpdate::computed(
                "refunded_amount",
                VariantValue::CopyColumn {
                    column: "amount".into(),
                },
            ))
            .also(now("refunded_at"))
            .with_setup(refund_row),
        Curated::new("refunded_partial", vec![status("partially_refunded")])
            .also(ColumnUpdate::computed(
                "refunded_amount",
                VariantValue::ScaledColumn {
                    column: "amount".into(),
                    factor: 0.5,
                },
            ))
            .also(now("refunded_at")),
        Curated::new("pending", vec![status("pending")])
            .also(ColumnUpdate::computed("paid_at", VariantValue::Null)),
    ]
}

fn bookings() -> Vec<Curated> {
    vec![
        Curated::new("cancelled", vec![status("cancelled")]).also(now("cancelled_at")),
        Curated::new("completed", vec![status("completed")]),
        Curated::new("no_show", vec![status("no_show")]),
    ]
}

fn subscriptions() -> Vec<Curated> {
    vec![
        Curated::new("cancelled", vec![status("cancelled")]).also(now("cancelled_at")),
        Curated::new("past_due", vec![status("past_due")]),
        Curated::new("trialing", vec![status("trialing")]).also(shifted("trial_ends_at", 7)),
    ]
}

fn invitations() -> Vec<Curated> {
    vec![
        Curated::new("accepted", Vec::new())
            .also(status("accepted"))
            .also(now("accepted_at")),
        Curated::new("expired", vec![shifted("expires_at", -1)]),
        Curated::new("revoked", vec![status("revoked")]).also(now("revoked_at")),
    ]
}

fn sessions() -> Vec<Curated> {
    vec![
        Curated::new("cancelled", vec![status("cancelled")]).also(now("cancelled_at")),
        Curated::new("past", vec![shifted("starts_at", -2), shifted("ends_at", -1)]),
    ]
}

/// Curated variants applicable to `table`
///
/// The resource kind is recognized from the table name (`sale_payments`
/// counts as a payment table).
#[must_use]
pub fn curated_variants(table: &TableProfile, has_table: impl Fn(&str) -> bool) -> Vec<DbVariant> {
    let name = table.table.to_ascii_lowercase();
    let catalog = if name.contains("payment") {
        payments()
    } else if name.contains("booking") {
        bookings()
    } else if name.contains("subscription") {
        subscriptions()
    } else if name.contains("invitation") {
        invitations()
    } else if name.contains("session") {
        sessions()
    } else {
        Vec::new()
    };
    catalog
        .into_iter()
        .filter_map(|c| c.resolve(table, &has_table))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_model::ColumnProfile;
    use pretty_assertions::assert_eq;

    fn payments_table(status_type: ColumnProfile) -> TableProfile {
        TableProfile {
            table: "sale_payments".into(),
            columns: vec![
                status_type,
                ColumnProfile::new("amount", ColumnType::Integer),
                ColumnProfile::new("paid_at", ColumnType::Timestamp),
            ],
        }
    }

    #[test]
    fn payment_variants_use_present_columns_only() {
        let table = payments_table(ColumnProfile::new("status", ColumnType::Text));
        let variants = curated_variants(&table, |_| false);
        let labels: Vec<_> = variants.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, vec!["paid", "refunded_full", "refunded_partial", "pending"]);
        assert_eq!(variants[0].updates.len(), 2);
        // no refunded_amount column, no refunds table
        assert_eq!(variants[1].updates.len(), 1);
        assert!(variants[1].setup.is_none());
    }

    #[test]
    fn enum_columns_filter_literals() {
        let table = payments_table(
            ColumnProfile::new("status", ColumnType::Enum).with_enum(vec!["paid".into(), "pending".into()]),
        );
        let labels: Vec<_> = curated_variants(&table, |_| false)
            .into_iter()
            .map(|v| v.label)
            .collect();
        assert_eq!(labels, vec!["paid", "pending"]);
    }

    #[test]
    fn setup_requires_aux_table() {
        let table = payments_table(ColumnProfile::new("status", ColumnType::Text));
        let variants = curated_variants(&table, |t| t == "refunds");
        assert_eq!(variants[1].setup.as_ref().unwrap().link_column, "payment_id");
    }

    #[test]
    fn unknown_kind_has_no_curated_variants() {
        let table = TableProfile {
            table: "products".into(),
            columns: vec![ColumnProfile::new("status", ColumnType::Text)],
        };
        assert!(curated_variants(&table, |_| true).is_empty());
    }
}
