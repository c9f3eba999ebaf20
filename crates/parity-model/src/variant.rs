//! Reversible resource-state variants
//!
//! A [`DbVariant`] describes how to push the primary resource row into a
//! specific state. Planning it against the current row yields a
//! [`VariantPatch`] that carries both the new column values and the originals
//! they replace, so every application has an exact restore.

use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How a column's new value is computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantValue {
    /// Fixed value
    Literal { value: Value },
    /// SQL NULL
    Null,
    /// Negate the current boolean
    Toggle,
    /// Timestamp relative to the run clock
    TimestampOffset { days: i64 },
    /// Copy another column of the same row
    CopyColumn { column: String },
    /// Numeric column scaled by a factor
    ScaledColumn { column: String, factor: f64 },
}

/// One column assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnUpdate {
    pub column: String,
    pub value: VariantValue,
}

impl ColumnUpdate {
    /// Literal assignment
    #[must_use]
    pub fn literal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: VariantValue::Literal {
                value: value.into(),
            },
        }
    }

    /// Computed assignment
    #[must_use]
    pub fn computed(column: impl Into<String>, value: VariantValue) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// Auxiliary row inserted while the variant is active, deleted on restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSetup {
    /// Table receiving the auxiliary row
    pub table: String,
    /// Column that references the primary row's id
    pub link_column: String,
    /// Remaining column values, computed against the primary row
    pub values: BTreeMap<String, VariantValue>,
}

/// Named state mutation of the primary resource row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbVariant {
    pub label: String,
    pub updates: Vec<ColumnUpdate>,
    pub setup: Option<VariantSetup>,
}

impl DbVariant {
    /// Variant from column updates only
    #[must_use]
    pub fn new(label: impl Into<String>, updates: Vec<ColumnUpdate>) -> Self {
        Self {
            label: label.into(),
            updates,
            setup: None,
        }
    }

    /// With auxiliary row setup
    #[inline]
    #[must_use]
    pub fn with_setup(mut self, setup: VariantSetup) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Columns this variant reads or writes
    #[must_use]
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        for update in &self.updates {
            columns.push(update.column.as_str());
            match &update.value {
                VariantValue::CopyColumn { column } | VariantValue::ScaledColumn { column, .. } => {
                    columns.push(column.as_str());
                }
                _ => {}
            }
        }
        columns
    }

    /// Compute the patch for `row` at time `now`
    ///
    /// # Errors
    /// Fails when the row lacks a referenced column or a computed value has
    /// the wrong type (e.g. toggling a non-boolean).
    pub fn plan(&self, row: &Map<String, Value>, now: DateTime<Utc>) -> ModelResult<VariantPatch> {
        let mut changed = Map::new();
        let mut original = Map::new();
        for update in &self.updates {
            let current = row
                .get(&update.column)
                .ok_or_else(|| ModelError::unknown_column(&self.label, &update.column))?;
            let next = compute(&self.label, &update.column, &update.value, row, now)?;
            original.insert(update.column.clone(), current.clone());
            changed.insert(update.column.clone(), next);
        }
        Ok(VariantPatch { changed, original })
    }

    /// Compute the auxiliary row for `row`, if any
    ///
    /// # Errors
    /// Same conditions as [`DbVariant::plan`].
    pub fn plan_setup(
        &self,
        row: &Map<String, Value>,
        primary_id: &Value,
        now: DateTime<Utc>,
    ) -> ModelResult<Option<(String, Map<String, Value>)>> {
        let Some(setup) = &self.setup else {
            return Ok(None);
        };
        let mut values = Map::new();
        values.insert(setup.link_column.clone(), primary_id.clone());
        for (column, value) in &setup.values {
            values.insert(column.clone(), compute(&self.label, column, value, row, now)?);
        }
        Ok(Some((setup.table.clone(), values)))
    }
}

fn compute(
    label: &str,
    column: &str,
    value: &VariantValue,
    row: &Map<String, Value>,
    now: DateTime<Utc>,
) -> ModelResult<Value> {
    let uncomputable = |reason: &str| ModelError::UncomputableValue {
        label: label.to_string(),
        column: column.to_string(),
        reason: reason.to_string(),
    };
    match value {
        VariantValue::Literal { value } => Ok(value.clone()),
        VariantValue::Null => Ok(Value::Null),
        VariantValue::Toggle => match row.get(column) {
            Some(Value::Bool(b)) => Ok(Value::Bool(!b)),
            Some(Value::Null) => Ok(Value::Bool(true)),
            _ => Err(uncomputable("toggle requires a boolean column")),
        },
        VariantValue::TimestampOffset { days } => Ok(Value::String(
            (now + Duration::days(*days)).to_rfc3339_opts(SecondsFormat::Millis, true),
        )),
        VariantValue::CopyColumn { column: source } => row
            .get(source)
            .cloned()
            .ok_or_else(|| ModelError::unknown_column(label, source)),
        VariantValue::ScaledColumn {
            column: source,
            factor,
        } => {
            let base = row
                .get(source)
                .ok_or_else(|| ModelError::unknown_column(label, source))?;
            let number = match base {
                Value::Number(n) => n.as_f64(),
                // numeric columns arrive as strings from to_jsonb
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| uncomputable("scaled column is not numeric"))?;
            let scaled = (number * factor).round();
            if base.is_i64() || base.is_u64() {
                // integral columns stay integral
                #[allow(clippy::cast_possible_truncation)]
                let integral = scaled as i64;
                return Ok(Value::from(integral));
            }
            Ok(serde_json::Number::from_f64(scaled)
                .map_or(Value::Null, Value::Number))
        }
    }
}

/// Planned column changes together with the values they replace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPatch {
    pub changed: Map<String, Value>,
    pub original: Map<String, Value>,
}

impl VariantPatch {
    /// Row with the variant applied
    #[must_use]
    pub fn apply(&self, row: &Map<String, Value>) -> Map<String, Value> {
        let mut next = row.clone();
        for (column, value) in &self.changed {
            next.insert(column.clone(), value.clone());
        }
        next
    }

    /// Row with the original values restored
    #[must_use]
    pub fn revert(&self, row: &Map<String, Value>) -> Map<String, Value> {
        let mut next = row.clone();
        for (column, value) in &self.original {
            next.insert(column.clone(), value.clone());
        }
        next
    }

    /// Columns touched by the patch
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        self.changed.keys().map(String::as_str).collect()
    }

    /// True when the patch changes nothing
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed == self.original
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()
    }

    fn payment() -> Map<String, Value> {
        json!({
            "id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "status": "pending",
            "amount": 5000,
            "refunded_amount": 0,
            "is_manual": false,
            "paid_at": null
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn plan_literal_and_timestamp() {
        let variant = DbVariant::new(
            "paid",
            vec![
                ColumnUpdate::literal("status", "paid"),
                ColumnUpdate::computed("paid_at", VariantValue::TimestampOffset { days: -1 }),
            ],
        );
        let patch = variant.plan(&payment(), now()).unwrap();
        assert_eq!(patch.changed["status"], json!("paid"));
        assert_eq!(patch.changed["paid_at"], json!("2029-12-31T12:00:00.000Z"));
        assert_eq!(patch.original["paid_at"], Value::Null);
    }

    #[test]
    fn plan_scaled_and_copied() {
        let variant = DbVariant::new(
            "refunds",
            vec![ColumnUpdate::computed(
                "refunded_amount",
                VariantValue::ScaledColumn {
                    column: "amount".into(),
                    factor: 0.5,
                },
            )],
        );
        let patch = variant.plan(&payment(), now()).unwrap();
        assert_eq!(patch.changed["refunded_amount"], json!(2500));

        let full = DbVariant::new(
            "full",
            vec![ColumnUpdate::computed(
                "refunded_amount",
                VariantValue::CopyColumn {
                    column: "amount".into(),
                },
            )],
        );
        assert_eq!(full.plan(&payment(), now()).unwrap().changed["refunded_amount"], json!(5000));
    }

    #[test]
    fn plan_rejects_unknown_column() {
        let variant = DbVariant::new("x", vec![ColumnUpdate::literal("missing", 1)]);
        assert!(matches!(
            variant.plan(&payment(), now()),
            Err(ModelError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn toggle_requires_boolean() {
        let ok = DbVariant::new("t", vec![ColumnUpdate::computed("is_manual", VariantValue::Toggle)]);
        assert_eq!(ok.plan(&payment(), now()).unwrap().changed["is_manual"], json!(true));

        let bad = DbVariant::new("t", vec![ColumnUpdate::computed("status", VariantValue::Toggle)]);
        assert!(bad.plan(&payment(), now()).is_err());
    }

    #[test]
    fn setup_links_primary_id() {
        let mut values = BTreeMap::new();
        values.insert(
            "amount".to_string(),
            VariantValue::ScaledColumn {
                column: "amount".into(),
                factor: 0.5,
            },
        );
        let variant = DbVariant::new("partial", vec![]).with_setup(VariantSetup {
            table: "refunds".into(),
            link_column: "payment_id".into(),
            values,
        });
        let row = payment();
        let (table, aux) = variant.plan_setup(&row, &row["id"], now()).unwrap().unwrap();
        assert_eq!(table, "refunds");
        assert_eq!(aux["payment_id"], row["id"]);
        assert_eq!(aux["amount"], json!(2500));
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z_]{0,12}".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn apply_then_revert_restores_row(
            row in proptest::collection::btree_map("[a-z_]{1,8}", arb_scalar(), 1..8),
            replacement in arb_scalar(),
        ) {
            let row: Map<String, Value> = row.into_iter().collect();
            let column = row.keys().next().unwrap().clone();
            let variant = DbVariant::new("p", vec![ColumnUpdate::literal(column, replacement)]);
            let patch = variant.plan(&row, now()).unwrap();
            prop_assert_eq!(patch.revert(&patch.apply(&row)), row);
        }
    }
}
