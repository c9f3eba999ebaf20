//! Postgres access
//!
//! Rows travel as JSON objects: reads go through `to_jsonb(row)`, writes
//! through `jsonb_populate_record`, so no statement needs to know column
//! types. Identifiers are always quoted with [`quote_ident`].

use crate::cache::Catalog;
use crate::error::HarnessResult;
use async_trait::async_trait;
use parity_model::{ColumnProfile, ColumnType, ForeignKeyProfile, TableProfile};
use parity_synth::state::MAX_FK_VALUES;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// Open a connection; the connection task runs until the client is dropped
///
/// # Errors
/// Fails when the server rejects the connection.
pub async fn connect(url: &str) -> Result<Client, tokio_postgres::Error> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(error = %err, "database connection closed with error");
        }
    });
    Ok(client)
}

/// Double-quoted SQL identifier
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL literal for a JSON scalar; objects and arrays become JSON text
#[must_use]
pub fn sql_literal(value: &Value) -> String {
    let quote = |s: &str| format!("'{}'", s.replace('\'', "''"));
    match value {
        Value::Null => "NULL".into(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

/// `SELECT count(*)` of one table
///
/// # Errors
/// Fails when the table does not exist.
pub async fn count_rows(client: &Client, table: &str) -> Result<i64, tokio_postgres::Error> {
    let sql = format!("SELECT count(*) FROM {}", quote_ident(table));
    let row = client.query_one(sql.as_str(), &[]).await?;
    Ok(row.get(0))
}

/// Full row with `id = id`, as a JSON object
///
/// # Errors
/// Propagates query failures.
pub async fn fetch_row(
    client: &Client,
    table: &str,
    id: &str,
) -> Result<Option<Map<String, Value>>, tokio_postgres::Error> {
    let sql = format!(
        "SELECT to_jsonb(t) FROM {} t WHERE t.id::text = $1",
        quote_ident(table)
    );
    let row = client.query_opt(sql.as_str(), &[&id]).await?;
    Ok(row.and_then(|r| match r.get::<_, Value>(0) {
        Value::Object(map) => Some(map),
        _ => None,
    }))
}

/// Set `columns` of the row with `id = id`; returns affected row count
///
/// # Errors
/// Propagates constraint and type failures.
pub async fn update_row(
    client: &Client,
    table: &str,
    id: &str,
    columns: &Map<String, Value>,
) -> Result<u64, tokio_postgres::Error> {
    if columns.is_empty() {
        return Ok(0);
    }
    let table_ident = quote_ident(table);
    let assignments = columns
        .keys()
        .map(|c| format!("{col} = r.{col}", col = quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {table_ident} SET {assignments} \
         FROM jsonb_populate_record(NULL::{table_ident}, $1::jsonb) r \
         WHERE {table_ident}.id::text = $2"
    );
    let payload = Value::Object(columns.clone());
    debug!(table, id, columns = columns.len(), "updating row");
    client.execute(sql.as_str(), &[&payload, &id]).await
}

/// Insert one row built from `values`; returns its id as text
///
/// # Errors
/// Propagates constraint and type failures.
pub async fn insert_row(
    client: &Client,
    table: &str,
    values: &Map<String, Value>,
) -> Result<String, tokio_postgres::Error> {
    let table_ident = quote_ident(table);
    let columns = values.keys().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "INSERT INTO {table_ident} ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::{table_ident}, $1::jsonb) \
         RETURNING id::text"
    );
    let payload = Value::Object(values.clone());
    let row = client.query_one(sql.as_str(), &[&payload]).await?;
    Ok(row.get(0))
}

/// Delete the row with `id = id`
///
/// # Errors
/// Propagates constraint failures.
pub async fn delete_row(client: &Client, table: &str, id: &str) -> Result<u64, tokio_postgres::Error> {
    let sql = format!("DELETE FROM {} WHERE id::text = $1", quote_ident(table));
    client.execute(sql.as_str(), &[&id]).await
}

/// Row scope for [`latest_id`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RowScope<'a> {
    /// Column and value restricting rows to one organization
    pub organization: Option<(&'a str, &'a str)>,
    /// Column ordering rows by creation, newest first
    pub created_column: Option<&'a str>,
}

/// Id of the most recently created row in scope
///
/// # Errors
/// Propagates query failures.
pub async fn latest_id(
    client: &Client,
    table: &str,
    scope: RowScope<'_>,
) -> Result<Option<String>, tokio_postgres::Error> {
    let mut sql = format!("SELECT id::text FROM {}", quote_ident(table));
    let mut org_value = None;
    if let Some((column, value)) = scope.organization {
        sql.push_str(&format!(" WHERE {}::text = $1", quote_ident(column)));
        org_value = Some(value);
    }
    if let Some(column) = scope.created_column {
        sql.push_str(&format!(" ORDER BY {} DESC NULLS LAST", quote_ident(column)));
    }
    sql.push_str(" LIMIT 1");
    let row = match org_value {
        Some(value) => client.query_opt(sql.as_str(), &[&value]).await?,
        None => client.query_opt(sql.as_str(), &[]).await?,
    };
    Ok(row.map(|r| r.get(0)))
}

const COLUMNS_SQL: &str = "SELECT column_name::text, data_type::text, udt_name::text, is_nullable::text \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name = $1 \
     ORDER BY ordinal_position";

const ENUM_SQL: &str = "SELECT e.enumlabel::text FROM pg_type t \
     JOIN pg_enum e ON e.enumtypid = t.oid \
     WHERE t.typname = $1 ORDER BY e.enumsortorder";

const FOREIGN_KEYS_SQL: &str = "SELECT kcu.column_name::text, ccu.table_name::text, ccu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
     JOIN information_schema.constraint_column_usage ccu \
       ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
     WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = 'public' AND tc.table_name = $1";

const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = 'public' AND table_type = 'BASE TABLE'";

/// Catalog backed by a live connection
#[derive(Clone)]
pub struct PgCatalog {
    client: Arc<Client>,
}

impl PgCatalog {
    /// Catalog over `client`
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    async fn enum_values(&self, udt_name: &str) -> Result<Vec<String>, tokio_postgres::Error> {
        let rows = self.client.query(ENUM_SQL, &[&udt_name]).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Referenced values when the target table holds few enough rows
    async fn foreign_values(&self, table: &str, column: &str) -> Result<Option<Vec<String>>, tokio_postgres::Error> {
        let sql = format!(
            "SELECT {col}::text FROM {table} ORDER BY {col} LIMIT {limit}",
            col = quote_ident(column),
            table = quote_ident(table),
            limit = MAX_FK_VALUES + 1,
        );
        let rows = self.client.query(sql.as_str(), &[]).await?;
        if rows.len() > MAX_FK_VALUES {
            return Ok(None);
        }
        Ok(Some(rows.iter().filter_map(|r| r.get::<_, Option<String>>(0)).collect()))
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn table_profile(&self, table: &str) -> HarnessResult<Option<TableProfile>> {
        let rows = self.client.query(COLUMNS_SQL, &[&table]).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let udt_name: String = row.get(2);
            let nullable: String = row.get(3);
            let mut column = ColumnProfile::new(name, ColumnType::from_pg(&data_type, &udt_name));
            column.nullable = nullable == "YES";
            if column.column_type == ColumnType::Enum {
                column = column.with_enum(self.enum_values(&udt_name).await?);
            }
            columns.push(column);
        }
        for fk in self.client.query(FOREIGN_KEYS_SQL, &[&table]).await? {
            let column_name: String = fk.get(0);
            let ref_table: String = fk.get(1);
            let ref_column: String = fk.get(2);
            let values = self.foreign_values(&ref_table, &ref_column).await?;
            if let Some(column) = columns.iter_mut().find(|c| c.name == column_name) {
                column.foreign_key = Some(ForeignKeyProfile {
                    ref_table,
                    ref_column,
                    values,
                });
            }
        }
        Ok(Some(TableProfile {
            table: table.to_string(),
            columns,
        }))
    }

    async fn table_names(&self) -> HarnessResult<BTreeSet<String>> {
        let rows = self.client.query(TABLES_SQL, &[]).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #[test]
        fn quoted_identifiers_unquote_to_input(name in "[a-z_\"' ]{0,16}") {
            let quoted = quote_ident(&name);
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert_eq!(inner.replace("\"\"", "\""), name);
        }

        #[test]
        fn string_literals_never_close_early(text in "[a-z' ]{0,16}") {
            let literal = sql_literal(&Value::String(text.clone()));
            let inner = &literal[1..literal.len() - 1];
            prop_assert_eq!(inner.replace("''", "'"), text);
        }
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("bookings"), "\"bookings\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn literals() {
        assert_eq!(sql_literal(&json!(null)), "NULL");
        assert_eq!(sql_literal(&json!(true)), "TRUE");
        assert_eq!(sql_literal(&json!(42)), "42");
        assert_eq!(sql_literal(&json!("O'Brien")), "'O''Brien'");
        assert_eq!(sql_literal(&json!({ "a": 1 })), "'{\"a\":1}'");
    }
}
