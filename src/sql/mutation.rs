//! INSERT, UPDATE and DELETE compilers, plus the readings bulk append.

use serde_json::Value;
use tracing::warn;

use super::buffer::SqlBuffer;
use super::compiler::Compiler;
use super::error::Result;
use super::literal::{is_function_call, FunctionCalls, Literal};
use super::timestamp::{self, TimestampError};
use super::types::{DeleteDocument, InsertRow, JsonProperty, Reading, UpdateOperation};
use super::where_clause;

/// A reading left out of a bulk append.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedReading {
    /// Position in the submitted batch.
    pub index: usize,
    pub user_ts: String,
    pub reason: TimestampError,
}

/// Output of [`Compiler::append_readings`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadingBatch {
    /// `None` when every reading was skipped.
    pub sql: Option<String>,
    pub rows: usize,
    pub skipped: Vec<SkippedReading>,
}

impl Compiler {
    pub fn insert(&self, table: &str, payload: &Value) -> Result<String> {
        let row = InsertRow::from_json(payload)?;
        Ok(self.insert_row(table, &row))
    }

    pub fn insert_row(&self, table: &str, row: &InsertRow<'_>) -> String {
        let mut sql = SqlBuffer::new();
        let mut values = SqlBuffer::new();

        sql.push_str("INSERT INTO ");
        self.push_table(table, &mut sql);
        sql.push_str(" (");
        for (i, (column, value)) in row.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
                values.push_str(", ");
            }
            sql.push_identifier(column);
            values.push_literal(value, FunctionCalls::Verbatim);
        }
        sql.push_str(") VALUES (");
        sql.append(values);
        sql.push_str(");");
        sql.coalesce()
    }

    /// One statement per operation, in payload order.
    pub fn update(&self, table: &str, payload: &Value) -> Result<Vec<String>> {
        let operations = UpdateOperation::list_from_json(payload)?;
        Ok(operations
            .iter()
            .map(|op| self.update_statement(table, op))
            .collect())
    }

    pub fn update_statement(&self, table: &str, op: &UpdateOperation<'_>) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str("UPDATE ");
        self.push_table(table, &mut sql);
        sql.push_str(" SET ");

        let mut first = true;
        let mut separator = |sql: &mut SqlBuffer| {
            if !first {
                sql.push_str(", ");
            }
            first = false;
        };

        for (column, value) in &op.values {
            separator(&mut sql);
            sql.push_identifier(column)
                .push_str(" = ")
                .push_literal(value, FunctionCalls::Verbatim);
        }
        for expr in &op.expressions {
            separator(&mut sql);
            sql.push_identifier(expr.column)
                .push_str(" = ")
                .push_identifier(expr.column)
                .push(' ')
                .push_str(expr.operator)
                .push(' ')
                .push_literal(&expr.value, FunctionCalls::Verbatim);
        }
        for property in &op.json_properties {
            separator(&mut sql);
            push_jsonb_set(property, &mut sql);
        }

        if let Some(filter) = &op.filter {
            sql.push_str(" WHERE ");
            where_clause::compile(filter, &mut sql);
        }
        sql.push(';');
        sql.coalesce()
    }

    /// A present payload must carry a `where` object.
    pub fn delete(&self, table: &str, payload: Option<&Value>) -> Result<String> {
        let doc = DeleteDocument::from_json(payload)?;
        let mut sql = SqlBuffer::new();
        sql.push_str("DELETE FROM ");
        self.push_table(table, &mut sql);
        if let Some(filter) = &doc.filter {
            sql.push_str(" WHERE ");
            where_clause::compile(filter, &mut sql);
        }
        sql.push(';');
        Ok(sql.coalesce())
    }

    /// Builds one multi-row INSERT for a batch of readings.
    ///
    /// A reading whose `user_ts` cannot be normalized is skipped and
    /// reported; any structural problem rejects the whole batch.
    pub fn append_readings(&self, payload: &Value) -> Result<ReadingBatch> {
        let readings = Reading::list_from_json(payload)?;
        let mut batch = ReadingBatch::default();
        let mut sql = SqlBuffer::new();

        sql.push_str("INSERT INTO ");
        self.push_readings_table(&mut sql);
        sql.push_str(" ( \"user_ts\", \"asset_code\", \"read_key\", \"reading\" ) VALUES ");

        for (index, reading) in readings.iter().enumerate() {
            let user_ts = if is_function_call(reading.user_ts) {
                reading.user_ts.to_string()
            } else {
                match timestamp::normalize(reading.user_ts) {
                    Ok(ts) => Literal::Str(&ts).encode(FunctionCalls::Quote),
                    Err(reason) => {
                        warn!(index, user_ts = reading.user_ts, "skipping reading: {}", reason);
                        batch.skipped.push(SkippedReading {
                            index,
                            user_ts: reading.user_ts.to_string(),
                            reason,
                        });
                        continue;
                    }
                }
            };

            if batch.rows > 0 {
                sql.push_str(", ");
            }
            sql.push_str("( ")
                .push_str(&user_ts)
                .push_str(", ")
                .push_quoted(reading.asset_code)
                .push_str(", ");
            match reading.read_key {
                Some(key) => sql.push_quoted(key),
                None => sql.push_str("NULL"),
            };
            sql.push_str(", ")
                .push_literal(&Literal::Object(reading.reading), FunctionCalls::Quote)
                .push_str(" )");
            batch.rows += 1;
        }

        if batch.rows > 0 {
            sql.push(';');
            batch.sql = Some(sql.coalesce());
        }
        Ok(batch)
    }

    /// Reads up to `size` readings starting at `id`, timestamps in UTC.
    pub fn fetch_readings(&self, id: u64, size: u64) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str(
            "SELECT \"id\", \"asset_code\", \"read_key\", \"reading\", \
             \"user_ts\" AT TIME ZONE 'UTC' AS \"user_ts\", \
             \"ts\" AT TIME ZONE 'UTC' AS \"ts\" FROM ",
        );
        self.push_readings_table(&mut sql);
        sql.push_str(" WHERE \"id\" >= ")
            .push_uint(id)
            .push_str(" ORDER BY \"id\" LIMIT ")
            .push_uint(size)
            .push(';');
        sql.coalesce()
    }

    /// Total on-disk size of a table, indexes and toast included.
    pub fn table_size(&self, table: &str) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str(
            "SELECT pg_total_relation_size(relid) FROM pg_catalog.pg_statio_user_tables \
             WHERE relname = ",
        )
        .push_quoted(table)
        .push_str(" AND schemaname = ")
        .push_quoted(self.schema())
        .push(';');
        sql.coalesce()
    }
}

/// `"col" = jsonb_set("col", '{"a","b"}', '"value"')`
fn push_jsonb_set(property: &JsonProperty<'_>, sql: &mut SqlBuffer) {
    sql.push_identifier(property.column)
        .push_str(" = jsonb_set(")
        .push_identifier(property.column)
        .push_str(", ");

    let mut path = String::from("{");
    for (i, element) in property.path.iter().enumerate() {
        if i > 0 {
            path.push(',');
        }
        path.push('"');
        path.push_str(&element.replace('\\', "\\\\").replace('"', "\\\""));
        path.push('"');
    }
    path.push('}');
    sql.push_quoted(&path).push_str(", ");

    match property.value {
        Value::String(s) if is_function_call(s) => {
            sql.push_str("to_jsonb(").push_str(s).push(')');
        }
        value => {
            sql.push_quoted(&value.to_string());
        }
    }
    sql.push(')');
}
