/// SELECT statement compiler.
///
/// Clause order is fixed: projection, FROM, WHERE, GROUP BY, ORDER BY,
/// OFFSET, LIMIT. JSON properties read from jsonb columns add an existence
/// test (`"col" ? 'prop'`) to the WHERE clause so rows without the property
/// are skipped instead of yielding NULL.
use serde_json::Value;

use super::buffer::SqlBuffer;
use super::compiler::Compiler;
use super::error::Result;
use super::types::*;
use super::where_clause;

/// `to_char` pattern for reading timestamps, microsecond precision.
pub const READINGS_TIMESTAMP_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.US";

const READINGS_TIMESTAMPS: [&str; 2] = ["user_ts", "ts"];

impl Compiler {
    /// Compiles a retrieve request. No payload selects every row.
    pub fn retrieve(&self, table: &str, payload: Option<&Value>) -> Result<String> {
        let doc = match payload {
            Some(value) => QueryDocument::from_json(value)?,
            None => QueryDocument::default(),
        };
        Ok(self.select(table, &doc))
    }

    /// Renders a validated document. Never fails.
    pub fn select(&self, table: &str, doc: &QueryDocument<'_>) -> String {
        let readings = self.is_readings(table);
        let mut sql = SqlBuffer::new();
        let mut constraints = SqlBuffer::new();

        // SELECT [modifier]
        sql.push_str("SELECT ");
        if let Some(modifier) = doc.modifier {
            sql.push_str(modifier).push(' ');
        }

        match &doc.projection {
            Projection::All if readings => push_readings_columns(&mut sql),
            Projection::All => {
                sql.push('*');
            }
            Projection::Aggregates(aggregates) => {
                for (i, aggregate) in aggregates.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    push_aggregate(aggregate, readings, &mut sql, &mut constraints);
                }
                if let Some(group) = &doc.group {
                    sql.push_str(", ");
                    push_group_column(group, &mut sql);
                }
                if let Some(bucket) = &doc.timebucket {
                    sql.push_str(", ");
                    push_bucket_column(bucket, &mut sql);
                }
            }
            Projection::Columns(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    push_projection_item(item, readings, &mut sql, &mut constraints);
                }
            }
        }

        // FROM
        sql.push_str(" FROM ");
        self.push_table(table, &mut sql);

        // WHERE
        if doc.filter.is_some() || !constraints.is_empty() {
            sql.push_str(" WHERE ");
            if let Some(filter) = &doc.filter {
                where_clause::compile(filter, &mut sql);
                if !constraints.is_empty() {
                    sql.push_str(" AND ");
                }
            }
            sql.append(constraints);
        }

        // GROUP BY
        if let Some(group) = &doc.group {
            sql.push_str(" GROUP BY ");
            match group.format {
                Some(format) => push_to_char(group.column, format, &mut sql),
                None => {
                    sql.push_identifier(group.column);
                }
            }
        }

        // ORDER BY
        if !doc.sort.is_empty() {
            sql.push_str(" ORDER BY ");
            for (i, key) in doc.sort.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_identifier(key.column)
                    .push(' ')
                    .push_str(key.direction.as_sql());
            }
        }

        if let Some(bucket) = &doc.timebucket {
            sql.push_str(if doc.group.is_some() { ", " } else { " GROUP BY " });
            push_bucket_key(bucket, &mut sql);
            sql.push_str(" ORDER BY ");
            push_bucket_key(bucket, &mut sql);
            sql.push_str(" DESC");
        }

        // OFFSET / LIMIT
        if let Some(skip) = doc.skip {
            sql.push_str(" OFFSET ").push_uint(skip);
        }
        if let Some(limit) = doc.limit {
            sql.push_str(" LIMIT ").push_uint(limit);
        }

        sql.push(';');
        sql.coalesce()
    }
}

fn push_readings_columns(sql: &mut SqlBuffer) {
    sql.push_str("\"id\", \"asset_code\", \"read_key\", \"reading\"");
    for column in READINGS_TIMESTAMPS {
        sql.push_str(", ");
        push_to_char(column, READINGS_TIMESTAMP_FORMAT, sql);
        sql.push_str(" AS ").push_identifier(column);
    }
}

fn push_to_char(column: &str, format: &str, sql: &mut SqlBuffer) {
    sql.push_str("to_char(")
        .push_identifier(column)
        .push_str(", ")
        .push_quoted(format)
        .push(')');
}

fn push_alias(alias: &str, sql: &mut SqlBuffer) {
    sql.push_str(" AS ").push_identifier(alias);
}

/// `"col"->'a'->'b'`, with `->>` for the last step when `as_text` is set.
fn push_json_path(path: &JsonPath<'_>, as_text: bool, sql: &mut SqlBuffer) {
    sql.push_identifier(path.column);
    for property in path.parents() {
        sql.push_str("->").push_quoted(property);
    }
    sql.push_str(if as_text { "->>" } else { "->" })
        .push_quoted(path.leaf());
}

/// `"col"->'a' ? 'b'`
fn push_json_constraint(path: &JsonPath<'_>, constraints: &mut SqlBuffer) {
    if !constraints.is_empty() {
        constraints.push_str(" AND ");
    }
    constraints.push_identifier(path.column);
    for property in path.parents() {
        constraints.push_str("->").push_quoted(property);
    }
    constraints.push_str(" ? ").push_quoted(path.leaf());
}

fn push_aggregate(
    aggregate: &Aggregate<'_>,
    readings: bool,
    sql: &mut SqlBuffer,
    constraints: &mut SqlBuffer,
) {
    let is_count = aggregate.operation.eq_ignore_ascii_case("count");
    sql.push_str(aggregate.operation).push('(');
    match &aggregate.target {
        AggregateTarget::Column("*") if is_count => {
            sql.push('*');
        }
        AggregateTarget::Column(column) if readings && !is_count && *column == "user_ts" => {
            push_to_char(column, READINGS_TIMESTAMP_FORMAT, sql);
        }
        AggregateTarget::Column(column) => {
            sql.push_identifier(column);
        }
        AggregateTarget::Json(path) => {
            sql.push('(');
            push_json_path(path, true, sql);
            sql.push_str(")::float");
            push_json_constraint(path, constraints);
        }
    }
    sql.push(')');
    push_alias(&aggregate.alias(), sql);
}

fn push_group_column(group: &GroupBy<'_>, sql: &mut SqlBuffer) {
    match (group.format, group.alias) {
        (None, None) => {
            sql.push_identifier(group.column);
        }
        (format, alias) => {
            match format {
                Some(format) => push_to_char(group.column, format, sql),
                None => {
                    sql.push_identifier(group.column);
                }
            }
            push_alias(alias.unwrap_or(group.column), sql);
        }
    }
}

/// `floor(extract(epoch from "ts") / size)`
fn push_bucket_key(bucket: &TimeBucket<'_>, sql: &mut SqlBuffer) {
    sql.push_str("floor(extract(epoch from ")
        .push_identifier(bucket.timestamp)
        .push_str(") / ");
    match bucket.size {
        Some(size) => sql.push_float(size),
        None => sql.push_int(1),
    };
    sql.push(')');
}

fn push_bucket_column(bucket: &TimeBucket<'_>, sql: &mut SqlBuffer) {
    if bucket.format.is_some() {
        sql.push_str("to_char(");
    }
    sql.push_str("to_timestamp(");
    if let Some(size) = bucket.size {
        sql.push_float(size).push_str(" * ");
    }
    push_bucket_key(bucket, sql);
    sql.push(')');
    if let Some(format) = bucket.format {
        sql.push_str(", ").push_quoted(format).push(')');
    }
    push_alias(bucket.alias.unwrap_or("timestamp"), sql);
}

fn push_projection_item(
    item: &ProjectionItem<'_>,
    readings: bool,
    sql: &mut SqlBuffer,
    constraints: &mut SqlBuffer,
) {
    match item {
        ProjectionItem::Column {
            name,
            format,
            alias,
        } => {
            let mut alias = *alias;
            match format {
                ColumnFormat::Format(format) => push_to_char(name, format, sql),
                ColumnFormat::Timezone(zone) => {
                    sql.push_identifier(name)
                        .push_str(" AT TIME ZONE ")
                        .push_quoted(zone);
                }
                ColumnFormat::Plain if readings && READINGS_TIMESTAMPS.contains(name) => {
                    push_to_char(name, READINGS_TIMESTAMP_FORMAT, sql);
                    alias = alias.or(Some(*name));
                }
                ColumnFormat::Plain => {
                    sql.push_identifier(name);
                }
            }
            if let Some(alias) = alias {
                push_alias(alias, sql);
            }
        }
        ProjectionItem::Json { path, alias } => {
            push_json_path(path, false, sql);
            push_json_constraint(path, constraints);
            if let Some(alias) = alias {
                push_alias(alias, sql);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::assert_parses;
    use crate::sql::error::CompileError;
    use serde_json::json;

    fn retrieve(table: &str, payload: Value) -> String {
        Compiler::default().retrieve(table, Some(&payload)).unwrap()
    }

    #[test]
    fn test_no_payload() {
        let compiler = Compiler::default();
        let sql = compiler.retrieve("statistics", None).unwrap();
        assert_eq!(sql, "SELECT * FROM \"foglamp\".\"statistics\";");
        assert_parses(&sql);
    }

    #[test]
    fn test_readings_default_projection() {
        let sql = Compiler::default().retrieve("readings", None).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"asset_code\", \"read_key\", \"reading\", \
             to_char(\"user_ts\", 'YYYY-MM-DD HH24:MI:SS.US') AS \"user_ts\", \
             to_char(\"ts\", 'YYYY-MM-DD HH24:MI:SS.US') AS \"ts\" \
             FROM \"foglamp\".\"readings\";"
        );
        assert_parses(&sql);
    }

    #[test]
    fn test_where_sort_skip_limit() {
        let sql = retrieve(
            "log",
            json!({
                "where": {"column": "code", "condition": "=", "value": "PURGE"},
                "sort": [{"column": "ts", "direction": "desc"}, {"column": "id"}],
                "skip": 10,
                "limit": 5
            }),
        );
        assert_eq!(
            sql,
            "SELECT * FROM \"foglamp\".\"log\" WHERE \"code\" = 'PURGE' \
             ORDER BY \"ts\" DESC, \"id\" ASC OFFSET 10 LIMIT 5;"
        );
        assert_parses(&sql);
    }

    #[test]
    fn test_return_columns() {
        let sql = retrieve(
            "log",
            json!({
                "modifier": "DISTINCT",
                "return": [
                    "code",
                    {"column": "ts", "format": "YYYY-MM-DD", "alias": "day"},
                    {"column": "ts", "timezone": "utc", "alias": "ts_utc"}
                ]
            }),
        );
        assert_eq!(
            sql,
            "SELECT DISTINCT \"code\", to_char(\"ts\", 'YYYY-MM-DD') AS \"day\", \
             \"ts\" AT TIME ZONE 'utc' AS \"ts_utc\" FROM \"foglamp\".\"log\";"
        );
        assert_parses(&sql);
    }

    #[test]
    fn test_readings_timestamp_columns_are_formatted() {
        let sql = retrieve("readings", json!({"return": ["user_ts", "asset_code"]}));
        assert_eq!(
            sql,
            "SELECT to_char(\"user_ts\", 'YYYY-MM-DD HH24:MI:SS.US') AS \"user_ts\", \
             \"asset_code\" FROM \"foglamp\".\"readings\";"
        );
    }

    #[test]
    fn test_json_return_adds_constraint() {
        let sql = retrieve(
            "readings",
            json!({
                "return": [{"json": {"column": "reading", "properties": ["a", "b"]}, "alias": "b"}],
                "where": {"column": "asset_code", "condition": "=", "value": "x"}
            }),
        );
        assert_eq!(
            sql,
            "SELECT \"reading\"->'a'->'b' AS \"b\" FROM \"foglamp\".\"readings\" \
             WHERE \"asset_code\" = 'x' AND \"reading\"->'a' ? 'b';"
        );
    }

    #[test]
    fn test_json_constraint_without_where() {
        let sql = retrieve(
            "readings",
            json!({"return": [{"json": {"column": "reading", "properties": "rate"}}]}),
        );
        assert_eq!(
            sql,
            "SELECT \"reading\"->'rate' FROM \"foglamp\".\"readings\" WHERE \"reading\" ? 'rate';"
        );
    }

    #[test]
    fn test_count_star() {
        let sql = retrieve("log", json!({"aggregate": {"operation": "count", "column": "*"}}));
        assert_eq!(sql, "SELECT count(*) AS \"count_*\" FROM \"foglamp\".\"log\";");
        assert_parses(&sql);
    }

    #[test]
    fn test_aggregates_with_group() {
        let sql = retrieve(
            "sensors",
            json!({
                "aggregate": [
                    {"operation": "min", "column": "temp"},
                    {"operation": "max", "column": "temp", "alias": "hottest"}
                ],
                "where": {"column": "temp", "condition": ">", "value": 0},
                "group": "asset_code"
            }),
        );
        assert_eq!(
            sql,
            "SELECT min(\"temp\") AS \"min_temp\", max(\"temp\") AS \"hottest\", \"asset_code\" \
             FROM \"foglamp\".\"sensors\" WHERE \"temp\" > 0 GROUP BY \"asset_code\";"
        );
        assert_parses(&sql);
    }

    #[test]
    fn test_group_with_format() {
        let sql = retrieve(
            "statistics_history",
            json!({
                "aggregate": {"operation": "sum", "column": "value"},
                "group": {"column": "history_ts", "format": "YYYY-MM-DD HH24", "alias": "hour"}
            }),
        );
        assert_eq!(
            sql,
            "SELECT sum(\"value\") AS \"sum_value\", to_char(\"history_ts\", 'YYYY-MM-DD HH24') AS \"hour\" \
             FROM \"foglamp\".\"statistics_history\" GROUP BY to_char(\"history_ts\", 'YYYY-MM-DD HH24');"
        );
        assert_parses(&sql);
    }

    #[test]
    fn test_readings_user_ts_aggregate() {
        let sql = retrieve(
            "readings",
            json!({"aggregate": {"operation": "min", "column": "user_ts"}}),
        );
        assert_eq!(
            sql,
            "SELECT min(to_char(\"user_ts\", 'YYYY-MM-DD HH24:MI:SS.US')) AS \"min_user_ts\" \
             FROM \"foglamp\".\"readings\";"
        );
    }

    #[test]
    fn test_timebucket() {
        let sql = retrieve(
            "readings",
            json!({
                "aggregate": {
                    "operation": "avg",
                    "json": {"column": "reading", "properties": "rate"},
                    "alias": "rate"
                },
                "where": {"column": "asset_code", "condition": "=", "value": "sinusoid"},
                "timebucket": {
                    "timestamp": "user_ts", "size": "5",
                    "format": "DD-MM-YYYY HH24:MI:SS", "alias": "bucket"
                },
                "limit": 20
            }),
        );
        assert_eq!(
            sql,
            "SELECT avg((\"reading\"->>'rate')::float) AS \"rate\", \
             to_char(to_timestamp(5 * floor(extract(epoch from \"user_ts\") / 5)), 'DD-MM-YYYY HH24:MI:SS') AS \"bucket\" \
             FROM \"foglamp\".\"readings\" WHERE \"asset_code\" = 'sinusoid' AND \"reading\" ? 'rate' \
             GROUP BY floor(extract(epoch from \"user_ts\") / 5) \
             ORDER BY floor(extract(epoch from \"user_ts\") / 5) DESC LIMIT 20;"
        );
    }

    #[test]
    fn test_timebucket_default_size() {
        let sql = retrieve(
            "readings",
            json!({
                "aggregate": {"operation": "count", "column": "*"},
                "group": "asset_code",
                "timebucket": {"timestamp": "user_ts"}
            }),
        );
        assert_eq!(
            sql,
            "SELECT count(*) AS \"count_*\", \"asset_code\", \
             to_timestamp(floor(extract(epoch from \"user_ts\") / 1)) AS \"timestamp\" \
             FROM \"foglamp\".\"readings\" GROUP BY \"asset_code\", \
             floor(extract(epoch from \"user_ts\") / 1) \
             ORDER BY floor(extract(epoch from \"user_ts\") / 1) DESC;"
        );
    }

    #[test]
    fn test_sort_with_timebucket_fails() {
        let err = Compiler::default()
            .retrieve(
                "readings",
                Some(&json!({
                    "aggregate": {"operation": "count", "column": "*"},
                    "timebucket": {"timestamp": "user_ts"},
                    "sort": {"column": "user_ts"}
                })),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::ConflictingModifiers { .. }));
    }

    #[test]
    fn test_quotes_in_names_and_formats() {
        let sql = retrieve(
            "log",
            json!({"return": [{"column": "a\"b", "format": "it's"}]}),
        );
        assert_eq!(sql, "SELECT to_char(\"a\"\"b\", 'it''s') FROM \"foglamp\".\"log\";");
    }
}
