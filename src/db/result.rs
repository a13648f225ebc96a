//! Typed result materialization.
//!
//! Raw text cells are converted according to the column's PostgreSQL type:
//! jsonb/json cells become nested JSON, integer and float columns become
//! numbers, `char(n)` is trimmed, and everything else (timestamps included)
//! stays a string exactly as the server formatted it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_postgres::types::Type;
use tracing::warn;

use super::query::RawResult;

/// How SQL NULL and empty text cells are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NullPolicy {
    /// NULL and empty text both become `""`, whatever the column type.
    #[default]
    EmptyString,
    /// NULL becomes JSON `null`; empty text stays `""`.
    Distinct,
}

/// Column types the materializer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Json,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Timestamp,
    Timestamptz,
    Bpchar,
    Other(u32),
}

impl ColumnType {
    pub fn from_oid(oid: u32) -> Self {
        match Type::from_oid(oid) {
            Some(Type::JSON) | Some(Type::JSONB) => ColumnType::Json,
            Some(Type::INT2) => ColumnType::Int2,
            Some(Type::INT4) => ColumnType::Int4,
            Some(Type::INT8) => ColumnType::Int8,
            Some(Type::FLOAT4) => ColumnType::Float4,
            Some(Type::FLOAT8) => ColumnType::Float8,
            Some(Type::TIMESTAMP) => ColumnType::Timestamp,
            Some(Type::TIMESTAMPTZ) => ColumnType::Timestamptz,
            Some(Type::BPCHAR) => ColumnType::Bpchar,
            _ => ColumnType::Other(oid),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Object(Value),
    Null,
}

impl TypedValue {
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Int32(i) => Value::from(*i),
            TypedValue::Int64(i) => Value::from(*i),
            // NaN and infinities have no JSON form
            TypedValue::Double(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TypedValue::Object(v) => v.clone(),
            TypedValue::Null => Value::Null,
        }
    }
}

/// One row; columns in result order. A column whose value could not be
/// decoded is absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRow {
    pub values: Vec<(String, TypedValue)>,
}

impl ResultRow {
    pub fn get(&self, column: &str) -> Option<&TypedValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::with_capacity(self.values.len());
        for (name, value) in &self.values {
            obj.insert(name.clone(), value.to_json());
        }
        Value::Object(obj)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// `{"count": n, "rows": [..]}`
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "count": self.count(),
            "rows": self.rows.iter().map(ResultRow::to_json).collect::<Vec<_>>(),
        })
    }
}

pub fn materialize(raw: &RawResult, nulls: NullPolicy) -> ResultSet {
    let types: Vec<ColumnType> = raw
        .columns
        .iter()
        .map(|c| ColumnType::from_oid(c.type_oid))
        .collect();

    let rows = raw
        .rows
        .iter()
        .map(|cells| {
            let mut row = ResultRow {
                values: Vec::with_capacity(raw.columns.len()),
            };
            for ((column, ty), cell) in raw.columns.iter().zip(&types).zip(cells) {
                let value = match (cell.as_deref(), nulls) {
                    (None, NullPolicy::Distinct) => Some(TypedValue::Null),
                    (None, NullPolicy::EmptyString) | (Some(""), _) => {
                        Some(TypedValue::String(String::new()))
                    }
                    (Some(text), _) => convert(&column.name, *ty, text),
                };
                if let Some(value) = value {
                    row.values.push((column.name.clone(), value));
                }
            }
            row
        })
        .collect();

    ResultSet { rows }
}

/// `None` drops the column from the row.
fn convert(column: &str, ty: ColumnType, text: &str) -> Option<TypedValue> {
    let value = match ty {
        ColumnType::Json => match serde_json::from_str(text) {
            Ok(v) => TypedValue::Object(v),
            Err(e) => {
                warn!(column, "failed to parse JSON cell, dropping column: {}", e);
                return None;
            }
        },
        ColumnType::Int2 | ColumnType::Int4 => parse_or_string(column, text, TypedValue::Int32),
        ColumnType::Int8 => parse_or_string(column, text, TypedValue::Int64),
        ColumnType::Float4 | ColumnType::Float8 => {
            parse_or_string(column, text, TypedValue::Double)
        }
        ColumnType::Bpchar => TypedValue::String(text.trim_matches(' ').to_string()),
        ColumnType::Timestamp | ColumnType::Timestamptz | ColumnType::Other(_) => {
            TypedValue::String(text.to_string())
        }
    };
    Some(value)
}

fn parse_or_string<T: std::str::FromStr>(
    column: &str,
    text: &str,
    wrap: fn(T) -> TypedValue,
) -> TypedValue {
    match text.parse::<T>() {
        Ok(n) => wrap(n),
        Err(_) => {
            warn!(column, value = text, "numeric cell did not parse, keeping text");
            TypedValue::String(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::RawColumn;
    use serde_json::json;

    fn raw(columns: &[(&str, u32)], rows: Vec<Vec<Option<&str>>>) -> RawResult {
        RawResult {
            columns: columns
                .iter()
                .map(|(name, oid)| RawColumn::new(*name, *oid))
                .collect(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|c| c.map(str::to_string)).collect())
                .collect(),
            affected: 0,
        }
    }

    #[test]
    fn test_column_types_from_oid() {
        assert_eq!(ColumnType::from_oid(3802), ColumnType::Json);
        assert_eq!(ColumnType::from_oid(114), ColumnType::Json);
        assert_eq!(ColumnType::from_oid(21), ColumnType::Int2);
        assert_eq!(ColumnType::from_oid(23), ColumnType::Int4);
        assert_eq!(ColumnType::from_oid(20), ColumnType::Int8);
        assert_eq!(ColumnType::from_oid(700), ColumnType::Float4);
        assert_eq!(ColumnType::from_oid(701), ColumnType::Float8);
        assert_eq!(ColumnType::from_oid(1114), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_oid(1184), ColumnType::Timestamptz);
        assert_eq!(ColumnType::from_oid(1042), ColumnType::Bpchar);
        assert_eq!(ColumnType::from_oid(25), ColumnType::Other(25));
    }

    #[test]
    fn test_typed_values() {
        let result = raw(
            &[
                ("id", 23),
                ("big", 20),
                ("rate", 701),
                ("reading", 3802),
                ("code", 1042),
                ("ts", 1184),
                ("name", 25),
                ("small", 21),
                ("ratio", 700),
                ("local_ts", 1114),
            ],
            vec![vec![
                Some("42"),
                Some("9000000000"),
                Some("2.5"),
                Some("{\"a\": [1, 2]}"),
                Some("ab   "),
                Some("2019-01-01 10:00:00.5+00"),
                Some("plain"),
                Some("-7"),
                Some("0.25"),
                Some("2019-01-01 10:00:00.5"),
            ]],
        );
        let set = materialize(&result, NullPolicy::default());
        assert_eq!(set.count(), 1);
        let row = &set.rows[0];
        assert_eq!(row.get("id"), Some(&TypedValue::Int32(42)));
        assert_eq!(row.get("big"), Some(&TypedValue::Int64(9_000_000_000)));
        assert_eq!(row.get("rate"), Some(&TypedValue::Double(2.5)));
        assert_eq!(row.get("reading"), Some(&TypedValue::Object(json!({"a": [1, 2]}))));
        assert_eq!(row.get("code"), Some(&TypedValue::String("ab".into())));
        assert_eq!(
            row.get("ts"),
            Some(&TypedValue::String("2019-01-01 10:00:00.5+00".into()))
        );
        assert_eq!(row.get("name"), Some(&TypedValue::String("plain".into())));
        assert_eq!(row.get("small"), Some(&TypedValue::Int32(-7)));
        assert_eq!(row.get("ratio"), Some(&TypedValue::Double(0.25)));
        assert_eq!(
            row.get("local_ts"),
            Some(&TypedValue::String("2019-01-01 10:00:00.5".into()))
        );
    }

    #[test]
    fn test_null_conflated_with_empty_by_default() {
        let result = raw(&[("id", 23), ("reading", 3802)], vec![vec![None, Some("")]]);
        let set = materialize(&result, NullPolicy::EmptyString);
        assert_eq!(
            set.to_json(),
            json!({"count": 1, "rows": [{"id": "", "reading": ""}]})
        );
    }

    #[test]
    fn test_distinct_null_policy() {
        let result = raw(&[("id", 23), ("name", 25)], vec![vec![None, Some("")]]);
        let set = materialize(&result, NullPolicy::Distinct);
        assert_eq!(set.to_json(), json!({"count": 1, "rows": [{"id": null, "name": ""}]}));
    }

    #[test]
    fn test_bad_json_drops_column() {
        let result = raw(
            &[("id", 23), ("reading", 3802)],
            vec![vec![Some("1"), Some("{not json")], vec![Some("2"), Some("{}")]],
        );
        let set = materialize(&result, NullPolicy::default());
        assert_eq!(
            set.to_json(),
            json!({"count": 2, "rows": [{"id": 1}, {"id": 2, "reading": {}}]})
        );
    }

    #[test]
    fn test_unparseable_number_kept_as_text() {
        let result = raw(&[("n", 23)], vec![vec![Some("12abc")]]);
        let set = materialize(&result, NullPolicy::default());
        assert_eq!(set.rows[0].get("n"), Some(&TypedValue::String("12abc".into())));
    }

    #[test]
    fn test_row_order_preserved() {
        let result = raw(&[("z", 25), ("a", 25)], vec![vec![Some("1"), Some("2")]]);
        let json = materialize(&result, NullPolicy::default()).rows[0].to_json();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_null_policy_from_config_text() {
        #[derive(Deserialize)]
        struct Wrapper {
            nulls: NullPolicy,
        }
        let w: Wrapper = toml::from_str("nulls = \"distinct\"").unwrap();
        assert_eq!(w.nulls, NullPolicy::Distinct);
        let w: Wrapper = toml::from_str("nulls = \"empty-string\"").unwrap();
        assert_eq!(w.nulls, NullPolicy::EmptyString);
    }
}
