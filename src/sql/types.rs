//! Typed request documents.
//!
//! Every JSON payload is validated once, up front, into the types below. The
//! statement compilers only ever see a well-formed document, so they cannot
//! fail halfway through a statement. All types borrow from the parsed
//! payload and live as long as the request.

use std::borrow::Cow;

use serde_json::{Map, Value};

use super::error::{CompileError, Result};
use super::literal::Literal;

type Object = Map<String, Value>;

fn object<'a>(value: &'a Value, property: &'static str) -> Result<&'a Object> {
    value
        .as_object()
        .ok_or_else(|| CompileError::wrong_type(property, "an object"))
}

fn require<'a>(obj: &'a Object, context: &'static str, key: &'static str) -> Result<&'a Value> {
    obj.get(key).ok_or_else(|| CompileError::missing(context, key))
}

fn require_str<'a>(obj: &'a Object, context: &'static str, key: &'static str) -> Result<&'a str> {
    require(obj, context, key)?
        .as_str()
        .ok_or_else(|| CompileError::wrong_type(key, "a string"))
}

fn optional_str<'a>(obj: &'a Object, key: &'static str) -> Result<Option<&'a str>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(CompileError::wrong_type(key, "a string")),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A JSON property path inside a jsonb column: `{"column": .., "properties": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath<'a> {
    pub column: &'a str,
    /// Never empty.
    pub properties: Vec<&'a str>,
}

impl<'a> JsonPath<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "json")?;
        let column = require_str(obj, "json", "column")?;
        let properties = match require(obj, "json", "properties")? {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_str().ok_or_else(|| {
                        CompileError::wrong_type("properties", "a string or an array of strings")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(CompileError::wrong_type(
                    "properties",
                    "a string or an array of strings",
                ))
            }
        };
        Ok(JsonPath { column, properties })
    }

    /// The innermost property, tested for existence before it is read.
    pub fn leaf(&self) -> &'a str {
        self.properties[self.properties.len() - 1]
    }

    /// Every property except the innermost one.
    pub fn parents(&self) -> &[&'a str] {
        &self.properties[..self.properties.len() - 1]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateTarget<'a> {
    Column(&'a str),
    Json(JsonPath<'a>),
}

/// One `op(expr) AS "alias"` projection entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate<'a> {
    pub operation: &'a str,
    pub target: AggregateTarget<'a>,
    pub alias: Option<&'a str>,
}

impl<'a> Aggregate<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "aggregate")?;
        let operation = require_str(obj, "aggregate", "operation")?;
        if !is_identifier(operation) {
            return Err(CompileError::wrong_type("operation", "a function name"));
        }
        let target = if let Some(column) = obj.get("column") {
            AggregateTarget::Column(
                column
                    .as_str()
                    .ok_or_else(|| CompileError::wrong_type("column", "a string"))?,
            )
        } else if let Some(json) = obj.get("json") {
            AggregateTarget::Json(JsonPath::from_json(json)?)
        } else {
            return Err(CompileError::missing("aggregate", "column"));
        };
        Ok(Aggregate {
            operation,
            target,
            alias: optional_str(obj, "alias")?,
        })
    }

    /// The explicit alias, or `operation_column`.
    pub fn alias(&self) -> Cow<'a, str> {
        match self.alias {
            Some(alias) => Cow::Borrowed(alias),
            None => {
                let column = match &self.target {
                    AggregateTarget::Column(c) => *c,
                    AggregateTarget::Json(path) => path.column,
                };
                Cow::Owned(format!("{}_{}", self.operation, column))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFormat<'a> {
    Plain,
    /// `to_char("col", 'format')`
    Format(&'a str),
    /// `"col" AT TIME ZONE 'zone'`
    Timezone(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionItem<'a> {
    Column {
        name: &'a str,
        format: ColumnFormat<'a>,
        alias: Option<&'a str>,
    },
    Json {
        path: JsonPath<'a>,
        alias: Option<&'a str>,
    },
}

impl<'a> ProjectionItem<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = match value {
            Value::String(name) => {
                return Ok(ProjectionItem::Column {
                    name,
                    format: ColumnFormat::Plain,
                    alias: None,
                })
            }
            Value::Object(obj) => obj,
            _ => return Err(CompileError::wrong_type("return", "an array of strings or objects")),
        };
        let alias = optional_str(obj, "alias")?;
        if let Some(name) = obj.get("column") {
            let name = name
                .as_str()
                .ok_or_else(|| CompileError::wrong_type("column", "a string"))?;
            let format = match (optional_str(obj, "format")?, optional_str(obj, "timezone")?) {
                (Some(format), _) => ColumnFormat::Format(format),
                (None, Some(zone)) => ColumnFormat::Timezone(zone),
                (None, None) => ColumnFormat::Plain,
            };
            Ok(ProjectionItem::Column { name, format, alias })
        } else if let Some(json) = obj.get("json") {
            Ok(ProjectionItem::Json {
                path: JsonPath::from_json(json)?,
                alias,
            })
        } else {
            Err(CompileError::missing("return", "column"))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection<'a> {
    /// No `aggregate` or `return`: every column.
    All,
    Aggregates(Vec<Aggregate<'a>>),
    Columns(Vec<ProjectionItem<'a>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy<'a> {
    pub column: &'a str,
    pub format: Option<&'a str>,
    pub alias: Option<&'a str>,
}

impl<'a> GroupBy<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        match value {
            Value::String(column) => Ok(GroupBy {
                column,
                format: None,
                alias: None,
            }),
            Value::Object(obj) => Ok(GroupBy {
                column: require_str(obj, "group", "column")?,
                format: optional_str(obj, "format")?,
                alias: optional_str(obj, "alias")?,
            }),
            _ => Err(CompileError::wrong_type("group", "a string or an object")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey<'a> {
    pub column: &'a str,
    pub direction: Direction,
}

impl<'a> SortKey<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "sort")?;
        let column = require_str(obj, "sort", "column")?;
        let direction = match optional_str(obj, "direction")? {
            None => Direction::Asc,
            Some(d) if d.eq_ignore_ascii_case("asc") => Direction::Asc,
            Some(d) if d.eq_ignore_ascii_case("desc") => Direction::Desc,
            Some(_) => return Err(CompileError::wrong_type("direction", "\"ASC\" or \"DESC\"")),
        };
        Ok(SortKey { column, direction })
    }
}

/// Groups rows into fixed-width buckets of `size` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBucket<'a> {
    pub timestamp: &'a str,
    pub size: Option<f64>,
    pub format: Option<&'a str>,
    pub alias: Option<&'a str>,
}

impl<'a> TimeBucket<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "timebucket")?;
        let size = match obj.get("size") {
            None => None,
            Some(v) => {
                let size = match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                match size {
                    Some(size) if size.is_finite() && size > 0.0 => Some(size),
                    _ => return Err(CompileError::wrong_type("size", "a positive number")),
                }
            }
        };
        Ok(TimeBucket {
            timestamp: require_str(obj, "timebucket", "timestamp")?,
            size,
            format: optional_str(obj, "format")?,
            alias: optional_str(obj, "alias")?,
        })
    }
}

/// A WHERE tree. `and`/`or` children hang off the node that names them.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause<'a> {
    Predicate(Predicate<'a>),
    And(Box<WhereClause<'a>>, Box<WhereClause<'a>>),
    Or(Box<WhereClause<'a>>, Box<WhereClause<'a>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate<'a> {
    pub column: &'a str,
    pub condition: Condition<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition<'a> {
    /// Older than N seconds.
    Older(i64),
    /// Newer than N seconds.
    Newer(i64),
    In {
        negated: bool,
        values: Vec<Literal<'a>>,
    },
    Compare {
        operator: &'a str,
        value: Literal<'a>,
    },
}

const COMPARISON_OPERATORS: &[&str] = &[
    "=", "!=", "<>", "<", ">", "<=", ">=", "like", "not like", "ilike", "not ilike", "is",
    "is not", "~", "~*", "!~", "!~*",
];

const ARITHMETIC_OPERATORS: &[&str] = &["+", "-", "*", "/", "%", "||", "&", "|", "#", "<<", ">>", "^"];

/// Case-insensitive; runs of whitespace count as one space.
fn is_comparison_operator(s: &str) -> bool {
    let normalized = s
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    COMPARISON_OPERATORS.contains(&normalized.as_str())
}

impl<'a> WhereClause<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "where")?;
        let column = require_str(obj, "where", "column")?;
        let condition = require_str(obj, "where", "condition")?;
        let value = require(obj, "where", "value")?;

        let condition = match condition {
            "older" | "newer" => {
                let seconds = value
                    .as_i64()
                    .ok_or_else(|| CompileError::wrong_type("value", "an integer"))?;
                if condition == "older" {
                    Condition::Older(seconds)
                } else {
                    Condition::Newer(seconds)
                }
            }
            "in" | "not in" => {
                let items = match value.as_array() {
                    Some(items) if !items.is_empty() => items,
                    _ => {
                        return Err(CompileError::EmptyArray {
                            condition: condition.to_string(),
                        })
                    }
                };
                let values = items
                    .iter()
                    .map(|item| match Literal::from_json(item) {
                        Some(lit @ (Literal::Int(_) | Literal::UInt(_) | Literal::Float(_))) => {
                            Ok(lit)
                        }
                        Some(lit @ Literal::Str(_)) => Ok(lit),
                        _ => Err(CompileError::InvalidOperand {
                            condition: condition.to_string(),
                        }),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Condition::In {
                    negated: condition == "not in",
                    values,
                }
            }
            operator => {
                if !is_comparison_operator(operator) {
                    return Err(CompileError::wrong_type("condition", "a comparison operator"));
                }
                let value = Literal::from_json(value)
                    .ok_or_else(|| CompileError::wrong_type("value", "a scalar or an object"))?;
                Condition::Compare { operator, value }
            }
        };

        let mut clause = WhereClause::Predicate(Predicate { column, condition });
        if let Some(and) = obj.get("and") {
            clause = WhereClause::And(Box::new(clause), Box::new(WhereClause::from_json(and)?));
        }
        if let Some(or) = obj.get("or") {
            clause = WhereClause::Or(Box::new(clause), Box::new(WhereClause::from_json(or)?));
        }
        Ok(clause)
    }
}

/// A validated retrieve payload.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDocument<'a> {
    /// SQL keywords placed straight after `SELECT`, e.g. `DISTINCT`.
    pub modifier: Option<&'a str>,
    pub projection: Projection<'a>,
    pub filter: Option<WhereClause<'a>>,
    pub group: Option<GroupBy<'a>>,
    pub sort: Vec<SortKey<'a>>,
    pub timebucket: Option<TimeBucket<'a>>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl Default for QueryDocument<'_> {
    fn default() -> Self {
        QueryDocument {
            modifier: None,
            projection: Projection::All,
            filter: None,
            group: None,
            sort: Vec::new(),
            timebucket: None,
            skip: None,
            limit: None,
        }
    }
}

fn non_negative(obj: &Object, key: &'static str) -> Result<Option<u64>> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or(CompileError::InvalidModifier { modifier: key }),
    }
}

impl<'a> QueryDocument<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "payload")?;

        if obj.contains_key("sort") && obj.contains_key("timebucket") {
            return Err(CompileError::ConflictingModifiers {
                first: "sort",
                second: "timebucket",
            });
        }
        if obj.contains_key("timebucket") && !obj.contains_key("aggregate") {
            return Err(CompileError::DependentModifier {
                modifier: "timebucket",
                requires: "aggregate",
            });
        }

        let modifier = optional_str(obj, "modifier")?;
        if let Some(m) = modifier {
            if m.trim().is_empty() || !m.chars().all(|c| c.is_ascii_alphabetic() || c == ' ') {
                return Err(CompileError::wrong_type("modifier", "one or more SQL keywords"));
            }
        }

        // aggregate takes precedence over return
        let projection = if let Some(aggregate) = obj.get("aggregate") {
            match aggregate {
                Value::Array(items) if !items.is_empty() => Projection::Aggregates(
                    items
                        .iter()
                        .map(Aggregate::from_json)
                        .collect::<Result<_>>()?,
                ),
                Value::Object(_) => Projection::Aggregates(vec![Aggregate::from_json(aggregate)?]),
                _ => {
                    return Err(CompileError::wrong_type(
                        "aggregate",
                        "an object or a non-empty array of objects",
                    ))
                }
            }
        } else if let Some(columns) = obj.get("return") {
            match columns {
                Value::Array(items) if !items.is_empty() => Projection::Columns(
                    items
                        .iter()
                        .map(ProjectionItem::from_json)
                        .collect::<Result<_>>()?,
                ),
                _ => return Err(CompileError::wrong_type("return", "a non-empty array")),
            }
        } else {
            Projection::All
        };

        let sort = match obj.get("sort") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(SortKey::from_json)
                .collect::<Result<_>>()?,
            Some(key) => vec![SortKey::from_json(key)?],
        };

        Ok(QueryDocument {
            modifier,
            projection,
            filter: obj.get("where").map(WhereClause::from_json).transpose()?,
            group: obj.get("group").map(GroupBy::from_json).transpose()?,
            sort,
            timebucket: obj.get("timebucket").map(TimeBucket::from_json).transpose()?,
            skip: non_negative(obj, "skip")?,
            limit: non_negative(obj, "limit")?,
        })
    }
}

fn column_values<'a>(obj: &'a Object) -> Result<Vec<(&'a str, Literal<'a>)>> {
    obj.iter()
        .map(|(column, value)| {
            Literal::from_json(value)
                .map(|lit| (column.as_str(), lit))
                .ok_or_else(|| CompileError::wrong_type("values", "an object of scalar or object values"))
        })
        .collect()
}

/// A single row for INSERT, in payload order.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow<'a> {
    pub columns: Vec<(&'a str, Literal<'a>)>,
}

impl<'a> InsertRow<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "payload")?;
        if obj.is_empty() {
            return Err(CompileError::wrong_type("payload", "a non-empty object"));
        }
        Ok(InsertRow {
            columns: column_values(obj)?,
        })
    }
}

/// `"column" = "column" operator value`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression<'a> {
    pub column: &'a str,
    pub operator: &'a str,
    pub value: Literal<'a>,
}

impl<'a> Expression<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "expressions")?;
        let column = require_str(obj, "expressions", "column")?;
        let operator = require_str(obj, "expressions", "operator")?;
        if !ARITHMETIC_OPERATORS.contains(&operator) {
            return Err(CompileError::wrong_type("operator", "an arithmetic operator"));
        }
        let value = Literal::from_json(require(obj, "expressions", "value")?)
            .ok_or_else(|| CompileError::wrong_type("value", "a scalar or an object"))?;
        Ok(Expression {
            column,
            operator,
            value,
        })
    }
}

/// Replaces the value at `path` inside a jsonb column.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonProperty<'a> {
    pub column: &'a str,
    pub path: Vec<&'a str>,
    pub value: &'a Value,
}

impl<'a> JsonProperty<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "json_properties")?;
        let column = require_str(obj, "json_properties", "column")?;
        let path = match require(obj, "json_properties", "path")? {
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| CompileError::wrong_type("path", "an array of strings"))
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(CompileError::wrong_type("path", "a non-empty array of strings")),
        };
        let value = require(obj, "json_properties", "value")?;
        if value.is_array() {
            return Err(CompileError::wrong_type("value", "a scalar or an object"));
        }
        Ok(JsonProperty {
            column,
            path,
            value,
        })
    }
}

fn array_of<'a, T>(
    obj: &'a Object,
    key: &'static str,
    parse: impl Fn(&'a Value) -> Result<T>,
) -> Result<Vec<T>> {
    match obj.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(parse).collect(),
        Some(_) => Err(CompileError::wrong_type(key, "an array")),
    }
}

/// One UPDATE statement's worth of changes.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation<'a> {
    pub values: Vec<(&'a str, Literal<'a>)>,
    pub expressions: Vec<Expression<'a>>,
    pub json_properties: Vec<JsonProperty<'a>>,
    pub filter: Option<WhereClause<'a>>,
}

impl<'a> UpdateOperation<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "updates")?;
        let values = match obj.get("values") {
            None => Vec::new(),
            Some(values) => column_values(object(values, "values")?)?,
        };
        let expressions = array_of(obj, "expressions", Expression::from_json)?;
        let json_properties = array_of(obj, "json_properties", JsonProperty::from_json)?;
        if values.is_empty() && expressions.is_empty() && json_properties.is_empty() {
            return Err(CompileError::missing("update", "values"));
        }
        let filter = obj
            .get("condition")
            .or_else(|| obj.get("where"))
            .map(WhereClause::from_json)
            .transpose()?;
        Ok(UpdateOperation {
            values,
            expressions,
            json_properties,
            filter,
        })
    }

    /// Accepts `{"updates": [op, ..]}` or a single operation object.
    pub fn list_from_json(value: &'a Value) -> Result<Vec<Self>> {
        let obj = object(value, "payload")?;
        match obj.get("updates") {
            Some(Value::Array(items)) if !items.is_empty() => {
                items.iter().map(UpdateOperation::from_json).collect()
            }
            Some(_) => Err(CompileError::wrong_type("updates", "a non-empty array")),
            None => Ok(vec![UpdateOperation::from_json(value)?]),
        }
    }
}

/// Optional DELETE filter. A payload that is present must carry `where`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteDocument<'a> {
    pub filter: Option<WhereClause<'a>>,
}

impl<'a> DeleteDocument<'a> {
    pub fn from_json(value: Option<&'a Value>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(DeleteDocument::default());
        };
        let obj = object(value, "payload")?;
        let filter = WhereClause::from_json(require(obj, "delete", "where")?)?;
        Ok(DeleteDocument {
            filter: Some(filter),
        })
    }
}

/// One time-series reading. `user_ts` is normalized at compile time so a bad
/// timestamp only drops its own row.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading<'a> {
    pub user_ts: &'a str,
    pub asset_code: &'a str,
    pub read_key: Option<&'a str>,
    pub reading: &'a Value,
}

impl<'a> Reading<'a> {
    pub fn from_json(value: &'a Value) -> Result<Self> {
        let obj = object(value, "readings")?;
        let read_key = match obj.get("read_key") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s == "None" => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => return Err(CompileError::wrong_type("read_key", "a string")),
        };
        let reading = require(obj, "reading", "reading")?;
        if !reading.is_object() {
            return Err(CompileError::wrong_type("reading", "an object"));
        }
        Ok(Reading {
            user_ts: require_str(obj, "reading", "user_ts")?,
            asset_code: require_str(obj, "reading", "asset_code")?,
            read_key,
            reading,
        })
    }

    /// Accepts `{"readings": [..]}` or a bare array.
    pub fn list_from_json(value: &'a Value) -> Result<Vec<Self>> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(obj) => match require(obj, "payload", "readings")? {
                Value::Array(items) => items,
                _ => return Err(CompileError::wrong_type("readings", "an array")),
            },
            _ => return Err(CompileError::wrong_type("readings", "an array")),
        };
        items.iter().map(Reading::from_json).collect()
    }
}
