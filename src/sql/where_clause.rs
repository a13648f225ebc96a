/// WHERE clause compiler.
///
/// `and`/`or` children are appended as flat text with no parentheses, so
/// `{a, and: b, or: c}` reads `a AND b OR c` and binds with normal SQL
/// precedence. Values are always quoted; a string shaped like a function
/// call is compared as text here.
use serde_json::Value;

use super::buffer::SqlBuffer;
use super::error::Result;
use super::literal::FunctionCalls;
use super::types::{Condition, Predicate, WhereClause};

/// Appends the clause body (without the `WHERE` keyword).
pub fn compile(clause: &WhereClause<'_>, sql: &mut SqlBuffer) {
    match clause {
        WhereClause::Predicate(predicate) => compile_predicate(predicate, sql),
        WhereClause::And(left, right) => {
            compile(left, sql);
            sql.push_str(" AND ");
            compile(right, sql);
        }
        WhereClause::Or(left, right) => {
            compile(left, sql);
            sql.push_str(" OR ");
            compile(right, sql);
        }
    }
}

/// Validates and compiles a JSON where object in one step.
pub fn compile_json(value: &Value) -> Result<String> {
    let clause = WhereClause::from_json(value)?;
    let mut sql = SqlBuffer::new();
    compile(&clause, &mut sql);
    Ok(sql.coalesce())
}

/// `1 = 1` style filters name a number instead of a column.
fn is_numeric(column: &str) -> bool {
    column.parse::<f64>().is_ok_and(f64::is_finite)
}

fn compile_predicate(predicate: &Predicate<'_>, sql: &mut SqlBuffer) {
    if is_numeric(predicate.column) {
        sql.push_str(predicate.column);
    } else {
        sql.push_identifier(predicate.column);
    }
    sql.push(' ');

    match &predicate.condition {
        Condition::Older(seconds) => {
            sql.push_str("< now() - INTERVAL '")
                .push_int(*seconds)
                .push_str(" seconds'");
        }
        Condition::Newer(seconds) => {
            sql.push_str("> now() - INTERVAL '")
                .push_int(*seconds)
                .push_str(" seconds'");
        }
        Condition::In { negated, values } => {
            sql.push_str(if *negated { "not in ( " } else { "in ( " });
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_literal(value, FunctionCalls::Quote);
            }
            sql.push_str(" )");
        }
        Condition::Compare { operator, value } => {
            sql.push_str(operator)
                .push(' ')
                .push_literal(value, FunctionCalls::Quote);
        }
    }
}
