//! Optional Python bindings for pgstore via PyO3.
//!
//! Exposes the statement compiler so tooling can preview the SQL a request
//! document produces without a database. Enabled with the `python` feature.
//!
//! ## Usage from Python
//!
//! ```python
//! import pgstore
//!
//! sql = pgstore.compile_query("log", '{"where": {"column": "code", "condition": "=", "value": "PURGE"}}')
//! print(sql)  # SELECT * FROM "foglamp"."log" WHERE "code" = 'PURGE';
//!
//! pgstore.normalize_timestamp("2019-01-01 10:00:00")  # '2019-01-01 10:00:00.000000+00:00'
//! ```

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use serde_json::Value;

use crate::sql::{self, Compiler};

fn compiler(schema: Option<&str>) -> Compiler {
    match schema {
        Some(schema) => Compiler::new(schema, sql::DEFAULT_READINGS_TABLE),
        None => Compiler::default(),
    }
}

fn parse(payload: &str) -> PyResult<Value> {
    serde_json::from_str(payload).map_err(|e| PyValueError::new_err(format!("Invalid JSON: {}", e)))
}

fn invalid(err: sql::CompileError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Compile a query document into a SELECT.
///
/// Args:
///     table: Table name.
///     payload: JSON query document; empty selects every row.
///     schema: Schema name, "foglamp" by default.
///
/// Raises:
///     ValueError: If the document is invalid.
#[pyfunction]
#[pyo3(signature = (table, payload = "", schema = None))]
fn compile_query(table: &str, payload: &str, schema: Option<&str>) -> PyResult<String> {
    let document = if payload.trim().is_empty() {
        None
    } else {
        Some(parse(payload)?)
    };
    compiler(schema)
        .retrieve(table, document.as_ref())
        .map_err(invalid)
}

#[pyfunction]
#[pyo3(signature = (table, payload, schema = None))]
fn compile_insert(table: &str, payload: &str, schema: Option<&str>) -> PyResult<String> {
    compiler(schema).insert(table, &parse(payload)?).map_err(invalid)
}

/// Compile an update document. Returns one statement per update operation.
#[pyfunction]
#[pyo3(signature = (table, payload, schema = None))]
fn compile_update(table: &str, payload: &str, schema: Option<&str>) -> PyResult<Vec<String>> {
    compiler(schema).update(table, &parse(payload)?).map_err(invalid)
}

#[pyfunction]
#[pyo3(signature = (table, payload = "", schema = None))]
fn compile_delete(table: &str, payload: &str, schema: Option<&str>) -> PyResult<String> {
    let document = if payload.trim().is_empty() {
        None
    } else {
        Some(parse(payload)?)
    };
    compiler(schema)
        .delete(table, document.as_ref())
        .map_err(invalid)
}

/// Compile a batch of readings into a multi-row INSERT.
///
/// Returns:
///     A tuple of the statement (None when every reading was rejected) and
///     the indexes of rejected readings.
#[pyfunction]
#[pyo3(signature = (payload, schema = None))]
fn compile_append(payload: &str, schema: Option<&str>) -> PyResult<(Option<String>, Vec<usize>)> {
    let batch = compiler(schema)
        .append_readings(&parse(payload)?)
        .map_err(invalid)?;
    let skipped = batch.skipped.iter().map(|s| s.index).collect();
    Ok((batch.sql, skipped))
}

/// Normalize a reading timestamp to microsecond precision with a UTC offset.
///
/// Raises:
///     ValueError: If the timestamp cannot be parsed.
#[pyfunction]
fn normalize_timestamp(ts: &str) -> PyResult<String> {
    sql::normalize(ts).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Escape single quotes for use inside a SQL string literal.
#[pyfunction]
fn escape(text: &str) -> String {
    sql::escape(text).into_owned()
}

/// pgstore Python module.
#[pymodule]
fn _pgstore(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(compile_query, m)?)?;
    m.add_function(wrap_pyfunction!(compile_insert, m)?)?;
    m.add_function(wrap_pyfunction!(compile_update, m)?)?;
    m.add_function(wrap_pyfunction!(compile_delete, m)?)?;
    m.add_function(wrap_pyfunction!(compile_append, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_timestamp, m)?)?;
    m.add_function(wrap_pyfunction!(escape, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
