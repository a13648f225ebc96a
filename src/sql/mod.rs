//! JSON request documents to PostgreSQL statements.
//!
//! ```text
//! JSON payload
//!       ↓
//! Typed document + validation  (types.rs)
//!       ↓
//! Statement compilers          (query.rs, mutation.rs, retention.rs)
//!       ↓                      where_clause.rs, literal.rs, timestamp.rs
//! SQL text                     (buffer.rs)
//!       ↓
//! Execution                    (db/ and store/ modules)
//! ```
//!
//! Compilation is pure and synchronous; every validation error is raised
//! before any SQL text is produced.

pub mod buffer;
pub mod compiler;
pub mod error;
pub mod literal;
pub mod mutation;
pub mod query;
pub mod retention;
pub mod timestamp;
pub mod types;
pub mod where_clause;

pub use buffer::SqlBuffer;
pub use compiler::{Compiler, DEFAULT_READINGS_TABLE, DEFAULT_SCHEMA};
pub use error::CompileError;
pub use literal::{escape, is_function_call, FunctionCalls, Literal};
pub use mutation::{ReadingBatch, SkippedReading};
pub use query::READINGS_TIMESTAMP_FORMAT;
pub use timestamp::{normalize, TimestampError};
pub use types::*;

/// Panics unless `sql` parses as PostgreSQL.
#[cfg(test)]
pub(crate) fn assert_parses(sql: &str) {
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        panic!("generated SQL does not parse: {}\n{}", e, sql);
    }
}
