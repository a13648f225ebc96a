use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// SQLSTATE for `invalid_text_representation`.
pub const SQLSTATE_TYPE_CONVERSION: &str = "22P02";

/// Categorized error types for SQL statement failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (bad input value, constraint violation)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors, including an exhausted pool
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// A failure reported by the execution port, with whatever context the
/// server attached to it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub category: ErrorCategory,
    /// SQLSTATE error code, empty for client-side failures.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Character position in the statement (1-based byte offset)
    pub position: Option<u32>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
    /// Computed line number (1-based) from position, if available
    pub line: Option<usize>,
    /// Computed column number (1-based) from position, if available
    pub col: Option<usize>,
}

impl BackendError {
    /// Builds a BackendError from a tokio_postgres error, using the statement
    /// text to compute line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, sql: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(sql, pos as usize),
                None => (None, None),
            };

            BackendError {
                category: categorize_sqlstate(&code),
                code,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                position,
                table: db_err.table().map(|s| s.to_string()),
                column: db_err.column().map(|s| s.to_string()),
                constraint: db_err.constraint().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.source().is_some() || err.is_closed() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            BackendError {
                detail: err.source().map(|e| e.to_string()),
                ..BackendError::new(category, err.to_string())
            }
        }
    }

    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        BackendError {
            category,
            code: String::new(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            table: None,
            column: None,
            constraint: None,
            line: None,
            col: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Connection, message)
    }

    /// A value could not be converted to the column type.
    pub fn is_type_conversion(&self) -> bool {
        self.code == SQLSTATE_TYPE_CONVERSION
    }

    /// Multi-line report for logs and the command line.
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{}: {}", self.category, self.message));

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            lines.push(format!("  SQLSTATE: {}", self.code));
        }
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => lines.push(format!("  Column: {}.{}", table, column)),
            (Some(table), None) => lines.push(format!("  Table: {}", table)),
            _ => {}
        }
        if let Some(constraint) = &self.constraint {
            lines.push(format!("  Constraint: {}", constraint));
        }

        lines.join("\n")
    }
}

/// Convert a 1-based byte offset in a statement to (line, column) both 1-based.
fn byte_offset_to_line_col(sql: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || sql.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(sql.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in sql.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
pub fn categorize_sqlstate(code: &str) -> ErrorCategory {
    match code.get(..2) {
        // Class 42: Syntax Error or Access Rule Violation
        Some("42") => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        // Class 22: Data Exception (22P02 = invalid_text_representation)
        Some("22") => ErrorCategory::Execution,
        // Class 23: Integrity Constraint Violation
        Some("23") => ErrorCategory::Execution,
        Some("25" | "40") => ErrorCategory::Transaction,
        // Class 08: Connection Exception
        Some("08") => ErrorCategory::Connection,
        Some("53" | "54" | "55" | "57") => ErrorCategory::Execution,
        _ => ErrorCategory::Unknown,
    }
}

/// Result column as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    /// PostgreSQL type OID, e.g. 23 for int4.
    pub type_oid: u32,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
        }
    }
}

/// Text-format rows plus column metadata, straight off the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<RawColumn>,
    /// `None` is SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
    /// Rows touched by INSERT/UPDATE/DELETE.
    pub affected: u64,
}

impl RawResult {
    pub fn affected(affected: u64) -> Self {
        Self {
            affected,
            ..Self::default()
        }
    }

    /// A one-row, one-column result, as returned by `SELECT count(*)`.
    pub fn scalar(name: &str, type_oid: u32, value: Option<&str>) -> Self {
        Self {
            columns: vec![RawColumn::new(name, type_oid)],
            rows: vec![vec![value.map(str::to_string)]],
            affected: 0,
        }
    }

    /// First cell of the first row, if any and not NULL.
    pub fn first_value(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}

/// Whether the statement returns rows rather than an affected count.
pub fn is_select(sql: &str) -> bool {
    let head = sql.trim_start();
    ["SELECT", "WITH", "SHOW", "TABLE"]
        .iter()
        .any(|kw| head.get(..kw.len()).is_some_and(|h| h.eq_ignore_ascii_case(kw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Syntax.to_string(), "Syntax Error");
        assert_eq!(ErrorCategory::Semantic.to_string(), "Semantic Error");
        assert_eq!(ErrorCategory::Execution.to_string(), "Execution Error");
        assert_eq!(ErrorCategory::Transaction.to_string(), "Transaction Error");
        assert_eq!(ErrorCategory::Connection.to_string(), "Connection Error");
        assert_eq!(ErrorCategory::Unknown.to_string(), "Error");
    }

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("22P02"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("23505"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("40001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("X"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_type_conversion_detection() {
        let mut err = BackendError::new(ErrorCategory::Execution, "invalid input syntax");
        assert!(!err.is_type_conversion());
        err.code = "22P02".to_string();
        assert!(err.is_type_conversion());
        assert_eq!(err.to_string(), "invalid input syntax");
    }

    #[test]
    fn test_report() {
        let err = BackendError {
            code: "42703".to_string(),
            hint: Some("Perhaps you meant \"asset_code\".".to_string()),
            line: Some(1),
            col: Some(8),
            ..BackendError::new(ErrorCategory::Semantic, "column \"asset\" does not exist")
        };
        let report = err.report();
        assert!(report.starts_with("Semantic Error: column \"asset\" does not exist"));
        assert!(report.contains("at line 1, column 8"));
        assert!(report.contains("SQLSTATE: 42703"));
        assert!(report.contains("Hint: Perhaps"));
    }

    #[test]
    fn test_byte_offset_to_line_col() {
        assert_eq!(byte_offset_to_line_col("SELECT x", 8), (Some(1), Some(8)));
        assert_eq!(
            byte_offset_to_line_col("SELECT\n  x FROM t", 10),
            (Some(2), Some(3))
        );
        assert_eq!(byte_offset_to_line_col("", 5), (Some(1), Some(1)));
    }

    #[test]
    fn test_is_select() {
        assert!(is_select("SELECT 1;"));
        assert!(is_select("  select count(*) FROM t;"));
        assert!(is_select("WITH x AS (SELECT 1) SELECT * FROM x;"));
        assert!(!is_select("DELETE FROM t;"));
        assert!(!is_select("INSERT INTO t VALUES (1);"));
        assert!(!is_select("SEL"));
    }

    #[test]
    fn test_raw_result_helpers() {
        let r = RawResult::scalar("count", 20, Some("42"));
        assert_eq!(r.first_value(), Some("42"));
        assert_eq!(RawResult::scalar("min", 701, None).first_value(), None);
        assert_eq!(RawResult::affected(3).affected, 3);
        assert_eq!(RawResult::default().first_value(), None);
    }
}
