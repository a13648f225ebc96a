/// Literal encoding for SQL text.
///
/// The only escaping rule is doubling of single quotes inside quoted strings;
/// statements target PostgreSQL with `standard_conforming_strings` on, where
/// backslashes carry no special meaning.
use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*\(.*\)$").expect("function call pattern")
});

/// Whether quoted strings shaped like a function call are passed to SQL as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCalls {
    /// `now()` is emitted unquoted and evaluated by the backend.
    Verbatim,
    /// Every string is quoted.
    Quote,
}

/// A JSON value that can be rendered as a SQL literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'a> {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(&'a str),
    /// Stored as compact JSON text in a jsonb column.
    Object(&'a Value),
}

impl<'a> Literal<'a> {
    /// Classifies a JSON value. Arrays have no literal form and yield `None`.
    pub fn from_json(value: &'a Value) -> Option<Self> {
        match value {
            Value::Null => Some(Literal::Null),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Literal::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Some(Literal::UInt(u))
                } else {
                    n.as_f64().map(Literal::Float)
                }
            }
            Value::String(s) => Some(Literal::Str(s)),
            Value::Object(_) => Some(Literal::Object(value)),
            Value::Array(_) => None,
        }
    }

    /// Renders the literal as standalone SQL text.
    pub fn encode(&self, calls: FunctionCalls) -> String {
        let mut buf = super::buffer::SqlBuffer::new();
        buf.push_literal(self, calls);
        buf.coalesce()
    }
}

/// True when the whole string looks like `identifier(...)`.
///
/// Such strings are treated as SQL expressions wherever function calls are
/// allowed, even when the caller meant them as data.
pub fn is_function_call(s: &str) -> bool {
    FUNCTION_CALL.is_match(s)
}

/// Doubles every single quote. Borrows the input when it contains none.
pub fn escape(s: &str) -> Cow<'_, str> {
    if s.contains('\'') {
        Cow::Owned(s.replace('\'', "''"))
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_call_detection() {
        assert!(is_function_call("now()"));
        assert!(is_function_call("to_timestamp(1500000000)"));
        assert!(is_function_call("f(x, 'y')"));
        assert!(is_function_call("a_1(()"));
        assert!(!is_function_call("now"));
        assert!(!is_function_call("1now()"));
        assert!(!is_function_call("_x()"));
        assert!(!is_function_call("now() "));
        assert!(!is_function_call("select now()"));
        assert!(!is_function_call("O'Brien"));
    }

    #[test]
    fn test_escape_borrows_when_clean() {
        assert!(matches!(escape("plain"), Cow::Borrowed("plain")));
        assert_eq!(escape("O'Brien"), "O''Brien");
        assert_eq!(escape("''"), "''''");
    }

    #[test]
    fn test_encode_function_call_unquoted() {
        assert_eq!(Literal::Str("now()").encode(FunctionCalls::Verbatim), "now()");
        let once = Literal::Str("now()").encode(FunctionCalls::Verbatim);
        assert_eq!(Literal::Str(&once).encode(FunctionCalls::Verbatim), once);
    }

    #[test]
    fn test_encode_quotes_strings() {
        assert_eq!(
            Literal::Str("O'Brien").encode(FunctionCalls::Verbatim),
            "'O''Brien'"
        );
        assert_eq!(Literal::Str("now()").encode(FunctionCalls::Quote), "'now()'");
        // backslashes and double quotes are left alone
        assert_eq!(
            Literal::Str(r#"a\b"c"#).encode(FunctionCalls::Quote),
            r#"'a\b"c'"#
        );
    }

    #[test]
    fn test_encode_numbers() {
        let v = json!([42, -7, 18446744073709551615u64, 2.5, 1e-7]);
        let encoded: Vec<String> = v
            .as_array()
            .unwrap()
            .iter()
            .map(|n| Literal::from_json(n).unwrap().encode(FunctionCalls::Quote))
            .collect();
        assert_eq!(
            encoded,
            vec!["42", "-7", "18446744073709551615", "2.5", "0.0000001"]
        );
    }

    #[test]
    fn test_encode_object_as_json_text() {
        let v = json!({"name": "O'Brien", "n": 1});
        let lit = Literal::from_json(&v).unwrap();
        assert_eq!(
            lit.encode(FunctionCalls::Verbatim),
            r#"'{"name":"O''Brien","n":1}'"#
        );
    }

    #[test]
    fn test_from_json_rejects_arrays() {
        assert!(Literal::from_json(&json!([1, 2])).is_none());
        assert_eq!(Literal::from_json(&json!(null)), Some(Literal::Null));
        assert_eq!(Literal::from_json(&json!(true)), Some(Literal::Bool(true)));
    }
}
