//! Chunked SQL text accumulator.

use std::fmt::Write as _;

use super::literal::{escape, is_function_call, FunctionCalls, Literal};

const CHUNK_SIZE: usize = 1024;

/// Append-only text builder for SQL statements.
///
/// Statements are assembled from many small fragments, so text is collected
/// in fixed-capacity chunks and copied into one contiguous `String` only once,
/// by [`SqlBuffer::coalesce`]. `coalesce` consumes the buffer.
#[derive(Debug, Default)]
pub struct SqlBuffer {
    chunks: Vec<String>,
    len: usize,
}

impl SqlBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn tail(&mut self, additional: usize) -> &mut String {
        let needs_chunk = match self.chunks.last() {
            Some(last) => last.capacity() - last.len() < additional,
            None => true,
        };
        if needs_chunk {
            self.chunks
                .push(String::with_capacity(CHUNK_SIZE.max(additional)));
        }
        self.len += additional;
        // A chunk was pushed above when the list was empty.
        let last = self.chunks.len() - 1;
        &mut self.chunks[last]
    }

    pub fn push_str(&mut self, s: &str) -> &mut Self {
        if !s.is_empty() {
            self.tail(s.len()).push_str(s);
        }
        self
    }

    pub fn push(&mut self, c: char) -> &mut Self {
        self.tail(c.len_utf8()).push(c);
        self
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        let mut digits = String::with_capacity(20);
        let _ = write!(digits, "{}", value);
        self.push_str(&digits)
    }

    pub fn push_uint(&mut self, value: u64) -> &mut Self {
        let mut digits = String::with_capacity(20);
        let _ = write!(digits, "{}", value);
        self.push_str(&digits)
    }

    /// Rust float formatting is locale independent and round-trips exactly.
    pub fn push_float(&mut self, value: f64) -> &mut Self {
        let mut digits = String::with_capacity(24);
        let _ = write!(digits, "{}", value);
        self.push_str(&digits)
    }

    /// Appends a double-quoted identifier, doubling embedded quotes.
    pub fn push_identifier(&mut self, name: &str) -> &mut Self {
        self.push('"');
        if name.contains('"') {
            self.push_str(&name.replace('"', "\"\""));
        } else {
            self.push_str(name);
        }
        self.push('"')
    }

    /// Appends `'text'` with embedded single quotes doubled.
    pub fn push_quoted(&mut self, text: &str) -> &mut Self {
        self.push('\'');
        self.push_str(&escape(text));
        self.push('\'')
    }

    /// Appends a literal value.
    ///
    /// With [`FunctionCalls::Verbatim`], a string shaped like `name(...)` is
    /// emitted as SQL rather than as a quoted string.
    pub fn push_literal(&mut self, literal: &Literal<'_>, calls: FunctionCalls) -> &mut Self {
        match literal {
            Literal::Null => self.push_str("NULL"),
            Literal::Bool(true) => self.push_str("TRUE"),
            Literal::Bool(false) => self.push_str("FALSE"),
            Literal::Int(i) => self.push_int(*i),
            Literal::UInt(u) => self.push_uint(*u),
            Literal::Float(f) => self.push_float(*f),
            Literal::Str(s) => {
                if calls == FunctionCalls::Verbatim && is_function_call(s) {
                    self.push_str(s)
                } else {
                    self.push_quoted(s)
                }
            }
            Literal::Object(value) => self.push_quoted(&value.to_string()),
        }
    }

    /// Appends the contents of another buffer.
    pub fn append(&mut self, other: SqlBuffer) -> &mut Self {
        for chunk in other.chunks {
            self.push_str(&chunk);
        }
        self
    }

    /// Materializes the statement as one contiguous string.
    pub fn coalesce(self) -> String {
        let mut out = String::with_capacity(self.len);
        for chunk in &self.chunks {
            out.push_str(chunk);
        }
        out
    }
}
