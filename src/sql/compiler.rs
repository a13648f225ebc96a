use super::buffer::SqlBuffer;

pub const DEFAULT_SCHEMA: &str = "foglamp";
pub const DEFAULT_READINGS_TABLE: &str = "readings";

/// Statement compiler bound to a schema.
///
/// Holds only immutable configuration, so a single instance can be shared by
/// every request. The statement builders live in `query`, `mutation` and
/// `retention`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiler {
    schema: String,
    readings_table: String,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA, DEFAULT_READINGS_TABLE)
    }
}

impl Compiler {
    pub fn new(schema: impl Into<String>, readings_table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            readings_table: readings_table.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn readings_table(&self) -> &str {
        &self.readings_table
    }

    /// The readings table gets formatted timestamps by default.
    pub fn is_readings(&self, table: &str) -> bool {
        table == self.readings_table
    }

    /// Appends `"schema"."table"`.
    pub(crate) fn push_table(&self, table: &str, sql: &mut SqlBuffer) {
        sql.push_identifier(&self.schema)
            .push('.')
            .push_identifier(table);
    }

    pub(crate) fn push_readings_table(&self, sql: &mut SqlBuffer) {
        self.push_table(&self.readings_table, sql);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema() {
        let compiler = Compiler::default();
        assert_eq!(compiler.schema(), "foglamp");
        assert!(compiler.is_readings("readings"));
        assert!(!compiler.is_readings("statistics"));
    }

    #[test]
    fn test_table_name_is_qualified() {
        let compiler = Compiler::new("historian", "samples");
        let mut sql = SqlBuffer::new();
        compiler.push_readings_table(&mut sql);
        assert_eq!(sql.coalesce(), "\"historian\".\"samples\"");
    }
}
