//! Statements behind the readings purge.

use super::buffer::SqlBuffer;
use super::compiler::Compiler;

impl Compiler {
    /// Age of the oldest reading in whole hours, NULL on an empty table.
    pub fn oldest_reading_age(&self) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str("SELECT round(extract(epoch FROM (now() - min(\"user_ts\"))) / 3600) FROM ");
        self.push_readings_table(&mut sql);
        sql.push(';');
        sql.coalesce()
    }

    /// Readings older than `age_hours` that have not been sent yet.
    pub fn count_unsent_older(&self, age_hours: u64, sent: u64) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str("SELECT count(*) FROM ");
        self.push_readings_table(&mut sql);
        push_older_than(age_hours, &mut sql);
        sql.push_str(" AND \"id\" > ").push_uint(sent).push(';');
        sql.coalesce()
    }

    /// Deletes readings older than `age_hours`. With `retain_unsent` only
    /// readings below the `sent` watermark are removed.
    pub fn purge_older(&self, age_hours: u64, retain_unsent: bool, sent: u64) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str("DELETE FROM ");
        self.push_readings_table(&mut sql);
        push_older_than(age_hours, &mut sql);
        if retain_unsent {
            sql.push_str(" AND \"id\" < ").push_uint(sent);
        }
        sql.push(';');
        sql.coalesce()
    }

    pub fn count_unsent(&self, sent: u64) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str("SELECT count(*) FROM ");
        self.push_readings_table(&mut sql);
        sql.push_str(" WHERE \"id\" > ").push_uint(sent).push(';');
        sql.coalesce()
    }

    pub fn count_readings(&self) -> String {
        let mut sql = SqlBuffer::new();
        sql.push_str("SELECT count(*) FROM ");
        self.push_readings_table(&mut sql);
        sql.push(';');
        sql.coalesce()
    }
}

fn push_older_than(age_hours: u64, sql: &mut SqlBuffer) {
    sql.push_str(" WHERE \"user_ts\" < now() - INTERVAL '")
        .push_uint(age_hours)
        .push_str(" hours'");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::assert_parses;

    #[test]
    fn test_purge_statements() {
        let c = Compiler::default();
        assert_eq!(
            c.purge_older(72, false, 500),
            "DELETE FROM \"foglamp\".\"readings\" WHERE \"user_ts\" < now() - INTERVAL '72 hours';"
        );
        assert_eq!(
            c.purge_older(72, true, 500),
            "DELETE FROM \"foglamp\".\"readings\" WHERE \"user_ts\" < now() - INTERVAL '72 hours' \
             AND \"id\" < 500;"
        );
        assert_eq!(
            c.count_unsent_older(1, 9),
            "SELECT count(*) FROM \"foglamp\".\"readings\" WHERE \"user_ts\" < now() - INTERVAL '1 hours' \
             AND \"id\" > 9;"
        );
        for sql in [
            c.purge_older(1, true, 2),
            c.count_unsent_older(1, 2),
            c.count_unsent(2),
            c.count_readings(),
            c.oldest_reading_age(),
        ] {
            assert_parses(&sql);
        }
    }

    #[test]
    fn test_oldest_age_in_hours() {
        let sql = Compiler::new("historian", "samples").oldest_reading_age();
        assert!(sql.contains("/ 3600"));
        assert!(sql.ends_with("FROM \"historian\".\"samples\";"));
    }
}
