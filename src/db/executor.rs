use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::SimpleQueryMessage;
use tracing::{debug, error};

use super::query::{is_select, BackendError, RawColumn, RawResult};

/// Connection failures are logged at most this often.
const CONNECT_ERROR_INTERVAL: Duration = Duration::from_secs(300);

/// Runs one SQL statement and hands back text rows.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<RawResult, BackendError>;
}

/// Executes statements on pooled PostgreSQL connections, one connection per
/// statement.
pub struct PgExecutor {
    pool: Pool,
    last_connect_error: Mutex<Option<Instant>>,
}

impl PgExecutor {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            last_connect_error: Mutex::new(None),
        }
    }

    fn connection_failed(&self, err: &dyn fmt::Display) -> BackendError {
        let now = Instant::now();
        let mut last = self
            .last_connect_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.map_or(true, |at| now.duration_since(at) >= CONNECT_ERROR_INTERVAL) {
            error!("failed to connect to PostgreSQL: {}", err);
            *last = Some(now);
        }
        BackendError::connection(format!("failed to connect to PostgreSQL: {}", err))
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<RawResult, BackendError> {
        let start = Instant::now();
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| self.connection_failed(&e))?;

        let result = if is_select(sql) {
            // Column type OIDs come from the prepared statement, values from
            // the text protocol.
            let statement = client
                .prepare(sql)
                .await
                .map_err(|e| BackendError::from_pg_error(&e, sql))?;
            let columns = statement
                .columns()
                .iter()
                .map(|c| RawColumn::new(c.name(), c.type_().oid()))
                .collect();
            let messages = client
                .simple_query(sql)
                .await
                .map_err(|e| BackendError::from_pg_error(&e, sql))?;
            let rows = messages
                .iter()
                .filter_map(|message| match message {
                    SimpleQueryMessage::Row(row) => Some(
                        (0..row.len())
                            .map(|i| row.get(i).map(str::to_string))
                            .collect(),
                    ),
                    _ => None,
                })
                .collect();
            RawResult {
                columns,
                rows,
                affected: 0,
            }
        } else {
            let messages = client
                .simple_query(sql)
                .await
                .map_err(|e| BackendError::from_pg_error(&e, sql))?;
            let affected = messages
                .iter()
                .map(|message| match message {
                    SimpleQueryMessage::CommandComplete(n) => *n,
                    _ => 0,
                })
                .sum();
            RawResult::affected(affected)
        };

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            rows = result.rows.len(),
            affected = result.affected,
            "statement complete"
        );
        Ok(result)
    }
}

/// In-memory executor: records every statement and replays scripted results.
///
/// Statements with nothing scripted get an empty result. Used for dry runs
/// and tests.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Result<RawResult, BackendError>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result for the next unanswered statement.
    pub fn respond(&self, result: RawResult) -> &Self {
        self.push(Ok(result))
    }

    /// Queues a failure for the next unanswered statement.
    pub fn fail(&self, err: BackendError) -> &Self {
        self.push(Err(err))
    }

    fn push(&self, response: Result<RawResult, BackendError>) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, sql: &str) -> Result<RawResult, BackendError> {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok(RawResult::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::ErrorCategory;

    #[tokio::test]
    async fn test_recording_executor_replays_in_order() {
        let exec = RecordingExecutor::new();
        exec.respond(RawResult::affected(2))
            .fail(BackendError::new(ErrorCategory::Semantic, "no such table"));

        assert_eq!(exec.execute("DELETE FROM t;").await.unwrap().affected, 2);
        let err = exec.execute("SELECT * FROM missing;").await.unwrap_err();
        assert_eq!(err.message, "no such table");
        assert_eq!(exec.execute("SELECT 1;").await.unwrap(), RawResult::default());
        assert_eq!(
            exec.statements(),
            vec!["DELETE FROM t;", "SELECT * FROM missing;", "SELECT 1;"]
        );
    }
}
