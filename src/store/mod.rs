//! Storage operations: compile, execute, materialize.
//!
//! [`Storage`] is the request boundary. Each operation validates its payload
//! into a typed document, compiles it, runs the statement(s) through the
//! [`Executor`] and shapes the reply.

mod error;
mod purge;

pub use error::StoreError;
pub use purge::{PurgeFailure, PurgeFlags, PurgeStep, PurgeSummary};

use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::db::{materialize, BackendError, ErrorCategory, Executor, NullPolicy, RawResult, ResultSet};
use crate::sql::{CompileError, Compiler, SkippedReading};

/// Statement tags used when logging SQL.
pub mod tag {
    pub const RETRIEVE: &str = "CommonRetrieve";
    pub const INSERT: &str = "CommonInsert";
    pub const UPDATE: &str = "CommonUpdate";
    pub const DELETE: &str = "CommonDelete";
    pub const APPEND: &str = "ReadingsAppend";
    pub const FETCH: &str = "ReadingsFetch";
    pub const PURGE: &str = "ReadingsPurge";
    pub const TABLE_SIZE: &str = "TableSize";
}

/// A storage request, minus its table and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Retrieve,
    Insert,
    Update,
    Delete,
    AppendReadings,
    FetchReadings { id: u64, size: u64 },
    PurgeReadings { age: u64, flags: PurgeFlags, sent: u64 },
    TableSize,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Retrieve => "retrieve",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::AppendReadings => "appendReadings",
            Operation::FetchReadings { .. } => "fetchReadings",
            Operation::PurgeReadings { .. } => "purgeReadings",
            Operation::TableSize => "tableSize",
        }
    }
}

/// Outcome of a bulk append.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppendSummary {
    pub added: u64,
    pub skipped: Vec<SkippedReading>,
}

pub struct Storage<E> {
    executor: E,
    compiler: Compiler,
    null_policy: NullPolicy,
    log_sql: bool,
}

impl<E: Executor> Storage<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            compiler: Compiler::default(),
            null_policy: NullPolicy::default(),
            log_sql: false,
        }
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_null_policy(mut self, null_policy: NullPolicy) -> Self {
        self.null_policy = null_policy;
        self
    }

    /// Log every statement at info level instead of debug.
    pub fn with_sql_logging(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub(crate) async fn run(&self, tag: &'static str, sql: &str) -> Result<RawResult, BackendError> {
        if self.log_sql {
            info!(tag, "{}", sql);
        } else {
            debug!(tag, "{}", sql);
        }
        self.executor.execute(sql).await.map_err(|e| {
            error!(tag, "{}", e.report());
            e
        })
    }

    pub async fn retrieve(&self, table: &str, payload: Option<&Value>) -> Result<ResultSet, StoreError> {
        let sql = self.compiler.retrieve(table, payload)?;
        let raw = self.run(tag::RETRIEVE, &sql).await?;
        Ok(materialize(&raw, self.null_policy))
    }

    pub async fn insert(&self, table: &str, payload: &Value) -> Result<u64, StoreError> {
        let sql = self.compiler.insert(table, payload)?;
        Ok(self.run(tag::INSERT, &sql).await?.affected)
    }

    /// Sends every update operation as one multi-statement batch, which the
    /// server runs as a single implicit transaction. Fails when nothing was
    /// touched.
    pub async fn update(&self, table: &str, payload: &Value) -> Result<u64, StoreError> {
        let batch = self.compiler.update(table, payload)?.join(" ");
        let affected = self.run(tag::UPDATE, &batch).await?.affected;
        if affected == 0 {
            return Err(StoreError::NoRowsUpdated);
        }
        Ok(affected)
    }

    pub async fn delete(&self, table: &str, payload: Option<&Value>) -> Result<u64, StoreError> {
        let sql = self.compiler.delete(table, payload)?;
        Ok(self.run(tag::DELETE, &sql).await?.affected)
    }

    pub async fn append_readings(&self, payload: &Value) -> Result<AppendSummary, StoreError> {
        let batch = self.compiler.append_readings(payload)?;
        let added = match &batch.sql {
            Some(sql) => self.run(tag::APPEND, sql).await?.affected,
            None => 0,
        };
        Ok(AppendSummary {
            added,
            skipped: batch.skipped,
        })
    }

    pub async fn fetch_readings(&self, id: u64, size: u64) -> Result<ResultSet, StoreError> {
        let sql = self.compiler.fetch_readings(id, size);
        let raw = self.run(tag::FETCH, &sql).await?;
        Ok(materialize(&raw, self.null_policy))
    }

    /// Size of `table` in bytes, indexes included.
    pub async fn table_size(&self, table: &str) -> Result<i64, StoreError> {
        let sql = self.compiler.table_size(table);
        let raw = self.run(tag::TABLE_SIZE, &sql).await?;
        match raw.first_value() {
            Some(size) => size.parse::<i64>().map_err(|_| {
                StoreError::from(BackendError::new(
                    ErrorCategory::Unknown,
                    format!("unexpected table size value {:?}", size),
                ))
            }),
            None => Err(BackendError::new(
                ErrorCategory::Semantic,
                format!("table \"{}\" does not exist", table),
            )
            .into()),
        }
    }

    /// Parses `payload` and dispatches `operation`, returning the JSON reply.
    ///
    /// An empty payload means "no conditions" for retrieve and delete.
    pub async fn handle(
        &self,
        operation: Operation,
        table: &str,
        payload: &str,
    ) -> Result<Value, StoreError> {
        let result = self.dispatch(operation, table, payload).await;
        if let Err(e) = &result {
            error!(operation = operation.name(), table, "{}", e);
        }
        result
    }

    async fn dispatch(
        &self,
        operation: Operation,
        table: &str,
        payload: &str,
    ) -> Result<Value, StoreError> {
        let document = if payload.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(payload).map_err(CompileError::from)?)
        };

        let reply = match operation {
            Operation::Retrieve => self.retrieve(table, document.as_ref()).await?.to_json(),
            Operation::Insert => {
                let n = self.insert(table, required(&document)?).await?;
                json!({"response": "inserted", "rows_affected": n})
            }
            Operation::Update => {
                let n = self.update(table, required(&document)?).await?;
                json!({"response": "updated", "rows_affected": n})
            }
            Operation::Delete => {
                let n = self.delete(table, document.as_ref()).await?;
                json!({"response": "deleted", "rows_affected": n})
            }
            Operation::AppendReadings => {
                let summary = self.append_readings(required(&document)?).await?;
                json!({
                    "response": "appended",
                    "readings_added": summary.added,
                    "readings_skipped": summary.skipped.len(),
                })
            }
            Operation::FetchReadings { id, size } => self.fetch_readings(id, size).await?.to_json(),
            Operation::PurgeReadings { age, flags, sent } => {
                let summary = self.purge_readings(age, flags, sent).await?;
                serde_json::to_value(&summary).map_err(CompileError::from)?
            }
            Operation::TableSize => json!({"size": self.table_size(table).await?}),
        };
        Ok(reply)
    }
}

fn required(document: &Option<Value>) -> Result<&Value, StoreError> {
    document.as_ref().ok_or_else(|| {
        let err = <serde_json::Error as serde::de::Error>::custom("the payload must not be empty");
        StoreError::Validation(CompileError::InvalidPayload(err))
    })
}
