use std::fmt;
use std::time::{Duration, Instant};

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::value::{Id, Row, Value};

/// Receives failures the engine raises, before they are propagated.
pub trait ErrorSink: Send + Sync {
    fn log_error(&self, context: &str, message: &str);
}

/// Default sink: emits a `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn log_error(&self, context: &str, message: &str) {
        tracing::error!(context = %context, detail = %message, "pivotal operation failed");
    }
}

static TRACING_SINK: TracingSink = TracingSink;

#[cfg(feature = "metrics")]
fn record_query_metrics(operation: &'static str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let labels = [("operation", operation)];
    metrics::histogram!("pivotal.query.duration_ms", &labels).record(elapsed_ms);
    metrics::counter!("pivotal.query.count", &labels).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_query_metrics(_operation: &'static str, _elapsed: Duration) {}

const SQL_ERROR: &str = "SQL execution error";

/// Everything an engine operation needs: one connection, an error sink and settings.
///
/// The executor logs every statement at `debug`, records query metrics when the
/// `metrics` feature is on, and turns driver failures into
/// [`Error::DataAccess`]. Operations report failures to the sink once, with
/// their own context, through [`Executor::failed`].
pub struct Executor<'e> {
    conn: &'e mut dyn Connection,
    sink: &'e dyn ErrorSink,
    settings: Settings,
}

impl fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("dialect", &self.conn.dialect())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<'e> Executor<'e> {
    pub fn new(conn: &'e mut dyn Connection) -> Self {
        Self {
            conn,
            sink: &TRACING_SINK,
            settings: Settings::default(),
        }
    }

    pub fn with_sink(mut self, sink: &'e dyn ErrorSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sends an error to the sink.
    pub fn report(&self, context: &str, err: &Error) {
        self.sink.log_error(context, &err.to_string());
    }

    /// Puts `context` on a data-access error, reports it and hands it back.
    pub fn failed(&self, context: impl Into<String>, err: Error) -> Error {
        let context = context.into();
        let err = err.with_context(context.clone());
        self.report(&context, &err);
        err
    }

    fn fail(&self, operation: &'static str, sql: &str, err: sqlx::Error) -> Error {
        let err = Error::data_access(SQL_ERROR, err);
        tracing::debug!(operation, sql = %sql, error = %err, "pivotal statement failed");
        err
    }

    fn trace(operation: &'static str, sql: &str, params: &[Value], elapsed: Duration) {
        record_query_metrics(operation, elapsed);
        tracing::debug!(
            operation,
            sql = %sql,
            params = params.len(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "pivotal statement"
        );
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let started = Instant::now();
        let result = self.conn.execute(sql, params).await;
        Self::trace("execute", sql, params, started.elapsed());
        result.map_err(|e| self.fail("execute", sql, e))
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let started = Instant::now();
        let result = self.conn.fetch_all(sql, params).await;
        Self::trace("select", sql, params, started.elapsed());
        result.map_err(|e| self.fail("select", sql, e))
    }

    pub async fn insert(&mut self, sql: &str, params: &[Value]) -> Result<Option<Id>> {
        let started = Instant::now();
        let result = self.conn.insert(sql, params).await;
        Self::trace("insert", sql, params, started.elapsed());
        result.map_err(|e| self.fail("insert", sql, e))
    }

    pub async fn begin(&mut self) -> Result<()> {
        tracing::debug!(operation = "begin", "pivotal transaction");
        let result = self.conn.begin().await;
        result.map_err(|e| self.fail("begin", "BEGIN", e))
    }

    pub async fn commit(&mut self) -> Result<()> {
        tracing::debug!(operation = "commit", "pivotal transaction");
        let result = self.conn.commit().await;
        result.map_err(|e| self.fail("commit", "COMMIT", e))
    }

    /// Rolls back; a failed rollback is reported but not returned.
    pub async fn rollback(&mut self) {
        tracing::debug!(operation = "rollback", "pivotal transaction");
        if let Err(e) = self.conn.rollback().await {
            let err = self.fail("rollback", "ROLLBACK", e);
            self.report("rollback", &err);
        }
    }
}
