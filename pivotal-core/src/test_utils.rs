//! Helpers for tests that need a live database.

use std::sync::Mutex;

use crate::connection::Connection;
use crate::error::Result;
use crate::executor::{ErrorSink, Executor};

/// Opens a private in-memory SQLite connection.
#[cfg(feature = "sqlite")]
pub async fn memory_sqlite() -> Result<Box<dyn Connection>> {
    crate::connection::connect("sqlite::memory:").await
}

/// Runs each `;`-separated statement of a schema script.
pub async fn apply_schema(ex: &mut Executor<'_>, script: &str) -> Result<()> {
    for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        ex.execute(statement, &[]).await?;
    }
    Ok(())
}

/// An [`ErrorSink`] that keeps every `(context, message)` pair it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl ErrorSink for RecordingSink {
    fn log_error(&self, context: &str, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((context.to_owned(), message.to_owned()));
    }
}
