use std::fmt;

/// Pivotal error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A statement or the driver underneath it failed.
    #[error("{context}: {}{message}", code_prefix(.code))]
    DataAccess {
        /// What the engine was doing when the failure happened.
        context: String,
        /// Driver error code (SQLSTATE or vendor code) when one was reported.
        code: Option<String>,
        /// Driver error message.
        message: String,
    },
    /// An association was asked to persist without knowing its owner or target.
    #[error("{0}")]
    Association(String),
    /// A collection was resolved as a type other than the one it holds.
    #[error("entity type mismatch: collection holds {expected}, requested {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// Settings or connection string could not be used.
    #[error("configuration error: {0}")]
    Config(String),
}

fn code_prefix(code: &Option<String>) -> impl fmt::Display + '_ {
    struct Prefix<'a>(&'a Option<String>);
    impl fmt::Display for Prefix<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.0 {
                Some(code) => write!(f, "[{}] ", code),
                None => Ok(()),
            }
        }
    }
    Prefix(code)
}

/// Result alias for Pivotal operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) const MISSING_OWNER: &str =
    "cannot persist an association without a known owner and relation type";

impl Error {
    /// Wraps a driver error, keeping its code and message.
    pub fn data_access(context: impl Into<String>, err: sqlx::Error) -> Self {
        let (code, message) = match err.as_database_error() {
            Some(db) => (db.code().map(|c| c.into_owned()), db.message().to_owned()),
            None => (None, err.to_string()),
        };
        Self::DataAccess {
            context: context.into(),
            code,
            message,
        }
    }

    /// Replaces the context of a data-access error; other variants pass through.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            Self::DataAccess { code, message, .. } => Self::DataAccess {
                context: context.into(),
                code,
                message,
            },
            other => other,
        }
    }

    /// Driver error code, if this is a data-access error that carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::DataAccess { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_data_access(&self) -> bool {
        matches!(self, Self::DataAccess { .. })
    }

    pub(crate) fn missing_owner() -> Self {
        Self::Association(MISSING_OWNER.to_owned())
    }
}
