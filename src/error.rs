//! Error types surfaced by the table store.

use thiserror::Error;

use crate::record::FieldError;

pub type Result<T> = std::result::Result<T, Error>;

/// Flat classification of [`Error`], for callers that map failures to
/// responses (e.g. `NotFound` to a 404).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Open,
    Execution,
    Decode,
    Encode,
    NotFound,
    Schema,
    InvalidArgument,
    Cancelled,
    DeadlineExceeded,
}

/// Failure of a single store round-trip, before it is attributed to a
/// record type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("connection mutex poisoned")]
    Poisoned,
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("error opening database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("error executing {record} statement `{statement}`: {source}")]
    Execution {
        record: &'static str,
        statement: String,
        #[source]
        source: StoreError,
    },

    #[error("error scanning {record}: {source}")]
    Decode {
        record: &'static str,
        #[source]
        source: FieldError,
    },

    #[error("error serializing {record}: {source}")]
    Encode {
        record: &'static str,
        #[source]
        source: FieldError,
    },

    #[error("{record} not found")]
    NotFound { record: &'static str },

    #[error("{record}: column `{column}` has unsupported kind {kind}")]
    UnsupportedColumn {
        record: &'static str,
        column: String,
        kind: &'static str,
    },

    #[error("{record} has no column named `{column}`")]
    UnknownColumn { record: &'static str, column: String },

    #[error("{record}: nothing to update")]
    EmptyUpdate { record: &'static str },

    #[error("{record} has no `id` column")]
    MissingPrimaryKey { record: &'static str },

    #[error("{record} statement `{statement}` cancelled")]
    Cancelled {
        record: &'static str,
        statement: String,
    },

    #[error("{record} statement `{statement}` exceeded its deadline")]
    DeadlineExceeded {
        record: &'static str,
        statement: String,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. } => ErrorKind::Open,
            Error::Execution { .. } => ErrorKind::Execution,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Encode { .. } => ErrorKind::Encode,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::UnsupportedColumn { .. } | Error::MissingPrimaryKey { .. } => ErrorKind::Schema,
            Error::UnknownColumn { .. } | Error::EmptyUpdate { .. } => ErrorKind::InvalidArgument,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Attributes a failed round-trip to a record type and statement.
    pub(crate) fn from_store(record: &'static str, statement: &str, err: StoreError) -> Self {
        let statement = statement.to_string();
        match err {
            StoreError::Cancelled => Error::Cancelled { record, statement },
            StoreError::DeadlineExceeded => Error::DeadlineExceeded { record, statement },
            source => Error::Execution {
                record,
                statement,
                source,
            },
        }
    }
}
