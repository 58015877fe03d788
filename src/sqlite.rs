use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, InterruptHandle, ToSql};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result, StoreError};

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    /// Name of the variant, used in type mismatch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Boolean(_) => "boolean",
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
        })
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(f) => Value::Real(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Blob(b),
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from!(
    i64 => Integer,
    i32 => Integer,
    i16 => Integer,
    i8 => Integer,
    u32 => Integer,
    u16 => Integer,
    u8 => Integer,
    f64 => Real,
    f32 => Real,
    bool => Boolean,
    String => Text,
    &str => Text,
    Vec<u8> => Blob,
    &[u8] => Blob,
);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// SQL statement with positionally bound parameters (`?1`, `?2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Appends a parameter and returns its placeholder.
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        format!("?{}", self.params.len())
    }
}

/// One fetched row, as `(column, value)` pairs in select order.
pub type Row = Vec<(String, Value)>;

const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// How long a statement waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Shared handle to one SQLite connection.
///
/// Statements run one at a time on tokio's blocking pool. A call whose
/// context fires while its statement holds the connection interrupts
/// that statement; calls still waiting for the connection just give up.
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    // Id of the call currently holding the connection, guarded so an
    // interrupt can only land on the statement of the call that asked.
    active: Arc<Mutex<Option<u64>>>,
    next_call: Arc<AtomicU64>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let open_err = |source| Error::Open {
            path: config.db_path.clone(),
            source,
        };
        let connection = if config.db_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.db_path)
        }
        .map_err(open_err)?;
        connection
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(open_err)?;
        debug!(path = %config.db_path, "opened sqlite database");
        Ok(Self::from_connection(connection))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&SqliteConfig::in_memory())
    }

    pub fn from_connection(connection: Connection) -> Self {
        let interrupt = connection.get_interrupt_handle();
        Self {
            connection: Arc::new(Mutex::new(connection)),
            interrupt: Arc::new(interrupt),
            active: Arc::new(Mutex::new(None)),
            next_call: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Runs a statement that returns no rows; yields the affected row count.
    pub async fn execute(
        &self,
        ctx: &Context,
        query: &SqlQuery,
    ) -> std::result::Result<usize, StoreError> {
        debug!(statement = %query.statement, params = ?query.params, "executing statement");
        let query = query.clone();
        self.with_connection(ctx, move |conn| {
            conn.execute(&query.statement, params_from_iter(query.params.iter()))
        })
        .await
    }

    /// Runs a query and materializes every row it yields, in store order.
    pub async fn query(
        &self,
        ctx: &Context,
        query: &SqlQuery,
    ) -> std::result::Result<Vec<Row>, StoreError> {
        debug!(statement = %query.statement, params = ?query.params, "executing query");
        let query = query.clone();
        self.with_connection(ctx, move |conn| {
            let mut stmt = conn.prepare(&query.statement)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params_from_iter(query.params.iter()))?;
            let mut result = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns.len());
                for (idx, column) in columns.iter().enumerate() {
                    let value: SqlValue = row.get(idx)?;
                    values.push((column.clone(), Value::from(value)));
                }
                result.push(values);
            }
            Ok(result)
        })
        .await
    }

    async fn with_connection<T, F>(
        &self,
        ctx: &Context,
        f: F,
    ) -> std::result::Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if let Some(reason) = ctx.err() {
            return Err(reason);
        }

        let call = self.next_call.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::clone(&self.connection);
        let active = Arc::clone(&self.active);
        let call_ctx = ctx.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            let conn = connection.lock().map_err(|_| StoreError::Poisoned)?;
            *active.lock().map_err(|_| StoreError::Poisoned)? = Some(call);
            // The caller may have given up while we waited for the lock.
            let result = match call_ctx.err() {
                Some(reason) => Err(reason),
                None => f(&*conn).map_err(StoreError::from),
            };
            *active.lock().map_err(|_| StoreError::Poisoned)? = None;
            result
        });

        tokio::select! {
            joined = &mut task => joined?,
            reason = ctx.done() => {
                debug!(call, %reason, "store call abandoned");
                self.interrupt_until_released(call, task);
                Err(reason)
            }
        }
    }

    /// Keeps interrupting an abandoned call until it lets go of the
    /// connection. A single interrupt is lost if it lands just before the
    /// statement starts stepping.
    fn interrupt_until_released<T: Send + 'static>(
        &self,
        call: u64,
        mut task: tokio::task::JoinHandle<std::result::Result<T, StoreError>>,
    ) {
        let interrupt = Arc::clone(&self.interrupt);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            loop {
                if let Ok(current) = active.lock() {
                    if *current == Some(call) {
                        interrupt.interrupt();
                    }
                }
                tokio::select! {
                    _ = &mut task => break,
                    _ = tokio::time::sleep(INTERRUPT_RETRY) => {}
                }
            }
        });
    }
}
