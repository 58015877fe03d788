//! Typed table store over SQLite.
//!
//! # Intention
//!
//! - Map typed records to rows of one table each, from a per-type column
//!   descriptor instead of per-type hand-written SQL.
//! - Synthesize CREATE/INSERT/SELECT/UPDATE statements with bound
//!   parameters and scan result rows back into records.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - No HTTP handling, auth or response formatting; those layers call
//!   in through [`Repository`].
//!
//! ```
//! use rust_orm::{Context, Database, Filter, Repository, TableStore};
//!
//! rust_orm::record! {
//!     #[table = "users"]
//!     #[derive(Debug, Clone, PartialEq)]
//!     pub struct User {
//!         #[column = "id"]
//!         pub id: String,
//!         #[column = "money"]
//!         pub money: f64,
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), rust_orm::Error> {
//! let ctx = Context::background();
//! let users = TableStore::<User>::new(Database::open_in_memory()?);
//! users.create_table(&ctx).await?;
//! users.insert(&ctx, &User { id: "u1".into(), money: 5.0 }).await?;
//! let found = users.find_by(&ctx, &Filter::new().with("id", "u1")).await?;
//! assert_eq!(found.money, 5.0);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod mapper;
pub mod record;
pub mod sqlite;
pub mod store;

pub use context::{CancellationToken, Context};
pub use error::{Error, ErrorKind, Result, StoreError};
pub use mapper::{ColumnDef, ColumnMetadata, FieldDescriptor, SemanticType};
pub use record::{Column, ColumnError, FieldError, Record, RowValues};
pub use sqlite::{Database, SqlQuery, SqliteConfig, Value};
pub use store::{Filter, Pager, Repository, TableStore, DEFAULT_PAGE_SIZE};
