//! Typed table store: CRUD over one record type, synthesized from its
//! column metadata.
//!
//! Every statement binds its values as parameters; only column and table
//! names known to the metadata are written into statement text.
//!
//! Concurrent `update` calls on the same id are not serialized here and
//! the last write wins. Read-modify-write callers (a money transfer, say)
//! get no consistency guarantee from this layer.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::mapper::ColumnMetadata;
use crate::record::{Record, RowValues};
use crate::sqlite::{Database, SqlQuery, Value};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Window over a listing. A zero `size` means [`DEFAULT_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Pager {
    pub fn new(size: u32, offset: u32) -> Self {
        Self { size, offset }
    }

    pub fn limit(&self) -> u32 {
        if self.size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.size
        }
    }
}

/// Equality conditions on columns, combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            conditions: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// CRUD contract the request handlers call into.
#[async_trait]
pub trait Repository<R: Record>: Send + Sync {
    /// Creates the table if it does not exist. Failure means the service
    /// cannot run and should abort startup.
    async fn create_table(&self, ctx: &Context) -> Result<()>;

    async fn insert(&self, ctx: &Context, record: &R) -> Result<()>;

    async fn list(&self, ctx: &Context, pager: Pager) -> Result<Vec<R>>;

    /// Updates the row matching the record's id. An empty `fields` list
    /// updates every column but the id.
    async fn update(&self, ctx: &Context, record: &R, fields: &[&str]) -> Result<()>;

    async fn find_by(&self, ctx: &Context, filter: &Filter) -> Result<R>;
}

pub struct TableStore<R> {
    db: Database,
    meta: Arc<ColumnMetadata>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for TableStore<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            meta: Arc::clone(&self.meta),
            _record: PhantomData,
        }
    }
}

impl<R: Record> TableStore<R> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            meta: Arc::new(ColumnMetadata::of::<R>()),
            _record: PhantomData,
        }
    }

    pub fn metadata(&self) -> &ColumnMetadata {
        &self.meta
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn exec(&self, ctx: &Context, query: &SqlQuery) -> Result<usize> {
        self.db
            .execute(ctx, query)
            .await
            .map_err(|err| Error::from_store(self.meta.record(), &query.statement, err))
    }

    async fn fetch(&self, ctx: &Context, query: &SqlQuery) -> Result<Vec<R>> {
        let rows = self
            .db
            .query(ctx, query)
            .await
            .map_err(|err| Error::from_store(self.meta.record(), &query.statement, err))?;
        rows.into_iter()
            .map(|row| {
                R::from_row(&mut RowValues::new(row)).map_err(|source| Error::Decode {
                    record: self.meta.record(),
                    source,
                })
            })
            .collect()
    }
}

#[async_trait]
impl<R: Record> Repository<R> for TableStore<R> {
    async fn create_table(&self, ctx: &Context) -> Result<()> {
        let query = create_table_query(&self.meta)?;
        self.exec(ctx, &query).await?;
        info!(table = self.meta.table(), "table ready");
        Ok(())
    }

    async fn insert(&self, ctx: &Context, record: &R) -> Result<()> {
        let values = encode(&self.meta, record)?;
        let query = insert_query(&self.meta, values);
        self.exec(ctx, &query).await?;
        Ok(())
    }

    async fn list(&self, ctx: &Context, pager: Pager) -> Result<Vec<R>> {
        let query = list_query(&self.meta, pager);
        self.fetch(ctx, &query).await
    }

    async fn update(&self, ctx: &Context, record: &R, fields: &[&str]) -> Result<()> {
        let values = encode(&self.meta, record)?;
        let query = update_query(&self.meta, values, fields)?;
        self.exec(ctx, &query).await?;
        Ok(())
    }

    async fn find_by(&self, ctx: &Context, filter: &Filter) -> Result<R> {
        let query = find_by_query(&self.meta, filter)?;
        self.fetch(ctx, &query)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound {
                record: self.meta.record(),
            })
    }
}

fn encode<R: Record>(meta: &ColumnMetadata, record: &R) -> Result<Vec<Value>> {
    record.to_values().map_err(|source| Error::Encode {
        record: meta.record(),
        source,
    })
}

pub(crate) fn create_table_query(meta: &ColumnMetadata) -> Result<SqlQuery> {
    let mut attributes = Vec::with_capacity(meta.columns().len());
    for column in meta.columns() {
        let Some(sql_type) = column.semantic.sql_type() else {
            return Err(Error::UnsupportedColumn {
                record: meta.record(),
                column: column.column.to_string(),
                kind: column.semantic.kind(),
            });
        };
        let mut attribute = format!("\t{} {}", column.column, sql_type);
        if column.primary_key {
            attribute.push_str(" PRIMARY KEY");
        }
        attributes.push(attribute);
    }
    Ok(SqlQuery::new(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        meta.table(),
        attributes.join(",\n")
    )))
}

pub(crate) fn insert_query(meta: &ColumnMetadata, values: Vec<Value>) -> SqlQuery {
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
    SqlQuery::new(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        meta.table(),
        meta.column_list(),
        placeholders.join(", ")
    ))
    .with_params(values)
}

pub(crate) fn list_query(meta: &ColumnMetadata, pager: Pager) -> SqlQuery {
    let mut query = SqlQuery::new("");
    let mut statement = format!("SELECT {} FROM {}", meta.column_list(), meta.table());
    statement.push_str(&format!(" LIMIT {}", query.bind(pager.limit())));
    if pager.offset > 0 {
        statement.push_str(&format!(" OFFSET {}", query.bind(pager.offset)));
    }
    query.statement = statement;
    query
}

pub(crate) fn update_query(
    meta: &ColumnMetadata,
    values: Vec<Value>,
    fields: &[&str],
) -> Result<SqlQuery> {
    let record = meta.record();
    let mut selected = Vec::with_capacity(fields.len());
    for field in fields {
        let column = meta.column(field).ok_or_else(|| Error::UnknownColumn {
            record,
            column: field.to_string(),
        })?;
        selected.push(column.column);
    }
    let primary_key = meta
        .primary_key()
        .ok_or(Error::MissingPrimaryKey { record })?;

    let mut query = SqlQuery::new("");
    let mut id = Value::Null;
    let mut assignments = Vec::new();
    for (column, value) in meta.columns().iter().zip(values) {
        if column.primary_key {
            id = value;
            continue;
        }
        if selected.is_empty() || selected.contains(&column.column) {
            assignments.push(format!("{} = {}", column.column, query.bind(value)));
        }
    }
    if assignments.is_empty() {
        return Err(Error::EmptyUpdate { record });
    }

    let id_placeholder = query.bind(id);
    query.statement = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        meta.table(),
        assignments.join(", "),
        primary_key.column,
        id_placeholder
    );
    Ok(query)
}

pub(crate) fn find_by_query(meta: &ColumnMetadata, filter: &Filter) -> Result<SqlQuery> {
    let mut query = SqlQuery::new("");
    let mut conditions = Vec::new();
    for (column, value) in filter.iter() {
        let column = meta.column(column).ok_or_else(|| Error::UnknownColumn {
            record: meta.record(),
            column: column.to_string(),
        })?;
        conditions.push(format!("{} = {}", column.column, query.bind(value.clone())));
    }

    let mut statement = format!("SELECT {} FROM {}", meta.column_list(), meta.table());
    if !conditions.is_empty() {
        statement.push_str(" WHERE ");
        statement.push_str(&conditions.join(" AND "));
    }
    statement.push_str(" LIMIT 1");
    query.statement = statement;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mapper::{FieldDescriptor, SemanticType};

    fn users() -> ColumnMetadata {
        ColumnMetadata::from_fields(
            "User",
            "users",
            &[
                FieldDescriptor::new("id", "id", SemanticType::Text),
                FieldDescriptor::new("username", "username", SemanticType::Text),
                FieldDescriptor::new("ttl", "ttl", SemanticType::Integer),
                FieldDescriptor::new("money", "money", SemanticType::Float),
            ],
        )
    }

    fn row() -> Vec<Value> {
        vec![
            Value::from("u1"),
            Value::from("ana"),
            Value::from(60_i64),
            Value::from(10.5),
        ]
    }

    #[test]
    fn test_create_table_statement() {
        let query = create_table_query(&users()).unwrap();
        assert_eq!(
            query.statement,
            "CREATE TABLE IF NOT EXISTS users (\n\
             \tid TEXT PRIMARY KEY,\n\
             \tusername TEXT,\n\
             \tttl INTEGER,\n\
             \tmoney DOUBLE\n\
             )"
        );
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_create_table_rejects_unsupported_kind() {
        let meta = ColumnMetadata::from_fields(
            "Tagged",
            "tagged",
            &[
                FieldDescriptor::new("id", "id", SemanticType::Integer),
                FieldDescriptor::new("tags", "tags", SemanticType::Unsupported("[]string")),
            ],
        );
        let err = create_table_query(&meta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(matches!(
            err,
            Error::UnsupportedColumn { ref column, kind: "[]string", .. } if column == "tags"
        ));
    }

    #[test]
    fn test_insert_statement_binds_every_column() {
        let query = insert_query(&users(), row());
        assert_eq!(
            query.statement,
            "INSERT INTO users (id, username, ttl, money) VALUES (?1, ?2, ?3, ?4)"
        );
        assert_eq!(query.params, row());
    }

    #[test]
    fn test_list_statement_defaults_and_offset() {
        let query = list_query(&users(), Pager::default());
        assert_eq!(query.statement, "SELECT id, username, ttl, money FROM users LIMIT ?1");
        assert_eq!(query.params, vec![Value::Integer(100)]);

        let query = list_query(&users(), Pager::new(2, 1));
        assert_eq!(
            query.statement,
            "SELECT id, username, ttl, money FROM users LIMIT ?1 OFFSET ?2"
        );
        assert_eq!(query.params, vec![Value::Integer(2), Value::Integer(1)]);
    }

    #[test]
    fn test_full_update_skips_id() {
        let query = update_query(&users(), row(), &[]).unwrap();
        assert_eq!(
            query.statement,
            "UPDATE users SET username = ?1, ttl = ?2, money = ?3 WHERE id = ?4"
        );
        assert_eq!(
            query.params,
            vec![
                Value::from("ana"),
                Value::from(60_i64),
                Value::from(10.5),
                Value::from("u1"),
            ]
        );
    }

    #[test]
    fn test_partial_update_restricts_set_clause() {
        let query = update_query(&users(), row(), &["money"]).unwrap();
        assert_eq!(query.statement, "UPDATE users SET money = ?1 WHERE id = ?2");
        assert_eq!(query.params, vec![Value::from(10.5), Value::from("u1")]);
    }

    #[test]
    fn test_update_validates_field_names() {
        let err = update_query(&users(), row(), &["money; DROP TABLE users"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = update_query(&users(), row(), &["id"]).unwrap_err();
        assert!(matches!(err, Error::EmptyUpdate { .. }));
    }

    #[test]
    fn test_column_names_match_ignoring_case() {
        let query = update_query(&users(), row(), &["Money"]).unwrap();
        assert_eq!(query.statement, "UPDATE users SET money = ?1 WHERE id = ?2");

        let query = find_by_query(&users(), &Filter::new().with("ID", "u1")).unwrap();
        assert_eq!(
            query.statement,
            "SELECT id, username, ttl, money FROM users WHERE id = ?1 LIMIT 1"
        );
    }

    #[test]
    fn test_find_by_statement_is_deterministic() {
        let filter = Filter::new().with("username", "ana").with("id", "u1");
        let query = find_by_query(&users(), &filter).unwrap();
        assert_eq!(
            query.statement,
            "SELECT id, username, ttl, money FROM users WHERE id = ?1 AND username = ?2 LIMIT 1"
        );
        assert_eq!(query.params, vec![Value::from("u1"), Value::from("ana")]);

        let query = find_by_query(&users(), &Filter::new()).unwrap();
        assert_eq!(query.statement, "SELECT id, username, ttl, money FROM users LIMIT 1");
    }

    #[test]
    fn test_find_by_rejects_unknown_column() {
        let filter: Filter = [("password", "x")].into_iter().collect();
        let err = find_by_query(&users(), &filter).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { ref column, .. } if column == "password"));
    }

    #[test]
    fn test_pager_limit() {
        assert_eq!(Pager::default().limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(Pager::new(7, 0).limit(), 7);
    }
}
