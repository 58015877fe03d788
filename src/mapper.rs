//! Field mapper: turns a record's declared fields into ordered column
//! metadata, once per store.

use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::record::Record;

/// Semantic type of a persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Float,
    Integer,
    Boolean,
    Text,
    Binary,
    /// A kind the store cannot persist yet. Declaring it is allowed; any
    /// attempt to encode or decode it fails.
    Unsupported(&'static str),
}

impl SemanticType {
    /// Column type used in `CREATE TABLE`, if the kind is supported.
    pub fn sql_type(self) -> Option<&'static str> {
        match self {
            SemanticType::Float => Some("DOUBLE"),
            SemanticType::Integer => Some("INTEGER"),
            SemanticType::Boolean => Some("BOOL"),
            SemanticType::Text => Some("TEXT"),
            SemanticType::Binary => Some("BLOB"),
            SemanticType::Unsupported(_) => None,
        }
    }

    /// Short name of the kind: `float`, `text`, ... or the unsupported
    /// kind as declared, e.g. `[]string`.
    pub fn kind(self) -> &'static str {
        match self {
            SemanticType::Float => "float",
            SemanticType::Integer => "integer",
            SemanticType::Boolean => "boolean",
            SemanticType::Text => "text",
            SemanticType::Binary => "binary",
            SemanticType::Unsupported(kind) => kind,
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, SemanticType::Unsupported(_))
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Unsupported(kind) => write!(f, "unsupported({kind})"),
            supported => f.write_str(supported.kind()),
        }
    }
}

/// A persisted field as a record declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Rust field name.
    pub field: &'static str,
    /// Storage tag; the column name, optionally followed by `,options`.
    pub tag: &'static str,
    pub semantic: SemanticType,
}

impl FieldDescriptor {
    pub const fn new(field: &'static str, tag: &'static str, semantic: SemanticType) -> Self {
        Self {
            field,
            tag,
            semantic,
        }
    }

    pub fn column(&self) -> &'static str {
        column_name(self.tag)
    }
}

/// Column name carried by a storage tag: everything before the first comma.
pub fn column_name(tag: &str) -> &str {
    tag.split(',').next().unwrap_or(tag).trim()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub field: &'static str,
    pub column: &'static str,
    pub semantic: SemanticType,
    pub primary_key: bool,
}

/// Immutable column metadata for one record type.
#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    record: &'static str,
    table: &'static str,
    columns: Vec<ColumnDef>,
    by_name: HashMap<&'static str, usize>,
}

impl ColumnMetadata {
    pub fn of<R: Record>() -> Self {
        Self::from_fields(std::any::type_name::<R>(), R::TABLE, &R::fields())
    }

    pub fn from_fields(
        record: &'static str,
        table: &'static str,
        fields: &[FieldDescriptor],
    ) -> Self {
        let columns: Vec<ColumnDef> = fields
            .iter()
            .map(|f| {
                let column = f.column();
                ColumnDef {
                    field: f.field,
                    column,
                    semantic: f.semantic,
                    primary_key: column.eq_ignore_ascii_case("id"),
                }
            })
            .collect();

        let by_name = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.column, idx))
            .collect();

        if !columns.iter().any(|c| c.primary_key) {
            warn!(record, table, "record has no `id` column; table will lack a primary key");
        }

        Self {
            record,
            table,
            columns,
            by_name,
        }
    }

    /// Type name of the record, for error context.
    pub fn record(&self) -> &'static str {
        self.record
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks a column up by name. SQLite identifiers ignore ASCII case,
    /// so an exact match wins and a case-insensitive one is the fallback.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        match self.by_name.get(name) {
            Some(&idx) => Some(&self.columns[idx]),
            None => self
                .columns
                .iter()
                .find(|c| c.column.eq_ignore_ascii_case(name)),
        }
    }

    pub fn semantic_type(&self, name: &str) -> Option<SemanticType> {
        self.column(name).map(|c| c.semantic)
    }

    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Comma separated column list, in declaration order.
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.column)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
