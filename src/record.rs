//! Record descriptors and per-type value coercion.
//!
//! A [`Record`] describes its own table, its persisted fields, and how to
//! move between itself and a row of [`Value`]s. The [`record!`] macro
//! writes that impl from per-field `#[column = "..."]` tags.

use std::collections::HashMap;

use thiserror::Error;

use crate::mapper::{column_name, FieldDescriptor, SemanticType};
use crate::sqlite::{Row, Value};

/// Why a single value could not be coerced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ColumnError {
    #[error("unsupported field kind {0}")]
    Unsupported(&'static str),
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: SemanticType,
        found: &'static str,
    },
    #[error("value {0} out of range for {1}")]
    OutOfRange(String, &'static str),
    #[error("NaN cannot be stored")]
    NotANumber,
    #[error("unexpected NULL")]
    UnexpectedNull,
    #[error("missing column")]
    Missing,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("column `{column}`: {reason}")]
pub struct FieldError {
    pub column: String,
    #[source]
    pub reason: ColumnError,
}

impl FieldError {
    pub fn new(column: impl Into<String>, reason: ColumnError) -> Self {
        Self {
            column: column.into(),
            reason,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.reason, ColumnError::Unsupported(_))
    }
}

/// A type the store can persist: a table, its tagged fields and the
/// conversions to and from a row.
pub trait Record: Sized + Send + Sync + 'static {
    const TABLE: &'static str;

    /// Persisted fields, in declaration order.
    fn fields() -> Vec<FieldDescriptor>;

    /// Values of the persisted fields, in the order of [`Record::fields`].
    fn to_values(&self) -> Result<Vec<Value>, FieldError>;

    /// Builds a record from a row whose columns follow [`Record::fields`].
    fn from_row(row: &mut RowValues) -> Result<Self, FieldError>;
}

/// A Rust type that maps onto a single column.
pub trait Column: Sized {
    const SEMANTIC: SemanticType;

    fn to_value(&self) -> Result<Value, ColumnError>;

    fn from_value(value: Value) -> Result<Self, ColumnError>;
}

/// Cursor over one fetched row, consumed field by field.
#[derive(Debug)]
pub struct RowValues {
    values: std::vec::IntoIter<(String, Value)>,
}

impl RowValues {
    pub fn new(row: Row) -> Self {
        Self {
            values: row.into_iter(),
        }
    }

    /// Decodes the next column as `T`.
    pub fn decode<T: Column>(&mut self, tag: &str) -> Result<T, FieldError> {
        let (column, value) = self
            .values
            .next()
            .ok_or_else(|| FieldError::new(column_name(tag), ColumnError::Missing))?;
        T::from_value(value).map_err(|reason| FieldError::new(column, reason))
    }
}

/// Encodes one field, attributing failures to its column.
pub fn encode_field<T: Column>(value: &T, tag: &str) -> Result<Value, FieldError> {
    value
        .to_value()
        .map_err(|reason| FieldError::new(column_name(tag), reason))
}

fn mismatch(expected: SemanticType, found: &Value) -> ColumnError {
    ColumnError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

macro_rules! integer_column {
    ($($t:ty),* $(,)?) => {
        $(
            impl Column for $t {
                const SEMANTIC: SemanticType = SemanticType::Integer;

                fn to_value(&self) -> Result<Value, ColumnError> {
                    i64::try_from(*self)
                        .map(Value::Integer)
                        .map_err(|_| ColumnError::OutOfRange(self.to_string(), stringify!($t)))
                }

                fn from_value(value: Value) -> Result<Self, ColumnError> {
                    match value {
                        Value::Integer(i) => <$t>::try_from(i)
                            .map_err(|_| ColumnError::OutOfRange(i.to_string(), stringify!($t))),
                        Value::Boolean(b) => Ok(<$t>::from(b)),
                        Value::Null => Err(ColumnError::UnexpectedNull),
                        other => Err(mismatch(Self::SEMANTIC, &other)),
                    }
                }
            }
        )*
    };
}

integer_column!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Column for f64 {
    const SEMANTIC: SemanticType = SemanticType::Float;

    // SQLite turns a bound NaN into NULL, which no float field decodes.
    fn to_value(&self) -> Result<Value, ColumnError> {
        if self.is_nan() {
            return Err(ColumnError::NotANumber);
        }
        Ok(Value::Real(*self))
    }

    fn from_value(value: Value) -> Result<Self, ColumnError> {
        match value {
            Value::Real(f) => Ok(f),
            // Values bound as integers into a REAL column come back widened,
            // but rows written by other tools may not have been.
            Value::Integer(i) => Ok(i as f64),
            Value::Null => Err(ColumnError::UnexpectedNull),
            other => Err(mismatch(Self::SEMANTIC, &other)),
        }
    }
}

impl Column for f32 {
    const SEMANTIC: SemanticType = SemanticType::Float;

    fn to_value(&self) -> Result<Value, ColumnError> {
        f64::from(*self).to_value()
    }

    fn from_value(value: Value) -> Result<Self, ColumnError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl Column for bool {
    const SEMANTIC: SemanticType = SemanticType::Boolean;

    fn to_value(&self) -> Result<Value, ColumnError> {
        Ok(Value::Boolean(*self))
    }

    fn from_value(value: Value) -> Result<Self, ColumnError> {
        match value {
            Value::Boolean(b) => Ok(b),
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            Value::Integer(i) => Err(ColumnError::OutOfRange(i.to_string(), "bool")),
            Value::Null => Err(ColumnError::UnexpectedNull),
            other => Err(mismatch(Self::SEMANTIC, &other)),
        }
    }
}

impl Column for String {
    const SEMANTIC: SemanticType = SemanticType::Text;

    fn to_value(&self) -> Result<Value, ColumnError> {
        Ok(Value::Text(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self, ColumnError> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Null => Err(ColumnError::UnexpectedNull),
            other => Err(mismatch(Self::SEMANTIC, &other)),
        }
    }
}

impl<T: Column> Column for Option<T> {
    const SEMANTIC: SemanticType = T::SEMANTIC;

    fn to_value(&self) -> Result<Value, ColumnError> {
        match self {
            Some(v) => v.to_value(),
            None => Ok(Value::Null),
        }
    }

    fn from_value(value: Value) -> Result<Self, ColumnError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Element of a one-dimensional sequence field. Only bytes form a
/// supported (binary) column; other element types declare fine but fail
/// when a value is coerced.
pub trait SequenceElement: Sized {
    const SEQUENCE: SemanticType;

    fn encode_sequence(items: &[Self]) -> Result<Value, ColumnError>;

    fn decode_sequence(value: Value) -> Result<Vec<Self>, ColumnError>;
}

impl SequenceElement for u8 {
    const SEQUENCE: SemanticType = SemanticType::Binary;

    fn encode_sequence(items: &[Self]) -> Result<Value, ColumnError> {
        Ok(Value::Blob(items.to_vec()))
    }

    fn decode_sequence(value: Value) -> Result<Vec<Self>, ColumnError> {
        match value {
            Value::Blob(b) => Ok(b),
            Value::Null => Err(ColumnError::UnexpectedNull),
            other => Err(mismatch(Self::SEQUENCE, &other)),
        }
    }
}

macro_rules! unsupported_sequence {
    ($($t:ty => $kind:literal),* $(,)?) => {
        $(
            impl SequenceElement for $t {
                const SEQUENCE: SemanticType = SemanticType::Unsupported($kind);

                fn encode_sequence(_: &[Self]) -> Result<Value, ColumnError> {
                    Err(ColumnError::Unsupported($kind))
                }

                fn decode_sequence(_: Value) -> Result<Vec<Self>, ColumnError> {
                    Err(ColumnError::Unsupported($kind))
                }
            }
        )*
    };
}

unsupported_sequence!(
    i8 => "[]i8",
    i16 => "[]i16",
    i32 => "[]i32",
    i64 => "[]i64",
    u16 => "[]u16",
    u32 => "[]u32",
    u64 => "[]u64",
    f32 => "[]f32",
    f64 => "[]f64",
    bool => "[]bool",
    String => "[]string",
);

impl<T: SequenceElement> Column for Vec<T> {
    const SEMANTIC: SemanticType = T::SEQUENCE;

    fn to_value(&self) -> Result<Value, ColumnError> {
        T::encode_sequence(self)
    }

    fn from_value(value: Value) -> Result<Self, ColumnError> {
        T::decode_sequence(value)
    }
}

impl<V> Column for HashMap<String, V> {
    const SEMANTIC: SemanticType = SemanticType::Unsupported("map");

    fn to_value(&self) -> Result<Value, ColumnError> {
        Err(ColumnError::Unsupported("map"))
    }

    fn from_value(_: Value) -> Result<Self, ColumnError> {
        Err(ColumnError::Unsupported("map"))
    }
}

/// Declares a struct together with its [`Record`] impl.
///
/// Fields tagged `#[column = "name"]` are persisted in declaration order;
/// untagged fields are skipped and come back as `Default::default()`.
/// Other field attributes, doc comments included, are kept on the field.
///
/// ```
/// rust_orm::record! {
///     /// A registered user.
///     #[table = "users"]
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct User {
///         #[column = "id"]
///         pub id: String,
///         /// Balance in account currency.
///         #[column = "money"]
///         pub money: f64,
///         pub session: Option<String>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! record {
    (
        $(#[doc = $doc:literal])*
        #[table = $table:literal]
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($body:tt)*
        }
    ) => {
        $crate::__record_parse! {
            @field [$table; [$(#[doc = $doc])* $(#[$meta])*] $vis $name] {} {} {} $($body)*
        }
    };
}

/// Walks the field list of [`record!`] one attribute at a time, splitting
/// the `#[column = ..]` tag from attributes that stay on the field.
#[doc(hidden)]
#[macro_export]
macro_rules! __record_parse {
    (
        @field [$table:literal; [$($smeta:tt)*] $vis:vis $name:ident]
        { $({ [$($attr:tt)*] [$($tag:tt)*] $fvis:vis $field:ident : $ty:ty })* } {} {}
    ) => {
        $($smeta)*
        $vis struct $name {
            $( $($attr)* $fvis $field: $ty, )*
        }

        impl $crate::record::Record for $name {
            const TABLE: &'static str = $table;

            fn fields() -> ::std::vec::Vec<$crate::mapper::FieldDescriptor> {
                ::std::vec![
                    $($(
                        $crate::mapper::FieldDescriptor::new(
                            stringify!($field),
                            $tag,
                            <$ty as $crate::record::Column>::SEMANTIC,
                        ),
                    )*)*
                ]
            }

            fn to_values(
                &self,
            ) -> ::std::result::Result<
                ::std::vec::Vec<$crate::sqlite::Value>,
                $crate::record::FieldError,
            > {
                ::std::result::Result::Ok(::std::vec![
                    $($(
                        $crate::record::encode_field(&self.$field, $tag)?,
                    )*)*
                ])
            }

            fn from_row(
                row: &mut $crate::record::RowValues,
            ) -> ::std::result::Result<Self, $crate::record::FieldError> {
                ::std::result::Result::Ok(Self {
                    $( $field: $crate::__record_field!(row $(, $tag)*; $ty), )*
                })
            }
        }
    };
    (
        @field $h:tt {$($done:tt)*} {$($attrs:tt)*} {}
        #[column = $tag:literal] $($rest:tt)*
    ) => {
        $crate::__record_parse! { @field $h {$($done)*} {$($attrs)*} {$tag} $($rest)* }
    };
    (
        @field $h:tt {$($done:tt)*} {$($attrs:tt)*} {$($tag:tt)*}
        #[$($attr:tt)*] $($rest:tt)*
    ) => {
        $crate::__record_parse! {
            @field $h {$($done)*} {$($attrs)* #[$($attr)*]} {$($tag)*} $($rest)*
        }
    };
    (
        @field $h:tt {$($done:tt)*} {$($attrs:tt)*} {$($tag:tt)*}
        $fvis:vis $field:ident : $ty:ty $(, $($rest:tt)*)?
    ) => {
        $crate::__record_parse! {
            @field $h
            {$($done)* { [$($attrs)*] [$($tag)*] $fvis $field : $ty }}
            {} {}
            $($($rest)*)?
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __record_field {
    ($row:ident, $tag:literal; $ty:ty) => {
        $row.decode::<$ty>($tag)?
    };
    ($row:ident; $ty:ty) => {
        <$ty as ::std::default::Default>::default()
    };
}
