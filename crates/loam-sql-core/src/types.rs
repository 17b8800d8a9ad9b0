//! Column type handles.
//!
//! A [`ColumnType`] validates and coerces domain values into storage form
//! and converts raw driver values back. Each handle is a small stateless
//! (or configuration-only) object owned by a schema column.

use chrono::{NaiveDate, NaiveDateTime};

use crate::value::SqlValue;

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Integer storage.
    Integer,
    /// Floating-point storage.
    Float,
    /// Boolean storage (0/1).
    Boolean,
    /// Text storage.
    Text,
    /// Calendar date storage.
    Date,
    /// Date and time storage.
    DateTime,
    /// Binary storage.
    Blob,
}

/// A column type handle.
///
/// `prepare_for_storage` failures carry only the reason; the owning
/// schema attaches the column name when raising `InvalidDataForColumn`.
pub trait ColumnType {
    /// Returns the storage class tag.
    fn storage_kind(&self) -> StorageKind;

    /// Validates and coerces a domain value into storage form.
    ///
    /// # Errors
    ///
    /// Returns the failure reason when the value cannot be coerced.
    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String>;

    /// Converts a raw driver value back into the domain form.
    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue;
}

/// Integer column.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerColumn;

impl ColumnType for IntegerColumn {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Integer
    }

    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String> {
        match value {
            SqlValue::Null => Ok(SqlValue::Null),
            SqlValue::Int(n) => Ok(SqlValue::Int(*n)),
            SqlValue::Bool(b) => Ok(SqlValue::Int(i64::from(*b))),
            SqlValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Int)
                .map_err(|_| format!("not an integer: {s:?}")),
            SqlValue::Float(f) => Err(format!("not an integer: {f}")),
            SqlValue::Blob(_) => Err(String::from("not an integer: blob")),
        }
    }

    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue {
        match raw {
            SqlValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_or_else(|_| raw.clone(), SqlValue::Int),
            other => other.clone(),
        }
    }
}

/// Floating-point column.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatColumn;

impl ColumnType for FloatColumn {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Float
    }

    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String> {
        match value {
            SqlValue::Null => Ok(SqlValue::Null),
            SqlValue::Float(f) => Ok(SqlValue::Float(*f)),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::Int(n) => Ok(SqlValue::Float(*n as f64)),
            SqlValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Float)
                .map_err(|_| format!("not a number: {s:?}")),
            other => Err(format!("not a number: {}", other.to_sql_inline())),
        }
    }

    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue {
        match raw {
            SqlValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_or_else(|_| raw.clone(), SqlValue::Float),
            other => other.clone(),
        }
    }
}

/// Boolean column stored as 0/1.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanColumn;

impl ColumnType for BooleanColumn {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Boolean
    }

    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String> {
        match value {
            SqlValue::Null => Ok(SqlValue::Null),
            SqlValue::Bool(b) => Ok(SqlValue::Int(i64::from(*b))),
            SqlValue::Int(0) => Ok(SqlValue::Int(0)),
            SqlValue::Int(1) => Ok(SqlValue::Int(1)),
            SqlValue::Text(s) => match s.trim() {
                "0" | "false" => Ok(SqlValue::Int(0)),
                "1" | "true" => Ok(SqlValue::Int(1)),
                other => Err(format!("not a boolean: {other:?}")),
            },
            other => Err(format!("not a boolean: {}", other.to_sql_inline())),
        }
    }

    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue {
        match raw {
            SqlValue::Int(n) => SqlValue::Bool(*n != 0),
            SqlValue::Text(s) => SqlValue::Bool(matches!(s.trim(), "1" | "true")),
            other => other.clone(),
        }
    }
}

/// Text column with an optional maximum length.
#[derive(Debug, Clone, Default)]
pub struct TextColumn {
    max_length: Option<usize>,
}

impl TextColumn {
    /// Creates an unbounded text column.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_length: None }
    }

    /// Creates a text column capped at `max_length` characters.
    #[must_use]
    pub const fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: Some(max_length),
        }
    }
}

impl ColumnType for TextColumn {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Text
    }

    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String> {
        let text = match value {
            SqlValue::Null => return Ok(SqlValue::Null),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Bool(b) => String::from(if *b { "1" } else { "0" }),
            SqlValue::Blob(_) => return Err(String::from("not text: blob")),
        };
        if let Some(max) = self.max_length {
            let len = text.chars().count();
            if len > max {
                return Err(format!("value exceeds maximum length {max} ({len})"));
            }
        }
        Ok(SqlValue::Text(text))
    }

    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue {
        match raw {
            SqlValue::Int(n) => SqlValue::Text(n.to_string()),
            other => other.clone(),
        }
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Calendar date column (`YYYY-MM-DD`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DateColumn;

impl ColumnType for DateColumn {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Date
    }

    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String> {
        match value {
            SqlValue::Null => Ok(SqlValue::Null),
            SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .map(|d| SqlValue::Text(d.format(DATE_FORMAT).to_string()))
                .map_err(|e| format!("not a date: {s:?} ({e})")),
            other => Err(format!("not a date: {}", other.to_sql_inline())),
        }
    }

    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue {
        raw.clone()
    }
}

/// Date-and-time column (`YYYY-MM-DD HH:MM:SS`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeColumn;

impl ColumnType for DateTimeColumn {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::DateTime
    }

    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String> {
        match value {
            SqlValue::Null => Ok(SqlValue::Null),
            SqlValue::Text(s) => NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT)
                .map(|d| SqlValue::Text(d.format(DATETIME_FORMAT).to_string()))
                .map_err(|e| format!("not a datetime: {s:?} ({e})")),
            other => Err(format!("not a datetime: {}", other.to_sql_inline())),
        }
    }

    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue {
        raw.clone()
    }
}

/// Enumerated text column with an optional fallback.
///
/// A value outside the variant set resolves to the fallback when one is
/// configured and errors otherwise.
#[derive(Debug, Clone, Default)]
pub struct EnumColumn {
    variants: Vec<String>,
    fallback: Option<String>,
}

impl EnumColumn {
    /// Creates an enum column over the given variants.
    #[must_use]
    pub fn new(variants: &[&str]) -> Self {
        Self {
            variants: variants.iter().map(|s| (*s).to_string()).collect(),
            fallback: None,
        }
    }

    /// Sets the fallback variant for out-of-set values.
    #[must_use]
    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }
}

impl ColumnType for EnumColumn {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Text
    }

    fn prepare_for_storage(&self, value: &SqlValue) -> Result<SqlValue, String> {
        let text = match value {
            SqlValue::Null => return Ok(SqlValue::Null),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Int(n) => n.to_string(),
            other => return Err(format!("not an enum value: {}", other.to_sql_inline())),
        };
        if self.variants.contains(&text) {
            return Ok(SqlValue::Text(text));
        }
        self.fallback.as_ref().map_or_else(
            || Err(format!("{text:?} outside enum variants")),
            |fb| Ok(SqlValue::Text(fb.clone())),
        )
    }

    fn convert_raw_to_value(&self, raw: &SqlValue) -> SqlValue {
        raw.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_coercions() {
        let ty = IntegerColumn;
        assert_eq!(
            ty.prepare_for_storage(&SqlValue::Text(String::from("42"))),
            Ok(SqlValue::Int(42))
        );
        assert!(ty
            .prepare_for_storage(&SqlValue::Text(String::from("nope")))
            .is_err());
        assert_eq!(
            ty.convert_raw_to_value(&SqlValue::Text(String::from("7"))),
            SqlValue::Int(7)
        );
    }

    #[test]
    fn boolean_coercions() {
        let ty = BooleanColumn;
        assert_eq!(
            ty.prepare_for_storage(&SqlValue::Bool(true)),
            Ok(SqlValue::Int(1))
        );
        assert!(ty.prepare_for_storage(&SqlValue::Int(2)).is_err());
        assert_eq!(
            ty.convert_raw_to_value(&SqlValue::Int(1)),
            SqlValue::Bool(true)
        );
    }

    #[test]
    fn text_max_length() {
        let ty = TextColumn::with_max_length(3);
        assert!(ty
            .prepare_for_storage(&SqlValue::Text(String::from("abcd")))
            .is_err());
        assert_eq!(
            ty.prepare_for_storage(&SqlValue::Text(String::from("abc"))),
            Ok(SqlValue::Text(String::from("abc")))
        );
    }

    #[test]
    fn date_validation() {
        let ty = DateColumn;
        assert_eq!(
            ty.prepare_for_storage(&SqlValue::Text(String::from("2024-03-09"))),
            Ok(SqlValue::Text(String::from("2024-03-09")))
        );
        assert!(ty
            .prepare_for_storage(&SqlValue::Text(String::from("not a date")))
            .is_err());
    }

    #[test]
    fn enum_fallback() {
        let strict = EnumColumn::new(&["draft", "published"]);
        assert!(strict
            .prepare_for_storage(&SqlValue::Text(String::from("hidden")))
            .is_err());

        let lenient = EnumColumn::new(&["draft", "published"]).with_fallback("draft");
        assert_eq!(
            lenient.prepare_for_storage(&SqlValue::Text(String::from("hidden"))),
            Ok(SqlValue::Text(String::from("draft")))
        );
    }
}
