//! SQL values and literal rendering.
//!
//! The engine emits literal SQL and hands finished statements to an
//! external driver, so inline rendering with proper escaping is the
//! primary code path here rather than parameter binding.

use chrono::{NaiveDate, NaiveDateTime};

/// A SQL value.
///
/// Text is always single-quoted with embedded quotes doubled, which is
/// what keeps literal rendering injection-safe.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Renders the value as an escaped SQL literal.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => {
                if *b {
                    String::from("TRUE")
                } else {
                    String::from("FALSE")
                }
            }
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Text(s) => {
                // Escape single quotes by doubling them
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }

    /// Returns a canonical key string for primary-key indexing.
    ///
    /// Unlike [`to_sql_inline`](Self::to_sql_inline) this is unquoted, so
    /// `Int(7)` and `Text("7")` index the same slot, matching how drivers
    /// hand integer keys back as text.
    #[must_use]
    pub fn to_key(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            other => other.to_sql_inline(),
        }
    }

    /// Returns true for NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a storage-prepared value to its text wire form.
    ///
    /// The emitted SQL single-quotes every scalar literal (`age = '18'`),
    /// the form existing association tables and tooling were written
    /// against, so scalars collapse to text here and NULL and blobs keep
    /// their own rendering.
    #[must_use]
    pub fn into_storage_text(self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Text(String::from(if b { "1" } else { "0" })),
            Self::Int(n) => Self::Text(n.to_string()),
            Self::Float(f) => Self::Text(f.to_string()),
            text @ Self::Text(_) => text,
            blob @ Self::Blob(_) => blob,
        }
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for &SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self.clone()
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(self)
    }
}

impl ToSqlValue for i32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for i16 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for u32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for f32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(f64::from(self))
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl ToSqlValue for &[u8] {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }
}

impl ToSqlValue for NaiveDate {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d").to_string())
    }
}

impl ToSqlValue for NaiveDateTime {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_null_and_bool() {
        assert_eq!(SqlValue::Null.to_sql_inline(), "NULL");
        assert_eq!(SqlValue::Bool(true).to_sql_inline(), "TRUE");
        assert_eq!(SqlValue::Bool(false).to_sql_inline(), "FALSE");
    }

    #[test]
    fn inline_numbers() {
        assert_eq!(SqlValue::Int(42).to_sql_inline(), "42");
        assert_eq!(SqlValue::Int(-100).to_sql_inline(), "-100");
        assert_eq!(SqlValue::Float(2.5).to_sql_inline(), "2.5");
    }

    #[test]
    fn inline_text_escaping() {
        // Single quotes are escaped by doubling
        assert_eq!(
            SqlValue::Text(String::from("O'Brien")).to_sql_inline(),
            "'O''Brien'"
        );
        let malicious = "'; DROP TABLE users; --";
        assert_eq!(
            SqlValue::Text(String::from(malicious)).to_sql_inline(),
            "'''; DROP TABLE users; --'"
        );
    }

    #[test]
    fn inline_blob() {
        assert_eq!(
            SqlValue::Blob(vec![0x48, 0x49]).to_sql_inline(),
            "X'4849'"
        );
    }

    #[test]
    fn key_form_is_unquoted() {
        assert_eq!(SqlValue::Int(7).to_key(), "7");
        assert_eq!(SqlValue::Text(String::from("7")).to_key(), "7");
    }

    #[test]
    fn storage_text_quotes_scalars() {
        assert_eq!(
            SqlValue::Int(18).into_storage_text().to_sql_inline(),
            "'18'"
        );
        assert_eq!(
            SqlValue::Bool(true).into_storage_text().to_sql_inline(),
            "'1'"
        );
        assert_eq!(SqlValue::Null.into_storage_text().to_sql_inline(), "NULL");
    }

    #[test]
    fn conversions() {
        assert_eq!(true.to_sql_value(), SqlValue::Bool(true));
        assert_eq!(42_i32.to_sql_value(), SqlValue::Int(42));
        assert_eq!("hi".to_sql_value(), SqlValue::Text(String::from("hi")));
        assert_eq!(None::<i64>.to_sql_value(), SqlValue::Null);
        assert_eq!(Some(1_i64).to_sql_value(), SqlValue::Int(1));
    }

    #[test]
    fn chrono_conversions() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(d.to_sql_value(), SqlValue::Text(String::from("2024-03-09")));
    }
}
