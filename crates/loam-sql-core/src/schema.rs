//! Table schema descriptors.
//!
//! A [`TableSchema`] is the per-table ordered map of column name to
//! column-type handle, plus the primary-key name and per-column
//! defaults. Optional per-column validators and mutators live in
//! explicit slots on the column descriptor and are looked up by key,
//! never probed for at runtime.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SchemaError};
use crate::types::{ColumnType, StorageKind};
use crate::value::SqlValue;

/// Optional per-column validation hook. Returns the failure reason.
pub type Validator = Box<dyn Fn(&SqlValue) -> std::result::Result<(), String>>;

/// Optional per-column mutation hook, applied before validation.
pub type Mutator = Box<dyn Fn(SqlValue) -> SqlValue>;

/// One column of a table schema.
pub struct Column {
    name: String,
    ty: Box<dyn ColumnType>,
    default: SqlValue,
    validator: Option<Validator>,
    mutator: Option<Mutator>,
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("kind", &self.ty.storage_kind())
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl Column {
    /// Creates a column with the given type handle.
    pub fn new(name: &str, ty: impl ColumnType + 'static) -> Self {
        Self {
            name: name.to_string(),
            ty: Box::new(ty),
            default: SqlValue::Null,
            validator: None,
            mutator: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: SqlValue) -> Self {
        self.default = value;
        self
    }

    /// Registers a validation hook.
    #[must_use]
    pub fn validator(
        mut self,
        f: impl Fn(&SqlValue) -> std::result::Result<(), String> + 'static,
    ) -> Self {
        self.validator = Some(Box::new(f));
        self
    }

    /// Registers a mutation hook.
    #[must_use]
    pub fn mutator(mut self, f: impl Fn(SqlValue) -> SqlValue + 'static) -> Self {
        self.mutator = Some(Box::new(f));
        self
    }

    /// Returns the column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the storage class tag.
    #[must_use]
    pub fn storage_kind(&self) -> StorageKind {
        self.ty.storage_kind()
    }

    /// Returns the default value.
    #[must_use]
    pub const fn default(&self) -> &SqlValue {
        &self.default
    }

    /// Runs mutator, validator and type coercion on a value.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDataForColumn`] when the validator
    /// rejects the value or the type handle cannot coerce it.
    pub fn prepare(&self, value: SqlValue) -> Result<SqlValue> {
        let value = match &self.mutator {
            Some(m) => m(value),
            None => value,
        };
        if let Some(v) = &self.validator {
            v(&value).map_err(|reason| SchemaError::InvalidDataForColumn {
                column: self.name.clone(),
                reason,
            })?;
        }
        self.ty
            .prepare_for_storage(&value)
            .map_err(|reason| SchemaError::InvalidDataForColumn {
                column: self.name.clone(),
                reason,
            })
    }

    /// Converts a raw driver value to the domain form.
    #[must_use]
    pub fn convert_raw(&self, raw: &SqlValue) -> SqlValue {
        self.ty.convert_raw_to_value(raw)
    }
}

/// A per-table schema descriptor.
#[derive(Debug)]
pub struct TableSchema {
    name: String,
    primary_key: String,
    columns: Vec<Column>,
}

impl TableSchema {
    /// Creates a schema for `name` with the given primary-key column.
    ///
    /// The primary-key column still has to be added like any other.
    pub fn new(name: &str, primary_key: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            columns: Vec::new(),
        }
    }

    /// Adds a column, preserving declaration order.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the primary-key column name.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Returns the columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    /// Returns true when `name` is a declared column.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Looks up a column by name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidColumn`] when absent.
    pub fn get_column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SchemaError::InvalidColumn(format!("{}.{name}", self.name)))
    }

    /// Returns each column's default value, in declaration order.
    #[must_use]
    pub fn defaults(&self) -> Vec<(String, SqlValue)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.default.clone()))
            .collect()
    }
}

/// Registry of table schemas, keyed by table name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table schema, replacing any previous one.
    pub fn register(&mut self, schema: TableSchema) {
        self.tables.insert(schema.name().to_string(), schema);
    }

    /// Looks up a table schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTable`] when absent.
    pub fn get(&self, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }

    /// Returns true when `table` is registered.
    #[must_use]
    pub fn has(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntegerColumn, TextColumn};

    fn users() -> TableSchema {
        TableSchema::new("users", "id")
            .column(Column::new("id", IntegerColumn))
            .column(Column::new("name", TextColumn::with_max_length(50)))
            .column(
                Column::new("role", TextColumn::new())
                    .default_value(SqlValue::Text(String::from("member"))),
            )
    }

    #[test]
    fn column_order_is_preserved() {
        let schema = users();
        assert_eq!(schema.column_names(), vec!["id", "name", "role"]);
        assert_eq!(schema.primary_key(), "id");
    }

    #[test]
    fn unknown_column_is_invalid() {
        let schema = users();
        assert!(matches!(
            schema.get_column("nope"),
            Err(SchemaError::InvalidColumn(c)) if c == "users.nope"
        ));
    }

    #[test]
    fn defaults_row() {
        let schema = users();
        let defaults = schema.defaults();
        assert_eq!(
            defaults[2],
            (String::from("role"), SqlValue::Text(String::from("member")))
        );
    }

    #[test]
    fn prepare_applies_mutator_then_validator() {
        let schema = TableSchema::new("t", "id").column(
            Column::new("email", TextColumn::new())
                .mutator(|v| match v {
                    SqlValue::Text(s) => SqlValue::Text(s.to_lowercase()),
                    other => other,
                })
                .validator(|v| match v {
                    SqlValue::Text(s) if s.contains('@') => Ok(()),
                    _ => Err(String::from("missing @")),
                }),
        );
        let col = schema.get_column("email").unwrap();
        assert_eq!(
            col.prepare(SqlValue::Text(String::from("A@B.COM"))),
            Ok(SqlValue::Text(String::from("a@b.com")))
        );
        assert!(matches!(
            col.prepare(SqlValue::Text(String::from("nope"))),
            Err(SchemaError::InvalidDataForColumn { .. })
        ));
    }

    #[test]
    fn registry_lookup() {
        let mut reg = SchemaRegistry::new();
        reg.register(users());
        assert!(reg.get("users").is_ok());
        assert_eq!(
            reg.get("ghosts").unwrap_err(),
            SchemaError::UnknownTable(String::from("ghosts"))
        );
    }
}
