//! Row-mapped entities and the value-saver strategy.
//!
//! An [`Entity`] is a domain object whose attributes correspond to a
//! table row's columns, identified by primary key. Materialization is
//! delegated to the type itself via `from_row`; the engine only supplies
//! converted rows. [`ValueSaver`] is the pluggable strategy that lets
//! foreign relations treat row-mapped entities and host-native object
//! types uniformly.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use loam_sql_core::SqlValue;

use crate::bus::Notification;
use crate::collection::Collection;
use crate::context::Context;
use crate::driver::{Driver, Row};
use crate::error::{OrmError, Result};

/// Eager-load customization callback.
///
/// Dispatch from a `with("...")` path to a concrete relation crosses a
/// type-erased seam, so the callback receives the relation's query as
/// `&mut dyn Any` and downcasts to the `FluentQuery` type it knows.
pub type Customize = Rc<dyn Fn(&mut dyn Any)>;

/// The default no-op customization.
#[must_use]
pub fn no_customize() -> Customize {
    Rc::new(|_| {})
}

/// Splits a dotted eager-load path into its head and remainder.
#[must_use]
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// A row-mapped entity.
pub trait Entity: Clone + 'static {
    /// The backing table name, which doubles as the notification type key.
    fn table() -> &'static str;

    /// Materializes an instance from a converted row.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Materialize`] when the row cannot back an
    /// instance; the engine skips such rows rather than aborting a batch.
    fn from_row(row: &Row) -> Result<Self>;

    /// Returns the instance's attributes as a row of domain values.
    fn to_row(&self) -> Row;

    /// Returns the primary key, `None` for never-saved instances.
    fn pk(&self) -> Option<SqlValue>;

    /// Stores a driver-assigned primary key after an insert.
    fn set_pk(&mut self, pk: SqlValue);

    /// Resolves one eager-load request against a result set.
    ///
    /// `path` is the relation attribute, possibly dotted for nesting.
    /// Implementations dispatch on the head segment to the matching
    /// relation's `eager_load` and hand the remainder down.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownRelation`] for unrecognized paths.
    fn load_relation(
        ctx: &Rc<Context>,
        driver: &dyn Driver,
        path: &str,
        models: &mut Collection<Self>,
        customize: &Customize,
    ) -> Result<()> {
        let _ = (ctx, driver, models, customize);
        Err(OrmError::UnknownRelation(path.to_string()))
    }

    /// Returns a collection keyed by this type's primary key.
    #[must_use]
    fn collection() -> Collection<Self> {
        Collection::keyed_by(Self::pk)
    }
}

fn quote(value: &SqlValue) -> String {
    value.clone().into_storage_text().to_sql_inline()
}

/// Inserts or updates an entity from its own row form.
///
/// A missing or NULL primary key means INSERT; the driver-assigned key,
/// when reported, is stored back on the instance. Fires a `Saved`
/// notification when the context carries a bus.
///
/// # Errors
///
/// Declaration-time schema errors for unknown columns or bad data,
/// driver errors otherwise.
pub fn save_entity<E: Entity>(
    ctx: &Rc<Context>,
    driver: &dyn Driver,
    entity: &mut E,
) -> Result<()> {
    let schema = ctx.schema(E::table())?;
    let pk_col = schema.primary_key().to_string();
    let row = entity.to_row();

    let mut prepared: Vec<(String, SqlValue)> = Vec::with_capacity(row.len());
    for (name, value) in &row {
        let column = schema.get_column(name)?;
        prepared.push((name.clone(), column.prepare(value.clone())?));
    }

    let sql = match entity.pk() {
        Some(pk) if !pk.is_null() => {
            let sets: Vec<String> = prepared
                .iter()
                .filter(|(name, _)| *name != pk_col)
                .map(|(name, value)| format!("{name} = {}", quote(value)))
                .collect();
            format!(
                "UPDATE {} SET {} WHERE {pk_col} = {}",
                E::table(),
                sets.join(", "),
                quote(&pk)
            )
        }
        _ => {
            let inserted: Vec<&(String, SqlValue)> = prepared
                .iter()
                .filter(|(name, value)| *name != pk_col || !value.is_null())
                .collect();
            let columns: Vec<&str> = inserted.iter().map(|(name, _)| name.as_str()).collect();
            let values: Vec<String> = inserted.iter().map(|(_, value)| quote(value)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                E::table(),
                columns.join(", "),
                values.join(", ")
            )
        }
    };

    tracing::debug!(table = E::table(), %sql, "saving entity");
    let result = driver.execute(&sql)?;
    if entity.pk().is_none_or(|pk| pk.is_null()) {
        if let Some(id) = result.last_insert_id {
            entity.set_pk(SqlValue::Int(id));
        }
    }

    if let (Some(bus), Some(pk)) = (ctx.bus(), entity.pk()) {
        bus.fire(
            E::table(),
            &Notification::Saved {
                subject: Rc::new(entity.clone()),
                pk,
                changed: row.keys().cloned().collect(),
                attached: HashMap::new(),
                detached: HashMap::new(),
            },
        );
    }
    Ok(())
}

/// Deletes an entity row by primary key.
///
/// Fires a `Deleted` notification when the context carries a bus.
///
/// # Errors
///
/// [`OrmError::UnboundRelation`] is never raised here; an instance
/// without a primary key is a no-op. Driver errors propagate.
pub fn delete_entity<E: Entity>(
    ctx: &Rc<Context>,
    driver: &dyn Driver,
    entity: &E,
) -> Result<()> {
    let Some(pk) = entity.pk() else {
        return Ok(());
    };
    let schema = ctx.schema(E::table())?;
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        E::table(),
        schema.primary_key(),
        quote(&pk)
    );
    tracing::debug!(table = E::table(), %sql, "deleting entity");
    driver.execute(&sql)?;

    if let Some(bus) = ctx.bus() {
        bus.fire(E::table(), &Notification::Deleted { pk });
    }
    Ok(())
}

/// Strategy for fetching and persisting related values.
///
/// Unifies row-mapped entities and the host platform's built-in object
/// types behind one interface, so foreign relations never care which
/// kind they point at.
pub trait ValueSaver<T> {
    /// Extracts the value's key.
    fn get_pk(&self, value: &T) -> Option<SqlValue>;

    /// Point lookup by key.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the underlying fetch.
    fn get_model(&self, ctx: &Rc<Context>, driver: &dyn Driver, pk: &SqlValue)
        -> Result<Option<T>>;

    /// Batched lookup for eager loading: one query for all keys.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the underlying fetch.
    fn get_models(
        &self,
        ctx: &Rc<Context>,
        driver: &dyn Driver,
        pks: &[SqlValue],
    ) -> Result<Vec<T>>;

    /// Materializes a value from a raw row.
    ///
    /// # Errors
    ///
    /// [`OrmError::Materialize`] when the row cannot back a value.
    fn make_model(&self, row: &Row) -> Result<T>;

    /// Persists the value.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the underlying write.
    fn save(&self, ctx: &Rc<Context>, driver: &dyn Driver, value: &mut T) -> Result<()>;
}

/// [`ValueSaver`] over row-mapped entities.
#[derive(Debug)]
pub struct EntitySaver<E> {
    _marker: PhantomData<E>,
}

impl<E> Default for EntitySaver<E> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E> Clone for EntitySaver<E> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<E> EntitySaver<E> {
    /// Creates the saver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E: Entity> ValueSaver<E> for EntitySaver<E> {
    fn get_pk(&self, value: &E) -> Option<SqlValue> {
        value.pk()
    }

    fn get_model(
        &self,
        ctx: &Rc<Context>,
        driver: &dyn Driver,
        pk: &SqlValue,
    ) -> Result<Option<E>> {
        crate::query::FluentQuery::<E>::new(ctx)?.find(driver, pk.clone())
    }

    fn get_models(
        &self,
        ctx: &Rc<Context>,
        driver: &dyn Driver,
        pks: &[SqlValue],
    ) -> Result<Vec<E>> {
        let found = crate::query::FluentQuery::<E>::new(ctx)?.find_many(driver, pks.to_vec())?;
        Ok(found.values().cloned().collect())
    }

    fn make_model(&self, row: &Row) -> Result<E> {
        E::from_row(row)
    }

    fn save(&self, ctx: &Rc<Context>, driver: &dyn Driver, value: &mut E) -> Result<()> {
        save_entity(ctx, driver, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_splitting() {
        assert_eq!(split_path("books"), ("books", None));
        assert_eq!(split_path("books.reviews"), ("books", Some("reviews")));
        assert_eq!(
            split_path("a.b.c"),
            ("a", Some("b.c"))
        );
    }
}
