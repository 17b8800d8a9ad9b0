//! Key-on-parent relations resolved through a value-saver strategy.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use loam_sql_core::SqlValue;

use crate::context::Context;
use crate::driver::Driver;
use crate::entity::{Entity, ValueSaver};
use crate::error::{OrmError, Result};

/// A relation whose key lives on the parent's own row.
///
/// The parent stores the related value's key in `key_column`; fetching
/// and persisting go through the [`ValueSaver`] strategy, so the target
/// can be a row-mapped entity or a host-native object alike.
pub struct HasForeign<P: Entity, T, S: ValueSaver<T>> {
    ctx: Rc<Context>,
    key_column: String,
    saver: S,
    parent_key: Option<SqlValue>,
    cached: Option<Option<T>>,
    _marker: PhantomData<P>,
}

/// A single attribute-stored related object.
///
/// Resolution is identical to [`HasForeign`]; the distinct name marks
/// the owning side of a one-to-one pairing.
pub type BelongsToMany<P, T, S> = HasForeign<P, T, S>;

impl<P: Entity, T, S: ValueSaver<T> + Clone> Clone for HasForeign<P, T, S>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            ctx: Rc::clone(&self.ctx),
            key_column: self.key_column.clone(),
            saver: self.saver.clone(),
            parent_key: self.parent_key.clone(),
            cached: self.cached.clone(),
            _marker: PhantomData,
        }
    }
}

impl<P: Entity, T, S: ValueSaver<T>> std::fmt::Debug for HasForeign<P, T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HasForeign")
            .field("key_column", &self.key_column)
            .field("bound", &self.parent_key.is_some())
            .finish_non_exhaustive()
    }
}

impl<P: Entity, T, S: ValueSaver<T>> HasForeign<P, T, S> {
    /// Creates an unbound relation template.
    ///
    /// # Errors
    ///
    /// `UnknownTable` / `InvalidColumn` when the parent's table or the
    /// key column is not registered.
    pub fn new(ctx: &Rc<Context>, key_column: &str, saver: S) -> Result<Self> {
        ctx.schema(P::table())?.get_column(key_column)?;
        Ok(Self {
            ctx: Rc::clone(ctx),
            key_column: key_column.to_string(),
            saver,
            parent_key: None,
            cached: None,
            _marker: PhantomData,
        })
    }

    /// Returns a copy bound to `parent`, reading the stored key off its
    /// row.
    #[must_use]
    pub fn for_parent(&self, parent: &P) -> Self
    where
        S: Clone,
        T: Clone,
    {
        let mut bound = self.clone();
        bound.parent_key = parent
            .to_row()
            .get(&self.key_column)
            .filter(|key| !key.is_null())
            .cloned();
        bound.cached = None;
        bound
    }

    /// Fetches the related value, reusing a prior fetch.
    ///
    /// A NULL or missing stored key resolves to `None` without touching
    /// the driver.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the strategy's point lookup.
    pub fn get_result(&mut self, driver: &dyn Driver) -> Result<Option<T>>
    where
        T: Clone,
    {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }
        let resolved = match &self.parent_key {
            Some(key) => self.saver.get_model(&self.ctx, driver, key)?,
            None => None,
        };
        self.cached = Some(resolved.clone());
        Ok(resolved)
    }

    /// Stores an already-fetched value on a bound relation.
    pub fn prime(&mut self, value: Option<T>) {
        self.cached = Some(value);
    }

    /// Fetches related values for a whole parent set in one query.
    ///
    /// Parents' stored keys are batched into a single `IN (...)` lookup
    /// and the results mapped back by the strategy's key extractor.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the single batched query.
    pub fn eager_load(
        &self,
        driver: &dyn Driver,
        parents: &[&P],
        _customize: &crate::entity::Customize,
    ) -> Result<HashMap<String, T>> {
        let mut keys: Vec<SqlValue> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for parent in parents {
            if let Some(key) = parent.to_row().get(&self.key_column) {
                if !key.is_null() && !seen.contains(&key.to_key()) {
                    seen.push(key.to_key());
                    keys.push(key.clone());
                }
            }
        }
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut resolved = HashMap::new();
        for value in self.saver.get_models(&self.ctx, driver, &keys)? {
            if let Some(pk) = self.saver.get_pk(&value) {
                resolved.insert(pk.to_key(), value);
            }
        }
        Ok(resolved)
    }

    /// Persists the related value and returns its key, so the caller can
    /// store it back on the parent's row.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the strategy's save.
    pub fn persist(&self, driver: &dyn Driver, value: &mut T) -> Result<Option<SqlValue>> {
        self.saver.save(&self.ctx, driver, value)?;
        Ok(self.saver.get_pk(value))
    }

    /// Deleting the parent needs no dependent cleanup here: the stored
    /// key lives on the parent's own row and dies with it.
    pub fn on_delete(&self, _driver: &dyn Driver, _parent: &P) -> Result<()> {
        Ok(())
    }

    /// Fetches the related value or fails when the stored key resolves
    /// to nothing.
    ///
    /// # Errors
    ///
    /// [`OrmError::NotFound`] when the key has no row.
    pub fn get_result_or_fail(&mut self, driver: &dyn Driver) -> Result<T>
    where
        T: Clone,
    {
        self.get_result(driver)?.ok_or(OrmError::NotFound)
    }
}
