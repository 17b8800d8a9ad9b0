//! To-many and to-one relations keyed by a foreign column on the
//! related table.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use loam_sql_core::{SqlValue, Where};

use crate::collection::Collection;
use crate::context::Context;
use crate::driver::Driver;
use crate::entity::{save_entity, Customize, Entity};
use crate::error::{OrmError, Result};
use crate::query::FluentQuery;
use crate::relation::DeletePolicy;

/// A one-parent-to-many-children relation.
///
/// Children live on `R`'s table and point back at the parent through
/// `foreign_column`.
#[derive(Debug, Clone)]
pub struct HasMany<P: Entity, R: Entity> {
    ctx: Rc<Context>,
    foreign_column: String,
    policy: DeletePolicy,
    parent_pk: Option<SqlValue>,
    cached: Option<Collection<R>>,
    _marker: PhantomData<P>,
}

impl<P: Entity, R: Entity> HasMany<P, R> {
    /// Creates an unbound relation template.
    ///
    /// # Errors
    ///
    /// `UnknownTable` / `InvalidColumn` when `R`'s table or the foreign
    /// column is not registered.
    pub fn new(ctx: &Rc<Context>, foreign_column: &str) -> Result<Self> {
        ctx.schema(R::table())?.get_column(foreign_column)?;
        Ok(Self {
            ctx: Rc::clone(ctx),
            foreign_column: foreign_column.to_string(),
            policy: DeletePolicy::default(),
            parent_pk: None,
            cached: None,
            _marker: PhantomData,
        })
    }

    /// Sets the delete policy for dependent rows.
    #[must_use]
    pub fn on_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns a copy bound to `parent`.
    #[must_use]
    pub fn for_parent(&self, parent: &P) -> Self {
        let mut bound = self.clone();
        bound.parent_pk = parent.pk();
        bound.cached = None;
        bound
    }

    fn bound_pk(&self) -> Result<&SqlValue> {
        self.parent_pk.as_ref().ok_or(OrmError::UnboundRelation)
    }

    /// The query this relation resolves with, before execution.
    ///
    /// # Errors
    ///
    /// `UnboundRelation` on a template, schema errors otherwise.
    pub fn query(&self) -> Result<FluentQuery<R>> {
        let pk = self.bound_pk()?.clone();
        let mut q = FluentQuery::<R>::new(&self.ctx)?;
        q.and_where(Where::eq(&self.foreign_column, pk))?;
        Ok(q)
    }

    /// Fetches the related collection, reusing a prior fetch or an
    /// eager-loaded result.
    ///
    /// # Errors
    ///
    /// `UnboundRelation` on a template, driver errors otherwise.
    pub fn get_results(&mut self, driver: &dyn Driver) -> Result<&Collection<R>> {
        if self.cached.is_none() {
            let results = self.query()?.results(driver)?;
            self.cached = Some(results);
        }
        Ok(self.cached.get_or_insert_with(R::collection))
    }

    /// Stores an already-fetched result set on a bound relation.
    pub fn prime(&mut self, results: Collection<R>) {
        self.cached = Some(results);
    }

    /// Drops any cached result so the next read re-queries.
    pub fn refresh(&mut self) {
        self.cached = None;
    }

    /// Fetches children for a whole parent set in one query.
    ///
    /// Returns the children partitioned by foreign-key value, keyed by
    /// the canonical key form; parents without a slice get nothing.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the single batched query.
    pub fn eager_load(
        &self,
        driver: &dyn Driver,
        parent_pks: &[SqlValue],
        customize: &Customize,
    ) -> Result<HashMap<String, Collection<R>>> {
        let mut partitioned: HashMap<String, Collection<R>> = HashMap::new();
        if parent_pks.is_empty() {
            return Ok(partitioned);
        }

        let mut q = FluentQuery::<R>::new(&self.ctx)?;
        q.and_where(Where::any(&self.foreign_column, parent_pks.to_vec()))?;
        (customize)(&mut q as &mut dyn Any);

        for child in q.results(driver)?.values() {
            let Some(fk) = child.to_row().get(&self.foreign_column).cloned() else {
                continue;
            };
            partitioned
                .entry(fk.to_key())
                .or_insert_with(R::collection)
                .push(child.clone());
        }
        tracing::trace!(
            table = R::table(),
            parents = parent_pks.len(),
            slices = partitioned.len(),
            "partitioned eager load"
        );
        Ok(partitioned)
    }

    /// Saves every child in the collection.
    ///
    /// Children are expected to already carry the parent's key in their
    /// foreign column.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from any save.
    pub fn persist(&self, driver: &dyn Driver, values: &mut Collection<R>) -> Result<()> {
        for child in values.values_mut() {
            save_entity(&self.ctx, driver, child)?;
        }
        Ok(())
    }

    /// Applies the delete policy ahead of deleting `parent`.
    ///
    /// # Errors
    ///
    /// `DeleteRestricted` when the policy is restrict and dependent rows
    /// exist; driver errors otherwise.
    pub fn on_delete(&self, driver: &dyn Driver, parent: &P) -> Result<()> {
        let Some(pk) = parent.pk() else {
            return Ok(());
        };
        let literal = self
            .ctx
            .schema(R::table())?
            .get_column(&self.foreign_column)?
            .prepare(pk)?
            .into_storage_text()
            .to_sql_inline();

        self.apply_policy(driver, &literal)
    }

    fn apply_policy(&self, driver: &dyn Driver, literal: &str) -> Result<()> {
        match self.policy {
            DeletePolicy::Restrict => {
                let mut q = FluentQuery::<R>::new(&self.ctx)?;
                q.and_where(Where::raw(format!(
                    "t1.{} = {literal}",
                    self.foreign_column
                )))?;
                if q.count(driver)? > 0 {
                    return Err(OrmError::DeleteRestricted {
                        table: R::table().to_string(),
                    });
                }
            }
            DeletePolicy::Cascade => {
                let sql = format!(
                    "DELETE FROM {} WHERE {} = {literal}",
                    R::table(),
                    self.foreign_column
                );
                tracing::debug!(table = R::table(), %sql, "cascading delete");
                driver.execute(&sql)?;
            }
            DeletePolicy::SetNull => {
                let sql = format!(
                    "UPDATE {} SET {} = NULL WHERE {} = {literal}",
                    R::table(),
                    self.foreign_column,
                    self.foreign_column
                );
                tracing::debug!(table = R::table(), %sql, "detaching dependents");
                driver.execute(&sql)?;
            }
            DeletePolicy::DoNothing => {}
        }
        Ok(())
    }
}

/// A one-parent-to-one-child relation.
///
/// Same resolution as [`HasMany`], narrowed to the first (and expected
/// only) matching row. An absent row is `None`, not an error.
#[derive(Debug, Clone)]
pub struct HasOne<P: Entity, R: Entity> {
    inner: HasMany<P, R>,
}

impl<P: Entity, R: Entity> HasOne<P, R> {
    /// Creates an unbound relation template.
    ///
    /// # Errors
    ///
    /// `UnknownTable` / `InvalidColumn` when `R`'s table or the foreign
    /// column is not registered.
    pub fn new(ctx: &Rc<Context>, foreign_column: &str) -> Result<Self> {
        Ok(Self {
            inner: HasMany::new(ctx, foreign_column)?,
        })
    }

    /// Sets the delete policy for the dependent row.
    #[must_use]
    pub fn on_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.inner = self.inner.on_delete_policy(policy);
        self
    }

    /// Returns a copy bound to `parent`.
    #[must_use]
    pub fn for_parent(&self, parent: &P) -> Self {
        Self {
            inner: self.inner.for_parent(parent),
        }
    }

    /// Fetches the related row, reusing a prior fetch.
    ///
    /// # Errors
    ///
    /// `UnboundRelation` on a template, driver errors otherwise.
    pub fn get_result(&mut self, driver: &dyn Driver) -> Result<Option<R>> {
        Ok(self.inner.get_results(driver)?.first().cloned())
    }

    /// Stores an already-fetched row on a bound relation.
    pub fn prime(&mut self, result: Option<R>) {
        let mut single = R::collection();
        if let Some(value) = result {
            single.push(value);
        }
        self.inner.prime(single);
    }

    /// Fetches the single related row for a whole parent set in one query.
    ///
    /// # Errors
    ///
    /// Driver or schema errors from the single batched query.
    pub fn eager_load(
        &self,
        driver: &dyn Driver,
        parent_pks: &[SqlValue],
        customize: &Customize,
    ) -> Result<HashMap<String, R>> {
        let partitioned = self.inner.eager_load(driver, parent_pks, customize)?;
        Ok(partitioned
            .into_iter()
            .filter_map(|(key, slice)| slice.first().cloned().map(|row| (key, row)))
            .collect())
    }

    /// Applies the delete policy ahead of deleting `parent`.
    ///
    /// # Errors
    ///
    /// Same as [`HasMany::on_delete`].
    pub fn on_delete(&self, driver: &dyn Driver, parent: &P) -> Result<()> {
        self.inner.on_delete(driver, parent)
    }
}
