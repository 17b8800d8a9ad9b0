//! Many-to-many relations over an association table.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use loam_sql_core::{CompareOp, JoinKind, SqlValue, Where};

use crate::bus::{EventKind, Notification, SubscriptionId};
use crate::collection::Collection;
use crate::context::Context;
use crate::driver::{Driver, Row};
use crate::entity::{Customize, Entity};
use crate::error::{OrmError, Result};
use crate::query::FluentQuery;

// Alias of the joined association table in fetch/eager queries; the
// related table itself is always t1.
const ASSOC_ALIAS: &str = "t2";

// Column label carrying the owning parent's key in eager-load rows.
const PARENT_KEY_LABEL: &str = "__parent_pk";

/// A many-to-many relation through an association table.
///
/// The association table carries one column pointing at the parent and
/// one at the related entity. The fetched collection tracks add/remove
/// deltas, and [`persist`](Self::persist) writes them back as one bulk
/// DELETE plus one bulk INSERT.
pub struct ManyToMany<P: Entity, R: Entity> {
    ctx: Rc<Context>,
    assoc_table: String,
    parent_column: String,
    related_column: String,
    parent_pk: Option<SqlValue>,
    cached: Option<Rc<RefCell<Collection<R>>>>,
    subscriptions: Vec<SubscriptionId>,
    _marker: PhantomData<P>,
}

impl<P: Entity, R: Entity> std::fmt::Debug for ManyToMany<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManyToMany")
            .field("assoc_table", &self.assoc_table)
            .field("bound", &self.parent_pk.is_some())
            .field("synced", &!self.subscriptions.is_empty())
            .finish_non_exhaustive()
    }
}

impl<P: Entity, R: Entity> Clone for ManyToMany<P, R> {
    // Subscriptions are per-instance: the clone starts unsynced so the
    // original's Drop remains the sole unsubscriber.
    fn clone(&self) -> Self {
        Self {
            ctx: Rc::clone(&self.ctx),
            assoc_table: self.assoc_table.clone(),
            parent_column: self.parent_column.clone(),
            related_column: self.related_column.clone(),
            parent_pk: self.parent_pk.clone(),
            cached: self.cached.clone(),
            subscriptions: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<P: Entity, R: Entity> Drop for ManyToMany<P, R> {
    fn drop(&mut self) {
        if let Some(bus) = self.ctx.bus() {
            for id in self.subscriptions.drain(..) {
                bus.unsubscribe(id);
            }
        }
    }
}

impl<P: Entity, R: Entity> ManyToMany<P, R> {
    /// Creates an unbound relation template.
    ///
    /// # Errors
    ///
    /// `UnknownTable` / `InvalidColumn` when the association table or
    /// either of its key columns is not registered.
    pub fn new(
        ctx: &Rc<Context>,
        assoc_table: &str,
        parent_column: &str,
        related_column: &str,
    ) -> Result<Self> {
        let assoc = ctx.schema(assoc_table)?;
        assoc.get_column(parent_column)?;
        assoc.get_column(related_column)?;
        ctx.schema(R::table())?;
        Ok(Self {
            ctx: Rc::clone(ctx),
            assoc_table: assoc_table.to_string(),
            parent_column: parent_column.to_string(),
            related_column: related_column.to_string(),
            parent_pk: None,
            cached: None,
            subscriptions: Vec::new(),
            _marker: PhantomData,
        })
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

    fn escape_assoc(&self, column: &str, value: &SqlValue) -> Result<String> {
        Ok(self
            .ctx
            .schema(&self.assoc_table)?
            .get_column(column)?
            .prepare(value.clone())?
            .into_storage_text()
            .to_sql_inline())
    }

    fn related_pk_column(&self) -> Result<String> {
        Ok(self.ctx.schema(R::table())?.primary_key().to_string())
    }

    /// Fetches the related collection, reusing a prior fetch.
    ///
    /// The related table is joined to the association table filtered by
    /// the parent key, DISTINCT. The returned handle is shared with the
    /// relation: mutations through it are what [`persist`](Self::persist)
    /// writes back.
    ///
    /// # Errors
    ///
    /// `UnboundRelation` on a template, driver errors otherwise.
    pub fn get_results(&mut self, driver: &dyn Driver) -> Result<Rc<RefCell<Collection<R>>>> {
        if let Some(cached) = &self.cached {
            return Ok(Rc::clone(cached));
        }
        let pk = self.bound_pk()?.clone();

        let mut q = FluentQuery::<R>::new(&self.ctx)?;
        q.distinct();
        q.select_all(true)?;
        q.join(
            &self.assoc_table,
            &self.related_pk_column()?,
            &self.related_column,
            CompareOp::Eq,
            JoinKind::Inner,
            Some(Where::eq(
                &format!("{ASSOC_ALIAS}.{}", self.parent_column),
                pk,
            )),
        )?;

        let mut results = q.results(driver)?;
        results.keep_memory(true);
        let handle = Rc::new(RefCell::new(results));
        self.cached = Some(Rc::clone(&handle));
        Ok(handle)
    }

    /// Stores an already-fetched result set on a bound relation.
    ///
    /// Delta memory is switched on so later mutations are persistable.
    pub fn prime(&mut self, mut results: Collection<R>) {
        results.keep_memory(true);
        self.cached = Some(Rc::new(RefCell::new(results)));
    }

    /// Fetches related collections for a whole parent set in one query.
    ///
    /// A single LEFT JOIN against the association table keyed by the
    /// full parent set, grouped client-side by the association's parent
    /// column back to each parent.
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
        let mut grouped: HashMap<String, Collection<R>> = HashMap::new();
        if parent_pks.is_empty() {
            return Ok(grouped);
        }

        let mut q = FluentQuery::<R>::new(&self.ctx)?;
        q.select_all(true)?;
        q.join(
            &self.assoc_table,
            &self.related_pk_column()?,
            &self.related_column,
            CompareOp::Eq,
            JoinKind::Left,
            Some(Where::any(
                &format!("{ASSOC_ALIAS}.{}", self.parent_column),
                parent_pks.to_vec(),
            )),
        )?;
        q.select_expr(&format!(
            "{ASSOC_ALIAS}.{} AS {PARENT_KEY_LABEL}",
            self.parent_column
        ));
        (customize)(&mut q as &mut dyn Any);

        // The parent key rides along in every row, so materialization
        // happens here instead of in the query's terminal.
        let sql = q.render()?;
        tracing::debug!(assoc = %self.assoc_table, %sql, "eager-loading association");
        let result = driver.execute(&sql)?;

        let schema = self.ctx.schema(R::table())?;
        for raw in &result.rows {
            let Some(parent_key) = raw.get(PARENT_KEY_LABEL).filter(|v| !v.is_null()) else {
                continue;
            };
            let mut converted = Row::new();
            for (name, value) in raw {
                if name == PARENT_KEY_LABEL {
                    continue;
                }
                let domain = match schema.get_column(name) {
                    Ok(column) => column.convert_raw(value),
                    Err(_) => value.clone(),
                };
                converted.insert(name.clone(), domain);
            }
            match R::from_row(&converted) {
                Ok(model) => {
                    grouped
                        .entry(parent_key.to_key())
                        .or_insert_with(R::collection)
                        .push(model);
                }
                Err(err) => {
                    tracing::warn!(table = R::table(), %err, "skipping unmaterializable row");
                }
            }
        }
        tracing::trace!(
            assoc = %self.assoc_table,
            parents = parent_pks.len(),
            slices = grouped.len(),
            "partitioned eager load"
        );
        Ok(grouped)
    }

    /// Writes the cached collection's deltas back to the association
    /// table.
    ///
    /// At most one bulk DELETE covering every removed pair and one bulk
    /// `INSERT IGNORE` covering every added pair, sized to the delta.
    /// Fires a `Saved` notification per affected related model carrying
    /// the attachment change, then clears the deltas.
    ///
    /// # Errors
    ///
    /// `UnboundRelation` when unbound or never fetched; driver errors
    /// otherwise.
    pub fn persist(&mut self, driver: &dyn Driver) -> Result<()> {
        let parent_pk = self.bound_pk()?.clone();
        let cache = self.cached.as_ref().ok_or(OrmError::UnboundRelation)?;

        let mut notifications: Vec<Notification> = Vec::new();
        {
            let mut collection = cache.borrow_mut();
            let added = collection.get_added();
            let removed = collection.get_removed();
            if added.is_empty() && removed.is_empty() {
                return Ok(());
            }

            let parent_literal = self.escape_assoc(&self.parent_column, &parent_pk)?;

            if !removed.is_empty() {
                let pks = removed
                    .pks()
                    .iter()
                    .map(|pk| self.escape_assoc(&self.related_column, pk))
                    .collect::<Result<Vec<_>>>()?;
                let sql = format!(
                    "DELETE FROM {} WHERE {} = {parent_literal} AND {} IN ({})",
                    self.assoc_table,
                    self.parent_column,
                    self.related_column,
                    pks.join(", ")
                );
                tracing::debug!(assoc = %self.assoc_table, %sql, "detaching pairs");
                driver.execute(&sql)?;
            }

            if !added.is_empty() {
                let rows = added
                    .pks()
                    .iter()
                    .map(|pk| {
                        Ok(format!(
                            "({parent_literal}, {})",
                            self.escape_assoc(&self.related_column, pk)?
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let sql = format!(
                    "INSERT IGNORE INTO {} ({}, {}) VALUES {}",
                    self.assoc_table,
                    self.parent_column,
                    self.related_column,
                    rows.join(", ")
                );
                tracing::debug!(assoc = %self.assoc_table, %sql, "attaching pairs");
                driver.execute(&sql)?;
            }

            if self.ctx.bus().is_some() {
                for model in added.values() {
                    if let Some(pk) = model.pk() {
                        notifications.push(Notification::Saved {
                            subject: Rc::new(model.clone()),
                            pk,
                            changed: Vec::new(),
                            attached: HashMap::from([(
                                self.assoc_table.clone(),
                                vec![parent_pk.clone()],
                            )]),
                            detached: HashMap::new(),
                        });
                    }
                }
                for model in removed.values() {
                    if let Some(pk) = model.pk() {
                        notifications.push(Notification::Saved {
                            subject: Rc::new(model.clone()),
                            pk,
                            changed: Vec::new(),
                            attached: HashMap::new(),
                            detached: HashMap::from([(
                                self.assoc_table.clone(),
                                vec![parent_pk.clone()],
                            )]),
                        });
                    }
                }
            }

            collection.reset_memory();
        }

        // Fired after the borrow ends: subscribers may reach back into
        // this same cache.
        if let Some(bus) = self.ctx.bus() {
            for notification in &notifications {
                bus.fire(R::table(), notification);
            }
        }
        Ok(())
    }

    /// Removes every association row for `parent` ahead of its deletion.
    ///
    /// The related rows themselves are untouched; only the pairs go.
    ///
    /// # Errors
    ///
    /// Driver or schema errors.
    pub fn on_delete(&self, driver: &dyn Driver, parent: &P) -> Result<()> {
        let Some(pk) = parent.pk() else {
            return Ok(());
        };
        let literal = self.escape_assoc(&self.parent_column, &pk)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = {literal}",
            self.assoc_table, self.parent_column
        );
        tracing::debug!(assoc = %self.assoc_table, %sql, "clearing associations");
        driver.execute(&sql)?;
        Ok(())
    }

    /// Mirrors related-type save/delete notifications into the cached
    /// collection, so other-side attachment changes appear here without
    /// re-querying.
    ///
    /// Requires a bound, fetched relation. Without a bus on the context
    /// this is a no-op. Subscriptions are dropped with the relation.
    ///
    /// # Errors
    ///
    /// `UnboundRelation` when unbound or never fetched.
    pub fn keep_synced(&mut self) -> Result<()> {
        let parent_key = self.bound_pk()?.to_key();
        let cache = Rc::clone(self.cached.as_ref().ok_or(OrmError::UnboundRelation)?);
        let Some(bus) = self.ctx.bus().cloned() else {
            return Ok(());
        };

        let assoc = self.assoc_table.clone();
        let key = parent_key;
        let mirror = Rc::clone(&cache);
        let saved = bus.subscribe(R::table(), EventKind::Saved, move |notification| {
            let Notification::Saved {
                subject,
                pk,
                attached,
                detached,
                ..
            } = notification
            else {
                return;
            };
            let Some(model) = subject.downcast_ref::<R>() else {
                return;
            };
            let involves = |map: &HashMap<String, Vec<SqlValue>>| {
                map.get(&assoc)
                    .is_some_and(|parents| parents.iter().any(|p| p.to_key() == key))
            };
            if involves(attached) {
                let model = model.clone();
                let _ = mirror.borrow_mut().dont_remember(move |collection| {
                    collection.push(model);
                    Ok::<_, ()>(())
                });
            } else if involves(detached) {
                let _ = mirror.borrow_mut().dont_remember(|collection| {
                    collection.remove_model(pk);
                    Ok::<_, ()>(())
                });
            }
        });

        let mirror = Rc::clone(&cache);
        let deleted = bus.subscribe(R::table(), EventKind::Deleted, move |notification| {
            let Notification::Deleted { pk } = notification else {
                return;
            };
            let _ = mirror.borrow_mut().dont_remember(|collection| {
                collection.remove_model(pk);
                Ok::<_, ()>(())
            });
        });

        self.subscriptions.push(saved);
        self.subscriptions.push(deleted);
        Ok(())
    }
}
