//! Fluent query assembly and execution.
//!
//! A [`FluentQuery`] owns the clause state for one logical query against
//! a target table, validates every column reference against the schema
//! at declaration time, and only talks to the driver from its terminal
//! methods. Rendering is deterministic; results are memoized per
//! instance until any mutator runs.

use std::marker::PhantomData;
use std::rc::Rc;

use loam_sql_core::{
    Builder, Column, CompareOp, JoinKind, OrderDirection, SchemaError, SqlValue, TableSchema, Tag,
    ToSqlValue, Where,
};

use crate::collection::Collection;
use crate::context::Context;
use crate::driver::{Driver, Row};
use crate::entity::{no_customize, Customize, save_entity, Entity};
use crate::error::{OrmError, Result};

/// Alias of the target table in every rendered statement.
pub const BASE_ALIAS: &str = "t1";

#[derive(Debug, Clone)]
struct JoinSpec {
    kind: JoinKind,
    table: String,
    alias: String,
    on: Where,
}

/// One declared eager-load request.
#[derive(Clone)]
struct WithRequest {
    path: String,
    customize: Customize,
}

/// A stateful query assembler for one entity type.
///
/// Built per logical query and mutated by chaining; the terminal
/// `results`/`first` render, execute and materialize exactly once and
/// reuse the memoized outcome until the query state changes.
#[derive(Clone)]
pub struct FluentQuery<E: Entity> {
    ctx: Rc<Context>,
    distinct: bool,
    select_columns: Vec<String>,
    select_exprs: Vec<String>,
    joins: Vec<JoinSpec>,
    where_root: Option<Where>,
    group: Vec<String>,
    having: Option<Where>,
    order: Vec<(String, OrderDirection)>,
    limit_offset: u64,
    limit_count: Option<u64>,
    want_total: bool,
    with: Vec<WithRequest>,
    memo: Option<Collection<E>>,
    total: Option<u64>,
    _marker: PhantomData<E>,
}

impl<E: Entity> std::fmt::Debug for FluentQuery<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluentQuery")
            .field("table", &E::table())
            .field("joins", &self.joins.len())
            .field("memoized", &self.memo.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> FluentQuery<E> {
    /// Creates a query against `E`'s table.
    ///
    /// # Errors
    ///
    /// `UnknownTable` when the table is not registered.
    pub fn new(ctx: &Rc<Context>) -> Result<Self> {
        ctx.schema(E::table())?;
        Ok(Self {
            ctx: Rc::clone(ctx),
            distinct: false,
            select_columns: Vec::new(),
            select_exprs: Vec::new(),
            joins: Vec::new(),
            where_root: None,
            group: Vec::new(),
            having: None,
            order: Vec::new(),
            limit_offset: 0,
            limit_count: None,
            want_total: false,
            with: Vec::new(),
            memo: None,
            total: None,
            _marker: PhantomData,
        })
    }

    fn touch(&mut self) {
        self.memo = None;
        self.total = None;
    }

    fn base_schema(&self) -> Result<&TableSchema> {
        Ok(self.ctx.schema(E::table())?)
    }

    fn table_for_alias(&self, alias: &str) -> Result<&str> {
        if alias == BASE_ALIAS {
            return Ok(E::table());
        }
        self.joins
            .iter()
            .find(|j| j.alias == alias)
            .map(|j| j.table.as_str())
            .ok_or_else(|| SchemaError::InvalidColumn(format!("unknown alias {alias}")).into())
    }

    /// Validates a column reference and returns its alias-qualified form.
    ///
    /// Bare names resolve against the target table; `alias.column`
    /// references resolve against the aliased table.
    ///
    /// # Errors
    ///
    /// `InvalidColumn` for unknown columns or aliases.
    pub fn prepare_column(&self, reference: &str) -> Result<String> {
        let (alias, name) = reference
            .split_once('.')
            .map_or((BASE_ALIAS, reference), |(a, c)| (a, c));
        let table = self.table_for_alias(alias)?;
        self.ctx.schema(table)?.get_column(name)?;
        Ok(format!("{alias}.{name}"))
    }

    fn column_handle(&self, reference: &str) -> Result<&Column> {
        let (alias, name) = reference
            .split_once('.')
            .map_or((BASE_ALIAS, reference), |(a, c)| (a, c));
        let table = self.table_for_alias(alias)?;
        Ok(self.ctx.schema(table)?.get_column(name)?)
    }

    /// Validates and escapes a value for the given column.
    ///
    /// Storage preparation runs first, then literal escaping.
    ///
    /// # Errors
    ///
    /// `InvalidColumn` / `InvalidDataForColumn` before anything is emitted.
    pub fn escape_value(&self, column: &str, value: impl ToSqlValue) -> Result<String> {
        let prepared = self.column_handle(column)?.prepare(value.to_sql_value())?;
        Ok(prepared.into_storage_text().to_sql_inline())
    }

    // Qualifies every column and runs storage preparation on every leaf
    // value, so rendering afterwards is pure string work.
    fn prepare_where(&self, expr: Where) -> Result<Where> {
        Ok(match expr {
            Where::Compare { column, op, value } => {
                let prepared = self
                    .column_handle(&column)?
                    .prepare(value)?
                    .into_storage_text();
                Where::Compare {
                    column: self.prepare_column(&column)?,
                    op,
                    value: prepared,
                }
            }
            Where::InList {
                column,
                values,
                negated,
            } => {
                let handle = self.column_handle(&column)?;
                let values = values
                    .into_iter()
                    .map(|v| Ok(handle.prepare(v)?.into_storage_text()))
                    .collect::<Result<Vec<_>>>()?;
                Where::InList {
                    column: self.prepare_column(&column)?,
                    values,
                    negated,
                }
            }
            Where::Null { column, negated } => Where::Null {
                column: self.prepare_column(&column)?,
                negated,
            },
            Where::Joined { op, lhs, rhs } => Where::Joined {
                op,
                lhs: Box::new(self.prepare_where(*lhs)?),
                rhs: Box::new(self.prepare_where(*rhs)?),
            },
            raw @ Where::Raw(_) => raw,
        })
    }

    /// Selects specific columns, validated against the schemas in scope.
    ///
    /// # Errors
    ///
    /// `InvalidColumn` for any unknown reference, before any driver call.
    pub fn select(&mut self, columns: &[&str]) -> Result<&mut Self> {
        for reference in columns {
            let qualified = self.prepare_column(reference)?;
            self.select_columns.push(qualified);
        }
        self.touch();
        Ok(self)
    }

    /// Appends a verbatim select expression (aggregate, aliased column).
    ///
    /// Not schema-checked; callers own its validity.
    pub fn select_expr(&mut self, expr: &str) -> &mut Self {
        self.select_exprs.push(expr.to_string());
        self.touch();
        self
    }

    /// Selects every column of the target table, and of the joined
    /// tables too unless `local_only` is set.
    ///
    /// # Errors
    ///
    /// `UnknownTable` when a schema vanished from the registry.
    pub fn select_all(&mut self, local_only: bool) -> Result<&mut Self> {
        let mut columns = Vec::new();
        for name in self.base_schema()?.column_names() {
            columns.push(format!("{BASE_ALIAS}.{name}"));
        }
        if !local_only {
            for join in &self.joins {
                for name in self.ctx.schema(&join.table)?.column_names() {
                    columns.push(format!("{}.{name}", join.alias));
                }
            }
        }
        self.select_columns = columns;
        self.touch();
        Ok(self)
    }

    /// Deduplicates result rows.
    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self.touch();
        self
    }

    /// Replaces the root condition.
    ///
    /// # Errors
    ///
    /// Declaration-time schema errors from the condition's columns/values.
    pub fn root_where(&mut self, expr: Where) -> Result<&mut Self> {
        self.where_root = Some(self.prepare_where(expr)?);
        self.touch();
        Ok(self)
    }

    /// ANDs a condition onto the root, or sets the root when none exists.
    ///
    /// # Errors
    ///
    /// Declaration-time schema errors from the condition's columns/values.
    pub fn and_where(&mut self, expr: Where) -> Result<&mut Self> {
        let prepared = self.prepare_where(expr)?;
        self.where_root = Some(match self.where_root.take() {
            Some(root) => root.and(prepared),
            None => prepared,
        });
        self.touch();
        Ok(self)
    }

    /// ORs a condition onto the root, or sets the root when none exists.
    ///
    /// # Errors
    ///
    /// Declaration-time schema errors from the condition's columns/values.
    pub fn or_where(&mut self, expr: Where) -> Result<&mut Self> {
        let prepared = self.prepare_where(expr)?;
        self.where_root = Some(match self.where_root.take() {
            Some(root) => root.or(prepared),
            None => prepared,
        });
        self.touch();
        Ok(self)
    }

    /// XORs a condition onto the root, or sets the root when none exists.
    ///
    /// # Errors
    ///
    /// Declaration-time schema errors from the condition's columns/values.
    pub fn xor_where(&mut self, expr: Where) -> Result<&mut Self> {
        let prepared = self.prepare_where(expr)?;
        self.where_root = Some(match self.where_root.take() {
            Some(root) => root.xor(prepared),
            None => prepared,
        });
        self.touch();
        Ok(self)
    }

    /// ANDs an equality per pair, in order.
    ///
    /// # Errors
    ///
    /// Declaration-time schema errors from any pair.
    pub fn where_all(&mut self, pairs: &[(&str, SqlValue)]) -> Result<&mut Self> {
        for (column, value) in pairs {
            self.and_where(Where::eq(column, value.clone()))?;
        }
        Ok(self)
    }

    /// Sets the HAVING condition.
    ///
    /// # Errors
    ///
    /// Declaration-time schema errors from the condition's columns/values.
    pub fn having(&mut self, expr: Where) -> Result<&mut Self> {
        self.having = Some(self.prepare_where(expr)?);
        self.touch();
        Ok(self)
    }

    /// Joins another table, allocating the next `t<n>` alias.
    ///
    /// The ON condition is the raw `t1.this_col op t<n>.other_col`
    /// equality; `extra` conditions are AND'ed into it.
    ///
    /// # Errors
    ///
    /// `UnknownTable` / `InvalidColumn` at declaration time.
    pub fn join(
        &mut self,
        table: &str,
        this_col: &str,
        other_col: &str,
        op: CompareOp,
        kind: JoinKind,
        extra: Option<Where>,
    ) -> Result<&mut Self> {
        self.base_schema()?.get_column(this_col)?;
        self.ctx.schema(table)?.get_column(other_col)?;

        let alias = format!("t{}", self.joins.len() + 2);
        let on = Where::raw(format!("{BASE_ALIAS}.{this_col} {op} {alias}.{other_col}"));
        self.joins.push(JoinSpec {
            kind,
            table: table.to_string(),
            alias,
            on,
        });

        if let Some(extra) = extra {
            // The extra conditions may reference the fresh alias, so the
            // join had to be registered first; roll it back on failure.
            match self.prepare_where(extra) {
                Ok(prepared) => {
                    if let Some(join) = self.joins.last_mut() {
                        join.on = join.on.clone().and(prepared);
                    }
                }
                Err(err) => {
                    self.joins.pop();
                    return Err(err);
                }
            }
        }
        self.touch();
        Ok(self)
    }

    /// Appends an ORDER BY entry; repeated calls accumulate.
    ///
    /// # Errors
    ///
    /// `InvalidColumn` for unknown references.
    pub fn order_by(&mut self, column: &str, direction: OrderDirection) -> Result<&mut Self> {
        let qualified = self.prepare_column(column)?;
        self.order.push((qualified, direction));
        self.touch();
        Ok(self)
    }

    /// Appends a GROUP BY column; repeated calls accumulate.
    ///
    /// # Errors
    ///
    /// `InvalidColumn` for unknown references.
    pub fn group_by(&mut self, column: &str) -> Result<&mut Self> {
        let qualified = self.prepare_column(column)?;
        self.group.push(qualified);
        self.touch();
        Ok(self)
    }

    /// Limits the number of returned rows.
    pub fn take(&mut self, count: u64) -> &mut Self {
        self.limit_count = Some(count);
        self.touch();
        self
    }

    /// Skips the first `count` rows.
    pub fn offset(&mut self, count: u64) -> &mut Self {
        self.limit_offset = count;
        self.touch();
        self
    }

    /// Selects one page and requests the total match count alongside it.
    ///
    /// Pages are 1-based; page 3 at 5 per page renders `LIMIT 10, 5`.
    pub fn paginate(&mut self, page: u64, per_page: u64) -> &mut Self {
        self.limit_offset = page.saturating_sub(1) * per_page;
        self.limit_count = Some(per_page);
        self.want_total = true;
        self.touch();
        self
    }

    /// Declares a relation attribute to eager-load after the fetch.
    ///
    /// Dotted paths (`"books.reviews"`) nest; the customization callback
    /// receives the relation's own query and defaults to a no-op.
    pub fn with(&mut self, path: &str, customize: Option<Customize>) -> &mut Self {
        self.with.push(WithRequest {
            path: path.to_string(),
            customize: customize.unwrap_or_else(no_customize),
        });
        self.touch();
        self
    }

    fn select_tag(&self) -> Result<Tag> {
        let mut columns = if self.select_columns.is_empty() {
            let mut defaults = Vec::new();
            for name in self.base_schema()?.column_names() {
                defaults.push(format!("{BASE_ALIAS}.{name}"));
            }
            defaults
        } else {
            self.select_columns.clone()
        };
        columns.extend(self.select_exprs.iter().cloned());
        Ok(Tag::Select {
            distinct: self.distinct,
            columns,
        })
    }

    /// Renders the SELECT statement.
    ///
    /// Pure with respect to query state: identical declaration sequences
    /// yield byte-identical SQL.
    ///
    /// # Errors
    ///
    /// `UnknownTable` when a schema vanished from the registry.
    pub fn render(&self) -> Result<String> {
        let mut builder = Builder::new();
        builder.push(self.select_tag()?);
        builder.push(Tag::From {
            table: E::table().to_string(),
            alias: BASE_ALIAS.to_string(),
        });
        for join in &self.joins {
            builder.push(Tag::Join {
                kind: join.kind,
                table: join.table.clone(),
                alias: join.alias.clone(),
                on: join.on.clone(),
            });
        }
        if let Some(root) = &self.where_root {
            builder.push(Tag::Where(root.clone()));
        }
        if !self.group.is_empty() {
            builder.push(Tag::GroupBy(self.group.clone()));
        }
        if let Some(having) = &self.having {
            builder.push(Tag::Having(having.clone()));
        }
        if !self.order.is_empty() {
            builder.push(Tag::OrderBy(self.order.clone()));
        }
        if let Some(count) = self.limit_count {
            builder.push(Tag::Limit {
                offset: self.limit_offset,
                count,
            });
        }
        Ok(builder.render())
    }

    // Deduped or grouped queries are counted as a derived table, so the
    // total matches the rows the page is drawn from, not the raw rows.
    fn count_sql(&self) -> Result<String> {
        if self.distinct || !self.group.is_empty() {
            let mut inner = Builder::new();
            inner.push(self.select_tag()?);
            inner.push(Tag::From {
                table: E::table().to_string(),
                alias: BASE_ALIAS.to_string(),
            });
            for join in &self.joins {
                inner.push(Tag::Join {
                    kind: join.kind,
                    table: join.table.clone(),
                    alias: join.alias.clone(),
                    on: join.on.clone(),
                });
            }
            if let Some(root) = &self.where_root {
                inner.push(Tag::Where(root.clone()));
            }
            if !self.group.is_empty() {
                inner.push(Tag::GroupBy(self.group.clone()));
            }
            if let Some(having) = &self.having {
                inner.push(Tag::Having(having.clone()));
            }

            let mut builder = Builder::new();
            builder.push_raw("SELECT COUNT(*) FROM");
            builder.push_nested(inner);
            builder.push_raw("total");
            return Ok(builder.render());
        }

        let mut builder = Builder::new();
        builder.push(Tag::Select {
            distinct: false,
            columns: vec![String::from("COUNT(*)")],
        });
        builder.push(Tag::From {
            table: E::table().to_string(),
            alias: BASE_ALIAS.to_string(),
        });
        for join in &self.joins {
            builder.push(Tag::Join {
                kind: join.kind,
                table: join.table.clone(),
                alias: join.alias.clone(),
                on: join.on.clone(),
            });
        }
        if let Some(root) = &self.where_root {
            builder.push(Tag::Where(root.clone()));
        }
        Ok(builder.render())
    }

    fn scalar_u64(result: &crate::driver::ExecResult) -> u64 {
        match result.scalar() {
            Some(SqlValue::Int(n)) => u64::try_from(*n).unwrap_or(0),
            Some(SqlValue::Text(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Executes the query and materializes the result set.
    ///
    /// Rows that fail materialization are skipped, not fatal. The result
    /// is memoized: repeated calls reuse it until any mutator runs.
    ///
    /// # Errors
    ///
    /// Driver errors, and `UnknownRelation` for bad eager-load paths.
    pub fn results(&mut self, driver: &dyn Driver) -> Result<Collection<E>> {
        if let Some(memo) = &self.memo {
            return Ok(memo.clone());
        }

        let sql = self.render()?;
        tracing::debug!(table = E::table(), %sql, "executing select");
        let result = driver.execute(&sql)?;

        let schema = self.ctx.schema(E::table())?;
        let mut out = E::collection();
        for raw in &result.rows {
            let mut converted = Row::new();
            for (name, value) in raw {
                let domain = match schema.get_column(name) {
                    Ok(column) => column.convert_raw(value),
                    Err(_) => value.clone(),
                };
                converted.insert(name.clone(), domain);
            }
            match E::from_row(&converted) {
                Ok(entity) => {
                    let key = entity
                        .pk()
                        .map_or_else(|| out.len().to_string(), |pk| pk.to_key());
                    out.set(&key, entity);
                }
                Err(err) => {
                    tracing::warn!(table = E::table(), %err, "skipping unmaterializable row");
                }
            }
        }

        let requests = self.with.clone();
        for request in &requests {
            E::load_relation(&self.ctx, driver, &request.path, &mut out, &request.customize)?;
        }

        if self.want_total {
            let total = match driver.found_rows() {
                Some(n) => n,
                None => {
                    let sql = self.count_sql()?;
                    tracing::debug!(table = E::table(), %sql, "fetching pagination total");
                    Self::scalar_u64(&driver.execute(&sql)?)
                }
            };
            self.total = Some(total);
        }

        self.memo = Some(out.clone());
        Ok(out)
    }

    /// Executes the query and returns the first result.
    ///
    /// # Errors
    ///
    /// Same as [`results`](Self::results).
    pub fn first(&mut self, driver: &dyn Driver) -> Result<Option<E>> {
        Ok(self.results(driver)?.first().cloned())
    }

    /// Total matching rows of the last paginated fetch.
    #[must_use]
    pub const fn total(&self) -> Option<u64> {
        self.total
    }

    /// Counts matching rows with the current conditions.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub fn count(&self, driver: &dyn Driver) -> Result<u64> {
        let sql = self.count_sql()?;
        tracing::debug!(table = E::table(), %sql, "counting");
        Ok(Self::scalar_u64(&driver.execute(&sql)?))
    }

    /// Returns whether any row matches the current conditions.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub fn exists(&self, driver: &dyn Driver) -> Result<bool> {
        Ok(self.count(driver)? > 0)
    }

    fn pk_column(&self) -> Result<String> {
        Ok(self.base_schema()?.primary_key().to_string())
    }

    /// Fetches one entity by primary key.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub fn find(&self, driver: &dyn Driver, pk: impl ToSqlValue) -> Result<Option<E>> {
        let mut q = self.clone();
        q.touch();
        q.and_where(Where::eq(&self.pk_column()?, pk))?;
        Ok(q.results(driver)?.first().cloned())
    }

    /// Fetches entities for a set of primary keys in one query.
    ///
    /// # Errors
    ///
    /// Driver errors.
    pub fn find_many(&self, driver: &dyn Driver, pks: Vec<SqlValue>) -> Result<Collection<E>> {
        if pks.is_empty() {
            return Ok(E::collection());
        }
        let mut q = self.clone();
        q.touch();
        q.and_where(Where::any(&self.pk_column()?, pks))?;
        q.results(driver)
    }

    /// Fetches one entity by primary key, failing when absent.
    ///
    /// # Errors
    ///
    /// [`OrmError::NotFound`] when the key has no row.
    pub fn find_or_fail(&self, driver: &dyn Driver, pk: impl ToSqlValue) -> Result<E> {
        self.find(driver, pk)?.ok_or(OrmError::NotFound)
    }

    /// Fetches entities for all requested keys, failing on any shortfall.
    ///
    /// # Errors
    ///
    /// [`OrmError::NotFound`] unless every distinct requested key is
    /// satisfied.
    pub fn find_many_or_fail(
        &self,
        driver: &dyn Driver,
        pks: Vec<SqlValue>,
    ) -> Result<Collection<E>> {
        let mut distinct: Vec<String> = pks.iter().map(SqlValue::to_key).collect();
        distinct.sort_unstable();
        distinct.dedup();

        let found = self.find_many(driver, pks)?;
        if found.len() < distinct.len() {
            return Err(OrmError::NotFound);
        }
        Ok(found)
    }

    fn new_from(&self, overrides: &[(&str, SqlValue)]) -> Result<E> {
        let schema = self.base_schema()?;
        let mut row = Row::new();
        for (name, default) in schema.defaults() {
            row.insert(name, default);
        }
        for (name, value) in overrides {
            schema.get_column(name)?;
            row.insert((*name).to_string(), value.clone());
        }
        E::from_row(&row)
    }

    /// Fetches by primary key, or builds an unsaved instance with that
    /// key over the schema defaults.
    ///
    /// # Errors
    ///
    /// Driver or materialization errors.
    pub fn find_or_new(&self, driver: &dyn Driver, pk: impl ToSqlValue) -> Result<E> {
        let pk = pk.to_sql_value();
        if let Some(found) = self.find(driver, &pk)? {
            return Ok(found);
        }
        self.new_from(&[(&self.pk_column()?, pk)])
    }

    /// Fetches the first match for the attributes, or builds an unsaved
    /// instance carrying them.
    ///
    /// # Errors
    ///
    /// Driver or materialization errors.
    pub fn first_or_new(&self, driver: &dyn Driver, attrs: &[(&str, SqlValue)]) -> Result<E> {
        let mut q = self.clone();
        q.touch();
        q.where_all(attrs)?;
        if let Some(found) = q.first(driver)? {
            return Ok(found);
        }
        self.new_from(attrs)
    }

    /// Like [`first_or_new`](Self::first_or_new), but persists the fresh
    /// instance before returning it.
    ///
    /// # Errors
    ///
    /// Driver, schema or materialization errors.
    pub fn first_or_create(&self, driver: &dyn Driver, attrs: &[(&str, SqlValue)]) -> Result<E> {
        let mut entity = self.first_or_new(driver, attrs)?;
        if entity.pk().is_none_or(|pk| pk.is_null()) {
            save_entity(&self.ctx, driver, &mut entity)?;
        }
        Ok(entity)
    }

    /// Finds the first match for `attrs` and applies `values` to it, or
    /// creates an instance carrying both. Persists either way.
    ///
    /// # Errors
    ///
    /// Driver, schema or materialization errors.
    pub fn update_or_create(
        &self,
        driver: &dyn Driver,
        attrs: &[(&str, SqlValue)],
        values: &[(&str, SqlValue)],
    ) -> Result<E> {
        let mut q = self.clone();
        q.touch();
        q.where_all(attrs)?;

        let mut entity = match q.first(driver)? {
            Some(existing) => {
                let schema = self.base_schema()?;
                let mut row = existing.to_row();
                for (name, value) in values {
                    schema.get_column(name)?;
                    row.insert((*name).to_string(), value.clone());
                }
                E::from_row(&row)?
            }
            None => {
                let mut merged: Vec<(&str, SqlValue)> = attrs.to_vec();
                merged.extend(values.iter().cloned());
                self.new_from(&merged)?
            }
        };
        save_entity(&self.ctx, driver, &mut entity)?;
        Ok(entity)
    }

    /// Returns the shared context.
    #[must_use]
    pub const fn context(&self) -> &Rc<Context> {
        &self.ctx
    }
}
