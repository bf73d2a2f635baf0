//! The engine façade.
//!
//! [`Orm`] owns the data-source handle (set exactly once), the schema
//! introspector, the coercion registry, and the lazily detected dialect.
//! Every operation takes an optional open [`Session`]; with `None` the
//! statement runs on the pool in auto-commit mode, with `Some` it joins
//! the session's transaction on the session's connection.

use crate::coerce::CoercionRegistry;
use crate::config::OrmConfig;
use crate::db::executor::{self, ExecTarget};
use crate::db::params::expand_placeholders;
use crate::db::pool::DbPool;
use crate::db::session::Session;
use crate::db::types::RowData;
use crate::dialect::{GeneratedKeyMode, SqlDialect};
use crate::error::{OrmError, OrmResult};
use crate::schema::{Entity, Introspector, KeyStatus, MapperCtx, TableSchema};
use crate::value::{FromValue, IntoValue, Value};
use std::any::Any;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::warn;

/// Mode of a stored-procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpMode {
    In,
    Out,
    InOut,
}

/// One stored-procedure parameter. Out and InOut values are overwritten
/// from the procedure's result row, matched by ordinal.
#[derive(Debug, Clone)]
pub struct SpParam {
    pub mode: SpMode,
    pub value: Value,
}

impl SpParam {
    pub fn input(value: impl IntoValue) -> Self {
        Self {
            mode: SpMode::In,
            value: value.into_value(),
        }
    }

    pub fn output() -> Self {
        Self {
            mode: SpMode::Out,
            value: Value::Null,
        }
    }

    pub fn in_out(value: impl IntoValue) -> Self {
        Self {
            mode: SpMode::InOut,
            value: value.into_value(),
        }
    }
}

pub struct Orm {
    config: OrmConfig,
    pool: OnceLock<DbPool>,
    dialect: OnceCell<SqlDialect>,
    introspector: Introspector,
    coercions: CoercionRegistry,
}

impl Orm {
    pub fn new(config: OrmConfig) -> Self {
        Self {
            introspector: Introspector::new(config.clone()),
            coercions: CoercionRegistry::new(),
            pool: OnceLock::new(),
            dialect: OnceCell::new(),
            config,
        }
    }

    /// Assign the data source. Allowed exactly once; a second assignment
    /// is rejected.
    pub fn set_data_source(&self, pool: DbPool) -> OrmResult<()> {
        self.pool
            .set(pool)
            .map_err(|_| OrmError::config("Data source has already been assigned"))
    }

    /// Connect to `url` and assign the resulting pool as the data source.
    pub async fn connect(&self, url: &str) -> OrmResult<()> {
        let pool = DbPool::connect(url, &self.config.pool).await?;
        self.set_data_source(pool)
    }

    fn pool(&self) -> OrmResult<&DbPool> {
        self.pool
            .get()
            .ok_or_else(|| OrmError::config("No data source has been assigned"))
    }

    /// The detected dialect, resolved once per process.
    pub async fn dialect(&self) -> OrmResult<SqlDialect> {
        let pool = self.pool()?;
        let dialect = self
            .dialect
            .get_or_init(|| async { pool.detect_dialect().await })
            .await;
        Ok(*dialect)
    }

    pub fn introspector(&self) -> &Introspector {
        &self.introspector
    }

    pub fn coercions(&self) -> &CoercionRegistry {
        &self.coercions
    }

    fn ctx(&self) -> MapperCtx<'_> {
        MapperCtx {
            introspector: &self.introspector,
            coercions: &self.coercions,
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open a new session with its own connection and transaction.
    pub async fn begin(&self) -> OrmResult<Session> {
        Session::open(self.pool()?).await
    }

    /// Run `f` inside a transaction on a fresh session: commit on Ok, roll
    /// back on Err, then return the connection to the pool.
    pub async fn transaction<T, F>(&self, f: F) -> OrmResult<T>
    where
        F: AsyncFnOnce(&mut Session) -> OrmResult<T>,
    {
        let mut session = self.begin().await?;
        let result = match f(&mut session).await {
            Ok(value) => session.commit().await.map(|_| value),
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failure also failed");
                }
                Err(e)
            }
        };
        session.close().await?;
        result
    }

    // =========================================================================
    // Raw statement primitives
    // =========================================================================

    async fn run_query(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<Vec<RowData>> {
        let (sql, params) = expand_placeholders(sql, params)?;
        let mut target = ExecTarget::new(self.pool()?, tx);
        executor::fetch_all(&mut target, &sql, &params).await
    }

    /// Execute a write statement and return the affected row count.
    pub async fn execute_update(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<u64> {
        let (sql, params) = expand_placeholders(sql, params)?;
        let mut target = ExecTarget::new(self.pool()?, tx);
        executor::execute(&mut target, &sql, &params).await
    }

    /// First column of every result row, coerced to `V`.
    pub async fn read_values<V: FromValue>(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<Vec<V>> {
        let rows = self.run_query(tx, sql, params).await?;
        rows.into_iter()
            .map(|row| {
                let value = row.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
                self.coercions.cast_into::<V>(value)
            })
            .collect()
    }

    /// First column of the single result row, coerced to `V`. None on zero
    /// rows; more than one row is an error.
    pub async fn read_one_value<V: FromValue>(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<Option<V>> {
        let row = self.single_row(tx, sql, params).await?;
        row.map(|row| {
            let value = row.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
            self.coercions.cast_into::<V>(value)
        })
        .transpose()
    }

    async fn single_row(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<Option<RowData>> {
        let mut rows = self.run_query(tx, sql, params).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(OrmError::execution(
                format!("Expected a single row, found {n}"),
                sql,
                "",
            )),
        }
    }

    // =========================================================================
    // Entity reads
    // =========================================================================

    /// Run arbitrary SQL and materialize every row into `T`.
    pub async fn read<T: Entity + Default>(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<Vec<T>> {
        let schema = self.introspector.schema::<T>()?;
        let rows = self.run_query(tx, sql, params).await?;
        rows.into_iter()
            .map(|row| self.materialize::<T>(&schema, row))
            .collect()
    }

    /// Run arbitrary SQL expected to match at most one row.
    pub async fn read_one<T: Entity + Default>(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<Option<T>> {
        let schema = self.introspector.schema::<T>()?;
        let row = self.single_row(tx, sql, params).await?;
        row.map(|row| self.materialize::<T>(&schema, row)).transpose()
    }

    /// Run arbitrary SQL and stream each materialized row into `consumer`
    /// without collecting the result set.
    pub async fn read_cursor<T: Entity + Default>(
        &self,
        tx: Option<&mut Session>,
        sql: &str,
        params: Vec<Value>,
        consumer: &mut (dyn FnMut(T) -> OrmResult<()> + Send),
    ) -> OrmResult<()> {
        let schema = self.introspector.schema::<T>()?;
        let (sql, params) = expand_placeholders(sql, params)?;
        let mut target = ExecTarget::new(self.pool()?, tx);
        let mut deliver = |row: RowData| -> OrmResult<()> {
            let entity = self.materialize::<T>(&schema, row)?;
            consumer(entity)
        };
        executor::fetch_each(&mut target, &sql, &params, &mut deliver).await
    }

    /// All rows of `T`'s table, optionally filtered.
    pub async fn find_all<T: Entity + Default>(
        &self,
        tx: Option<&mut Session>,
        where_clause: Option<&str>,
        params: Vec<Value>,
    ) -> OrmResult<Vec<T>> {
        let schema = self.introspector.schema::<T>()?;
        let sql = format!(
            "SELECT * FROM {}{}",
            schema.table,
            constraints(where_clause)
        );
        self.read(tx, &sql, params).await
    }

    /// The row of `T` with the given primary-key value, or None.
    pub async fn find_by_id<T: Entity + Default>(
        &self,
        tx: Option<&mut Session>,
        id: impl IntoValue,
    ) -> OrmResult<Option<T>> {
        let schema = self.introspector.schema::<T>()?;
        let key = schema.single_key()?;
        let sql = format!("SELECT * FROM {} WHERE {} = ?", schema.table, key.column);
        self.read_one(tx, &sql, vec![id.into_value()]).await
    }

    /// Rows `[low, high)` of `T`'s table under `order_by`, paginated the
    /// dialect's way.
    pub async fn find_range<T: Entity + Default>(
        &self,
        tx: Option<&mut Session>,
        where_clause: Option<&str>,
        params: Vec<Value>,
        order_by: &str,
        low: u64,
        high: u64,
    ) -> OrmResult<Vec<T>> {
        let schema = self.introspector.schema::<T>()?;
        let dialect = self.dialect().await?;
        let sql = dialect.paginated_select(
            false,
            &schema.table,
            &constraints(where_clause),
            order_by,
            low,
            high,
        );
        self.read(tx, &sql, params).await
    }

    /// The detail rows referencing `parent` through a reference property of
    /// `D`. With `property` None the reference is matched by `P`'s type,
    /// which must be unambiguous. The parent instance is written into each
    /// returned detail.
    pub async fn get_details<P, D>(
        &self,
        tx: Option<&mut Session>,
        parent: &P,
        property: Option<&str>,
    ) -> OrmResult<Vec<D>>
    where
        P: Entity + Clone,
        D: Entity + Default,
    {
        let parent_schema = self.introspector.schema::<P>()?;
        let detail_schema = self.introspector.schema::<D>()?;
        let ctx = self.ctx();

        let data = parent_schema.entity_data(parent, &ctx)?;
        if data.status != KeyStatus::KeyPresent {
            return Err(OrmError::config(format!(
                "Cannot fetch details of {} without a primary key value",
                parent_schema.type_name()
            )));
        }
        let key_value = data.keys.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);

        let reference = match property {
            Some(name) => detail_schema.reference_by_name(name)?,
            None => detail_schema.reference_by_target(parent_schema.type_id)?,
        };
        let assign = reference
            .reference
            .as_ref()
            .map(|r| Arc::clone(&r.assign))
            .ok_or_else(|| {
                OrmError::config(format!(
                    "Property '{}' on {} is not a reference",
                    reference.name,
                    detail_schema.type_name()
                ))
            })?;

        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            detail_schema.table, reference.column
        );
        let mut details: Vec<D> = self.read(tx, &sql, vec![key_value]).await?;
        for detail in &mut details {
            assign(detail, Box::new(parent.clone()))?;
        }
        Ok(details)
    }

    /// Lazily populate `entity` by re-reading its row, at most once per
    /// instance when the model registered a populated flag. A null key is
    /// a silent no-op; a missing row for a present key is an error.
    pub async fn populate<T: Entity + Default>(
        &self,
        tx: Option<&mut Session>,
        entity: &mut T,
    ) -> OrmResult<()> {
        let schema = self.introspector.schema::<T>()?;
        if !schema.has_keys() {
            return Err(OrmError::config(format!(
                "Cannot populate {} without primary-key properties",
                schema.type_name()
            )));
        }
        if let Some(flag) = schema.populated_mut(entity)? {
            if *flag {
                return Ok(());
            }
        }
        let ctx = self.ctx();
        let data = schema.entity_data(&*entity, &ctx)?;
        if data.status != KeyStatus::KeyPresent {
            return Ok(());
        }
        let sql = format!("SELECT * FROM {} WHERE {}", schema.table, schema.key_filter());
        let params: Vec<Value> = data.keys.into_iter().map(|(_, v)| v).collect();
        // A mandated single-row read with no row is a configuration error,
        // unlike the plain None of a find_by_id miss.
        let row = self.single_row(tx, &sql, params).await?.ok_or_else(|| {
            OrmError::config(format!(
                "Unable to populate {}: row not found",
                schema.type_name()
            ))
        })?;
        self.apply_row(&schema, entity, row)?;
        schema.mark_populated(entity, true)
    }

    // =========================================================================
    // Entity writes
    // =========================================================================

    /// Insert `entity`. Null key properties with a sequence are filled from
    /// the dialect's sequence first; generated keys are read back per the
    /// dialect's mode and assigned onto the instance.
    pub async fn create<T: Entity + Default>(
        &self,
        mut tx: Option<&mut Session>,
        entity: &mut T,
    ) -> OrmResult<()> {
        let schema = self.introspector.schema::<T>()?;
        let ctx = self.ctx();
        let dialect = self.dialect().await?;

        for prop in schema.properties.iter() {
            let Some(sequence) = prop.sequence.as_deref() else {
                continue;
            };
            if !prop.primary_key || !prop.get(&*entity, &ctx)?.is_null() {
                continue;
            }
            if let Some(seq_sql) = dialect.sequence_sql(sequence) {
                let row = self
                    .single_row(tx.as_deref_mut(), &seq_sql, Vec::new())
                    .await?
                    .ok_or_else(|| {
                        OrmError::execution("Sequence returned no value", seq_sql.clone(), "")
                    })?;
                let value = row.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
                prop.set(entity, value, &ctx)?;
            }
        }

        let mut params = Vec::new();
        for prop in schema.insertable_properties() {
            params.push(prop.get(&*entity, &ctx)?);
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            schema.table,
            schema.insert_columns(),
            schema.insert_placeholders()
        );

        match dialect.generated_key_mode() {
            GeneratedKeyMode::ByOrdinal => {
                let (sql, params) = expand_placeholders(&sql, params)?;
                let mut target = ExecTarget::new(self.pool()?, tx);
                let (_, last_id) = executor::execute_insert(&mut target, &sql, &params).await?;
                if let Some(id) = last_id {
                    if let Ok(key) = schema.single_key() {
                        if key.get(&*entity, &ctx)?.is_null() {
                            key.set(entity, Value::Int(id), &ctx)?;
                        }
                    }
                }
            }
            GeneratedKeyMode::ByColumnName => {
                let sql = format!("{sql} RETURNING *");
                let row = self.single_row(tx, &sql, params).await?.ok_or_else(|| {
                    OrmError::execution("Insert returned no row", sql.clone(), "")
                })?;
                self.apply_row(&schema, entity, row)?;
            }
            GeneratedKeyMode::Unsupported => {
                self.execute_update(tx, &sql, params).await?;
            }
        }
        schema.mark_populated(entity, true)
    }

    /// Update `entity`'s row, matched by its primary-key values.
    pub async fn update<T: Entity>(
        &self,
        tx: Option<&mut Session>,
        entity: &T,
    ) -> OrmResult<()> {
        let schema = self.introspector.schema::<T>()?;
        let ctx = self.ctx();
        let data = self.require_keys(&schema, entity, &ctx)?;

        let assignments = schema.update_assignments();
        if assignments.is_empty() {
            return Err(OrmError::config(format!(
                "No updatable properties on {}",
                schema.type_name()
            )));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            schema.table,
            assignments,
            schema.key_filter()
        );
        let mut params = Vec::new();
        for prop in schema.updatable_properties() {
            params.push(prop.get(entity, &ctx)?);
        }
        params.extend(data.keys.into_iter().map(|(_, v)| v));
        let affected = self.execute_update(tx, &sql, params).await?;
        if affected == 0 {
            warn!(entity = schema.type_name(), "Update matched no rows");
        }
        Ok(())
    }

    /// Delete `entity`'s row, matched by its primary-key values.
    pub async fn delete<T: Entity>(
        &self,
        tx: Option<&mut Session>,
        entity: &T,
    ) -> OrmResult<()> {
        let schema = self.introspector.schema::<T>()?;
        let ctx = self.ctx();
        let data = self.require_keys(&schema, entity, &ctx)?;

        let sql = format!("DELETE FROM {} WHERE {}", schema.table, schema.key_filter());
        let params: Vec<Value> = data.keys.into_iter().map(|(_, v)| v).collect();
        let affected = self.execute_update(tx, &sql, params).await?;
        if affected == 0 {
            warn!(entity = schema.type_name(), "Delete matched no rows");
        }
        Ok(())
    }

    /// Call a stored procedure. In and InOut values are bound positionally;
    /// Out and InOut parameters are overwritten by ordinal from the result
    /// row when the backend produces one.
    pub async fn stored_procedure(
        &self,
        tx: Option<&mut Session>,
        name: &str,
        params: &mut [SpParam],
    ) -> OrmResult<()> {
        let placeholders = vec!["?"; params.len()].join(", ");
        let sql = format!("CALL {name}({placeholders})");
        let bound: Vec<Value> = params.iter().map(|p| p.value.clone()).collect();
        let rows = self.run_query(tx, &sql, bound).await?;
        if let Some(row) = rows.into_iter().next() {
            let mut values = row.into_iter().map(|(_, v)| v);
            for param in params.iter_mut() {
                if param.mode == SpMode::In {
                    continue;
                }
                match values.next() {
                    Some(value) => param.value = value,
                    None => break,
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Materialization
    // =========================================================================

    fn materialize<T: Entity + Default>(
        &self,
        schema: &TableSchema,
        row: RowData,
    ) -> OrmResult<T> {
        let mut entity = T::default();
        self.apply_row(schema, &mut entity, row)?;
        schema.mark_populated(&mut entity, true)?;
        Ok(entity)
    }

    /// Assign each result column to every property mapped to it. Columns
    /// with no matching property error in strict mode and warn otherwise.
    fn apply_row(
        &self,
        schema: &TableSchema,
        entity: &mut dyn Any,
        row: RowData,
    ) -> OrmResult<()> {
        let ctx = self.ctx();
        for (column, value) in row {
            let mut matched = false;
            for prop in schema.properties_for_column(&column) {
                prop.set(entity, value.clone(), &ctx)?;
                matched = true;
            }
            if !matched {
                if self.config.strict {
                    return Err(OrmError::config(format!(
                        "Result column '{}' has no matching property on {}",
                        column,
                        schema.type_name()
                    )));
                }
                warn!(
                    column = column.as_str(),
                    entity = schema.type_name(),
                    "Result column has no matching property"
                );
            }
        }
        Ok(())
    }

    fn require_keys(
        &self,
        schema: &TableSchema,
        entity: &dyn Any,
        ctx: &MapperCtx,
    ) -> OrmResult<crate::schema::EntityData> {
        let data = schema.entity_data(entity, ctx)?;
        match data.status {
            KeyStatus::KeyPresent => Ok(data),
            KeyStatus::NullKey => Err(OrmError::config(format!(
                "Primary key of {} has no value",
                schema.type_name()
            ))),
            KeyStatus::NoKeyProperties => Err(OrmError::config(format!(
                "No primary key mapped for {}",
                schema.type_name()
            ))),
        }
    }
}

fn constraints(where_clause: Option<&str>) -> String {
    match where_clause {
        Some(clause) if !clause.trim().is_empty() => format!(" WHERE {clause}"),
        _ => String::new(),
    }
}
