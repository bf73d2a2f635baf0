//! Statement execution.
//!
//! Every statement runs against an [`ExecTarget`]: either the shared pool
//! (auto-commit) or an open [`Session`] (its one connection, statements
//! strictly ordered). The backend-specific implementations live in parallel
//! submodules with identical signatures, generic over any sqlx executor so
//! pools and session connections share one code path.
//!
//! Each statement is logged at debug level with its rendered parameters
//! before execution; failures carry the statement text and parameters.

use crate::db::params::{bind_mysql, bind_postgres, bind_sqlite, numbered_placeholders};
use crate::db::pool::DbPool;
use crate::db::session::{Session, SessionConn};
use crate::db::types::{RowData, RowValues};
use crate::error::{OrmError, OrmResult};
use crate::value::{Value, render_params};
use futures_util::TryStreamExt;
use tracing::debug;

/// Where a statement executes.
pub(crate) enum ExecTarget<'a> {
    Pool(&'a DbPool),
    Session(&'a mut Session),
}

impl<'a> ExecTarget<'a> {
    /// Route to the open session when one is supplied, the pool otherwise.
    pub(crate) fn new(pool: &'a DbPool, tx: Option<&'a mut Session>) -> Self {
        match tx {
            Some(session) => ExecTarget::Session(session),
            None => ExecTarget::Pool(pool),
        }
    }
}

fn statement_error(err: OrmError, sql: &str, params: &[Value]) -> OrmError {
    err.with_statement(sql, &render_params(params))
}

/// Interpret a backend's raw generated-key counter. Zero means no key was
/// generated; a value outside the i64 range cannot be assigned to a mapped
/// key property and is reported as absent rather than wrapped negative.
fn generated_key(raw: u64) -> Option<i64> {
    i64::try_from(raw).ok().filter(|&id| id != 0)
}

/// Run a query and decode every row.
pub(crate) async fn fetch_all(
    target: &mut ExecTarget<'_>,
    sql: &str,
    params: &[Value],
) -> OrmResult<Vec<RowData>> {
    debug!(sql = %sql, params = %render_params(params), "Executing query");
    let result = match target {
        ExecTarget::Pool(DbPool::MySql(p)) => mysql::fetch_rows(p, sql, params)
            .await
            .map(|rows| rows.iter().map(RowValues::to_values).collect()),
        ExecTarget::Pool(DbPool::Postgres(p)) => postgres::fetch_rows(p, sql, params)
            .await
            .map(|rows| rows.iter().map(RowValues::to_values).collect()),
        ExecTarget::Pool(DbPool::SQLite(p)) => sqlite::fetch_rows(p, sql, params)
            .await
            .map(|rows| rows.iter().map(RowValues::to_values).collect()),
        ExecTarget::Session(session) => match &mut session.conn {
            SessionConn::MySql(c) => mysql::fetch_rows(&mut **c, sql, params)
                .await
                .map(|rows| rows.iter().map(RowValues::to_values).collect()),
            SessionConn::Postgres(c) => postgres::fetch_rows(&mut **c, sql, params)
                .await
                .map(|rows| rows.iter().map(RowValues::to_values).collect()),
            SessionConn::SQLite(c) => sqlite::fetch_rows(&mut **c, sql, params)
                .await
                .map(|rows| rows.iter().map(RowValues::to_values).collect()),
        },
    };
    result.map_err(|e| statement_error(e, sql, params))
}

/// Run a query, streaming each decoded row into `consumer` as it arrives.
pub(crate) async fn fetch_each(
    target: &mut ExecTarget<'_>,
    sql: &str,
    params: &[Value],
    consumer: &mut (dyn FnMut(RowData) -> OrmResult<()> + Send),
) -> OrmResult<()> {
    debug!(sql = %sql, params = %render_params(params), "Executing streaming query");
    let result = match target {
        ExecTarget::Pool(DbPool::MySql(p)) => mysql::fetch_each(p, sql, params, consumer).await,
        ExecTarget::Pool(DbPool::Postgres(p)) => {
            postgres::fetch_each(p, sql, params, consumer).await
        }
        ExecTarget::Pool(DbPool::SQLite(p)) => {
            sqlite::fetch_each(p, sql, params, consumer).await
        }
        ExecTarget::Session(session) => match &mut session.conn {
            SessionConn::MySql(c) => mysql::fetch_each(&mut **c, sql, params, consumer).await,
            SessionConn::Postgres(c) => postgres::fetch_each(&mut **c, sql, params, consumer).await,
            SessionConn::SQLite(c) => sqlite::fetch_each(&mut **c, sql, params, consumer).await,
        },
    };
    result.map_err(|e| statement_error(e, sql, params))
}

/// Run a write statement, returning the affected row count.
pub(crate) async fn execute(
    target: &mut ExecTarget<'_>,
    sql: &str,
    params: &[Value],
) -> OrmResult<u64> {
    execute_insert(target, sql, params).await.map(|(rows, _)| rows)
}

/// Run a write statement, returning the affected row count plus the
/// backend's positional generated key when it reports one.
pub(crate) async fn execute_insert(
    target: &mut ExecTarget<'_>,
    sql: &str,
    params: &[Value],
) -> OrmResult<(u64, Option<i64>)> {
    debug!(sql = %sql, params = %render_params(params), "Executing write");
    let result = match target {
        ExecTarget::Pool(DbPool::MySql(p)) => mysql::execute(p, sql, params).await,
        ExecTarget::Pool(DbPool::Postgres(p)) => postgres::execute(p, sql, params).await,
        ExecTarget::Pool(DbPool::SQLite(p)) => sqlite::execute(p, sql, params).await,
        ExecTarget::Session(session) => match &mut session.conn {
            SessionConn::MySql(c) => mysql::execute(&mut **c, sql, params).await,
            SessionConn::Postgres(c) => postgres::execute(&mut **c, sql, params).await,
            SessionConn::SQLite(c) => sqlite::execute(&mut **c, sql, params).await,
        },
    };
    result.map_err(|e| statement_error(e, sql, params))
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database
// type. The code structure is intentionally parallel.

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<Vec<MySqlRow>>
    where
        E: sqlx::Executor<'c, Database = sqlx::MySql>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql(query, param);
        }
        query.fetch_all(executor).await.map_err(OrmError::from)
    }

    pub async fn fetch_each<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
        consumer: &mut (dyn FnMut(RowData) -> OrmResult<()> + Send),
    ) -> OrmResult<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::MySql>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql(query, param);
        }
        let mut stream = query.fetch(executor);
        while let Some(row) = stream.try_next().await? {
            consumer(row.to_values())?;
        }
        Ok(())
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<(u64, Option<i64>)>
    where
        E: sqlx::Executor<'c, Database = sqlx::MySql>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql(query, param);
        }
        let result = query.execute(executor).await?;
        Ok((
            result.rows_affected(),
            generated_key(result.last_insert_id()),
        ))
    }
}

mod postgres {
    use super::*;
    use sqlx::postgres::PgRow;

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<Vec<PgRow>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let sql = numbered_placeholders(sql);
        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_postgres(query, param);
        }
        query.fetch_all(executor).await.map_err(OrmError::from)
    }

    pub async fn fetch_each<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
        consumer: &mut (dyn FnMut(RowData) -> OrmResult<()> + Send),
    ) -> OrmResult<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let sql = numbered_placeholders(sql);
        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_postgres(query, param);
        }
        let mut stream = query.fetch(executor);
        while let Some(row) = stream.try_next().await? {
            consumer(row.to_values())?;
        }
        Ok(())
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<(u64, Option<i64>)>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let sql = numbered_placeholders(sql);
        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_postgres(query, param);
        }
        let result = query.execute(executor).await?;
        // Generated keys come back through RETURNING, never positionally.
        Ok((result.rows_affected(), None))
    }
}

mod sqlite {
    use super::*;
    use sqlx::sqlite::SqliteRow;

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<Vec<SqliteRow>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite(query, param);
        }
        query.fetch_all(executor).await.map_err(OrmError::from)
    }

    pub async fn fetch_each<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
        consumer: &mut (dyn FnMut(RowData) -> OrmResult<()> + Send),
    ) -> OrmResult<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite(query, param);
        }
        let mut stream = query.fetch(executor);
        while let Some(row) = stream.try_next().await? {
            consumer(row.to_values())?;
        }
        Ok(())
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<(u64, Option<i64>)>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite(query, param);
        }
        let result = query.execute(executor).await?;
        let last_id = result.last_insert_rowid();
        Ok((
            result.rows_affected(),
            if last_id == 0 { None } else { Some(last_id) },
        ))
    }
}
