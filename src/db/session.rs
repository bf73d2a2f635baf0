//! Transaction sessions.
//!
//! A [`Session`] owns one physical connection for its whole lifetime, so
//! every statement routed through it is strictly ordered. The outermost
//! `begin` issues a real BEGIN; each nested `begin` pushes a uniquely named
//! savepoint. `commit` and `rollback` resolve the innermost open level
//! first: they release or roll back to the top savepoint while the stack is
//! non-empty, and only touch the physical transaction once it is empty.
//! After an inner rollback the connection stays usable.
//!
//! Sessions are exclusively owned (`&mut`), which is what serializes access
//! to the connection; no locking is involved.

use crate::db::pool::DbPool;
use crate::error::{OrmError, OrmResult};
use sqlx::pool::PoolConnection;
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) enum SessionConn {
    MySql(PoolConnection<sqlx::MySql>),
    Postgres(PoolConnection<sqlx::Postgres>),
    SQLite(PoolConnection<sqlx::Sqlite>),
}

pub struct Session {
    pub(crate) conn: SessionConn,
    savepoints: Vec<String>,
    open: bool,
}

impl Session {
    /// Acquire a connection from the pool and begin the outer transaction.
    pub(crate) async fn open(pool: &DbPool) -> OrmResult<Self> {
        let conn = match pool {
            DbPool::MySql(p) => SessionConn::MySql(p.acquire().await?),
            DbPool::Postgres(p) => SessionConn::Postgres(p.acquire().await?),
            DbPool::SQLite(p) => SessionConn::SQLite(p.acquire().await?),
        };
        let mut session = Session {
            conn,
            savepoints: Vec::new(),
            open: false,
        };
        session
            .raw("BEGIN")
            .await
            .map_err(|e| OrmError::transaction(format!("Unable to begin transaction: {e}")))?;
        session.open = true;
        debug!("Start transaction");
        Ok(session)
    }

    /// Current nesting depth; 0 when no transaction is open.
    pub fn depth(&self) -> usize {
        if self.open {
            self.savepoints.len() + 1
        } else {
            0
        }
    }

    /// Open a nested logical transaction. On an already-open session this
    /// pushes a savepoint; on a resolved one it begins anew.
    pub async fn begin(&mut self) -> OrmResult<()> {
        if !self.open {
            self.raw("BEGIN")
                .await
                .map_err(|e| OrmError::transaction(format!("Unable to begin transaction: {e}")))?;
            self.open = true;
            debug!("Start transaction");
            return Ok(());
        }
        let name = format!("sp_{}", Uuid::new_v4().simple());
        self.raw(&format!("SAVEPOINT {name}"))
            .await
            .map_err(|e| OrmError::transaction(format!("Unable to create savepoint: {e}")))?;
        self.savepoints.push(name);
        debug!(depth = self.depth(), "Start inner transaction");
        Ok(())
    }

    /// Commit the innermost open level.
    pub async fn commit(&mut self) -> OrmResult<()> {
        match self.savepoints.pop() {
            Some(name) => {
                debug!(depth = self.depth() + 1, "Commit inner transaction");
                self.raw(&format!("RELEASE SAVEPOINT {name}"))
                    .await
                    .map_err(|e| {
                        OrmError::transaction(format!("Unable to release savepoint: {e}"))
                    })
            }
            None => {
                if !self.open {
                    return Err(OrmError::transaction("Commit without an open transaction"));
                }
                debug!("Commit transaction");
                self.open = false;
                self.raw("COMMIT")
                    .await
                    .map_err(|e| OrmError::transaction(format!("Unable to commit: {e}")))
            }
        }
    }

    /// Roll back the innermost open level. After an inner rollback the
    /// session remains usable at the enclosing level.
    pub async fn rollback(&mut self) -> OrmResult<()> {
        match self.savepoints.pop() {
            Some(name) => {
                debug!(depth = self.depth() + 1, "Rollback inner transaction");
                self.raw(&format!("ROLLBACK TO SAVEPOINT {name}"))
                    .await
                    .map_err(|e| {
                        OrmError::transaction(format!("Unable to roll back to savepoint: {e}"))
                    })
            }
            None => {
                if !self.open {
                    return Err(OrmError::transaction(
                        "Rollback without an open transaction",
                    ));
                }
                debug!("Rollback transaction");
                self.open = false;
                self.raw("ROLLBACK")
                    .await
                    .map_err(|e| OrmError::transaction(format!("Unable to roll back: {e}")))
            }
        }
    }

    /// Roll back any still-open work and return the connection to the pool.
    /// The rollback is always attempted; a failure is surfaced after the
    /// connection has been released by the drop.
    pub async fn close(mut self) -> OrmResult<()> {
        if self.open {
            warn!(
                depth = self.depth(),
                "Session closed with an open transaction; rolling back"
            );
            self.savepoints.clear();
            self.open = false;
            self.raw("ROLLBACK")
                .await
                .map_err(|e| OrmError::transaction(format!("Rollback on close failed: {e}")))?;
        }
        Ok(())
    }

    /// Run `f` inside a nested logical transaction: commit on Ok, roll back
    /// on Err. The rollback is attempted before the error propagates.
    pub async fn nested<T, F>(&mut self, f: F) -> OrmResult<T>
    where
        F: AsyncFnOnce(&mut Session) -> OrmResult<T>,
    {
        self.begin().await?;
        match f(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failure also failed");
                }
                Err(e)
            }
        }
    }

    async fn raw(&mut self, sql: &str) -> OrmResult<()> {
        match &mut self.conn {
            SessionConn::MySql(c) => sqlx::query(sql)
                .execute(&mut **c)
                .await
                .map(|_| ())
                .map_err(OrmError::from),
            SessionConn::Postgres(c) => sqlx::query(sql)
                .execute(&mut **c)
                .await
                .map(|_| ())
                .map_err(OrmError::from),
            SessionConn::SQLite(c) => sqlx::query(sql)
                .execute(&mut **c)
                .await
                .map(|_| ())
                .map_err(OrmError::from),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;

    async fn memory_pool() -> DbPool {
        DbPool::connect("sqlite::memory:", &PoolOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_depth_tracking() {
        let pool = memory_pool().await;
        let mut session = Session::open(&pool).await.unwrap();
        assert_eq!(session.depth(), 1);
        session.begin().await.unwrap();
        assert_eq!(session.depth(), 2);
        session.commit().await.unwrap();
        assert_eq!(session.depth(), 1);
        session.commit().await.unwrap();
        assert_eq!(session.depth(), 0);
        session.close().await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_commit_without_transaction_errors() {
        let pool = memory_pool().await;
        let mut session = Session::open(&pool).await.unwrap();
        session.commit().await.unwrap();
        let err = session.commit().await.expect_err("nothing left to commit");
        assert!(matches!(err, OrmError::Transaction { .. }));
        session.close().await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_close_surfaces_failed_rollback() {
        let pool = memory_pool().await;
        let mut session = Session::open(&pool).await.unwrap();
        // Resolve the transaction behind the session's back so the close
        // rollback has nothing to roll back.
        session.raw("COMMIT").await.unwrap();
        let err = session.close().await.expect_err("rollback cannot succeed");
        assert!(matches!(err, OrmError::Transaction { .. }));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_inner_rollback_keeps_session_usable() {
        let pool = memory_pool().await;
        let mut session = Session::open(&pool).await.unwrap();
        session.raw("CREATE TABLE t (n INTEGER)").await.unwrap();
        session.begin().await.unwrap();
        session.raw("INSERT INTO t (n) VALUES (1)").await.unwrap();
        session.rollback().await.unwrap();
        // The enclosing transaction is still open and writable.
        session.raw("INSERT INTO t (n) VALUES (2)").await.unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();
        pool.close().await;
    }
}
