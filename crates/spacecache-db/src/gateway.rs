//! Store Gateway — the only module allowed to speak SQL.
//!
//! Presents a uniform, dialect-hiding `query`/`exec`/`with_transaction`
//! interface over a pooled connection. Reachable only while holding the
//! `Database` lock level (enforced by [`spacecache_core::lock_order`] at the
//! call sites in the cache managers, not by this module itself — the
//! gateway has no opinion about what else the caller holds).

use std::sync::Arc;

use sqlmodel_core::Value;

use crate::error::{DbError, DbResult};
use crate::pool::{DbPool, DbPoolConfig, PooledConnection};
use crate::tracking::{elapsed_us, query_timer, record_query};

/// A single result row. Thin wrapper so callers don't reach into `sqlmodel_core` directly.
pub struct Row(sqlmodel_core::Row);

macro_rules! typed_getter {
    ($name:ident, $ty:ty) => {
        pub fn $name(&self, column: &str) -> DbResult<$ty> {
            self.0
                .get_named::<$ty>(column)
                .map_err(|e| DbError::Internal(format!("column {column}: {e}")))
        }
    };
}

impl Row {
    typed_getter!(get_i64, i64);
    typed_getter!(get_f64, f64);
    typed_getter!(get_string, String);
    typed_getter!(get_opt_i64, Option<i64>);
    typed_getter!(get_opt_string, Option<String>);

    /// Read a `0`/`1` integer column as a `bool`.
    pub fn get_bool(&self, column: &str) -> DbResult<bool> {
        Ok(self.get_i64(column)? != 0)
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecResult {
    pub affected_rows: u64,
    pub last_inserted_id: Option<i64>,
}

/// The single point of contact with the relational store.
///
/// Owns a connection pool and nothing else: no domain knowledge, no caching,
/// no lock-ordering enforcement. The cache managers are responsible for
/// acquiring their own locks before calling through the gateway.
pub struct StoreGateway {
    pool: Arc<DbPool>,
}

impl StoreGateway {
    /// Build a gateway backed by a freshly created pool.
    pub fn new(config: DbPoolConfig) -> DbResult<Self> {
        Ok(Self {
            pool: DbPool::new(config)?,
        })
    }

    /// Build a gateway around an already-constructed pool (used by the
    /// lifecycle orchestrator and by tests that need to share a pool).
    #[must_use]
    pub fn with_pool(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn acquire(&self) -> DbResult<PooledConnection> {
        self.pool.acquire()
    }

    /// Run a read query, returning every matching row.
    pub fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let conn = self.acquire()?;
        let start = query_timer();
        let result = conn.query_sync(sql, params);
        record_query(sql, elapsed_us(start));
        result
            .map(|rows| rows.into_iter().map(Row).collect())
            .map_err(|e| DbError::Sqlite(e.to_string()))
    }

    /// Run a write statement, returning the affected row count and, for
    /// `INSERT`, the new row's id.
    pub fn exec(&self, sql: &str, params: &[Value]) -> DbResult<ExecResult> {
        let conn = self.acquire()?;
        let start = query_timer();
        let result = conn.execute_sync(sql, params);
        record_query(sql, elapsed_us(start));
        let affected_rows = result.map_err(|e| DbError::Sqlite(e.to_string()))?;

        let last_inserted_id = if sql.trim_start().len() >= 6
            && sql.trim_start()[..6].eq_ignore_ascii_case("insert")
        {
            conn.query_sync("SELECT last_insert_rowid() AS id", &[])
                .ok()
                .and_then(|rows| rows.into_iter().next())
                .and_then(|row| row.get_named::<i64>("id").ok())
        } else {
            None
        };

        Ok(ExecResult {
            affected_rows: u64::try_from(affected_rows).unwrap_or(0),
            last_inserted_id,
        })
    }

    /// Run `scope` inside a single `SQLite` transaction, committing on `Ok`
    /// and rolling back on `Err`.
    ///
    /// The closure receives a [`TransactionHandle`] rather than the gateway
    /// itself — nesting transactions is not supported.
    pub fn with_transaction<T>(
        &self,
        scope: impl FnOnce(&TransactionHandle) -> DbResult<T>,
    ) -> DbResult<T> {
        let conn = self.acquire()?;
        conn.execute_sync("BEGIN IMMEDIATE", &[])
            .map_err(|e| DbError::Sqlite(e.to_string()))?;

        let handle = TransactionHandle { conn: &conn };
        match scope(&handle) {
            Ok(value) => {
                conn.execute_sync("COMMIT", &[])
                    .map_err(|e| DbError::Sqlite(e.to_string()))?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_sync("ROLLBACK", &[]);
                Err(e)
            }
        }
    }

    /// Number of connections currently open in the backing pool.
    pub fn pool_size(&self) -> usize {
        self.pool.total_open()
    }
}

/// Handle passed into a [`StoreGateway::with_transaction`] closure.
///
/// Offers the same `query`/`exec` surface as the gateway, scoped to the
/// single connection holding the open transaction.
pub struct TransactionHandle<'a> {
    conn: &'a PooledConnection,
}

impl TransactionHandle<'_> {
    pub fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let start = query_timer();
        let result = self.conn.query_sync(sql, params);
        record_query(sql, elapsed_us(start));
        result
            .map(|rows| rows.into_iter().map(Row).collect())
            .map_err(|e| DbError::Sqlite(e.to_string()))
    }

    pub fn exec(&self, sql: &str, params: &[Value]) -> DbResult<ExecResult> {
        let start = query_timer();
        let result = self.conn.execute_sync(sql, params);
        record_query(sql, elapsed_us(start));
        let affected_rows = result.map_err(|e| DbError::Sqlite(e.to_string()))?;

        let last_inserted_id = if sql.trim_start().len() >= 6
            && sql.trim_start()[..6].eq_ignore_ascii_case("insert")
        {
            self.conn
                .query_sync("SELECT last_insert_rowid() AS id", &[])
                .ok()
                .and_then(|rows| rows.into_iter().next())
                .and_then(|row| row.get_named::<i64>("id").ok())
        } else {
            None
        };

        Ok(ExecResult {
            affected_rows: u64::try_from(affected_rows).unwrap_or(0),
            last_inserted_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gateway() -> StoreGateway {
        let pool = DbPool::new(DbPoolConfig {
            database_url: "sqlite://:memory:".to_string(),
            min_connections: 1,
            max_connections: 2,
            warmup_connections: 1,
            ..DbPoolConfig::default()
        })
        .unwrap();
        let gw = StoreGateway::with_pool(pool);
        gw.exec(crate::test_support::CREATE_TABLES_SQL, &[]).unwrap();
        gw
    }

    #[test]
    fn exec_insert_returns_last_inserted_id() {
        let gw = test_gateway();
        let result = gw
            .exec(
                "INSERT INTO users (username, password_hash, last_updated, defense_last_regen) \
                 VALUES (?1, ?2, ?3, ?4)",
                &[
                    Value::Text("alice".into()),
                    Value::Text("pw".into()),
                    Value::BigInt(0),
                    Value::BigInt(0),
                ],
            )
            .unwrap();
        assert_eq!(result.affected_rows, 1);
        assert_eq!(result.last_inserted_id, Some(1));
    }

    #[test]
    fn query_returns_inserted_row() {
        let gw = test_gateway();
        gw.exec(
            "INSERT INTO users (username, password_hash, last_updated, defense_last_regen) \
             VALUES (?1, ?2, ?3, ?4)",
            &[
                Value::Text("bob".into()),
                Value::Text("pw".into()),
                Value::BigInt(0),
                Value::BigInt(0),
            ],
        )
        .unwrap();

        let rows = gw
            .query("SELECT username FROM users WHERE id = ?1", &[Value::BigInt(1)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        let username = rows[0].get_string("username").unwrap();
        assert_eq!(username, "bob");
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let gw = test_gateway();
        let outcome: DbResult<()> = gw.with_transaction(|tx| {
            tx.exec(
                "INSERT INTO users (username, password_hash, last_updated, defense_last_regen) \
                 VALUES ('carol', 'pw', 0, 0)",
                &[],
            )?;
            Err(DbError::Internal("force rollback".into()))
        });
        assert!(outcome.is_err());

        let rows = gw.query("SELECT COUNT(*) AS n FROM users", &[]).unwrap();
        let n = rows[0].get_i64("n").unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn with_transaction_commits_on_success() {
        let gw = test_gateway();
        gw.with_transaction(|tx| {
            tx.exec(
                "INSERT INTO users (username, password_hash, last_updated, defense_last_regen) \
                 VALUES ('dana', 'pw', 0, 0)",
                &[],
            )?;
            Ok(())
        })
        .unwrap();

        let rows = gw.query("SELECT COUNT(*) AS n FROM users", &[]).unwrap();
        let n = rows[0].get_i64("n").unwrap();
        assert_eq!(n, 1);
    }
}
