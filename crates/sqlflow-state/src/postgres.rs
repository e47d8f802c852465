//! Postgres-backed `StateBackend` (spec §4.1), built on Diesel + r2d2,
//! mirroring the teacher's `chem-persistence` connection-pool pattern.
//! Gated behind the `pg_demo` feature so the rest of the crate builds
//! without a reachable database.

use std::cell::RefCell;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use serde_json::Value;

use crate::backend::StateBackend;
use crate::config::DbConfig;
use crate::error::StateError;
use crate::schema::{kv_state, CREATE_TABLES_SQL};

type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Queryable)]
struct KvRow {
    #[allow(dead_code)]
    key: String,
    value: String,
    #[allow(dead_code)]
    timestamp: DateTime<Utc>,
}

fn get_row(conn: &mut PgConnection, key: &str) -> Result<Option<Value>, StateError> {
    let row: Option<KvRow> = kv_state::table
        .filter(kv_state::key.eq(key))
        .select((kv_state::key, kv_state::value, kv_state::timestamp))
        .first(conn)
        .optional()
        .map_err(StateError::from)?;
    match row {
        Some(r) => Ok(Some(serde_json::from_str(&r.value)?)),
        None => Ok(None),
    }
}

fn set_row(conn: &mut PgConnection, key: &str, value: &Value, timestamp: DateTime<Utc>) -> Result<(), StateError> {
    let serialized = serde_json::to_string(value)?;
    diesel::insert_into(kv_state::table)
        .values((
            kv_state::key.eq(key),
            kv_state::value.eq(&serialized),
            kv_state::timestamp.eq(timestamp),
        ))
        .on_conflict(kv_state::key)
        .do_update()
        .set((kv_state::value.eq(&serialized), kv_state::timestamp.eq(timestamp)))
        .execute(conn)
        .map_err(StateError::from)?;
    Ok(())
}

fn delete_row(conn: &mut PgConnection, key: &str) -> Result<bool, StateError> {
    let affected = diesel::delete(kv_state::table.filter(kv_state::key.eq(key)))
        .execute(conn)
        .map_err(StateError::from)?;
    Ok(affected > 0)
}

pub struct PostgresStateBackend {
    pool: PgPool,
}

impl PostgresStateBackend {
    pub fn connect(config: &DbConfig) -> Result<Self, StateError> {
        let manager = ConnectionManager::<PgConnection>::new(&config.url);
        let pool = Pool::builder()
            .min_idle(Some(config.min_connections))
            .max_size(config.max_connections)
            .build(manager)
            .map_err(|e| StateError::TransientIo(e.to_string()))?;
        let backend = Self { pool };
        backend.ensure_tables()?;
        Ok(backend)
    }

    fn ensure_tables(&self) -> Result<(), StateError> {
        let mut conn = self.pool.get()?;
        diesel::sql_query(CREATE_TABLES_SQL).execute(&mut conn).map_err(StateError::from)?;
        Ok(())
    }
}

impl StateBackend for PostgresStateBackend {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        get_row(&mut self.pool.get()?, key)
    }

    fn set(&self, key: &str, value: &Value, timestamp: DateTime<Utc>) -> Result<(), StateError> {
        set_row(&mut self.pool.get()?, key, value, timestamp)
    }

    fn delete(&self, key: &str) -> Result<bool, StateError> {
        delete_row(&mut self.pool.get()?, key)
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn StateBackend) -> Result<(), StateError>,
    ) -> Result<(), StateError> {
        let mut conn = self.pool.get()?;
        conn.transaction(|conn| {
            let scoped = PgTransactionBackend { conn: RefCell::new(conn) };
            f(&scoped)
        })
    }

    fn close(&self) -> Result<(), StateError> {
        Ok(())
    }
}

/// Backend view bound to a single in-flight Postgres transaction; handed
/// to the closure passed to [`PostgresStateBackend::transaction`] so
/// nested get/set/delete calls participate in the same transaction
/// instead of checking out a second pooled connection.
struct PgTransactionBackend<'a> {
    conn: RefCell<&'a mut PgConnection>,
}

impl StateBackend for PgTransactionBackend<'_> {
    fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        let mut guard = self.conn.borrow_mut();
        get_row(&mut **guard, key)
    }

    fn set(&self, key: &str, value: &Value, timestamp: DateTime<Utc>) -> Result<(), StateError> {
        let mut guard = self.conn.borrow_mut();
        set_row(&mut **guard, key, value, timestamp)
    }

    fn delete(&self, key: &str) -> Result<bool, StateError> {
        let mut guard = self.conn.borrow_mut();
        delete_row(&mut **guard, key)
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn StateBackend) -> Result<(), StateError>,
    ) -> Result<(), StateError> {
        // Already inside a transaction; Diesel issues a SAVEPOINT for
        // genuinely nested calls, but callers only get here via a
        // re-entrant `transaction()` on a scoped backend, so just run
        // the closure in the current scope.
        f(self)
    }

    fn close(&self) -> Result<(), StateError> {
        Ok(())
    }
}
