use std::sync::Arc;

use async_trait::async_trait;
use broker_common::BlockingThreadpool;
use broker_db::{Db, DbPool, GetPoolState, PoolState};
use broker_settings::Settings;
use diesel::{
    r2d2::{ConnectionManager, Pool},
    PgConnection,
};
use diesel_migrations::embed_migrations;

use crate::{db::PostgresDb, error::from_r2d2, DbError};

// diesel_migrations::embed_migrations! generates an `embedded_migrations`
// module with a `run`/`run_with_output` function reading from `migrations/`
// relative to this crate's Cargo.toml.
embed_migrations!("migrations");

#[derive(Clone)]
pub struct PostgresDbPool {
    pool: Pool<ConnectionManager<PgConnection>>,
    blocking_threadpool: Arc<BlockingThreadpool>,
}

impl PostgresDbPool {
    pub fn new(settings: &Settings, blocking_threadpool: Arc<BlockingThreadpool>) -> Result<Self, DbError> {
        let manager = ConnectionManager::<PgConnection>::new(&settings.database_url);
        let pool = Pool::builder()
            .max_size(settings.database_pool_max_size)
            .build(manager)
            .map_err(from_r2d2)?;

        Ok(Self {
            pool,
            blocking_threadpool,
        })
    }

    /// Runs the embedded migrations against a fresh connection, blocking
    /// the calling thread. Intended for startup, before the pool is
    /// otherwise in use.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let pool = self.pool.clone();
        self.blocking_threadpool
            .spawn(move || {
                let conn = pool.get().map_err(from_r2d2)?;
                embedded_migrations::run(&conn)
                    .map_err(|e| DbError::backend(format!("migration error: {e}")))
            })
            .await
    }
}

impl std::fmt::Debug for PostgresDbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDbPool").finish()
    }
}

#[async_trait]
impl DbPool for PostgresDbPool {
    type Error = DbError;

    async fn get(&self) -> Result<Box<dyn Db<Error = DbError>>, Self::Error> {
        let pool = self.pool.clone();
        let conn = self
            .blocking_threadpool
            .spawn(move || pool.get().map_err(from_r2d2))
            .await?;
        Ok(Box::new(PostgresDb::new(conn, self.blocking_threadpool.clone())))
    }

    fn box_clone(&self) -> Box<dyn DbPool<Error = DbError>> {
        Box::new(self.clone())
    }
}

impl GetPoolState for PostgresDbPool {
    fn state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}
