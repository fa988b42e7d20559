//! Database layer for the walkie platform.
//!
//! Provides the SQLite connection pool (WAL mode, foreign keys on) and the
//! embedded SQL migration runner. All other crates receive connections from
//! the pool created here; none of them open SQLite files directly.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
