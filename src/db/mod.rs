//! Database layer
//!
//! Supports:
//! - SQLite (default, single-file deployment)
//! - MySQL
//!
//! The driver is selected by configuration. Repositories sit on top of the
//! `DatabasePool` trait and dispatch on its driver.
//!
//! ```ignore
//! use tablebook::config::DatabaseConfig;
//! use tablebook::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
