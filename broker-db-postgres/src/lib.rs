#[macro_use]
extern crate diesel;

pub mod db;
pub mod error;
pub mod models;
pub mod pool;
pub mod schema;

pub use broker_db::DbError;
pub use db::PostgresDb;
pub use pool::PostgresDbPool;
