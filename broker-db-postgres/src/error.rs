use diesel::result::{DatabaseErrorKind, Error as DieselError};

use broker_db::DbError;

pub fn from_diesel_result(error: DieselError) -> DbError {
    match error {
        DieselError::NotFound => DbError::instance_not_found(),
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => DbError::conflict(),
        other => DbError::backend(other.to_string()),
    }
}

pub fn from_diesel_connection(error: diesel::result::ConnectionError) -> DbError {
    DbError::backend(error.to_string())
}

pub fn from_r2d2(error: diesel::r2d2::PoolError) -> DbError {
    DbError::backend(format!("pool error: {error}"))
}
