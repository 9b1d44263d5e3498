use std::fmt;

use backtrace::Backtrace;
use broker_common::{impl_fmt_display, InternalError, ReportableError};
use http::StatusCode;
use thiserror::Error;

/// Errors common to all supported database backends. Backend crates
/// (`broker-db-postgres`, `broker-db-memory`) convert their own failures
/// (a `diesel::result::Error`, a poisoned lock) into this type at the
/// boundary, so everything above `broker-db` deals with one error shape.
#[derive(Debug)]
pub struct DbError {
    kind: DbErrorKind,
    pub status: StatusCode,
    pub backtrace: Backtrace,
}

#[derive(Debug, Error)]
enum DbErrorKind {
    #[error("Specified service instance does not exist")]
    InstanceNotFound,

    #[error("Specified certificate does not exist")]
    CertificateNotFound,

    #[error("Specified operation does not exist")]
    OperationNotFound,

    #[error("Instance already has an active operation")]
    Conflict,

    #[error("Unexpected error: {}", _0)]
    Internal(String),

    #[error("Backend error: {}", _0)]
    Backend(String),
}

impl DbError {
    pub fn instance_not_found() -> Self {
        DbErrorKind::InstanceNotFound.into()
    }

    pub fn certificate_not_found() -> Self {
        DbErrorKind::CertificateNotFound.into()
    }

    pub fn operation_not_found() -> Self {
        DbErrorKind::OperationNotFound.into()
    }

    pub fn conflict() -> Self {
        DbErrorKind::Conflict.into()
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        DbErrorKind::Internal(msg.into()).into()
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        DbErrorKind::Backend(msg.into()).into()
    }
}

pub trait DbErrorIntrospect {
    fn is_instance_not_found(&self) -> bool;
    fn is_certificate_not_found(&self) -> bool;
    fn is_operation_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
}

impl DbErrorIntrospect for DbError {
    fn is_instance_not_found(&self) -> bool {
        matches!(self.kind, DbErrorKind::InstanceNotFound)
    }

    fn is_certificate_not_found(&self) -> bool {
        matches!(self.kind, DbErrorKind::CertificateNotFound)
    }

    fn is_operation_not_found(&self) -> bool {
        matches!(self.kind, DbErrorKind::OperationNotFound)
    }

    fn is_conflict(&self) -> bool {
        matches!(self.kind, DbErrorKind::Conflict)
    }
}

impl ReportableError for DbError {
    fn is_sentry_event(&self) -> bool {
        !matches!(
            &self.kind,
            DbErrorKind::InstanceNotFound
                | DbErrorKind::CertificateNotFound
                | DbErrorKind::OperationNotFound
                | DbErrorKind::Conflict
        )
    }

    fn metric_label(&self) -> Option<&str> {
        match &self.kind {
            DbErrorKind::Conflict => Some("db.conflict"),
            DbErrorKind::Backend(_) => Some("db.backend_error"),
            _ => None,
        }
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        Some(&self.backtrace)
    }
}

impl InternalError for DbError {
    fn internal_error(message: String) -> Self {
        DbError::internal(message)
    }
}

impl From<DbErrorKind> for DbError {
    fn from(kind: DbErrorKind) -> Self {
        let status = match kind {
            DbErrorKind::InstanceNotFound => StatusCode::NOT_FOUND,
            DbErrorKind::CertificateNotFound => StatusCode::NOT_FOUND,
            DbErrorKind::OperationNotFound => StatusCode::BAD_REQUEST,
            DbErrorKind::Conflict => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            kind,
            status,
            backtrace: Backtrace::new(),
        }
    }
}

impl_fmt_display!(DbError, DbErrorKind);
