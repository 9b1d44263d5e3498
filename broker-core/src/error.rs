use std::fmt;

use backtrace::Backtrace;
use broker_common::{impl_fmt_display, InternalError, ReportableError};
use thiserror::Error;

/// Errors surfaced to the broker's HTTP contract: async-required,
/// instance-does-not-exist, bad-request(msg), not-implemented, and the rest
/// of `CoreErrorKind`.
#[derive(Debug)]
pub struct CoreError {
    kind: CoreErrorKind,
    pub backtrace: Backtrace,
}

#[derive(Debug, Error)]
enum CoreErrorKind {
    #[error("This service plan requires client support for asynchronous operations")]
    AsyncRequired,

    #[error("Specified service instance does not exist")]
    InstanceDoesNotExist,

    #[error("{0}")]
    BadRequest(String),

    #[error("The requested plan or operation is not implemented")]
    NotImplemented,

    #[error("Instance has an operation in progress")]
    Conflict,

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn async_required() -> Self {
        Self::new(CoreErrorKind::AsyncRequired)
    }

    pub fn instance_does_not_exist() -> Self {
        Self::new(CoreErrorKind::InstanceDoesNotExist)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::BadRequest(msg.into()))
    }

    pub fn not_implemented() -> Self {
        Self::new(CoreErrorKind::NotImplemented)
    }

    pub fn conflict() -> Self {
        Self::new(CoreErrorKind::Conflict)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal(msg.into()))
    }

    fn new(kind: CoreErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::new(),
        }
    }

    pub fn is_async_required(&self) -> bool {
        matches!(self.kind, CoreErrorKind::AsyncRequired)
    }

    pub fn is_instance_does_not_exist(&self) -> bool {
        matches!(self.kind, CoreErrorKind::InstanceDoesNotExist)
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self.kind, CoreErrorKind::BadRequest(_))
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self.kind, CoreErrorKind::NotImplemented)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.kind, CoreErrorKind::Conflict)
    }
}

impl ReportableError for CoreError {
    fn is_sentry_event(&self) -> bool {
        matches!(self.kind, CoreErrorKind::Internal(_))
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        Some(&self.backtrace)
    }
}

impl InternalError for CoreError {
    fn internal_error(message: String) -> Self {
        CoreError::internal(message)
    }
}

impl<E: broker_db::DbErrorIntrospect + fmt::Display> From<E> for CoreError {
    fn from(e: E) -> Self {
        if e.is_instance_not_found() {
            CoreError::instance_does_not_exist()
        } else if e.is_conflict() {
            CoreError::conflict()
        } else {
            CoreError::internal(e.to_string())
        }
    }
}

impl_fmt_display!(CoreError, CoreErrorKind);
