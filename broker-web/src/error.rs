//! Error types and macros.
use std::fmt;

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use backtrace::Backtrace;
use broker_common::{impl_fmt_display, ReportableError};
use broker_core::CoreError;
use broker_db::{error::DbError, DbErrorIntrospect};
use serde::Serialize;
use thiserror::Error;

/// Common `Result` type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Top-level error type. Wraps `broker-core`'s `CoreError` (request-handler
/// failures) and `broker-db`'s `DbError` (pool checkout failures, since those
/// occur before a `CoreError` can even be constructed) behind one HTTP
/// mapping.
#[derive(Debug)]
pub struct ApiError {
    kind: ApiErrorKind,
    pub(crate) backtrace: Backtrace,
    status: StatusCode,
}

#[derive(Error, Debug)]
enum ApiErrorKind {
    #[error("{0}")]
    Core(CoreError),

    #[error("{0}")]
    Pool(DbError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        ApiErrorKind::Internal(msg.into()).into()
    }

    pub fn unauthorized() -> Self {
        ApiErrorKind::Unauthorized.into()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiErrorKind::Core(err).into()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiErrorKind::Pool(err).into()
    }
}

impl From<ApiErrorKind> for ApiError {
    fn from(kind: ApiErrorKind) -> Self {
        let status = match &kind {
            ApiErrorKind::Core(e) if e.is_async_required() => StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorKind::Core(e) if e.is_instance_does_not_exist() => StatusCode::NOT_FOUND,
            ApiErrorKind::Core(e) if e.is_bad_request() => StatusCode::BAD_REQUEST,
            ApiErrorKind::Core(e) if e.is_not_implemented() => StatusCode::NOT_IMPLEMENTED,
            ApiErrorKind::Core(e) if e.is_conflict() => StatusCode::CONFLICT,
            ApiErrorKind::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorKind::Pool(e) if e.is_instance_not_found() => StatusCode::NOT_FOUND,
            ApiErrorKind::Pool(e) if e.is_conflict() => StatusCode::CONFLICT,
            ApiErrorKind::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            kind,
            backtrace: Backtrace::new(),
            status,
        }
    }
}

/// Error-code names the platform is told to branch on, matching the OSB
/// contract's documented taxonomy.
fn error_code(status: StatusCode, kind: &ApiErrorKind) -> &'static str {
    match kind {
        ApiErrorKind::Core(e) if e.is_async_required() => "AsyncRequired",
        ApiErrorKind::Core(e) if e.is_not_implemented() => "NotImplemented",
        ApiErrorKind::Core(e) if e.is_conflict() => "ConcurrencyError",
        ApiErrorKind::Unauthorized => "Unauthorized",
        _ if status == StatusCode::NOT_FOUND => "Gone",
        _ if status == StatusCode::CONFLICT => "ConcurrencyError",
        _ if status == StatusCode::BAD_REQUEST => "RequirementsNotMet",
        _ => "InternalServerError",
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    description: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status).json(ErrorBody {
            error: error_code(self.status, &self.kind),
            description: self.kind.to_string(),
        })
    }
}

impl_fmt_display!(ApiError, ApiErrorKind);

impl ReportableError for ApiError {
    fn is_sentry_event(&self) -> bool {
        self.status.is_server_error()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        Some(&self.backtrace)
    }
}
