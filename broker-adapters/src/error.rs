use std::fmt;

use backtrace::Backtrace;
use broker_common::{impl_fmt_display, InternalError, ReportableError};
use thiserror::Error;

/// Errors raised by outbound cloud/ACME/DNS calls. Carries the transient/permanent
/// classification the task runtime needs to decide whether to retry.
#[derive(Debug)]
pub struct AdapterError {
    kind: AdapterErrorKind,
    transient: bool,
    pub backtrace: Backtrace,
}

#[derive(Debug, Error)]
enum AdapterErrorKind {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not yet consistent: {0}")]
    EventualConsistency(String),

    #[error("resource locked: {0}")]
    Locked(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::transient(AdapterErrorKind::RateLimited(msg.into()))
    }

    pub fn eventual_consistency(msg: impl Into<String>) -> Self {
        Self::transient(AdapterErrorKind::EventualConsistency(msg.into()))
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        Self::transient(AdapterErrorKind::Locked(msg.into()))
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::permanent(AdapterErrorKind::PermissionDenied(msg.into()))
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::permanent(AdapterErrorKind::InvalidConfiguration(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::permanent(AdapterErrorKind::NotFound(msg.into()))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::permanent(AdapterErrorKind::Internal(msg.into()))
    }

    fn transient(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            transient: true,
            backtrace: Backtrace::new(),
        }
    }

    fn permanent(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            transient: false,
            backtrace: Backtrace::new(),
        }
    }

    /// Whether the runtime should requeue the step rather than fail the operation.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.kind, AdapterErrorKind::Locked(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, AdapterErrorKind::NotFound(_))
    }
}

impl ReportableError for AdapterError {
    fn is_sentry_event(&self) -> bool {
        !self.transient
    }

    fn metric_label(&self) -> Option<&str> {
        match &self.kind {
            AdapterErrorKind::RateLimited(_) => Some("adapter.rate_limited"),
            AdapterErrorKind::EventualConsistency(_) => Some("adapter.eventual_consistency"),
            AdapterErrorKind::Locked(_) => Some("adapter.locked"),
            _ => None,
        }
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        Some(&self.backtrace)
    }
}

impl InternalError for AdapterError {
    fn internal_error(message: String) -> Self {
        AdapterError::internal(message)
    }
}

impl_fmt_display!(AdapterError, AdapterErrorKind);

pub type AdapterResult<T> = Result<T, AdapterError>;
