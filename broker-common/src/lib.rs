#[macro_use]
extern crate slog_scope;

pub mod middleware;
mod metrics;

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use actix_web::{dev::ServiceRequest, web};
use backtrace::Backtrace;

pub use metrics::{metrics_from_opts, MetricError, Metrics};

/// Header carrying the platform-supplied correlation id for a single broker request.
/// Threaded from the HTTP request through the `Operation` row into every task payload
/// and log line, per the correlation-id requirement in the operation engine design.
pub static X_CORRELATION_ID: &str = "x-correlation-id";

#[macro_export]
macro_rules! from_error {
    ($from:ty, $to:ty, $to_kind:expr) => {
        impl From<$from> for $to {
            fn from(inner: $from) -> $to {
                $to_kind(inner).into()
            }
        }
    };
}

#[macro_export]
macro_rules! impl_fmt_display {
    ($error:ty, $kind:ty) => {
        impl fmt::Display for $error {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.kind, formatter)
            }
        }
    };
}

/// Types that can describe themselves richly enough to report to Sentry and to
/// metrics: a backtrace, an optional metric label, and tag/extra key-value pairs
/// plucked from the error chain.
pub trait ReportableError: fmt::Display + fmt::Debug {
    /// The next error in the chain that is itself reportable, if any.
    fn reportable_source(&self) -> Option<&(dyn ReportableError + 'static)> {
        None
    }

    /// Whether this error should be sent to Sentry at all.
    fn is_sentry_event(&self) -> bool;

    /// A short, low-cardinality label used for incrementing an error-rate metric
    /// instead of (or in addition to) reporting to Sentry.
    fn metric_label(&self) -> Option<&str> {
        None
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        None
    }

    fn tags(&self) -> Vec<(&str, String)> {
        vec![]
    }

    fn extras(&self) -> Vec<(&str, String)> {
        vec![]
    }
}

/// Types that implement this trait can represent internal errors.
pub trait InternalError {
    /// Constructs an internal error with the given error message.
    fn internal_error(message: String) -> Self;
}

/// Pulls Sentry tags/extras out of an inbound request. Handlers populate the
/// request extensions with whatever context (correlation id, instance id,
/// plan) is available by the time an error is raised.
pub trait Taggable {
    fn get_tags(&self) -> HashMap<String, String>;
    fn get_extras(&self) -> HashMap<String, String>;
}

impl Taggable for ServiceRequest {
    fn get_tags(&self) -> HashMap<String, String> {
        self.extensions()
            .get::<HashMap<String, String>>()
            .cloned()
            .unwrap_or_default()
    }

    fn get_extras(&self) -> HashMap<String, String> {
        HashMap::default()
    }
}

/// A threadpool on which callers can spawn non-CPU-bound tasks that block their thread (this is
/// mostly useful for running I/O tasks). `BlockingThreadpool` intentionally does not implement
/// `Clone`: `Arc`s are not used internally, so a `BlockingThreadpool` should be instantiated once
/// and shared by passing around `Arc<BlockingThreadpool>`s.
#[derive(Debug, Default)]
pub struct BlockingThreadpool {
    spawned_tasks: AtomicU64,
}

impl BlockingThreadpool {
    /// Runs a function as a task on the blocking threadpool.
    ///
    /// WARNING: Spawning a blocking task through means other than calling this method will
    /// result in inaccurate threadpool metrics being reported. If you want to spawn a task on
    /// the blocking threadpool, you **must** use this function.
    pub async fn spawn<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: fmt::Debug + Send + InternalError + 'static,
    {
        self.spawned_tasks.fetch_add(1, Ordering::Relaxed);

        let result = web::block(f).await.unwrap_or_else(|_| {
            Err(E::internal_error(
                "Blocking threadpool operation canceled".to_owned(),
            ))
        });

        self.spawned_tasks.fetch_sub(1, Ordering::Relaxed);

        result
    }

    pub fn active_threads(&self) -> u64 {
        self.spawned_tasks.load(Ordering::Relaxed)
    }
}
