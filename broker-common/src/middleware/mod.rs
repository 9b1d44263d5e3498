pub mod sentry;

pub use sentry::SentryWrapper;
