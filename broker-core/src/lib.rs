#[macro_use]
extern crate slog_scope;

pub mod config;
pub mod error;
pub mod handler;
pub mod params;
pub mod pipelines;
pub mod reconcile;
pub mod runtime;
pub mod tasks;
pub mod validators;

pub use config::AppConfig;
pub use error::CoreError;
pub use handler::BrokerHandler;
pub use runtime::{PipelineJob, PipelineQueue, PipelineRunner};
