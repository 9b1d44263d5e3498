use std::io;

use slog::{slog_o, Drain};

use crate::error::{ApiError, ApiResult};

/// Initializes logging for the main process. Must only be called once at
/// startup; `reset_logging` is the matching teardown (see the reset caveat
/// below).
pub fn init_logging(json: bool) -> ApiResult<()> {
    let logger = if json {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .ok_or_else(|| ApiError::internal("couldn't determine hostname"))?;

        let drain = slog_mozlog_json::MozLogJson::new(io::stdout())
            .logger_name(format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .msg_type(format!("{}:log", env!("CARGO_PKG_NAME")))
            .hostname(hostname)
            .build()
            .fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    };
    // XXX: cancel slog_scope's NoGlobalLoggerSet for now, it's difficult to
    // prevent it from potentially panicing during tests. reset_logging resets
    // the global logger during shutdown anyway:
    // https://github.com/slog-rs/slog/issues/169
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
    Ok(())
}

pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}
