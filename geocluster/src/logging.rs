//! Tracing subscriber setup for the binary.
//!
//! Filtering follows `RUST_LOG` (default `info`). With a log directory the
//! output goes to a daily-rolling `geocluster.log` through a non-blocking
//! writer; the returned guard must be held until exit to flush it.

use geocluster_shared::errors::{ClusterError, ClusterResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE_PREFIX: &str = "geocluster.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(log_dir: Option<&Path>) -> ClusterResult<Option<WorkerGuard>> {
    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|e| ClusterError::Internal(format!("logging already initialized: {}", e)))?;
            Ok(Some(guard))
        }
        None => {
            fmt()
                .with_env_filter(env_filter())
                .with_target(true)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| ClusterError::Internal(format!("logging already initialized: {}", e)))?;
            Ok(None)
        }
    }
}
