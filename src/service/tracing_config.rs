use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::AppResult;

fn timer() -> ChronoLocal {
    ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string())
}

/// Console tracing with the filter taken from `RUST_LOG`.
pub fn setup_tracing() -> AppResult<()> {
    setup_tracing_with(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
}

/// Console tracing with an explicit filter directive.
pub fn setup_tracing_with(filter: &str) -> AppResult<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_timer(timer())
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Tracing to hourly-rolled files plus the console. The returned guard must
/// stay alive for the non-blocking writer to flush.
pub fn setup_file_tracing(directory: &str, file_prefix: &str) -> AppResult<WorkerGuard> {
    let appender = tracing_appender::rolling::hourly(directory, file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let writer = non_blocking.and(std::io::stdout);

    let subscriber = tracing_subscriber::fmt()
        .with_timer(timer())
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guard)
}
