use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use triage_transport::CancelSignal;

/// Installs the stderr subscriber; stdout carries only command results.
pub(crate) fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Cancellation signal fired by the first Ctrl-C.
pub(crate) fn ctrl_c_cancel_signal() -> CancelSignal {
    let (tx, cancel) = CancelSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling in-flight work");
            let _ = tx.send(true);
        }
    });
    cancel
}
