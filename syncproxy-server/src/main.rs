use clap::Parser;
use syncproxy_server::{Args, LogFormat};
use tracing_subscriber::EnvFilter;

/// `-v` wins over `RUST_LOG`; otherwise `RUST_LOG` applies, falling back to `info`.
fn log_directives(verbose: bool, rust_log: Option<String>) -> String {
    if verbose {
        return "debug".to_string();
    }
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let directives = log_directives(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_format);

    let config = args.router_config();
    tracing::info!("Sync Proxy v{}", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let router = match syncproxy_server::bind(config).await {
            Ok(router) => router,
            Err(e) => {
                tracing::error!("{}", e);
                return Err(e.into());
            }
        };
        println!("[sync-proxy] started at port {}", router.port());

        shutdown_signal().await;
        tracing::info!("Shutting down");
        router.shutdown().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
