use anyhow::{Context, Result};
use pyexec_sandbox::{EngineConfig, EnvironmentInspector, SandboxService, ToolDispatcher};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod handler;
pub mod http_server;
pub mod stdio_server;

pub use handler::{McpHandler, SERVER_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServeMode {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// JSON-RPC over `POST /mcp`
    Http,
}

pub struct ServerArgs {
    pub config: EngineConfig,
    pub mode: ServeMode,
    pub host: String,
    pub port: u16,
}

/// Initialize tracing to stderr and, optionally, a log file.
///
/// stdout is never written to, it carries the stdio protocol stream. The
/// returned guard must be kept alive for the file writer to flush.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "pyexec_sandbox={level},pyexec_transport={level},pyexec={level}"
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path {} has no file name", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Build the dispatcher the transports serve
pub fn build_dispatcher(config: &EngineConfig) -> Result<Arc<ToolDispatcher>> {
    let service = SandboxService::from_config(config).context("Invalid sandbox configuration")?;
    let inspector = EnvironmentInspector::from_config(config);
    Ok(Arc::new(ToolDispatcher::new(
        Arc::new(service),
        Arc::new(inspector),
    )))
}

pub async fn run_server_app(args: ServerArgs) -> Result<()> {
    info!("Starting {} server", SERVER_NAME);
    info!(
        interpreter = %args.config.sandbox.interpreter,
        site_dir = %args.config.resolver.site_dir().display(),
        work_root = %args.config.sandbox.work_root().display(),
        "Sandbox configuration"
    );

    let handler = Arc::new(McpHandler::new(build_dispatcher(&args.config)?));
    match args.mode {
        ServeMode::Stdio => stdio_server::serve_stdio(&handler).await,
        ServeMode::Http => {
            let addr = format!("{}:{}", args.host, args.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            http_server::start_server(listener, handler).await
        }
    }
}
