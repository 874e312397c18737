mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pyexec_sandbox::EngineConfig;
use pyexec_transport::{init_logging, run_server_app, ServeMode, ServerArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pyexec")]
#[command(about = "Run untrusted Python snippets behind a validated, time-bounded sandbox")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the tools over JSON-RPC (default if no subcommand provided)
    Serve {
        /// Transport to listen on
        #[arg(long, value_enum, default_value = "stdio")]
        mode: ServeMode,

        /// Bind address for the HTTP transport
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port for the HTTP transport
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
    /// Execute one snippet through the full pipeline
    Run {
        /// Source file, or `-` for stdin
        file: String,

        /// Package specifier to make importable first
        #[arg(short = 'r', long = "requirement")]
        requirements: Vec<String>,

        /// Execution budget in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Run only the security check and print the verdict
    Check {
        /// Source file, or `-` for stdin
        file: String,
    },
    /// Print the declared tool schemas
    Tools,
    /// Print a fresh environment snapshot
    Env,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    let config = EngineConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Some(Commands::Serve { mode, host, port }) => {
            run_server_app(ServerArgs {
                config,
                mode,
                host,
                port,
            })
            .await
        }
        Some(Commands::Run {
            file,
            requirements,
            timeout,
        }) => {
            let source = commands::read_source(&file).await?;
            let response = commands::execute_run(&config, source, requirements, timeout).await?;
            println!("{}", serde_json::to_string_pretty(&response.payload)?);
            if response.is_error {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Check { file }) => {
            let source = commands::read_source(&file).await?;
            let verdict = commands::execute_check(&config, &source)?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.is_allowed() {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Tools) => {
            let tools = commands::list_tools(&config)?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(())
        }
        Some(Commands::Env) => {
            let snapshot = commands::environment(&config).await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Some(Commands::Config) => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        None => {
            // Default to serving on stdio
            run_server_app(ServerArgs {
                config,
                mode: ServeMode::Stdio,
                host: "0.0.0.0".to_string(),
                port: 8000,
            })
            .await
        }
    }
}
