//! Reactor CLI - JSON-lines front end for the reactive notebook kernel.

mod protocol;
mod session;

use std::path::PathBuf;

use clap::Parser;
use reactor_core::{ExecutionMode, KernelConfig};

#[derive(Parser)]
#[command(name = "reactor")]
#[command(about = "Reactive notebook execution kernel")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Mark dependents stale instead of re-running them
    #[arg(long)]
    lazy: bool,

    /// Re-run stale cells automatically after each batch
    #[arg(long)]
    auto_rerun: bool,

    /// Fail input reads that get no response within this many milliseconds
    #[arg(long, value_name = "MS")]
    input_timeout_ms: Option<u64>,

    /// Enter the post-mortem debugger when a cell fails
    #[arg(long)]
    post_mortem: bool,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    fn kernel_config(&self) -> anyhow::Result<KernelConfig> {
        let mut config = match &self.config {
            Some(path) => KernelConfig::load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path.display(), e))?,
            None => KernelConfig::default(),
        };
        if self.lazy {
            config.mode = ExecutionMode::Lazy;
        }
        if self.auto_rerun {
            config.auto_rerun_stale = true;
        }
        if self.input_timeout_ms.is_some() {
            config.input_timeout_ms = self.input_timeout_ms;
        }
        if self.post_mortem {
            config.post_mortem = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout carries the message stream
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.kernel_config()?;
    tracing::debug!(?config, "starting kernel");
    session::execute(config).await
}
