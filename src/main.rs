//! sider - In-Memory Key-Value Server with Pub/Sub
//!
//! Entry point: parses flags, installs logging and serves until ctrl-c.

use sider::config::{help_text, Config, Invocation};
use sider::server;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
sider v{} - In-Memory Key-Value Server with Pub/Sub
──────────────────────────────────────────────────────
Starting on {}

Use Ctrl+C to shutdown gracefully.
"#,
        sider::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1))? {
        Invocation::Run(config) => config,
        Invocation::Help => {
            println!("{}", help_text());
            return Ok(());
        }
        Invocation::Version => {
            println!("sider version {}", sider::VERSION);
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    server::start(&config, shutdown).await?;
    Ok(())
}
