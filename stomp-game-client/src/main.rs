use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use stomp_game_client::{
    broker,
    cli::{Cli, Command},
    client,
};

fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Logs go to stderr so they never interleave with the client's prompt output.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Broker(args) => {
            init_tracing("info");
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            let broker = broker::Broker::new(listener);
            let addr = broker.local_addr()?;
            info!("broker listening on {}", addr);
            println!("broker listening on {addr}");
            if let Err(err) = broker.run_until_ctrl_c().await {
                warn!("broker exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => {
            init_tracing("warn");
            client::run(args).await?;
        }
    }

    Ok(())
}
