use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::session::{DEFAULT_ACCEPT_VERSION, SessionConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a local STOMP broker for game channels.
    Broker(BrokerArgs),
    /// Start the interactive client; connect with `login host:port user pass`.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Socket address the broker should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// STOMP versions offered in the CONNECT frame.
    #[arg(long, default_value = DEFAULT_ACCEPT_VERSION)]
    pub accept_version: String,
}

impl ClientArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            accept_version: self.accept_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(["stomp_game_client", "client"]).expect("parse");
        match cli.command {
            Command::Client(args) => {
                assert_eq!(args.session_config().accept_version, "1.2");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["stomp_game_client", "broker"]).expect("parse");
        match cli.command {
            Command::Broker(args) => assert_eq!(args.listen.port(), 7777),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
