use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    ClientConfig, DEFAULT_MAX_TEXT_LEN, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_REQUEST_CAPACITY,
    HubConfig, PersistenceFailurePolicy, ServerConfig,
};
use crate::message::UserId;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the messaging hub with its TCP (and optionally WebSocket) listeners.
    Serve(ServeArgs),
    /// Connect to a hub over TCP and chat from the terminal.
    Chat(ChatArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address for JSON-lines TCP clients. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Also serve WebSocket clients at `/ws` on this address.
    #[arg(long)]
    pub ws_listen: Option<SocketAddr>,

    /// Hub request queue capacity.
    #[arg(long, default_value_t = DEFAULT_REQUEST_CAPACITY)]
    pub request_capacity: usize,

    /// Per-client outbound queue capacity; a client whose queue is full is disconnected.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Largest accepted message body in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_TEXT_LEN)]
    pub max_text_len: usize,

    /// What to do with a client whose message could not be stored.
    #[arg(long, value_enum, default_value_t = PersistenceFailurePolicy::Disconnect)]
    pub persistence_failure: PersistenceFailurePolicy,
}

impl ServeArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            request_capacity: self.request_capacity,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            client: ClientConfig {
                outbound_capacity: self.outbound_capacity,
                persistence_failure: self.persistence_failure,
            },
            max_text_len: self.max_text_len,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// User id to connect as.
    #[arg(long)]
    pub user: UserId,

    /// Address of the hub to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,

    /// Largest message text expected from the hub, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_TEXT_LEN)]
    pub max_text_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["messaging_hub", "serve"]).expect("parse serve");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };

        assert_eq!(args.listen, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(args.ws_listen, None);
        assert_eq!(args.hub_config().request_capacity, DEFAULT_REQUEST_CAPACITY);
        let server = args.server_config();
        assert_eq!(server.client.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
        assert_eq!(server.client.persistence_failure, PersistenceFailurePolicy::Disconnect);
        assert_eq!(server.max_text_len, DEFAULT_MAX_TEXT_LEN);
    }

    #[test]
    fn serve_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "messaging_hub",
            "serve",
            "--outbound-capacity",
            "2",
            "--persistence-failure",
            "skip",
            "--ws-listen",
            "127.0.0.1:0",
        ])
        .expect("parse serve");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };

        let server = args.server_config();
        assert_eq!(server.client.outbound_capacity, 2);
        assert_eq!(server.client.persistence_failure, PersistenceFailurePolicy::Skip);
        assert!(args.ws_listen.is_some());
    }

    #[test]
    fn chat_requires_user() {
        assert!(Cli::try_parse_from(["messaging_hub", "chat"]).is_err());
        let cli = Cli::try_parse_from(["messaging_hub", "chat", "--user", "7"]).expect("parse chat");
        let Command::Chat(args) = cli.command else {
            panic!("expected chat command");
        };
        assert_eq!(args.user, UserId(7));
        assert_eq!(args.max_text_len, DEFAULT_MAX_TEXT_LEN);
    }
}
