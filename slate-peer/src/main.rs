//! Slate peer: collaborative whiteboard node.
//!
//! Runs either the board directory or an interactive peer that owns and
//! views boards. Logging goes through `env_logger`; set `RUST_LOG=debug` to
//! follow routing decisions.

mod console;

use clap::{Parser, Subcommand};
use log::info;

use slate_collab::{DirectoryConfig, DirectoryServer, PeerConfig, WhiteboardPeer};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "slate-peer")]
#[command(about = "Peer-to-peer collaborative whiteboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the board directory
    Directory {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:9000")]
        bind: String,
    },
    /// Run an interactive peer
    Peer {
        /// Host other peers reach us on
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on (0 picks a free one)
        #[arg(long, default_value_t = 0)]
        port: u16,
        /// Directory address, `host:port`
        #[arg(long, value_name = "ADDR")]
        directory: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    match Cli::parse().command {
        Command::Directory { bind } => {
            info!("Starting directory on {bind}");
            let server = DirectoryServer::new(DirectoryConfig {
                bind_addr: bind,
                ..DirectoryConfig::default()
            });
            server.run().await?;
        }
        Command::Peer { host, port, directory } => {
            let config = PeerConfig {
                host,
                port,
                directory,
                ..PeerConfig::default()
            };
            let (peer, events) = WhiteboardPeer::start(config).await?;
            console::Console::new(peer).run(events).await?;
        }
    }
    Ok(())
}
