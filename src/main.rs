use std::net::{IpAddr, SocketAddr};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "callroom", about = "Live call room coordination")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the signaling relay that call rooms connect to
    Relay {
        /// Relay port
        #[arg(long, default_value = "9848")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Relay { port, host } => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
            if let Err(e) = rt.block_on(callroom_lib::run_relay(SocketAddr::new(host, port))) {
                tracing::error!("Relay stopped: {}", e);
                std::process::exit(1);
            }
        }
    }
}
