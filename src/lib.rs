pub mod admission;
pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod guidance;
pub mod media;
pub mod models;
pub mod offers;
pub mod recorder;
pub mod room;
pub mod signaling;
pub mod transcription;

use std::net::SocketAddr;

use tracing::info;

pub use config::CallConfig;
pub use error::CallError;
pub use room::{CallRoom, CallRoomHandle, Collaborators, JoinOptions, RoomAction, RoomView, SummaryRoute};

/// Run the signaling relay until it fails.
pub async fn run_relay(addr: SocketAddr) -> std::io::Result<()> {
    info!("Starting callroom relay v{}", env!("CARGO_PKG_VERSION"));
    signaling::relay::start_relay(addr).await
}
