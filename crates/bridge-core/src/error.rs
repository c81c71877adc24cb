use bridge_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to start session: {0}")]
    Startup(String),

    #[error("no turn is currently in flight")]
    NoActiveTurn,
}
