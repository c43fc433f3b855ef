//! Engine error taxonomy.
//!
//! Packet-level problems (bad RTP headers, unparseable SDP) are swallowed at
//! the thread that sees them and only counted; these error values surface for
//! start-up failures and misuse of the facade.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed data: RTP version/payload mismatch, SDP or config parse
    /// failure, bad L24 length.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Operation not valid in the current state (e.g. starting a running
    /// engine).
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// Socket creation, bind, or multicast join failed.
    #[error("resource unavailable: {0}")]
    Resource(String),

    #[error("PTP clock: {0}")]
    Ptp(#[from] aes67_ptp::PtpError),
}

impl EngineError {
    pub(crate) fn resource(context: &str, err: std::io::Error) -> Self {
        Self::Resource(format!("{}: {}", context, err))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
