//! aes67-engine - network engine of an AES67 virtual soundcard.
//!
//! Transports multi-channel uncompressed audio over IP using the AES67
//! profile: RTP L24 at 48 kHz, an IEEE 1588 time reference (via `aes67-ptp`),
//! and SAP/SDP session announcement. The engine owns the wire; audio crosses
//! to the host exclusively through lock-free SPSC rings, and received packets
//! are played out against PTP deadlines by an adaptive jitter buffer.

pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod jitter;
pub mod output;
pub mod ring;
pub mod rtp;
pub mod sap;

pub use config::EngineConfig;
pub use engine::{
    Engine, EngineCallbacks, NetworkEngine, AUDIO_PORT, CHANNELS_PER_STREAM, SAMPLE_RATE,
    STREAM_COUNT,
};
pub use error::{EngineError, Result};
pub use jitter::{JitterBuffer, JitterPacket};
pub use ring::{AudioRing, SpscRing};
pub use rtp::{Depacketizer, Packetizer};
pub use sap::{SdpSession, StreamDescription};
