//! RTP transport for L24 audio streams.

pub mod codec;
pub mod header;
pub mod socket;

pub use codec::{Depacketizer, Packetizer};
pub use header::{sequence_diff, timestamp_diff, RtpHeader};

/// Dynamic payload type carrying L24 audio
pub const PAYLOAD_TYPE_L24: u8 = 96;
/// RTP timestamp clock rate (samples per second)
pub const TIMESTAMP_CLOCK_RATE: u32 = 48_000;
/// Bytes per L24 sample on the wire
pub const L24_BYTES_PER_SAMPLE: usize = 3;
