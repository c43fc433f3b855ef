//! aes67-ptp - IEEE 1588-2008 (PTPv2) ordinary clock for AES67 audio.
//!
//! Disciplines a host↔PTP affine time mapping from multicast Sync /
//! Follow_Up observations with a PI servo, and can act as a minimal master
//! (Announce + Sync + Delay_Resp). The host system clock is never touched;
//! audio components convert between host and PTP time through the mapping.

pub mod clock;
pub mod messages;
pub mod platform;
pub mod servo;
pub mod stats;

pub use clock::{
    AffineMap, PtpClock, PtpConfig, PtpError, PtpHandle, PtpRole, StatusCallback,
    PTP_EVENT_PORT, PTP_GENERAL_PORT, PTP_MULTICAST_ADDR,
};
pub use messages::{ClockIdentity, PortIdentity, PtpTimestamp};
pub use servo::PiServo;
pub use stats::{PtpState, PtpStats};
