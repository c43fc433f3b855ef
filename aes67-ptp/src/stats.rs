//! PTP clock state and statistics snapshots.

use crate::messages::ClockIdentity;

/// Slave state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PtpState {
    /// Not started
    #[default]
    Init = 0,
    /// Waiting for the first Sync
    Listening = 1,
    /// Receiving Syncs, servo not yet locked
    Acquiring = 2,
    /// Servo locked, affine mapping tracking the master
    Locked = 3,
    /// Syncs stopped arriving; extrapolating on the last slope
    Holdover = 4,
    /// Holdover expired; time queries return zero again
    Lost = 5,
}

impl PtpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PtpState::Init => "INIT",
            PtpState::Listening => "LISTENING",
            PtpState::Acquiring => "ACQUIRING",
            PtpState::Locked => "LOCKED",
            PtpState::Holdover => "HOLDOVER",
            PtpState::Lost => "LOST",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PtpState::Listening,
            2 => PtpState::Acquiring,
            3 => PtpState::Locked,
            4 => PtpState::Holdover,
            5 => PtpState::Lost,
            _ => PtpState::Init,
        }
    }
}

/// Snapshot of clock statistics for display
#[derive(Debug, Clone, Default)]
pub struct PtpStats {
    pub state: PtpState,
    pub grandmaster_id: ClockIdentity,
    pub grandmaster_port: u16,
    /// Current offset from master in nanoseconds
    pub offset_ns: f64,
    /// Current rate ratio (1.0 = nominal)
    pub rate_ratio: f64,
    /// Mean path delay in nanoseconds
    pub mean_path_delay_ns: i64,
    pub sync_count: u64,
    pub announce_count: u64,
    pub follow_up_count: u64,
    pub delay_resp_count: u64,
    pub locked: bool,
    pub domain: u8,
}

impl PtpStats {
    /// One-line status, e.g.
    /// "Slave to PTP/001b21fffeabcdef:1, offset 0.9µs, ratio 1.000000002 [LOCKED]"
    pub fn format_display(&self) -> String {
        match self.state {
            PtpState::Init => "PTP: not started".to_string(),
            PtpState::Listening => "PTP: listening for grandmaster".to_string(),
            PtpState::Lost => "PTP: sync lost".to_string(),
            _ => {
                let lock = if self.locked { "[LOCKED]" } else { "[UNLOCKED]" };
                format!(
                    "Slave to PTP/{}:{}, offset {:.1}µs, delay {:.1}µs, ratio {:.9} {}",
                    self.grandmaster_id.to_hex_string(),
                    self.grandmaster_port,
                    self.offset_ns / 1_000.0,
                    self.mean_path_delay_ns as f64 / 1_000.0,
                    self.rate_ratio,
                    lock
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrip() {
        for s in [
            PtpState::Init,
            PtpState::Listening,
            PtpState::Acquiring,
            PtpState::Locked,
            PtpState::Holdover,
            PtpState::Lost,
        ] {
            assert_eq!(PtpState::from_u8(s as u8), s);
        }
    }

    #[test]
    fn display_mentions_lock_state() {
        let stats = PtpStats {
            state: PtpState::Locked,
            locked: true,
            rate_ratio: 1.0,
            ..Default::default()
        };
        assert!(stats.format_display().contains("[LOCKED]"));
    }
}
