//! Engine configuration, loaded from a JSON file.

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Engine configuration. Every field is optional in the file; missing fields
/// take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Network interface: a name ("en0") or an IPv4 address
    pub interface: String,
    /// RTP packet time in microseconds
    pub packet_time_us: u32,
    /// Initial jitter buffer depth in packets (also the adaptive minimum;
    /// the maximum is twice this)
    pub jitter_buffer_packets: u32,
    /// PTP domain number
    pub ptp_domain: u8,
    /// Multicast operation (recorded; the engine always uses the multicast
    /// stream layout)
    pub multicast: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interface: "en0".to_string(),
            packet_time_us: 250,
            jitter_buffer_packets: 3,
            ptp_domain: 0,
            multicast: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::resource(&format!("config file {}", path), e))?;
        serde_json::from_str(&text)
            .map_err(|e| EngineError::InvalidFormat(format!("config file {}: {}", path, e)))
    }

    /// Audio frames carried per RTP packet at the given sample rate.
    pub fn frames_per_packet(&self, sample_rate: u32) -> u32 {
        (self.packet_time_us as u64 * sample_rate as u64 / 1_000_000) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.interface, "en0");
        assert_eq!(config.packet_time_us, 250);
        assert_eq!(config.jitter_buffer_packets, 3);
        assert_eq!(config.ptp_domain, 0);
        assert!(config.multicast);
        assert_eq!(config.frames_per_packet(48_000), 12);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"interface": "eth0", "packet_time_us": 1000}"#).unwrap();
        assert_eq!(config.interface, "eth0");
        assert_eq!(config.packet_time_us, 1000);
        assert_eq!(config.jitter_buffer_packets, 3);
        assert_eq!(config.frames_per_packet(48_000), 48);
    }

    #[test]
    fn rejects_malformed_json() {
        let result: std::result::Result<EngineConfig, _> = serde_json::from_str("{nope");
        assert!(result.is_err());
    }
}
