//! SDP session description parsing and generation.
//!
//! Recognizes the subset AES67 devices exchange: one audio media section,
//! `rtpmap`/`ptime` and the AES67 clocking attributes. Unrecognized lines are
//! ignored; generation omits fields that are empty.

/// Parsed (or to-be-generated) session description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdpSession {
    /// `o=` line payload, stored verbatim
    pub origin: String,
    /// `s=`
    pub session_name: String,
    /// `i=`
    pub info: String,
    /// `c=IN IP4 <addr>` without any TTL suffix
    pub connection_addr: String,
    /// `m=audio <port> ...`
    pub port: u16,
    /// `m=audio ... RTP/AVP <pt>`
    pub payload_type: u8,
    /// `a=rtpmap:<pt> <this>`, e.g. "L24/48000/8"
    pub rtpmap: String,
    /// Decoded from the rtpmap
    pub sample_rate: u32,
    /// Decoded from the rtpmap
    pub channels: u8,
    /// `a=ptime:` in seconds, converted to microseconds
    pub packet_time_us: u32,
    /// `a=ts-refclk:`
    pub ptp_ref_clock: String,
    /// `a=mediaclk:`
    pub media_clk: String,
}

impl SdpSession {
    /// Parse an SDP document. Returns `None` when the required `v=0` line is
    /// missing; individual unparseable lines are skipped.
    pub fn parse(text: &str) -> Option<Self> {
        let mut session = SdpSession::default();
        let mut saw_version = false;

        for raw_line in text.lines() {
            let line = raw_line.trim_end_matches('\r');
            let bytes = line.as_bytes();
            if bytes.len() < 2 || bytes[1] != b'=' {
                continue;
            }
            let value = &line[2..];

            match bytes[0] {
                b'v' => {
                    if value == "0" {
                        saw_version = true;
                    }
                }
                b'o' => session.origin = value.to_string(),
                b's' => session.session_name = value.to_string(),
                b'i' => session.info = value.to_string(),
                b'c' => parse_connection(value, &mut session),
                b'm' => parse_media(value, &mut session),
                b'a' => parse_attribute(value, &mut session),
                _ => {}
            }
        }

        if !saw_version {
            return None;
        }
        Some(session)
    }

    /// Generate the SDP document. The inverse of `parse` on every field the
    /// generator writes.
    pub fn generate(&self) -> String {
        let mut sdp = String::new();
        sdp.push_str("v=0\r\n");
        if !self.origin.is_empty() {
            sdp.push_str(&format!("o={}\r\n", self.origin));
        }
        if !self.session_name.is_empty() {
            sdp.push_str(&format!("s={}\r\n", self.session_name));
        }
        if !self.info.is_empty() {
            sdp.push_str(&format!("i={}\r\n", self.info));
        }
        if !self.connection_addr.is_empty() {
            sdp.push_str(&format!("c=IN IP4 {}/32\r\n", self.connection_addr));
        }
        sdp.push_str("t=0 0\r\n");
        sdp.push_str("a=recvonly\r\n");
        sdp.push_str(&format!(
            "m=audio {} RTP/AVP {}\r\n",
            self.port, self.payload_type
        ));
        if !self.rtpmap.is_empty() {
            sdp.push_str(&format!("a=rtpmap:{} {}\r\n", self.payload_type, self.rtpmap));
        }
        if self.packet_time_us > 0 {
            // Seconds, printed losslessly so the parse inverts exactly
            sdp.push_str(&format!(
                "a=ptime:{}\r\n",
                self.packet_time_us as f64 / 1_000_000.0
            ));
        }
        if !self.media_clk.is_empty() {
            sdp.push_str(&format!("a=mediaclk:{}\r\n", self.media_clk));
        }
        if !self.ptp_ref_clock.is_empty() {
            sdp.push_str(&format!("a=ts-refclk:{}\r\n", self.ptp_ref_clock));
        }
        sdp
    }
}

/// `c=IN IP4 239.69.1.1/32`
fn parse_connection(value: &str, session: &mut SdpSession) {
    let mut parts = value.split_whitespace();
    if parts.next() != Some("IN") || parts.next() != Some("IP4") {
        return;
    }
    if let Some(addr) = parts.next() {
        let addr = addr.split('/').next().unwrap_or(addr);
        session.connection_addr = addr.to_string();
    }
}

/// `m=audio 5004 RTP/AVP 96`
fn parse_media(value: &str, session: &mut SdpSession) {
    let mut parts = value.split_whitespace();
    if parts.next() != Some("audio") {
        return;
    }
    let port = parts.next().and_then(|p| p.parse::<u16>().ok());
    if parts.next() != Some("RTP/AVP") {
        return;
    }
    let pt = parts.next().and_then(|p| p.parse::<u8>().ok());

    if let (Some(port), Some(pt)) = (port, pt) {
        session.port = port;
        session.payload_type = pt;
    }
}

fn parse_attribute(value: &str, session: &mut SdpSession) {
    if let Some(rest) = value.strip_prefix("rtpmap:") {
        // "96 L24/48000/8"
        if let Some((_pt, map)) = rest.split_once(' ') {
            session.rtpmap = map.to_string();
            parse_rtpmap(map, session);
        }
    } else if let Some(rest) = value.strip_prefix("ptime:") {
        if let Ok(seconds) = rest.parse::<f64>() {
            session.packet_time_us = (seconds * 1_000_000.0).round() as u32;
        }
    } else if let Some(rest) = value.strip_prefix("ts-refclk:") {
        session.ptp_ref_clock = rest.to_string();
    } else if let Some(rest) = value.strip_prefix("mediaclk:") {
        session.media_clk = rest.to_string();
    }
    // recvonly and anything unrecognized: ignored
}

/// "L24/48000/8"
fn parse_rtpmap(map: &str, session: &mut SdpSession) {
    let mut parts = map.split('/');
    if parts.next() != Some("L24") {
        return;
    }
    if let Some(rate) = parts.next().and_then(|r| r.parse::<u32>().ok()) {
        session.sample_rate = rate;
    }
    if let Some(channels) = parts.next().and_then(|c| c.parse::<u8>().ok()) {
        session.channels = channels;
    }
}
