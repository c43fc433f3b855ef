//! PTPv2 (IEEE 1588-2008) message parsing and construction.

/// PTP message types (low nibble of the first header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PtpMessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PDelayReq = 0x2,
    PDelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PDelayRespFollowUp = 0xA,
    Announce = 0xB,
    Signaling = 0xC,
    Management = 0xD,
    Unknown = 0xFF,
}

impl From<u8> for PtpMessageType {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Sync,
            0x1 => Self::DelayReq,
            0x2 => Self::PDelayReq,
            0x3 => Self::PDelayResp,
            0x8 => Self::FollowUp,
            0x9 => Self::DelayResp,
            0xA => Self::PDelayRespFollowUp,
            0xB => Self::Announce,
            0xC => Self::Signaling,
            0xD => Self::Management,
            _ => Self::Unknown,
        }
    }
}

/// Two-step flag in the header flag field
pub const FLAG_TWO_STEP: u16 = 0x0200;

/// PTP clock identity (EUI-64 format, 8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; 8];
        if bytes.len() >= 8 {
            id.copy_from_slice(&bytes[..8]);
        }
        Self(id)
    }

    /// Derive an EUI-64 identity from a 48-bit MAC by inserting FF FE
    /// after the third byte.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        Self([mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]])
    }

    /// Format as hex string (e.g., "001b21fffeabcdef")
    pub fn to_hex_string(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Port identity (clock identity + port number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortIdentity {
    pub clock_identity: ClockIdentity,
    pub port_number: u16,
}

impl PortIdentity {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        Some(Self {
            clock_identity: ClockIdentity::from_bytes(&bytes[0..8]),
            port_number: u16::from_be_bytes([bytes[8], bytes[9]]),
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.clock_identity.0);
        buf[8..10].copy_from_slice(&self.port_number.to_be_bytes());
    }
}

/// PTP timestamp: 48-bit seconds + 32-bit nanoseconds, 10 bytes on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PtpTimestamp {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl PtpTimestamp {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        let seconds = u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ]);
        let nanoseconds = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        Some(Self {
            seconds,
            nanoseconds,
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        let secs = self.seconds.to_be_bytes();
        buf[0..6].copy_from_slice(&secs[2..8]);
        buf[6..10].copy_from_slice(&self.nanoseconds.to_be_bytes());
    }

    pub fn to_ns(&self) -> i64 {
        self.seconds as i64 * 1_000_000_000 + self.nanoseconds as i64
    }

    pub fn from_ns(ns: u64) -> Self {
        Self {
            seconds: ns / 1_000_000_000,
            nanoseconds: (ns % 1_000_000_000) as u32,
        }
    }
}

/// Common PTP header (34 bytes)
#[derive(Debug, Clone)]
pub struct PtpHeader {
    pub message_type: PtpMessageType,
    pub version: u8,
    pub message_length: u16,
    pub domain_number: u8,
    pub flags: u16,
    pub correction_field: i64,
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub control_field: u8,
    pub log_message_interval: i8,
}

impl PtpHeader {
    pub const SIZE: usize = 34;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }

        let message_type = PtpMessageType::from(data[0]);
        let version = data[1] & 0x0F;
        let message_length = u16::from_be_bytes([data[2], data[3]]);
        let domain_number = data[4];
        // byte 5 is reserved
        let flags = u16::from_be_bytes([data[6], data[7]]);
        let correction_field = i64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        // bytes 16-19 are reserved
        let source_port_identity = PortIdentity::from_bytes(&data[20..30])?;
        let sequence_id = u16::from_be_bytes([data[30], data[31]]);
        let control_field = data[32];
        let log_message_interval = data[33] as i8;

        Some(Self {
            message_type,
            version,
            message_length,
            domain_number,
            flags,
            correction_field,
            source_port_identity,
            sequence_id,
            control_field,
            log_message_interval,
        })
    }

    /// Serialize the header into the first 34 bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.message_type as u8 & 0x0F;
        buf[1] = self.version & 0x0F;
        buf[2..4].copy_from_slice(&self.message_length.to_be_bytes());
        buf[4] = self.domain_number;
        buf[5] = 0;
        buf[6..8].copy_from_slice(&self.flags.to_be_bytes());
        buf[8..16].copy_from_slice(&self.correction_field.to_be_bytes());
        buf[16..20].fill(0);
        self.source_port_identity.write_to(&mut buf[20..30]);
        buf[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buf[32] = self.control_field;
        buf[33] = self.log_message_interval as u8;
    }

    /// Check if this is a two-step message (Follow_Up carries the precise timestamp)
    pub fn is_two_step(&self) -> bool {
        (self.flags & FLAG_TWO_STEP) != 0
    }
}

/// Clock quality information (Announce body)
#[derive(Debug, Clone, Copy)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
}

impl Default for ClockQuality {
    fn default() -> Self {
        // Application-specific class, unknown accuracy (1588 defaults for a
        // free-running internal oscillator master).
        Self {
            clock_class: 248,
            clock_accuracy: 0xFE,
            offset_scaled_log_variance: 0xFFFF,
        }
    }
}

impl ClockQuality {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        Some(Self {
            clock_class: bytes[0],
            clock_accuracy: bytes[1],
            offset_scaled_log_variance: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.clock_class;
        buf[1] = self.clock_accuracy;
        buf[2..4].copy_from_slice(&self.offset_scaled_log_variance.to_be_bytes());
    }
}

/// Sync message: header + origin timestamp
#[derive(Debug, Clone)]
pub struct SyncMessage {
    pub header: PtpHeader,
    pub origin_timestamp: PtpTimestamp,
}

impl SyncMessage {
    pub const SIZE: usize = PtpHeader::SIZE + 10;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != PtpMessageType::Sync {
            return None;
        }

        let body = &data[PtpHeader::SIZE..];
        if body.len() < 10 {
            return None;
        }

        Some(Self {
            header,
            origin_timestamp: PtpTimestamp::from_bytes(&body[0..10])?,
        })
    }

    /// Build a one-step Sync carrying the master's origin timestamp.
    pub fn build(
        source_port: PortIdentity,
        sequence_id: u16,
        domain: u8,
        origin: PtpTimestamp,
        log_interval: i8,
    ) -> Vec<u8> {
        let header = PtpHeader {
            message_type: PtpMessageType::Sync,
            version: 2,
            message_length: Self::SIZE as u16,
            domain_number: domain,
            flags: 0,
            correction_field: 0,
            source_port_identity: source_port,
            sequence_id,
            control_field: 0x00,
            log_message_interval: log_interval,
        };

        let mut buf = vec![0u8; Self::SIZE];
        header.write_to(&mut buf);
        origin.write_to(&mut buf[PtpHeader::SIZE..]);
        buf
    }
}

/// Follow_Up message: header + precise origin timestamp
#[derive(Debug, Clone)]
pub struct FollowUpMessage {
    pub header: PtpHeader,
    pub precise_origin_timestamp: PtpTimestamp,
}

impl FollowUpMessage {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != PtpMessageType::FollowUp {
            return None;
        }

        let body = &data[PtpHeader::SIZE..];
        if body.len() < 10 {
            return None;
        }

        Some(Self {
            header,
            precise_origin_timestamp: PtpTimestamp::from_bytes(&body[0..10])?,
        })
    }
}

/// Delay_Req message: header + (zero) origin timestamp
#[derive(Debug, Clone)]
pub struct DelayReqMessage {
    pub header: PtpHeader,
    pub origin_timestamp: PtpTimestamp,
}

impl DelayReqMessage {
    pub const SIZE: usize = PtpHeader::SIZE + 10;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != PtpMessageType::DelayReq {
            return None;
        }

        let body = &data[PtpHeader::SIZE..];
        if body.len() < 10 {
            return None;
        }

        Some(Self {
            header,
            origin_timestamp: PtpTimestamp::from_bytes(&body[0..10])?,
        })
    }

    /// Build a Delay_Req. The origin timestamp is left zero; the actual send
    /// time is recorded locally when the datagram goes out.
    pub fn build(source_port: PortIdentity, sequence_id: u16, domain: u8) -> Vec<u8> {
        let header = PtpHeader {
            message_type: PtpMessageType::DelayReq,
            version: 2,
            message_length: Self::SIZE as u16,
            domain_number: domain,
            flags: 0,
            correction_field: 0,
            source_port_identity: source_port,
            sequence_id,
            control_field: 0x01,
            log_message_interval: 0x7F,
        };

        let mut buf = vec![0u8; Self::SIZE];
        header.write_to(&mut buf);
        buf
    }
}

/// Delay_Resp message: header + receive timestamp + requesting port identity
#[derive(Debug, Clone)]
pub struct DelayRespMessage {
    pub header: PtpHeader,
    pub receive_timestamp: PtpTimestamp,
    pub requesting_port_identity: PortIdentity,
}

impl DelayRespMessage {
    pub const SIZE: usize = PtpHeader::SIZE + 20;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != PtpMessageType::DelayResp {
            return None;
        }

        let body = &data[PtpHeader::SIZE..];
        if body.len() < 20 {
            return None;
        }

        Some(Self {
            header,
            receive_timestamp: PtpTimestamp::from_bytes(&body[0..10])?,
            requesting_port_identity: PortIdentity::from_bytes(&body[10..20])?,
        })
    }

    /// Build a Delay_Resp answering `requester` with the master's receive
    /// timestamp of the Delay_Req.
    pub fn build(
        source_port: PortIdentity,
        requester: PortIdentity,
        sequence_id: u16,
        domain: u8,
        receive_time: PtpTimestamp,
    ) -> Vec<u8> {
        let header = PtpHeader {
            message_type: PtpMessageType::DelayResp,
            version: 2,
            message_length: Self::SIZE as u16,
            domain_number: domain,
            flags: 0,
            correction_field: 0,
            source_port_identity: source_port,
            sequence_id,
            control_field: 0x03,
            log_message_interval: 0x7F,
        };

        let mut buf = vec![0u8; Self::SIZE];
        header.write_to(&mut buf);
        receive_time.write_to(&mut buf[PtpHeader::SIZE..]);
        requester.write_to(&mut buf[PtpHeader::SIZE + 10..]);
        buf
    }
}

/// Announce message body (after common header)
#[derive(Debug, Clone)]
pub struct AnnounceMessage {
    pub header: PtpHeader,
    pub origin_timestamp: PtpTimestamp,
    pub current_utc_offset: i16,
    pub grandmaster_priority1: u8,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority2: u8,
    pub grandmaster_identity: ClockIdentity,
    pub steps_removed: u16,
    pub time_source: u8,
}

impl AnnounceMessage {
    pub const SIZE: usize = PtpHeader::SIZE + 30;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != PtpMessageType::Announce {
            return None;
        }

        let body = &data[PtpHeader::SIZE..];
        if body.len() < 30 {
            return None;
        }

        let origin_timestamp = PtpTimestamp::from_bytes(&body[0..10])?;
        let current_utc_offset = i16::from_be_bytes([body[10], body[11]]);
        // byte 12 is reserved
        let grandmaster_priority1 = body[13];
        let grandmaster_clock_quality = ClockQuality::from_bytes(&body[14..18])?;
        let grandmaster_priority2 = body[18];
        let grandmaster_identity = ClockIdentity::from_bytes(&body[19..27]);
        let steps_removed = u16::from_be_bytes([body[27], body[28]]);
        let time_source = body[29];

        Some(Self {
            header,
            origin_timestamp,
            current_utc_offset,
            grandmaster_priority1,
            grandmaster_clock_quality,
            grandmaster_priority2,
            grandmaster_identity,
            steps_removed,
            time_source,
        })
    }

    /// Build an Announce for the minimal master role.
    pub fn build(
        source_port: PortIdentity,
        sequence_id: u16,
        domain: u8,
        quality: ClockQuality,
        time_source: u8,
    ) -> Vec<u8> {
        let header = PtpHeader {
            message_type: PtpMessageType::Announce,
            version: 2,
            message_length: Self::SIZE as u16,
            domain_number: domain,
            flags: 0,
            correction_field: 0,
            source_port_identity: source_port,
            sequence_id,
            control_field: 0x05,
            log_message_interval: 0,
        };

        let mut buf = vec![0u8; Self::SIZE];
        header.write_to(&mut buf);

        let body = &mut buf[PtpHeader::SIZE..];
        // origin timestamp stays zero; bytes 10-11 utc offset, 12 reserved
        body[13] = 128; // priority1
        quality.write_to(&mut body[14..18]);
        body[18] = 128; // priority2
        body[19..27].copy_from_slice(&source_port.clock_identity.0);
        body[27..29].copy_from_slice(&0u16.to_be_bytes());
        body[29] = time_source;

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_port() -> PortIdentity {
        PortIdentity {
            clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
            port_number: 1,
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = PtpHeader {
            message_type: PtpMessageType::Sync,
            version: 2,
            message_length: 44,
            domain_number: 3,
            flags: FLAG_TWO_STEP,
            correction_field: -42,
            source_port_identity: test_port(),
            sequence_id: 0xBEEF,
            control_field: 0,
            log_message_interval: -3,
        };

        let mut buf = [0u8; PtpHeader::SIZE];
        header.write_to(&mut buf);
        let parsed = PtpHeader::parse(&buf).unwrap();

        assert_eq!(parsed.message_type, PtpMessageType::Sync);
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.domain_number, 3);
        assert!(parsed.is_two_step());
        assert_eq!(parsed.correction_field, -42);
        assert_eq!(parsed.source_port_identity, test_port());
        assert_eq!(parsed.sequence_id, 0xBEEF);
        assert_eq!(parsed.log_message_interval, -3);
    }

    #[test]
    fn timestamp_encoding() {
        let ts = PtpTimestamp {
            seconds: 0x0102_0304_0506,
            nanoseconds: 999_999_999,
        };
        let mut buf = [0u8; 10];
        ts.write_to(&mut buf);
        assert_eq!(&buf[0..6], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(PtpTimestamp::from_bytes(&buf).unwrap(), ts);
    }

    #[test]
    fn timestamp_ns_conversion() {
        let ts = PtpTimestamp::from_ns(1_500_000_123);
        assert_eq!(ts.seconds, 1);
        assert_eq!(ts.nanoseconds, 500_000_123);
        assert_eq!(ts.to_ns(), 1_500_000_123);
    }

    #[test]
    fn clock_identity_from_mac() {
        let id = ClockIdentity::from_mac([0x00, 0x1B, 0x21, 0xAB, 0xCD, 0xEF]);
        assert_eq!(id.0, [0x00, 0x1B, 0x21, 0xFF, 0xFE, 0xAB, 0xCD, 0xEF]);
        assert_eq!(id.to_hex_string(), "001b21fffeabcdef");
    }

    #[test]
    fn sync_build_parse() {
        let origin = PtpTimestamp::from_ns(1_234_567_890_123);
        let buf = SyncMessage::build(test_port(), 7, 0, origin, -3);
        assert_eq!(buf.len(), SyncMessage::SIZE);

        let sync = SyncMessage::parse(&buf).unwrap();
        assert_eq!(sync.header.sequence_id, 7);
        assert_eq!(sync.origin_timestamp, origin);
        assert!(!sync.header.is_two_step());
    }

    #[test]
    fn delay_resp_build_parse() {
        let requester = PortIdentity {
            clock_identity: ClockIdentity([9; 8]),
            port_number: 1,
        };
        let rx_time = PtpTimestamp::from_ns(42_000_000_001);
        let buf = DelayRespMessage::build(test_port(), requester, 99, 0, rx_time);

        let resp = DelayRespMessage::parse(&buf).unwrap();
        assert_eq!(resp.header.sequence_id, 99);
        assert_eq!(resp.receive_timestamp, rx_time);
        assert_eq!(resp.requesting_port_identity, requester);
    }

    #[test]
    fn announce_build_parse() {
        let buf = AnnounceMessage::build(test_port(), 3, 0, ClockQuality::default(), 0xA0);
        let announce = AnnounceMessage::parse(&buf).unwrap();

        assert_eq!(announce.grandmaster_priority1, 128);
        assert_eq!(announce.grandmaster_clock_quality.clock_class, 248);
        assert_eq!(announce.grandmaster_clock_quality.clock_accuracy, 0xFE);
        assert_eq!(announce.grandmaster_identity, test_port().clock_identity);
        assert_eq!(announce.steps_removed, 0);
        assert_eq!(announce.time_source, 0xA0);
    }

    #[test]
    fn rejects_wrong_type() {
        let buf = SyncMessage::build(test_port(), 7, 0, PtpTimestamp::default(), -3);
        assert!(AnnounceMessage::parse(&buf).is_none());
        assert!(FollowUpMessage::parse(&buf).is_none());
    }
}
