//! RTP L24 packetizer and depacketizer.
//!
//! Samples travel as 24-bit signed big-endian PCM (RFC 3190), carried in the
//! host as left-justified 32-bit containers: the top 24 bits are audio, the
//! low 8 bits are zero after a wire round trip.

use super::header::{sequence_diff, RtpHeader, RTP_HEADER_LEN};
use super::{L24_BYTES_PER_SAMPLE, PAYLOAD_TYPE_L24};

/// Encode one 32-bit container into 3 payload bytes.
#[inline]
pub fn i32_to_l24(sample: i32, out: &mut [u8]) {
    let v = sample >> 8;
    out[0] = (v >> 16) as u8;
    out[1] = (v >> 8) as u8;
    out[2] = v as u8;
}

/// Decode 3 payload bytes into a 32-bit container, sign-extending bit 23.
#[inline]
pub fn l24_to_i32(bytes: &[u8]) -> i32 {
    let mut v = ((bytes[0] as i32) << 16) | ((bytes[1] as i32) << 8) | (bytes[2] as i32);
    if v & 0x0080_0000 != 0 {
        v |= !0x00FF_FFFF;
    }
    v << 8
}

/// Builds outgoing L24 packets, advancing sequence and timestamp per packet.
pub struct Packetizer {
    ssrc: u32,
    channels: u8,
    sequence: u16,
    timestamp: u32,
}

impl Packetizer {
    pub fn new(ssrc: u32, channels: u8, _sample_rate: u32) -> Self {
        Self {
            ssrc,
            channels,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Build one RTP packet from `frame_count` interleaved frames.
    ///
    /// Zero frames or zero channels yield an empty buffer and leave the
    /// sequence/timestamp state untouched.
    pub fn create(&mut self, samples: &[i32], frame_count: u32) -> Vec<u8> {
        if frame_count == 0 || self.channels == 0 {
            return Vec::new();
        }

        let sample_count = frame_count as usize * self.channels as usize;
        debug_assert!(samples.len() >= sample_count);

        let payload_len = sample_count * L24_BYTES_PER_SAMPLE;
        let mut packet = vec![0u8; RTP_HEADER_LEN + payload_len];

        RtpHeader::write_plain(
            &mut packet,
            PAYLOAD_TYPE_L24,
            self.sequence,
            self.timestamp,
            self.ssrc,
        );

        for (i, &sample) in samples[..sample_count].iter().enumerate() {
            let offset = RTP_HEADER_LEN + i * L24_BYTES_PER_SAMPLE;
            i32_to_l24(sample, &mut packet[offset..offset + 3]);
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frame_count);

        packet
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }
}

/// Parses incoming L24 packets with sequence bookkeeping and loss detection.
pub struct Depacketizer {
    channels: u8,
    last_sequence: u16,
    last_timestamp: u32,
    packet_loss: u64,
    first_packet: bool,
}

impl Depacketizer {
    pub fn new(channels: u8, _sample_rate: u32) -> Self {
        Self {
            channels,
            last_sequence: 0,
            last_timestamp: 0,
            packet_loss: 0,
            first_packet: true,
        }
    }

    /// Parse a received datagram into `out` (interleaved 32-bit containers).
    ///
    /// Returns the number of frames decoded; 0 for malformed, out-of-order,
    /// or wrong-format packets (the caller just continues).
    pub fn parse(&mut self, packet: &[u8], out: &mut [i32]) -> usize {
        let header = match RtpHeader::parse(packet) {
            Some(h) => h,
            None => return 0,
        };

        if header.version != 2 || header.payload_type != PAYLOAD_TYPE_L24 {
            return 0;
        }

        // Sequence gap: values >= 2^15 away count as negative
        if !self.first_packet {
            let gap = sequence_diff(self.last_sequence, header.sequence);
            if gap > 1 {
                self.packet_loss += (gap - 1) as u64;
            } else if gap < 0 {
                return 0;
            }
        }

        self.last_sequence = header.sequence;
        self.last_timestamp = header.timestamp;
        self.first_packet = false;

        let header_len = header.header_len();
        if packet.len() <= header_len {
            return 0;
        }

        let payload = &packet[header_len..];
        let bytes_per_frame = self.channels as usize * L24_BYTES_PER_SAMPLE;
        if bytes_per_frame == 0 || payload.len() % bytes_per_frame != 0 {
            return 0;
        }

        let frame_count = payload.len() / bytes_per_frame;
        let sample_count = frame_count * self.channels as usize;
        if out.len() < sample_count {
            return 0;
        }

        for (i, chunk) in payload.chunks_exact(L24_BYTES_PER_SAMPLE).enumerate() {
            out[i] = l24_to_i32(chunk);
        }

        frame_count
    }

    pub fn last_sequence(&self) -> u16 {
        self.last_sequence
    }

    pub fn last_timestamp(&self) -> u32 {
        self.last_timestamp
    }

    pub fn packet_loss(&self) -> u64 {
        self.packet_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wire round trips preserve the top 24 bits only.
    fn mask(sample: i32) -> i32 {
        sample & !0xFF
    }

    #[test]
    fn encode_known_bytes() {
        let mut packetizer = Packetizer::new(0x12345678, 2, 48_000);
        let samples = [0x0000_0100, 0x7FFF_FF00, i32::MIN, -0x100];

        let packet = packetizer.create(&samples, 2);
        assert_eq!(packet.len(), 24);

        assert_eq!(&packet[0..2], &[0x80, 0x60]);
        assert_eq!(&packet[2..4], &[0x00, 0x00]);
        assert_eq!(&packet[4..8], &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&packet[8..12], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(
            &packet[12..24],
            &[0x00, 0x00, 0x01, 0x7F, 0xFF, 0xFF, 0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn sequence_and_timestamp_advance() {
        let mut packetizer = Packetizer::new(1, 2, 48_000);
        let samples = [0i32; 24];

        packetizer.create(&samples, 12);
        assert_eq!(packetizer.sequence(), 1);
        assert_eq!(packetizer.timestamp(), 12);

        packetizer.create(&samples, 12);
        assert_eq!(packetizer.sequence(), 2);
        assert_eq!(packetizer.timestamp(), 24);
    }

    #[test]
    fn empty_create_does_not_mutate_state() {
        let mut packetizer = Packetizer::new(1, 2, 48_000);
        assert!(packetizer.create(&[], 0).is_empty());
        assert_eq!(packetizer.sequence(), 0);
        assert_eq!(packetizer.timestamp(), 0);
    }

    #[test]
    fn roundtrip_masks_low_byte() {
        let mut packetizer = Packetizer::new(7, 8, 48_000);
        let mut depacketizer = Depacketizer::new(8, 48_000);

        let samples: Vec<i32> = (0..96)
            .map(|i| (i as i32).wrapping_mul(0x0102_0304))
            .collect();
        let packet = packetizer.create(&samples, 12);

        let mut out = [0i32; 96];
        let frames = depacketizer.parse(&packet, &mut out);
        assert_eq!(frames, 12);

        for (decoded, source) in out.iter().zip(samples.iter()) {
            assert_eq!(*decoded, mask(*source));
            assert_eq!(*decoded & 0xFF, 0);
        }
    }

    #[test]
    fn loss_detection_counts_gap() {
        let mut depacketizer = Depacketizer::new(2, 48_000);
        let mut out = [0i32; 64];

        for seq in [100u16, 101, 103] {
            let mut packet = vec![0u8; 12 + 12];
            RtpHeader::write_plain(&mut packet, PAYLOAD_TYPE_L24, seq, 0, 1);
            assert!(depacketizer.parse(&packet, &mut out) > 0);
        }

        assert_eq!(depacketizer.last_sequence(), 103);
        assert_eq!(depacketizer.packet_loss(), 1);
    }

    #[test]
    fn dropped_run_counts_all_lost_packets() {
        let mut depacketizer = Depacketizer::new(2, 48_000);
        let mut out = [0i32; 64];

        for seq in [10u16, 16] {
            let mut packet = vec![0u8; 12 + 6];
            RtpHeader::write_plain(&mut packet, PAYLOAD_TYPE_L24, seq, 0, 1);
            depacketizer.parse(&packet, &mut out);
        }
        assert_eq!(depacketizer.packet_loss(), 5);
    }

    #[test]
    fn out_of_order_packet_dropped() {
        let mut depacketizer = Depacketizer::new(2, 48_000);
        let mut out = [0i32; 64];

        for seq in [50u16, 51] {
            let mut packet = vec![0u8; 12 + 6];
            RtpHeader::write_plain(&mut packet, PAYLOAD_TYPE_L24, seq, 0, 1);
            depacketizer.parse(&packet, &mut out);
        }

        let mut stale = vec![0u8; 12 + 6];
        RtpHeader::write_plain(&mut stale, PAYLOAD_TYPE_L24, 49, 0, 1);
        assert_eq!(depacketizer.parse(&stale, &mut out), 0);
        assert_eq!(depacketizer.last_sequence(), 51);
        assert_eq!(depacketizer.packet_loss(), 0);
    }

    #[test]
    fn rejects_wrong_version_and_payload_type() {
        let mut depacketizer = Depacketizer::new(2, 48_000);
        let mut out = [0i32; 16];

        let mut packet = vec![0u8; 12 + 6];
        RtpHeader::write_plain(&mut packet, PAYLOAD_TYPE_L24, 0, 0, 1);
        packet[0] = 0x40; // version 1
        assert_eq!(depacketizer.parse(&packet, &mut out), 0);

        let mut packet = vec![0u8; 12 + 6];
        RtpHeader::write_plain(&mut packet, 97, 0, 0, 1);
        assert_eq!(depacketizer.parse(&packet, &mut out), 0);
    }

    #[test]
    fn rejects_ragged_payload() {
        let mut depacketizer = Depacketizer::new(8, 48_000);
        let mut out = [0i32; 64];

        // 8 channels × 3 bytes = 24 bytes per frame; 23 is not divisible
        let mut packet = vec![0u8; 12 + 23];
        RtpHeader::write_plain(&mut packet, PAYLOAD_TYPE_L24, 0, 0, 1);
        assert_eq!(depacketizer.parse(&packet, &mut out), 0);
    }

    #[test]
    fn l24_sign_extension() {
        assert_eq!(l24_to_i32(&[0x80, 0x00, 0x00]), i32::MIN);
        assert_eq!(l24_to_i32(&[0x7F, 0xFF, 0xFF]), 0x7FFF_FF00);
        assert_eq!(l24_to_i32(&[0xFF, 0xFF, 0xFF]), -0x100);
        assert_eq!(l24_to_i32(&[0x00, 0x00, 0x01]), 0x100);
    }
}
