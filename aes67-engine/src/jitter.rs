//! Adaptive jitter buffer with PTP-deadline playout.
//!
//! Packets are queued in RTP-timestamp order (modular comparison) and become
//! eligible for playout once `target_packets` packet durations have elapsed
//! since their arrival. The target depth adapts between `min_packets` and
//! `max_packets`: up under loss and jitter, slowly down in steady state.

use std::collections::VecDeque;

use crate::rtp::timestamp_diff;

/// One buffered packet. The buffer owns the sample storage; `get_next_packet`
/// hands out a borrow that stays valid until `release_packet`.
#[derive(Debug)]
pub struct JitterPacket {
    pub rtp_timestamp: u32,
    pub arrival_ptp_ns: u64,
    pub frame_count: u32,
    pub samples: Vec<i32>,
}

pub struct JitterBuffer {
    min_packets: u32,
    max_packets: u32,
    target_packets: u32,
    sample_rate: u32,
    queue: VecDeque<JitterPacket>,
    /// Underruns since the last depth adjustment
    underruns_since_adjust: u32,
    underruns: u64,
    overruns: u64,
    duplicates: u64,
}

impl JitterBuffer {
    pub fn new(min_packets: u32, max_packets: u32, sample_rate: u32) -> Self {
        Self {
            min_packets,
            max_packets,
            target_packets: (min_packets + max_packets) / 2,
            sample_rate,
            queue: VecDeque::with_capacity(max_packets as usize),
            underruns_since_adjust: 0,
            underruns: 0,
            overruns: 0,
            duplicates: 0,
        }
    }

    /// Insert a depacketized packet. Copies the samples (the buffer owns
    /// them), keeps the queue in modular timestamp order, and drops the new
    /// packet when the buffer is full (tail-drop) or the timestamp is already
    /// queued.
    pub fn insert(
        &mut self,
        rtp_timestamp: u32,
        arrival_ptp_ns: u64,
        samples: &[i32],
        frame_count: u32,
    ) {
        if self.queue.len() >= self.max_packets as usize {
            self.overruns += 1;
            return;
        }

        let mut position = self.queue.len();
        for (i, queued) in self.queue.iter().enumerate() {
            let diff = timestamp_diff(rtp_timestamp, queued.rtp_timestamp);
            if diff == 0 {
                self.duplicates += 1;
                return;
            }
            if diff > 0 {
                position = i;
                break;
            }
        }

        self.queue.insert(
            position,
            JitterPacket {
                rtp_timestamp,
                arrival_ptp_ns,
                frame_count,
                samples: samples.to_vec(),
            },
        );

        self.adjust_depth();
    }

    /// Head packet if its playout deadline has passed.
    ///
    /// `deadline = arrival + target_packets · packet_duration`. Returns
    /// `None` both when the buffer is empty (counted as an underrun) and
    /// when the head is not yet due.
    pub fn get_next_packet(&mut self, ptp_now_ns: u64) -> Option<&JitterPacket> {
        let head = match self.queue.front() {
            Some(p) => p,
            None => {
                self.underruns += 1;
                self.underruns_since_adjust += 1;
                return None;
            }
        };

        let packet_duration_ns =
            head.frame_count as u64 * 1_000_000_000 / self.sample_rate as u64;
        let playout_deadline = head.arrival_ptp_ns + self.target_packets as u64 * packet_duration_ns;

        if ptp_now_ns >= playout_deadline {
            self.queue.front()
        } else {
            None
        }
    }

    /// Pop the head packet and free its samples. Call only after
    /// `get_next_packet` returned it.
    pub fn release_packet(&mut self) {
        debug_assert!(!self.queue.is_empty());
        self.queue.pop_front();
    }

    /// Drop all queued packets and zero the counters.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.underruns_since_adjust = 0;
        self.underruns = 0;
        self.overruns = 0;
        self.duplicates = 0;
    }

    fn adjust_depth(&mut self) {
        let depth = self.queue.len() as u32;

        // Running close to full: more headroom
        if depth >= self.max_packets - 1 && self.target_packets < self.max_packets {
            self.target_packets += 1;
        }

        // Starved since the last adjustment: more latency
        if self.underruns_since_adjust > 0 {
            if self.target_packets < self.max_packets {
                self.target_packets += 1;
            }
            self.underruns_since_adjust = 0;
        }

        // Comfortably deep and no recent starvation: shave latency
        if depth > self.target_packets + 2
            && self.underruns_since_adjust == 0
            && self.target_packets > self.min_packets
        {
            self.target_packets -= 1;
        }
    }

    pub fn depth(&self) -> u32 {
        self.queue.len() as u32
    }

    pub fn target_packets(&self) -> u32 {
        self.target_packets
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;
    /// 250 µs packets at 48 kHz
    const FRAMES: u32 = 12;
    const PACKET_NS: u64 = 250_000;

    fn samples(frames: u32) -> Vec<i32> {
        vec![0i32; frames as usize * 8]
    }

    #[test]
    fn deadline_gates_playout() {
        let mut buffer = JitterBuffer::new(2, 6, RATE);
        assert_eq!(buffer.target_packets(), 4);

        buffer.insert(0, 1_000_000, &samples(FRAMES), FRAMES);

        // deadline = 1_000_000 + 4 * 250_000
        assert!(buffer.get_next_packet(1_999_999).is_none());
        let packet = buffer.get_next_packet(2_000_000).unwrap();
        assert_eq!(packet.rtp_timestamp, 0);
        buffer.release_packet();
        assert_eq!(buffer.depth(), 0);
    }

    #[test]
    fn empty_poll_counts_underrun() {
        let mut buffer = JitterBuffer::new(2, 6, RATE);
        assert!(buffer.get_next_packet(0).is_none());
        assert_eq!(buffer.underruns(), 1);

        // A not-ready head is not an underrun
        buffer.insert(0, 1_000_000, &samples(FRAMES), FRAMES);
        assert!(buffer.get_next_packet(1_000_001).is_none());
        assert_eq!(buffer.underruns(), 1);
    }

    #[test]
    fn packets_emerge_in_timestamp_order() {
        let mut buffer = JitterBuffer::new(2, 16, RATE);

        // Shuffled insertion order, including a wrapped timestamp
        for &ts in &[36u32, 12, 48, 0, 24] {
            buffer.insert(ts, 1_000, &samples(FRAMES), FRAMES);
        }

        let mut seen = Vec::new();
        while buffer.depth() > 0 {
            let packet = buffer.get_next_packet(u64::MAX).unwrap();
            seen.push(packet.rtp_timestamp);
            buffer.release_packet();
        }
        assert_eq!(seen, vec![0, 12, 24, 36, 48]);
    }

    #[test]
    fn modular_order_across_wraparound() {
        let mut buffer = JitterBuffer::new(2, 16, RATE);

        buffer.insert(12, 1_000, &samples(FRAMES), FRAMES);
        buffer.insert(u32::MAX - 11, 1_000, &samples(FRAMES), FRAMES);
        buffer.insert(0, 1_000, &samples(FRAMES), FRAMES);

        let mut seen = Vec::new();
        while buffer.depth() > 0 {
            seen.push(buffer.get_next_packet(u64::MAX).unwrap().rtp_timestamp);
            buffer.release_packet();
        }
        assert_eq!(seen, vec![u32::MAX - 11, 0, 12]);
    }

    #[test]
    fn duplicate_timestamp_dropped() {
        let mut buffer = JitterBuffer::new(2, 6, RATE);
        buffer.insert(100, 1_000, &samples(FRAMES), FRAMES);
        buffer.insert(100, 2_000, &samples(FRAMES), FRAMES);

        assert_eq!(buffer.depth(), 1);
        assert_eq!(buffer.duplicates(), 1);
        // The earlier arrival wins
        assert_eq!(buffer.get_next_packet(u64::MAX).unwrap().arrival_ptp_ns, 1_000);
    }

    #[test]
    fn full_buffer_tail_drops() {
        let mut buffer = JitterBuffer::new(2, 4, RATE);
        for ts in 0..4u32 {
            buffer.insert(ts * FRAMES, 1_000, &samples(FRAMES), FRAMES);
        }
        assert_eq!(buffer.depth(), 4);

        buffer.insert(99 * FRAMES, 1_000, &samples(FRAMES), FRAMES);
        assert_eq!(buffer.depth(), 4);
        assert_eq!(buffer.overruns(), 1);

        // The queued packets are untouched
        assert_eq!(buffer.get_next_packet(u64::MAX).unwrap().rtp_timestamp, 0);
    }

    #[test]
    fn underruns_raise_target() {
        let mut buffer = JitterBuffer::new(2, 8, RATE);
        let start = buffer.target_packets();

        for round in 0..3u32 {
            buffer.get_next_packet(0); // empty poll
            buffer.insert(round * FRAMES, 1_000, &samples(FRAMES), FRAMES);
            let packet_ready = u64::MAX;
            buffer.get_next_packet(packet_ready);
            buffer.release_packet();
            assert_eq!(buffer.target_packets(), start + round + 1);
        }
    }

    #[test]
    fn target_bounded_by_max() {
        let mut buffer = JitterBuffer::new(2, 4, RATE);
        for round in 0..10u32 {
            buffer.get_next_packet(0);
            buffer.insert(round * FRAMES, 1_000, &samples(FRAMES), FRAMES);
            buffer.get_next_packet(u64::MAX);
            buffer.release_packet();
        }
        assert_eq!(buffer.target_packets(), 4);
    }

    #[test]
    fn steady_state_lowers_target_to_min() {
        let mut buffer = JitterBuffer::new(2, 12, RATE);
        assert_eq!(buffer.target_packets(), 7);

        // Fill to depth 10: deeper than target+2, still below the near-full
        // bump at max-1.
        let mut ts = 0u32;
        for _ in 0..10 {
            buffer.insert(ts, 1_000, &samples(FRAMES), FRAMES);
            ts = ts.wrapping_add(FRAMES);
        }
        assert_eq!(buffer.target_packets(), 6);

        // Steady cycles at constant depth with no underruns: one packet of
        // target latency shaved per insert, bounded by the minimum.
        let mut expected = 6;
        for _ in 0..8 {
            buffer.get_next_packet(u64::MAX).unwrap();
            buffer.release_packet();
            buffer.insert(ts, 1_000, &samples(FRAMES), FRAMES);
            ts = ts.wrapping_add(FRAMES);

            expected = (expected - 1).max(2);
            assert_eq!(buffer.target_packets(), expected);
        }
        assert_eq!(buffer.target_packets(), 2);
    }

    #[test]
    fn reset_clears_state() {
        let mut buffer = JitterBuffer::new(2, 6, RATE);
        buffer.insert(0, 1_000, &samples(FRAMES), FRAMES);
        buffer.get_next_packet(0);
        buffer.reset();

        assert_eq!(buffer.depth(), 0);
        assert_eq!(buffer.underruns(), 0);
        assert_eq!(buffer.overruns(), 0);
    }
}
