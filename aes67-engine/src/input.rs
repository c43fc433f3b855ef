//! Per-stream receive path: RTP depacketizing into the jitter buffer, and
//! PTP-deadline playout into the input ring.
//!
//! The playout thread is the only writer to its stream's input ring.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use aes67_ptp::PtpHandle;
use log::debug;
use parking_lot::Mutex;

use crate::engine::CallbackHub;
use crate::jitter::JitterBuffer;
use crate::ring::AudioRing;
use crate::rtp::Depacketizer;

/// Stack decode buffer: no valid packet on an MTU-sized network carries more
/// interleaved samples than this.
const MAX_SAMPLES_PER_PACKET: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct RxStreamConfig {
    pub index: u32,
    pub channels: u8,
    pub sample_rate: u32,
    pub packet_time_us: u32,
}

/// Lock-free receive-side counters
#[derive(Default)]
pub struct RxStreamStats {
    pub packets_received: AtomicU64,
    /// Malformed, wrong-format, or out-of-order datagrams
    pub packets_dropped: AtomicU64,
    pub playout_underruns: AtomicU64,
    pub ring_overruns: AtomicU64,
}

pub(crate) fn spawn_rx_thread(
    config: RxStreamConfig,
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    clock: PtpHandle,
    jitter: Arc<Mutex<JitterBuffer>>,
    stats: Arc<RxStreamStats>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        rx_loop(config, socket, running, clock, jitter, stats);
    })
}

fn rx_loop(
    config: RxStreamConfig,
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    clock: PtpHandle,
    jitter: Arc<Mutex<JitterBuffer>>,
    stats: Arc<RxStreamStats>,
) {
    let mut depacketizer = Depacketizer::new(config.channels, config.sample_rate);
    let mut packet_buf = [0u8; 2048];
    let mut sample_buf = [0i32; MAX_SAMPLES_PER_PACKET];

    while running.load(Ordering::SeqCst) {
        match socket.recv(&mut packet_buf) {
            Ok(len) => {
                let frames = depacketizer.parse(&packet_buf[..len], &mut sample_buf);
                if frames == 0 {
                    stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                stats.packets_received.fetch_add(1, Ordering::Relaxed);

                let arrival_ptp_ns = clock.now_ptp_ns();
                let sample_count = frames * config.channels as usize;
                jitter.lock().insert(
                    depacketizer.last_timestamp(),
                    arrival_ptp_ns,
                    &sample_buf[..sample_count],
                    frames as u32,
                );
            }
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                debug!("rx stream {}: socket error: {}", config.index, e);
                break;
            }
        }
    }
}

pub(crate) fn spawn_playout_thread(
    config: RxStreamConfig,
    running: Arc<AtomicBool>,
    clock: PtpHandle,
    jitter: Arc<Mutex<JitterBuffer>>,
    ring: Arc<AudioRing>,
    callbacks: Arc<CallbackHub>,
    stats: Arc<RxStreamStats>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        playout_loop(config, running, clock, jitter, ring, callbacks, stats);
    })
}

/// Every packet time: pop the head packet if its PTP deadline has passed and
/// copy it into the input ring, otherwise feed a short burst of silence.
fn playout_loop(
    config: RxStreamConfig,
    running: Arc<AtomicBool>,
    clock: PtpHandle,
    jitter: Arc<Mutex<JitterBuffer>>,
    ring: Arc<AudioRing>,
    callbacks: Arc<CallbackHub>,
    stats: Arc<RxStreamStats>,
) {
    let interval = Duration::from_micros(config.packet_time_us as u64);
    // ≈125 µs of zeros per missed deadline
    let silence_samples = (config.sample_rate as usize / 8_000) * config.channels as usize;

    let mut next_tick = Instant::now() + interval;
    let mut in_underrun = false;
    let mut in_overrun = false;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
        let target = next_tick;

        let ptp_now = clock.now_ptp_ns();

        let mut buffer = jitter.lock();
        let was_empty = buffer.depth() == 0;
        let written = buffer
            .get_next_packet(ptp_now)
            .map(|packet| (ring.write(&packet.samples), packet.samples.len()));

        match written {
            Some((written, expected)) => {
                buffer.release_packet();
                drop(buffer);

                in_underrun = false;
                if written < expected {
                    stats.ring_overruns.fetch_add(1, Ordering::Relaxed);
                    if !in_overrun {
                        in_overrun = true;
                        callbacks.fire_xrun(config.index, false);
                    }
                } else {
                    in_overrun = false;
                }
            }
            None => {
                drop(buffer);
                ring.write_silence(silence_samples);

                // Only a starved stream that has actually carried audio is an
                // xrun; an idle subscription just plays silence.
                if was_empty && stats.packets_received.load(Ordering::Relaxed) > 0 {
                    stats.playout_underruns.fetch_add(1, Ordering::Relaxed);
                    if !in_underrun {
                        in_underrun = true;
                        callbacks.fire_xrun(config.index, true);
                    }
                }
            }
        }

        next_tick = target + interval;
        // Fallen behind by more than a full interval: resynchronize
        if Instant::now() > next_tick + interval {
            next_tick = Instant::now() + interval;
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
