//! Per-stream transmit path: output ring → RTP packets on the wire.

use std::net::{SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use crate::ring::AudioRing;
use crate::rtp::Packetizer;

#[derive(Debug, Clone, Copy)]
pub struct TxStreamConfig {
    pub index: u32,
    pub channels: u8,
    pub sample_rate: u32,
    pub packet_time_us: u32,
    pub ssrc: u32,
}

/// Lock-free transmit-side counters
#[derive(Default)]
pub struct TxStreamStats {
    pub packets_sent: AtomicU64,
    pub samples_sent: AtomicU64,
    pub send_errors: AtomicU64,
}

pub(crate) fn spawn_tx_thread(
    config: TxStreamConfig,
    socket: UdpSocket,
    dest: SocketAddrV4,
    running: Arc<AtomicBool>,
    ring: Arc<AudioRing>,
    stats: Arc<TxStreamStats>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        tx_loop(config, socket, dest, running, ring, stats);
    })
}

/// Each cycle: drain up to one packet's worth of frames from the output ring
/// and send them. Short reads send short packets; they still advance the
/// packetizer's sequence and timestamp.
fn tx_loop(
    config: TxStreamConfig,
    socket: UdpSocket,
    dest: SocketAddrV4,
    running: Arc<AtomicBool>,
    ring: Arc<AudioRing>,
    stats: Arc<TxStreamStats>,
) {
    let mut packetizer = Packetizer::new(config.ssrc, config.channels, config.sample_rate);

    let frames_per_packet =
        (config.packet_time_us as u64 * config.sample_rate as u64 / 1_000_000) as usize;
    let samples_per_packet = frames_per_packet * config.channels as usize;
    let mut sample_buf = vec![0i32; samples_per_packet];

    let interval = Duration::from_micros(config.packet_time_us as u64);
    let mut next_tx = Instant::now() + interval;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if next_tx > now {
            thread::sleep(next_tx - now);
        }
        let target = next_tx;

        let read = ring.read(&mut sample_buf);
        let frames = read / config.channels as usize;

        if frames > 0 {
            let packet = packetizer.create(&sample_buf[..frames * config.channels as usize], frames as u32);
            match socket.send_to(&packet, dest) {
                Ok(_) => {
                    stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    stats
                        .samples_sent
                        .fetch_add((frames * config.channels as usize) as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    debug!("tx stream {}: send failed: {}", config.index, e);
                }
            }
        }

        next_tx = target + interval;
        if Instant::now() > next_tx + interval {
            next_tx = Instant::now() + interval;
        }
    }
}
