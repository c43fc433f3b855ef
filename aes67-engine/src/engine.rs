//! Engine orchestrator: owns the PTP clock, the per-stream sockets, rings,
//! jitter buffers and threads, and the SAP announcer/discovery pair.
//!
//! The orchestrator exclusively owns every long-lived resource; stream
//! threads borrow rings and the clock through `Arc` handles for the duration
//! of a run. All threads poll one shared `running` flag and exit within a
//! loop iteration of `stop()`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use aes67_ptp::{ClockIdentity, PtpClock, PtpConfig, PtpHandle, PtpRole};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::input::{self, RxStreamConfig, RxStreamStats};
use crate::jitter::JitterBuffer;
use crate::output::{self, TxStreamConfig, TxStreamStats};
use crate::ring::AudioRing;
use crate::rtp::socket as rtp_socket;
use crate::sap::{self, announce, discovery, DiscoveredSessions, SdpSession, StreamDescription};

/// Streams per direction
pub const STREAM_COUNT: u32 = 8;
/// Channels per stream (8 × 8 = 64 logical channels per direction)
pub const CHANNELS_PER_STREAM: u8 = 8;
/// The engine speaks L24 at 48 kHz only
pub const SAMPLE_RATE: u32 = 48_000;
/// RTP port shared by all streams
pub const AUDIO_PORT: u16 = 5004;

const SSRC_BASE: u32 = 0x1234_5678;
/// One second of interleaved 8-channel audio per ring
const RING_SAMPLES: usize = SAMPLE_RATE as usize * CHANNELS_PER_STREAM as usize;

/// TX stream n sends to 239.69.1.(n+1)
fn tx_group(index: u32) -> Ipv4Addr {
    Ipv4Addr::new(239, 69, 1, (index + 1) as u8)
}

/// RX stream n listens on 239.69.2.(n+1)
fn rx_group(index: u32) -> Ipv4Addr {
    Ipv4Addr::new(239, 69, 2, (index + 1) as u8)
}

/// Callbacks from the engine to the outer system. They run on whichever
/// engine thread triggers the event and must not block or re-enter the
/// engine.
#[derive(Default)]
pub struct EngineCallbacks {
    pub on_ptp_status: Option<Box<dyn Fn(bool, f64) + Send + Sync>>,
    /// (stream_index, is_underrun)
    pub on_xrun: Option<Box<dyn Fn(u32, bool) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

/// Callback dispatch with panic containment at the boundary.
pub(crate) struct CallbackHub {
    inner: RwLock<EngineCallbacks>,
}

impl CallbackHub {
    fn new() -> Self {
        Self {
            inner: RwLock::new(EngineCallbacks::default()),
        }
    }

    fn set(&self, callbacks: EngineCallbacks) {
        *self.inner.write() = callbacks;
    }

    pub(crate) fn fire_ptp_status(&self, locked: bool, offset_ns: f64) {
        let guard = self.inner.read();
        if let Some(cb) = guard.on_ptp_status.as_ref() {
            Self::guarded(|| cb(locked, offset_ns));
        }
    }

    pub(crate) fn fire_xrun(&self, stream_index: u32, is_underrun: bool) {
        let guard = self.inner.read();
        if let Some(cb) = guard.on_xrun.as_ref() {
            Self::guarded(|| cb(stream_index, is_underrun));
        }
    }

    pub(crate) fn fire_error(&self, message: &str) {
        let guard = self.inner.read();
        if let Some(cb) = guard.on_error.as_ref() {
            Self::guarded(|| cb(message));
        }
    }

    fn guarded<F: FnOnce()>(f: F) {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
            warn!("engine callback panicked");
        }
    }
}

/// Narrow capability surface of the engine, implemented by [`Engine`] and
/// substitutable with a deterministic stub in tests of the outer system.
pub trait NetworkEngine: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);

    /// Current PTP time in nanoseconds; 0 while the clock has never locked.
    fn now_ptp_ns(&self) -> u64;
    fn host_to_ptp(&self, host_ns: u64) -> u64;
    fn ptp_to_host(&self, ptp_ns: u64) -> u64;
    fn is_ptp_locked(&self) -> bool;
    fn ptp_offset_ns(&self) -> f64;
    /// Current affine slope (1.0 = nominal)
    fn rate_scalar(&self) -> f64;

    fn set_callbacks(&mut self, callbacks: EngineCallbacks);

    /// Ring carrying network audio toward the host (the playout thread is
    /// the producer). `None` outside [0, 7].
    fn input_ring(&self, stream_index: u32) -> Option<Arc<AudioRing>>;
    /// Ring carrying host audio toward the network (the TX thread is the
    /// consumer). `None` outside [0, 7].
    fn output_ring(&self, stream_index: u32) -> Option<Arc<AudioRing>>;

    /// Advisory hint from the host I/O cycle; recorded for future timestamp
    /// alignment, no playout effect yet.
    fn notify_io_cycle(&self, host_time_ns: u64, sample_time: u64);

    fn discovered_stream_names(&self) -> Vec<String>;
    fn discovered_stream(&self, name: &str) -> Option<SdpSession>;
}

struct EngineSockets {
    rx: Vec<UdpSocket>,
    tx: Vec<UdpSocket>,
    sap_announce: UdpSocket,
    sap_discovery: UdpSocket,
}

pub struct Engine {
    config: EngineConfig,
    clock: PtpClock,
    clock_handle: PtpHandle,
    callbacks: Arc<CallbackHub>,
    input_rings: Vec<Arc<AudioRing>>,
    output_rings: Vec<Arc<AudioRing>>,
    jitter_buffers: Vec<Arc<Mutex<JitterBuffer>>>,
    rx_stats: Vec<Arc<RxStreamStats>>,
    tx_stats: Vec<Arc<TxStreamStats>>,
    discovered: DiscoveredSessions,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    io_cycle_host_ns: AtomicU64,
    io_cycle_sample_time: AtomicU64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let callbacks = Arc::new(CallbackHub::new());

        let clock = PtpClock::new(PtpConfig {
            domain: config.ptp_domain,
            interface: Some(config.interface.clone()),
            role: PtpRole::Slave,
        });
        let clock_handle = clock.handle();

        // Forward PTP status transitions to the outer system
        let hub = callbacks.clone();
        clock.set_status_callback(Box::new(move |locked, offset_ns| {
            hub.fire_ptp_status(locked, offset_ns);
        }));

        let min_packets = config.jitter_buffer_packets;
        let max_packets = min_packets * 2;

        let make_rings = || {
            (0..STREAM_COUNT)
                .map(|_| Arc::new(AudioRing::new(RING_SAMPLES)))
                .collect::<Vec<_>>()
        };

        Self {
            clock,
            clock_handle,
            callbacks,
            input_rings: make_rings(),
            output_rings: make_rings(),
            jitter_buffers: (0..STREAM_COUNT)
                .map(|_| {
                    Arc::new(Mutex::new(JitterBuffer::new(
                        min_packets,
                        max_packets,
                        SAMPLE_RATE,
                    )))
                })
                .collect(),
            rx_stats: (0..STREAM_COUNT)
                .map(|_| Arc::new(RxStreamStats::default()))
                .collect(),
            tx_stats: (0..STREAM_COUNT)
                .map(|_| Arc::new(TxStreamStats::default()))
                .collect(),
            discovered: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            io_cycle_host_ns: AtomicU64::new(0),
            io_cycle_sample_time: AtomicU64::new(0),
            config,
        }
    }

    /// Load the configuration from a JSON file and build the engine.
    pub fn from_config_file(path: &str) -> Result<Self> {
        Ok(Self::new(EngineConfig::from_file(path)?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rx_stats(&self, stream_index: u32) -> Option<Arc<RxStreamStats>> {
        self.rx_stats.get(stream_index as usize).cloned()
    }

    pub fn tx_stats(&self, stream_index: u32) -> Option<Arc<TxStreamStats>> {
        self.tx_stats.get(stream_index as usize).cloned()
    }

    pub fn last_io_cycle(&self) -> (u64, u64) {
        (
            self.io_cycle_host_ns.load(Ordering::Relaxed),
            self.io_cycle_sample_time.load(Ordering::Relaxed),
        )
    }

    /// Bind every socket up front so a failure leaves nothing half-started.
    fn bind_sockets(&self, interface: Ipv4Addr) -> Result<EngineSockets> {
        let mut rx = Vec::with_capacity(STREAM_COUNT as usize);
        let mut tx = Vec::with_capacity(STREAM_COUNT as usize);

        for i in 0..STREAM_COUNT {
            rx.push(
                rtp_socket::rx_socket(AUDIO_PORT, rx_group(i), interface)
                    .map_err(|e| EngineError::resource(&format!("rx stream {}", i), e))?,
            );
            tx.push(
                rtp_socket::tx_socket(interface)
                    .map_err(|e| EngineError::resource(&format!("tx stream {}", i), e))?,
            );
        }

        let sap_announce = announce::announce_socket(interface)
            .map_err(|e| EngineError::resource("SAP announce socket", e))?;
        let sap_discovery = discovery::discovery_socket(interface)
            .map_err(|e| EngineError::resource("SAP discovery socket", e))?;

        Ok(EngineSockets {
            rx,
            tx,
            sap_announce,
            sap_discovery,
        })
    }

    fn stream_descriptions(&self) -> Vec<StreamDescription> {
        (0..STREAM_COUNT)
            .map(|i| StreamDescription {
                stream_index: i,
                name: format!("AES67 VSC - Stream {}", i + 1),
                multicast_addr: tx_group(i).to_string(),
                port: AUDIO_PORT,
                channels: CHANNELS_PER_STREAM,
                sample_rate: SAMPLE_RATE,
                packet_time_us: self.config.packet_time_us,
            })
            .collect()
    }
}

/// `ts-refclk` attribute value for our clock identity, e.g.
/// "ptp=IEEE1588-2008:00-1B-21-FF-FE-AB-CD-EF:0".
fn ptp_ref_clock_string(identity: &ClockIdentity) -> String {
    let id = identity
        .0
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join("-");
    format!("ptp=IEEE1588-2008:{}:0", id)
}

impl NetworkEngine for Engine {
    fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::InvalidOperation("engine already running"));
        }

        self.clock.start()?;

        let interface = rtp_socket::resolve_interface(&self.config.interface);
        let sockets = match self.bind_sockets(interface) {
            Ok(s) => s,
            Err(e) => {
                // Roll back to a cleanly stopped engine
                self.clock.stop();
                self.callbacks.fire_error(&e.to_string());
                return Err(e);
            }
        };

        self.running.store(true, Ordering::SeqCst);

        let mut rx_sockets = sockets.rx;
        let mut tx_sockets = sockets.tx;

        for i in (0..STREAM_COUNT).rev() {
            let rx_config = RxStreamConfig {
                index: i,
                channels: CHANNELS_PER_STREAM,
                sample_rate: SAMPLE_RATE,
                packet_time_us: self.config.packet_time_us,
            };

            self.threads.push(input::spawn_rx_thread(
                rx_config,
                rx_sockets.remove(i as usize),
                self.running.clone(),
                self.clock_handle.clone(),
                self.jitter_buffers[i as usize].clone(),
                self.rx_stats[i as usize].clone(),
            ));

            self.threads.push(input::spawn_playout_thread(
                rx_config,
                self.running.clone(),
                self.clock_handle.clone(),
                self.jitter_buffers[i as usize].clone(),
                self.input_rings[i as usize].clone(),
                self.callbacks.clone(),
                self.rx_stats[i as usize].clone(),
            ));

            let tx_config = TxStreamConfig {
                index: i,
                channels: CHANNELS_PER_STREAM,
                sample_rate: SAMPLE_RATE,
                packet_time_us: self.config.packet_time_us,
                ssrc: SSRC_BASE.wrapping_add(i),
            };

            self.threads.push(output::spawn_tx_thread(
                tx_config,
                tx_sockets.remove(i as usize),
                SocketAddrV4::new(tx_group(i), AUDIO_PORT),
                self.running.clone(),
                self.output_rings[i as usize].clone(),
                self.tx_stats[i as usize].clone(),
            ));
        }

        let identity =
            aes67_ptp::platform::local_clock_identity(Some(self.config.interface.as_str()));
        self.threads.push(announce::spawn_announce_thread(
            sockets.sap_announce,
            self.running.clone(),
            self.stream_descriptions(),
            interface,
            ptp_ref_clock_string(&identity),
            sap::SAP_INTERVAL_SECONDS,
        ));

        self.threads.push(discovery::spawn_discovery_thread(
            sockets.sap_discovery,
            self.running.clone(),
            self.discovered.clone(),
        ));

        info!(
            "engine started: {} TX + {} RX streams, {} µs packets",
            STREAM_COUNT, STREAM_COUNT, self.config.packet_time_us
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }

        self.clock.stop();
        info!("engine stopped");
    }

    fn now_ptp_ns(&self) -> u64 {
        self.clock_handle.now_ptp_ns()
    }

    fn host_to_ptp(&self, host_ns: u64) -> u64 {
        self.clock_handle.host_to_ptp(host_ns)
    }

    fn ptp_to_host(&self, ptp_ns: u64) -> u64 {
        self.clock_handle.ptp_to_host(ptp_ns)
    }

    fn is_ptp_locked(&self) -> bool {
        self.clock_handle.is_locked()
    }

    fn ptp_offset_ns(&self) -> f64 {
        self.clock_handle.offset_ns()
    }

    fn rate_scalar(&self) -> f64 {
        self.clock_handle.rate_ratio()
    }

    fn set_callbacks(&mut self, callbacks: EngineCallbacks) {
        self.callbacks.set(callbacks);
    }

    fn input_ring(&self, stream_index: u32) -> Option<Arc<AudioRing>> {
        self.input_rings.get(stream_index as usize).cloned()
    }

    fn output_ring(&self, stream_index: u32) -> Option<Arc<AudioRing>> {
        self.output_rings.get(stream_index as usize).cloned()
    }

    fn notify_io_cycle(&self, host_time_ns: u64, sample_time: u64) {
        self.io_cycle_host_ns.store(host_time_ns, Ordering::Relaxed);
        self.io_cycle_sample_time
            .store(sample_time, Ordering::Relaxed);
    }

    fn discovered_stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.discovered.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn discovered_stream(&self, name: &str) -> Option<SdpSession> {
        self.discovered.lock().get(name).cloned()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
