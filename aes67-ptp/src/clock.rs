//! PTP ordinary clock for AES67 clock synchronization.
//!
//! Runs a slave that disciplines a host↔PTP affine mapping from Sync /
//! Follow_Up observations, or a minimal master that emits Announce and Sync
//! and answers Delay_Req. The system clock is never adjusted; consumers read
//! PTP time through the affine mapping.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::messages::*;
use crate::platform;
use crate::servo::PiServo;
use crate::stats::{PtpState, PtpStats};

/// PTP multicast group
pub const PTP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);
/// Event port (Sync, Delay_Req)
pub const PTP_EVENT_PORT: u16 = 319;
/// General port (Announce, Follow_Up, Delay_Resp)
pub const PTP_GENERAL_PORT: u16 = 320;

/// Internal oscillator time source for the Announce body
const TIME_SOURCE_INTERNAL_OSC: u8 = 0xA0;

/// Issue a Delay_Req every this many completed syncs
const DELAY_REQ_EVERY: u64 = 8;

/// A locked clock missing syncs for this long enters Holdover
const HOLDOVER_AFTER_NS: u64 = 2_000_000_000;
/// Total sync silence after which Holdover collapses to Lost
const LOST_AFTER_NS: u64 = 10_000_000_000;

/// Master Sync cadence (logMessageInterval = -3, 8 Hz)
const MASTER_SYNC_INTERVAL: Duration = Duration::from_millis(125);
/// Announce once per 8 Sync ticks (1 Hz)
const MASTER_ANNOUNCE_EVERY: u32 = 8;

#[derive(Debug, Error)]
pub enum PtpError {
    #[error("PTP socket setup failed: {0}")]
    Socket(#[from] io::Error),
    #[error("PTP clock already running")]
    AlreadyRunning,
}

/// Clock role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PtpRole {
    #[default]
    Slave,
    Master,
}

/// Clock configuration
#[derive(Debug, Clone)]
pub struct PtpConfig {
    /// PTP domain number (0-127)
    pub domain: u8,
    /// Network interface: an IPv4 address or an interface name ("en0").
    /// Names resolve to a MAC for the clock identity; multicast joins fall
    /// back to INADDR_ANY when no address is known.
    pub interface: Option<String>,
    pub role: PtpRole,
}

impl Default for PtpConfig {
    fn default() -> Self {
        Self {
            domain: 0,
            interface: None,
            role: PtpRole::Slave,
        }
    }
}

/// Status callback: (locked, offset_ns)
pub type StatusCallback = Box<dyn Fn(bool, f64) + Send + Sync>;

/// Host↔PTP affine mapping: `ptp = anchor_ptp + slope · (host − anchor_host)`
#[derive(Debug, Clone, Copy)]
pub struct AffineMap {
    pub anchor_host: u64,
    pub anchor_ptp: u64,
    pub slope: f64,
}

impl AffineMap {
    pub fn identity(now: u64) -> Self {
        Self {
            anchor_host: now,
            anchor_ptp: now,
            slope: 1.0,
        }
    }

    pub fn host_to_ptp(&self, host_ns: u64) -> u64 {
        let delta = host_ns.wrapping_sub(self.anchor_host) as i64;
        let scaled = (self.slope * delta as f64) as i64;
        self.anchor_ptp.wrapping_add(scaled as u64)
    }

    pub fn ptp_to_host(&self, ptp_ns: u64) -> u64 {
        let delta = ptp_ns.wrapping_sub(self.anchor_ptp) as i64;
        let scaled = (delta as f64 / self.slope) as i64;
        self.anchor_host.wrapping_add(scaled as u64)
    }
}

/// State shared between the clock threads and readers.
///
/// The servo thread is the only writer of the affine mapping; RX, TX, and
/// playout threads read it through [`PtpHandle`].
struct ClockShared {
    affine: RwLock<AffineMap>,
    locked: AtomicBool,
    state: AtomicU8,
    /// f64 bit patterns
    offset_ns: AtomicU64,
    rate_ratio: AtomicU64,
    stats: Mutex<PtpStats>,
    callback: RwLock<Option<StatusCallback>>,
}

impl ClockShared {
    fn new(domain: u8) -> Self {
        let now = platform::wall_clock_ns();
        Self {
            affine: RwLock::new(AffineMap::identity(now)),
            locked: AtomicBool::new(false),
            state: AtomicU8::new(PtpState::Init as u8),
            offset_ns: AtomicU64::new(0f64.to_bits()),
            rate_ratio: AtomicU64::new(1f64.to_bits()),
            stats: Mutex::new(PtpStats {
                domain,
                rate_ratio: 1.0,
                ..Default::default()
            }),
            callback: RwLock::new(None),
        }
    }

    fn state(&self) -> PtpState {
        PtpState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PtpState) {
        self.state.store(state as u8, Ordering::Release);
        self.stats.lock().state = state;
    }

    /// Deliver a status transition to the registered callback. Panics inside
    /// the callback are contained; the clock keeps running.
    fn fire_status(&self, locked: bool, offset_ns: f64) {
        let guard = self.callback.read();
        if let Some(cb) = guard.as_ref() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cb(locked, offset_ns)
            }));
            if result.is_err() {
                warn!("PTP status callback panicked");
            }
        }
    }
}

/// Cheap cloneable reader for the clock's time base.
///
/// Handed to every thread that needs `now_ptp()` or the affine conversions.
#[derive(Clone)]
pub struct PtpHandle {
    shared: Arc<ClockShared>,
}

impl PtpHandle {
    /// Current PTP time in nanoseconds, or 0 while the clock has never locked
    /// (or has lost the master past holdover).
    pub fn now_ptp_ns(&self) -> u64 {
        match self.shared.state() {
            PtpState::Locked | PtpState::Holdover => {
                self.host_to_ptp(platform::wall_clock_ns())
            }
            _ => 0,
        }
    }

    pub fn host_to_ptp(&self, host_ns: u64) -> u64 {
        self.shared.affine.read().host_to_ptp(host_ns)
    }

    pub fn ptp_to_host(&self, ptp_ns: u64) -> u64 {
        self.shared.affine.read().ptp_to_host(ptp_ns)
    }

    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    pub fn offset_ns(&self) -> f64 {
        f64::from_bits(self.shared.offset_ns.load(Ordering::Acquire))
    }

    pub fn rate_ratio(&self) -> f64 {
        f64::from_bits(self.shared.rate_ratio.load(Ordering::Acquire))
    }

    pub fn state(&self) -> PtpState {
        self.shared.state()
    }

    pub fn stats(&self) -> PtpStats {
        self.shared.stats.lock().clone()
    }
}

/// Sync observed on the event socket, waiting for its Follow_Up
struct PendingSync {
    sequence_id: u16,
    t2_host_ns: u64,
}

/// Delay_Req in flight, waiting for the Delay_Resp
struct PendingDelay {
    sequence_id: u16,
    t3_host_ns: u64,
}

/// Slave-side protocol state. Kept separate from the socket threads so the
/// sync pipeline can be driven directly in tests.
struct SlaveState {
    shared: Arc<ClockShared>,
    servo: PiServo,
    domain: u8,
    local_port: PortIdentity,
    grandmaster: Option<PortIdentity>,
    pending_sync: Option<PendingSync>,
    pending_delay: Option<PendingDelay>,
    /// Socket used to emit Delay_Req (clone of the event socket)
    event_socket: Option<UdpSocket>,
    delay_req_seq: u16,
    sync_count: u64,
    mean_path_delay_ns: i64,
    /// Last raw (t2 − t1), input to the path delay estimate
    last_sync_diff_ns: i64,
    last_sync_host_ns: u64,
}

impl SlaveState {
    fn new(shared: Arc<ClockShared>, domain: u8, local_port: PortIdentity) -> Self {
        Self {
            shared,
            servo: PiServo::new(),
            domain,
            local_port,
            grandmaster: None,
            pending_sync: None,
            pending_delay: None,
            event_socket: None,
            delay_req_seq: 0,
            sync_count: 0,
            mean_path_delay_ns: 0,
            last_sync_diff_ns: 0,
            last_sync_host_ns: 0,
        }
    }

    fn handle_announce(&mut self, announce: &AnnounceMessage) {
        let source = announce.header.source_port_identity;
        if self.grandmaster.is_none() {
            info!(
                "PTP grandmaster {} (class {})",
                announce.grandmaster_identity.to_hex_string(),
                announce.grandmaster_clock_quality.clock_class
            );
            self.grandmaster = Some(source);
        }

        let mut stats = self.shared.stats.lock();
        stats.announce_count += 1;
        stats.grandmaster_id = announce.grandmaster_identity;
        stats.grandmaster_port = source.port_number;
    }

    fn handle_sync(&mut self, sync: &SyncMessage, t2_host_ns: u64) {
        match &self.grandmaster {
            Some(gm) if sync.header.source_port_identity != *gm => return,
            // No Announce seen yet: latch the sync source so a master that
            // announces late still disciplines us.
            None => self.grandmaster = Some(sync.header.source_port_identity),
            _ => {}
        }

        self.shared.stats.lock().sync_count += 1;

        if sync.header.is_two_step() {
            self.pending_sync = Some(PendingSync {
                sequence_id: sync.header.sequence_id,
                t2_host_ns,
            });
        } else {
            self.complete_sync(sync.origin_timestamp.to_ns(), t2_host_ns as i64);
        }
    }

    fn handle_follow_up(&mut self, follow_up: &FollowUpMessage) {
        if let Some(gm) = &self.grandmaster {
            if follow_up.header.source_port_identity != *gm {
                return;
            }
        } else {
            return;
        }

        let pending = match self.pending_sync.take() {
            Some(p) if p.sequence_id == follow_up.header.sequence_id => p,
            other => {
                self.pending_sync = other;
                return;
            }
        };

        self.shared.stats.lock().follow_up_count += 1;
        self.complete_sync(
            follow_up.precise_origin_timestamp.to_ns(),
            pending.t2_host_ns as i64,
        );
    }

    /// Fold a completed (T1, T2) observation into the servo and publish a new
    /// affine anchor pair. The anchor is taken here, within the same loop
    /// iteration as the observation.
    fn complete_sync(&mut self, t1_ns: i64, t2_ns: i64) {
        let now_host = platform::wall_clock_ns();

        let raw_diff = t2_ns - t1_ns;
        self.last_sync_diff_ns = raw_diff;
        let offset_ns = (raw_diff - self.mean_path_delay_ns) as f64;

        let update = self.servo.update(offset_ns);

        {
            let mut affine = self.shared.affine.write();
            *affine = AffineMap {
                anchor_host: now_host,
                anchor_ptp: t1_ns as u64,
                slope: update.rate_ratio,
            };
        }

        self.shared
            .offset_ns
            .store(offset_ns.to_bits(), Ordering::Release);
        self.shared
            .rate_ratio
            .store(update.rate_ratio.to_bits(), Ordering::Release);

        self.last_sync_host_ns = now_host;
        self.sync_count += 1;

        let was_locked = self.shared.locked.load(Ordering::Acquire);
        let now_locked = self.servo.is_locked();
        let state = if now_locked {
            PtpState::Locked
        } else {
            PtpState::Acquiring
        };
        self.shared.set_state(state);

        {
            let mut stats = self.shared.stats.lock();
            stats.offset_ns = offset_ns;
            stats.rate_ratio = update.rate_ratio;
            stats.locked = now_locked;
            stats.mean_path_delay_ns = self.mean_path_delay_ns;
        }

        if now_locked != was_locked {
            self.shared.locked.store(now_locked, Ordering::Release);
            info!(
                "PTP {} (offset {:.0} ns)",
                if now_locked { "locked" } else { "unlocked" },
                offset_ns
            );
            self.shared.fire_status(now_locked, offset_ns);
        }

        if self.sync_count % DELAY_REQ_EVERY == 0 {
            self.send_delay_req();
        }
    }

    fn send_delay_req(&mut self) {
        let socket = match &self.event_socket {
            Some(s) => s,
            None => return,
        };

        self.delay_req_seq = self.delay_req_seq.wrapping_add(1);
        let msg = DelayReqMessage::build(self.local_port, self.delay_req_seq, self.domain);
        let t3 = platform::wall_clock_ns();
        let dest = SocketAddrV4::new(PTP_MULTICAST_ADDR, PTP_EVENT_PORT);

        if socket.send_to(&msg, dest).is_ok() {
            self.pending_delay = Some(PendingDelay {
                sequence_id: self.delay_req_seq,
                t3_host_ns: t3,
            });
        }
    }

    fn handle_delay_resp(&mut self, resp: &DelayRespMessage) {
        if resp.requesting_port_identity != self.local_port {
            return;
        }

        let pending = match self.pending_delay.take() {
            Some(p) if p.sequence_id == resp.header.sequence_id => p,
            other => {
                self.pending_delay = other;
                return;
            }
        };

        // path_delay = ((t2 − t1) + (t4 − t3)) / 2. With untimestamped
        // hardware both halves carry the same epoch bias, which cancels.
        let t4 = resp.receive_timestamp.to_ns();
        let t3 = pending.t3_host_ns as i64;
        let path = (self.last_sync_diff_ns + (t4 - t3)) / 2;
        self.mean_path_delay_ns = path.max(0);

        let mut stats = self.shared.stats.lock();
        stats.delay_resp_count += 1;
        stats.mean_path_delay_ns = self.mean_path_delay_ns;
    }

    /// Called from the receive loop on every timeout tick. Moves a silent
    /// Locked clock into Holdover (still extrapolating) and a long-silent
    /// Holdover into Lost.
    fn check_timeouts(&mut self, now_host: u64) {
        if self.last_sync_host_ns == 0 {
            return;
        }
        let elapsed = now_host.saturating_sub(self.last_sync_host_ns);

        match self.shared.state() {
            PtpState::Locked if elapsed > HOLDOVER_AFTER_NS => {
                warn!("PTP sync timeout, entering holdover");
                self.shared.set_state(PtpState::Holdover);
                self.shared.locked.store(false, Ordering::Release);
                self.shared.stats.lock().locked = false;
                let offset = f64::from_bits(self.shared.offset_ns.load(Ordering::Acquire));
                self.shared.fire_status(false, offset);
            }
            PtpState::Holdover if elapsed > LOST_AFTER_NS => {
                warn!("PTP holdover expired, sync lost");
                self.shared.set_state(PtpState::Lost);
            }
            _ => {}
        }
    }
}

/// PTP ordinary clock. Owns the sockets and receive threads; exposes the
/// time base through [`PtpHandle`].
pub struct PtpClock {
    config: PtpConfig,
    shared: Arc<ClockShared>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl PtpClock {
    pub fn new(config: PtpConfig) -> Self {
        let shared = Arc::new(ClockShared::new(config.domain));
        Self {
            config,
            shared,
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Register the status callback. Replaces any previous callback; call
    /// before `start` to observe the first transition.
    pub fn set_status_callback(&self, callback: StatusCallback) {
        *self.shared.callback.write() = Some(callback);
    }

    pub fn handle(&self) -> PtpHandle {
        PtpHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn start(&mut self) -> Result<(), PtpError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(PtpError::AlreadyRunning);
        }

        let interface_ip = self
            .config
            .interface
            .as_deref()
            .and_then(|s| s.parse::<Ipv4Addr>().ok())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        let local_port = PortIdentity {
            clock_identity: platform::local_clock_identity(self.config.interface.as_deref()),
            port_number: 1,
        };

        let event_socket = create_ptp_socket(PTP_EVENT_PORT, interface_ip)?;
        let general_socket = create_ptp_socket(PTP_GENERAL_PORT, interface_ip)?;

        self.running.store(true, Ordering::SeqCst);

        match self.config.role {
            PtpRole::Slave => {
                self.shared.set_state(PtpState::Listening);

                let mut slave = SlaveState::new(self.shared.clone(), self.config.domain, local_port);
                slave.event_socket = Some(event_socket.try_clone()?);
                let slave = Arc::new(Mutex::new(slave));

                let running = self.running.clone();
                let state = slave.clone();
                let domain = self.config.domain;
                self.threads.push(thread::spawn(move || {
                    run_slave_event_thread(event_socket, running, state, domain);
                }));

                let running = self.running.clone();
                let domain = self.config.domain;
                self.threads.push(thread::spawn(move || {
                    run_slave_general_thread(general_socket, running, slave, domain);
                }));
            }
            PtpRole::Master => {
                // The master is its own time reference: identity mapping,
                // reported locked from the start.
                let now = platform::wall_clock_ns();
                *self.shared.affine.write() = AffineMap::identity(now);
                self.shared.locked.store(true, Ordering::Release);
                self.shared.set_state(PtpState::Locked);
                self.shared.stats.lock().locked = true;
                self.shared.fire_status(true, 0.0);

                let send_event = event_socket.try_clone()?;
                let send_general = general_socket.try_clone()?;
                let running = self.running.clone();
                let domain = self.config.domain;
                self.threads.push(thread::spawn(move || {
                    run_master_send_thread(send_event, send_general, running, local_port, domain);
                }));

                let running = self.running.clone();
                let domain = self.config.domain;
                self.threads.push(thread::spawn(move || {
                    run_master_event_thread(event_socket, general_socket, running, local_port, domain);
                }));
            }
        }

        info!(
            "PTP clock started (domain {}, {:?})",
            self.config.domain, self.config.role
        );
        Ok(())
    }

    /// Stop the clock and join its threads. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) && self.threads.is_empty() {
            return;
        }

        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }

        self.shared.locked.store(false, Ordering::Release);
        self.shared.stats.lock().locked = false;
        self.shared.set_state(PtpState::Init);
        info!("PTP clock stopped");
    }

    pub fn now_ptp_ns(&self) -> u64 {
        self.handle().now_ptp_ns()
    }

    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PtpStats {
        self.shared.stats.lock().clone()
    }
}

impl Drop for PtpClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind a reusable multicast socket on a PTP port with a 1 s receive timeout.
fn create_ptp_socket(port: u16, interface: Ipv4Addr) -> Result<UdpSocket, PtpError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

    let socket: UdpSocket = socket.into();
    socket.join_multicast_v4(&PTP_MULTICAST_ADDR, &interface)?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;

    Ok(socket)
}

/// Slave event thread: Sync messages on port 319, holdover bookkeeping.
fn run_slave_event_thread(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SlaveState>>,
    domain: u8,
) {
    let mut buf = [0u8; 1024];

    while running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                let t2 = platform::wall_clock_ns();

                if let Some(header) = PtpHeader::parse(&buf[..len]) {
                    if header.domain_number != domain {
                        continue;
                    }
                    if header.message_type == PtpMessageType::Sync {
                        if let Some(sync) = SyncMessage::parse(&buf[..len]) {
                            state.lock().handle_sync(&sync, t2);
                        }
                    }
                }
            }
            Err(ref e) if is_timeout(e) => {
                state.lock().check_timeouts(platform::wall_clock_ns());
            }
            Err(e) => {
                debug!("PTP event socket error: {}", e);
                break;
            }
        }
    }
}

/// Slave general thread: Announce, Follow_Up, Delay_Resp on port 320.
fn run_slave_general_thread(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SlaveState>>,
    domain: u8,
) {
    let mut buf = [0u8; 1024];

    while running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                let data = &buf[..len];
                let header = match PtpHeader::parse(data) {
                    Some(h) if h.domain_number == domain => h,
                    _ => continue,
                };

                match header.message_type {
                    PtpMessageType::Announce => {
                        if let Some(announce) = AnnounceMessage::parse(data) {
                            state.lock().handle_announce(&announce);
                        }
                    }
                    PtpMessageType::FollowUp => {
                        if let Some(follow_up) = FollowUpMessage::parse(data) {
                            state.lock().handle_follow_up(&follow_up);
                        }
                    }
                    PtpMessageType::DelayResp => {
                        if let Some(resp) = DelayRespMessage::parse(data) {
                            state.lock().handle_delay_resp(&resp);
                        }
                    }
                    _ => {}
                }
            }
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                debug!("PTP general socket error: {}", e);
                break;
            }
        }
    }
}

/// Master send thread: Sync at 8 Hz on the event port, Announce at 1 Hz on
/// the general port.
fn run_master_send_thread(
    event_socket: UdpSocket,
    general_socket: UdpSocket,
    running: Arc<AtomicBool>,
    local_port: PortIdentity,
    domain: u8,
) {
    let event_dest = SocketAddrV4::new(PTP_MULTICAST_ADDR, PTP_EVENT_PORT);
    let general_dest = SocketAddrV4::new(PTP_MULTICAST_ADDR, PTP_GENERAL_PORT);
    let mut sync_seq: u16 = 0;
    let mut announce_seq: u16 = 0;
    let mut tick: u32 = 0;

    while running.load(Ordering::SeqCst) {
        let origin = PtpTimestamp::from_ns(platform::wall_clock_ns());
        let sync = SyncMessage::build(local_port, sync_seq, domain, origin, -3);
        sync_seq = sync_seq.wrapping_add(1);
        if let Err(e) = event_socket.send_to(&sync, event_dest) {
            debug!("PTP sync send failed: {}", e);
        }

        if tick % MASTER_ANNOUNCE_EVERY == 0 {
            let announce = AnnounceMessage::build(
                local_port,
                announce_seq,
                domain,
                ClockQuality::default(),
                TIME_SOURCE_INTERNAL_OSC,
            );
            announce_seq = announce_seq.wrapping_add(1);
            let _ = general_socket.send_to(&announce, general_dest);
        }

        tick = tick.wrapping_add(1);
        thread::sleep(MASTER_SYNC_INTERVAL);
    }
}

/// Master event thread: answer Delay_Req with a Delay_Resp carrying the
/// receive timestamp.
fn run_master_event_thread(
    event_socket: UdpSocket,
    general_socket: UdpSocket,
    running: Arc<AtomicBool>,
    local_port: PortIdentity,
    domain: u8,
) {
    let general_dest = SocketAddrV4::new(PTP_MULTICAST_ADDR, PTP_GENERAL_PORT);
    let mut buf = [0u8; 1024];

    while running.load(Ordering::SeqCst) {
        match event_socket.recv(&mut buf) {
            Ok(len) => {
                let rx_time = platform::wall_clock_ns();
                let data = &buf[..len];

                if let Some(req) = DelayReqMessage::parse(data) {
                    if req.header.domain_number != domain {
                        continue;
                    }
                    let resp = DelayRespMessage::build(
                        local_port,
                        req.header.source_port_identity,
                        req.header.sequence_id,
                        domain,
                        PtpTimestamp::from_ns(rx_time),
                    );
                    let _ = general_socket.send_to(&resp, general_dest);
                }
            }
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                debug!("PTP master event socket error: {}", e);
                break;
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_port() -> PortIdentity {
        PortIdentity {
            clock_identity: ClockIdentity([0xAA; 8]),
            port_number: 1,
        }
    }

    fn slave() -> SlaveState {
        let shared = Arc::new(ClockShared::new(0));
        shared.set_state(PtpState::Listening);
        SlaveState::new(
            shared,
            0,
            PortIdentity {
                clock_identity: ClockIdentity([0x11; 8]),
                port_number: 1,
            },
        )
    }

    fn one_step_sync(seq: u16, origin_ns: u64) -> SyncMessage {
        let buf = SyncMessage::build(master_port(), seq, 0, PtpTimestamp::from_ns(origin_ns), -3);
        SyncMessage::parse(&buf).unwrap()
    }

    #[test]
    fn affine_linearity() {
        let map = AffineMap {
            anchor_host: 1_000_000,
            anchor_ptp: 5_000_000,
            slope: 1.000_000_25,
        };

        let h1 = 2_000_000u64;
        let h2 = 9_000_000u64;
        let d1 = map.host_to_ptp(h1);
        let d2 = map.host_to_ptp(h2);

        let expected = (map.slope * (h2 - map.anchor_host) as f64) as i64
            - (map.slope * (h1 - map.anchor_host) as f64) as i64;
        assert_eq!((d2 - d1) as i64, expected);
    }

    #[test]
    fn affine_roundtrip_within_1ns() {
        let map = AffineMap {
            anchor_host: 123_456_789,
            anchor_ptp: 987_654_321,
            slope: 0.999_999_8,
        };

        for h in [0u64, 123_456_789, 1_000_000_000_000, 55_555_555_555] {
            let back = map.ptp_to_host(map.host_to_ptp(h));
            let err = (back as i64 - h as i64).abs();
            assert!(err <= 1, "host {} round-tripped to {}", h, back);
        }
    }

    #[test]
    fn sync_pipeline_locks_and_fires_once() {
        use std::sync::atomic::AtomicU32;

        let mut slave = slave();
        let transitions = Arc::new(AtomicU32::new(0));
        let seen = transitions.clone();
        *slave.shared.callback.write() = Some(Box::new(move |locked, _offset| {
            if locked {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // Small constant offset: master time ~ host time - 100ns
        for seq in 0..5u16 {
            let t2 = platform::wall_clock_ns();
            let sync = one_step_sync(seq, t2 - 100);
            slave.handle_sync(&sync, t2);
        }

        assert!(slave.shared.locked.load(Ordering::SeqCst));
        assert_eq!(slave.shared.state(), PtpState::Locked);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn two_step_sync_waits_for_follow_up() {
        let mut slave = slave();

        let t2 = platform::wall_clock_ns();
        let mut buf = SyncMessage::build(master_port(), 1, 0, PtpTimestamp::default(), -3);
        // Set the two-step flag
        buf[6..8].copy_from_slice(&FLAG_TWO_STEP.to_be_bytes());
        let sync = SyncMessage::parse(&buf).unwrap();
        slave.handle_sync(&sync, t2);

        // No servo update until the Follow_Up arrives
        assert_eq!(slave.sync_count, 0);

        let mut fu = buf.clone();
        fu[0] = PtpMessageType::FollowUp as u8;
        PtpTimestamp::from_ns(t2 - 50).write_to(&mut fu[PtpHeader::SIZE..]);
        let follow_up = FollowUpMessage::parse(&fu).unwrap();
        slave.handle_follow_up(&follow_up);

        assert_eq!(slave.sync_count, 1);
    }

    #[test]
    fn foreign_grandmaster_ignored() {
        let mut slave = slave();

        let t2 = platform::wall_clock_ns();
        slave.handle_sync(&one_step_sync(0, t2), t2);
        assert_eq!(slave.sync_count, 1);

        // Different source identity: dropped
        let other = PortIdentity {
            clock_identity: ClockIdentity([0xBB; 8]),
            port_number: 1,
        };
        let buf = SyncMessage::build(other, 1, 0, PtpTimestamp::from_ns(t2), -3);
        let sync = SyncMessage::parse(&buf).unwrap();
        slave.handle_sync(&sync, t2);
        assert_eq!(slave.sync_count, 1);
    }

    #[test]
    fn holdover_then_lost() {
        let mut slave = slave();

        for seq in 0..3u16 {
            let t2 = platform::wall_clock_ns();
            slave.handle_sync(&one_step_sync(seq, t2 - 10), t2);
        }
        assert_eq!(slave.shared.state(), PtpState::Locked);

        let now = slave.last_sync_host_ns;
        slave.check_timeouts(now + HOLDOVER_AFTER_NS + 1);
        assert_eq!(slave.shared.state(), PtpState::Holdover);
        assert!(!slave.shared.locked.load(Ordering::SeqCst));

        slave.check_timeouts(now + LOST_AFTER_NS + 1);
        assert_eq!(slave.shared.state(), PtpState::Lost);
    }

    #[test]
    fn handle_reports_zero_until_locked() {
        let clock = PtpClock::new(PtpConfig::default());
        assert_eq!(clock.handle().now_ptp_ns(), 0);
        assert!(!clock.is_locked());
    }

    #[test]
    fn path_delay_folds_into_offset() {
        let mut slave = slave();

        let t2 = platform::wall_clock_ns();
        slave.handle_sync(&one_step_sync(0, t2 - 1_000), t2);
        assert_eq!(slave.last_sync_diff_ns, 1_000);

        // Synthesize a Delay_Resp for a pending request
        slave.pending_delay = Some(PendingDelay {
            sequence_id: 42,
            t3_host_ns: t2,
        });
        let buf = DelayRespMessage::build(
            master_port(),
            slave.local_port,
            42,
            0,
            PtpTimestamp::from_ns(t2 + 500),
        );
        let resp = DelayRespMessage::parse(&buf).unwrap();
        slave.handle_delay_resp(&resp);

        // ((t2-t1) + (t4-t3)) / 2 = (1000 + 500) / 2
        assert_eq!(slave.mean_path_delay_ns, 750);
    }
}
