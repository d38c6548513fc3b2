//! Ping probe implementation with native ICMP (high-precision) and command fallback.
//!
//! Uses blocking sockets in spawn_blocking for sub-millisecond timing precision.

use std::future::Future;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{round2, ProbeError, ProbeResult, Prober};
use crate::config::MonitorConfig;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Prober that sends `count` ICMP echo requests per address.
#[derive(Debug, Clone)]
pub struct PingProber {
    count: u32,
    timeout: Duration,
    deadline: Duration,
}

impl PingProber {
    pub fn new(count: u32, timeout: Duration, deadline: Duration) -> Self {
        Self {
            count: count.max(1),
            timeout,
            deadline,
        }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self::new(cfg.ping_count, cfg.probe_timeout(), cfg.probe_deadline())
    }

    async fn run(&self, address: &str) -> Result<ProbeResult, ProbeError> {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

        if capability == IcmpCapability::Native {
            // Resolve address before spawn_blocking (DNS is async)
            let ip = resolve_address(address).await?;
            let (count, timeout) = (self.count, self.timeout);

            // Run blocking ICMP in dedicated thread for precise timing
            let result =
                tokio::task::spawn_blocking(move || run_blocking_attempts(ip, count, timeout))
                    .await
                    .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

            match result {
                Ok(rtts) => {
                    let lost = self.count as usize - rtts.len();
                    let loss = round2(lost as f64 / self.count as f64 * 100.0);
                    return Ok(ProbeResult::from_samples(self.count, &rtts, Some(loss)));
                }
                Err(e) if is_permission_error(&e) => {
                    tracing::warn!(
                        "Native ping failed with permission error for {}, \
                         falling back to command: {}",
                        address,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // Fallback to command execution
        run_ping_command(address, self.count, self.timeout).await
    }
}

impl Prober for PingProber {
    async fn probe(&self, address: &str) -> ProbeResult {
        let attempt = async {
            // Spread probes within a cycle to avoid a burst of requests
            let spread = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(spread)).await;
            self.run(address).await
        };
        within_deadline(address, self.count, self.deadline, attempt).await
    }
}

/// Await `attempt` for at most `deadline`; errors and expiry both map to the
/// unreachable result.
async fn within_deadline<F>(
    address: &str,
    count: u32,
    deadline: Duration,
    attempt: F,
) -> ProbeResult
where
    F: Future<Output = Result<ProbeResult, ProbeError>>,
{
    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::debug!("Ping probe: {} unreachable: {}", address, e);
            ProbeResult::unreachable(count)
        }
        Err(_) => {
            tracing::debug!("Ping probe: {} exceeded deadline of {:?}", address, deadline);
            ProbeResult::unreachable(count)
        }
    }
}

fn is_permission_error(e: &ProbeError) -> bool {
    let error_str = e.to_string();
    error_str.contains("Permission")
        || error_str.contains("Operation not permitted")
        || error_str.contains("denied")
}

/// Generate a unique identifier for each ping request.
/// This ensures concurrent pings can be distinguished even to the same destination.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

/// Detect ICMP capability by attempting to create a socket.
fn detect_icmp_capability() -> IcmpCapability {
    // Try RAW socket first (requires CAP_NET_RAW or root)
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    // Try DGRAM (unprivileged on Linux with ping_group_range set, or macOS)
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Resolve hostname to IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

/// Send `count` echo requests one after another.
///
/// Returns the round-trip times in milliseconds of the requests that were
/// answered in time. A lost request is not an error.
fn run_blocking_attempts(
    ip: IpAddr,
    count: u32,
    timeout: Duration,
) -> Result<Vec<f64>, ProbeError> {
    let mut rtts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match run_blocking_ping(ip, timeout) {
            Ok(nanos) => rtts.push(nanos / 1_000_000.0),
            Err(ProbeError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(rtts)
}

/// Run one blocking ICMP echo with precise timing.
fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<f64, ProbeError> {
    match ip {
        IpAddr::V4(v4) => run_blocking_ping_v4(v4, timeout),
        IpAddr::V6(v6) => run_blocking_ping_v6(v6, timeout),
    }
}

/// Open a connected ICMP socket. The flag is true for RAW sockets.
fn open_socket(
    domain: Domain,
    protocol: Protocol,
    dest: SocketAddr,
    timeout: Duration,
) -> Result<(Socket, bool), ProbeError> {
    // Try RAW first (privileged), then DGRAM (unprivileged)
    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => Socket::new(domain, Type::DGRAM, Some(protocol))
            .map(|socket| (socket, false))
            .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?,
    };

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .connect(&dest.into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    Ok((socket, raw))
}

fn send_request(socket: &Socket, packet: &[u8]) -> Result<(), ProbeError> {
    socket.send(packet).map(|_| ()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })
}

/// Wait for the reply matching `matches`, returning elapsed nanoseconds.
fn await_reply<F>(
    socket: &Socket,
    start: Instant,
    timeout: Duration,
    matches: F,
) -> Result<f64, ProbeError>
where
    F: Fn(&[u8]) -> bool,
{
    // Loop until we get OUR reply or timeout
    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
        let len = socket.recv(&mut buf).map_err(|e| {
            use std::io::ErrorKind;
            match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => ProbeError::Timeout(timeout),
                _ => ProbeError::Network(format!("Failed to receive: {}", e)),
            }
        })?;
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        if matches(buf) {
            return Ok(elapsed.as_nanos() as f64);
        }
    }
}

/// ICMP Echo Request for IPv4
fn run_blocking_ping_v4(ip: Ipv4Addr, timeout: Duration) -> Result<f64, ProbeError> {
    let (socket, raw) = open_socket(
        Domain::IPV4,
        Protocol::ICMPV4,
        SocketAddr::new(IpAddr::V4(ip), 0),
        timeout,
    )?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_icmp_echo_request(identifier, sequence);

    let start = Instant::now();
    send_request(&socket, &packet)?;

    await_reply(&socket, start, timeout, |buf| {
        // DGRAM sockets deliver the bare ICMP message, RAW sockets prepend the IP header
        let offset = if !buf.is_empty() && buf[0] >> 4 == 4 { 20 } else { 0 };
        is_echo_reply(buf, offset, 0, raw.then_some(identifier), sequence)
    })
}

/// ICMP Echo Request for IPv6
fn run_blocking_ping_v6(ip: Ipv6Addr, timeout: Duration) -> Result<f64, ProbeError> {
    let (socket, raw) = open_socket(
        Domain::IPV6,
        Protocol::ICMPV6,
        SocketAddr::new(IpAddr::V6(ip), 0),
        timeout,
    )?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_icmpv6_echo_request(identifier, sequence);

    let start = Instant::now();
    send_request(&socket, &packet)?;

    // ICMPv6 type 129 = Echo Reply
    await_reply(&socket, start, timeout, |buf| {
        is_echo_reply(buf, 0, 129, raw.then_some(identifier), sequence)
    })
}

/// DGRAM sockets get their identifier rewritten by the kernel, so it is only
/// checked (`Some`) on RAW sockets.
fn is_echo_reply(
    buf: &[u8],
    offset: usize,
    reply_type: u8,
    identifier: Option<u16>,
    sequence: u16,
) -> bool {
    if buf.len() < offset + 8 {
        return false;
    }
    let id = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
    let seq = u16::from_be_bytes([buf[offset + 6], buf[offset + 7]]);
    buf[offset] == reply_type
        && identifier.map_or(true, |expected| id == expected)
        && seq == sequence
}

fn timestamp_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Build an ICMP Echo Request packet (type 8, code 0).
fn build_icmp_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = 8; // Type: Echo Request
    packet[1] = 0; // Code: 0
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..16].copy_from_slice(&timestamp_nanos().to_be_bytes());

    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());

    packet
}

/// Build an ICMPv6 Echo Request packet (type 128, code 0).
fn build_icmpv6_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = 128; // Type: Echo Request
    packet[1] = 0; // Code: 0
    // Checksum left at 0, the kernel fills it in for ICMPv6
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..16].copy_from_slice(&timestamp_nanos().to_be_bytes());

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }

    // Handle odd byte
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// `-W` argument for the system ping: milliseconds on macOS, whole seconds elsewhere.
fn wait_arg(timeout: Duration) -> String {
    if cfg!(target_os = "macos") {
        timeout.as_millis().max(1).to_string()
    } else {
        timeout.as_secs().max(1).to_string()
    }
}

/// Run ping via command execution (fallback).
async fn run_ping_command(
    address: &str,
    count: u32,
    timeout: Duration,
) -> Result<ProbeResult, ProbeError> {
    let output = Command::new("ping")
        .args(["-c", &count.to_string(), "-W", &wait_arg(timeout), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    // A non-zero exit only means some requests went unanswered
    let stdout = String::from_utf8_lossy(&output.stdout);
    let (rtts, loss) = parse_ping_output(&stdout);
    Ok(ProbeResult::from_samples(count, &rtts, loss))
}

/// Parse ping command output into per-reply round-trip times (ms) and the
/// reported packet loss percentage, if any.
fn parse_ping_output(output: &str) -> (Vec<f64>, Option<f64>) {
    // Per-packet response "time=X.XXX ms" (Linux, macOS) or "time<1 ms"
    static RTT_RE: OnceLock<Regex> = OnceLock::new();
    let rtt_re = RTT_RE.get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").unwrap());

    // Summary "0% packet loss" (Linux) or "0.0% packet loss" (macOS)
    static LOSS_RE: OnceLock<Regex> = OnceLock::new();
    let loss_re = LOSS_RE.get_or_init(|| Regex::new(r"(?P<val>[0-9.]+)% packet loss").unwrap());

    let rtts = rtt_re
        .captures_iter(output)
        .filter_map(|caps| caps.name("val")?.as_str().parse::<f64>().ok())
        .collect();

    let loss = loss_re
        .captures(output)
        .and_then(|caps| caps.name("val")?.as_str().parse::<f64>().ok());

    (rtts, loss)
}
