use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use thiserror::Error;
use tracing::{info, warn};

use super::diag_enabled;
use super::framing::{encode_frame, FrameAssembler};

pub const DEFAULT_PORT: u16 = 39876;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_PENDING_OUTBOUND_BYTES: usize = 256 * 1024;
const READ_CHUNK_BYTES: usize = 4096;
const WRITE_TIMEOUT: Duration = Duration::from_millis(50);
const READER_THREAD_NAME: &str = "voxwire-reader";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        Ok((self.host.as_str(), self.port).to_socket_addrs()?.collect())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub primary: Endpoint,
    pub fallback: Option<Endpoint>,
    pub connect_timeout: Duration,
    pub channel_capacity: usize,
    pub max_pending_outbound_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            primary: Endpoint::new("127.0.0.1", DEFAULT_PORT),
            fallback: None,
            connect_timeout: Duration::from_secs(2),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_pending_outbound_bytes: DEFAULT_MAX_PENDING_OUTBOUND_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn reader thread: {0}")]
    SpawnReader(#[source] io::Error),
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
}

/// What the reader thread reports to the tick loop.
#[derive(Debug)]
pub enum InboundEvent {
    Connected { endpoint: Endpoint, writer: TcpStream },
    Frame(String),
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug)]
struct OutboundChunk {
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct OutboundChunkState {
    chunk: OutboundChunk,
    written: usize,
}

/// Frames waiting for the socket. Bounded by bytes; the oldest queued frame goes first.
#[derive(Debug)]
struct OutboundQueue {
    active_chunk: Option<OutboundChunkState>,
    queued_chunks: VecDeque<OutboundChunk>,
    queued_bytes: usize,
    byte_cap: usize,
}

impl OutboundQueue {
    fn new(byte_cap: usize) -> Self {
        Self {
            active_chunk: None,
            queued_chunks: VecDeque::new(),
            queued_bytes: 0,
            byte_cap,
        }
    }

    fn enqueue(&mut self, frame: &str) -> bool {
        let chunk = OutboundChunk {
            bytes: encode_frame(frame),
        };
        let chunk_bytes = chunk.bytes.len();
        if chunk_bytes > self.byte_cap {
            warn!(chunk_bytes, cap = self.byte_cap, "outbound_frame_over_cap_dropped");
            return false;
        }

        while self.queued_bytes.saturating_add(chunk_bytes) > self.byte_cap {
            let Some(evicted) = self.queued_chunks.pop_front() else {
                break;
            };
            self.queued_bytes = self.queued_bytes.saturating_sub(evicted.bytes.len());
            warn!(
                evicted_bytes = evicted.bytes.len(),
                queue_len = self.queued_chunks.len(),
                "outbound_oldest_frame_evicted"
            );
        }

        self.queued_bytes = self.queued_bytes.saturating_add(chunk_bytes);
        self.queued_chunks.push_back(chunk);
        if diag_enabled() {
            info!(
                frame = %frame,
                queue_len = self.queued_chunks.len(),
                queued_bytes = self.queued_bytes,
                "voxwire_diag_enqueued_frame"
            );
        }
        true
    }

    fn pending_bytes(&self) -> usize {
        let active_remaining = self
            .active_chunk
            .as_ref()
            .map(|state| state.chunk.bytes.len().saturating_sub(state.written))
            .unwrap_or(0);
        self.queued_bytes.saturating_add(active_remaining)
    }

    fn is_empty(&self) -> bool {
        self.active_chunk.is_none() && self.queued_chunks.is_empty()
    }
}

/// One persistent stream. A background thread connects and reads; everything else
/// (draining frames, writing) happens on the caller's thread.
pub struct FrameTransport {
    inbound: Receiver<InboundEvent>,
    writer: Option<TcpStream>,
    outbound: OutboundQueue,
    state: LinkState,
    close_reason: Option<String>,
}

impl FrameTransport {
    pub fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        let (sender, inbound) = bounded(config.channel_capacity.max(1));
        let max_pending_outbound_bytes = config.max_pending_outbound_bytes;
        thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || run_reader(config, sender))
            .map_err(TransportError::SpawnReader)?;

        Ok(Self {
            inbound,
            writer: None,
            outbound: OutboundQueue::new(max_pending_outbound_bytes),
            state: LinkState::Connecting,
            close_reason: None,
        })
    }

    /// Moves up to `max_frames` received frames into `out`. Connection events are handled
    /// as they are met and do not count against the limit. Returns the number of frames.
    pub fn poll_frames(&mut self, max_frames: usize, out: &mut Vec<String>) -> usize {
        let mut taken = 0usize;
        while taken < max_frames {
            match self.inbound.try_recv() {
                Ok(InboundEvent::Frame(frame)) => {
                    out.push(frame);
                    taken += 1;
                }
                Ok(InboundEvent::Connected { endpoint, writer }) => {
                    self.attach_writer(endpoint, writer);
                }
                Ok(InboundEvent::Disconnected { reason }) => {
                    self.mark_closed(&reason);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.state != LinkState::Closed {
                        self.mark_closed("reader_exited");
                    }
                    break;
                }
            }
        }
        taken
    }

    /// Queues `frame` (a NUL terminator is appended) and writes as much as the socket takes.
    pub fn send(&mut self, frame: &str) {
        self.outbound.enqueue(frame);
        self.flush();
    }

    pub fn flush(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = flush_pending_chunks(
            &mut self.outbound.active_chunk,
            &mut self.outbound.queued_chunks,
            &mut self.outbound.queued_bytes,
            |payload| writer.write(payload),
        );
        if let Err(err) = result {
            warn!(error = %err, "transport_write_failed");
            self.mark_closed(&err.to_string());
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Why the link closed, once it has.
    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    /// Frames and events received but not yet drained.
    pub fn backlog(&self) -> usize {
        self.inbound.len()
    }

    pub fn pending_outbound_bytes(&self) -> usize {
        self.outbound.pending_bytes()
    }

    pub fn outbound_idle(&self) -> bool {
        self.outbound.is_empty()
    }

    fn attach_writer(&mut self, endpoint: Endpoint, writer: TcpStream) {
        if let Err(err) = writer.set_nodelay(true) {
            warn!(error = %err, "transport_nodelay_failed");
        }
        if let Err(err) = writer.set_write_timeout(Some(WRITE_TIMEOUT)) {
            warn!(error = %err, "transport_write_timeout_failed");
        }
        info!(%endpoint, queued_bytes = self.outbound.pending_bytes(), "transport_connected");
        self.writer = Some(writer);
        self.state = LinkState::Connected;
        self.flush();
    }

    fn mark_closed(&mut self, reason: &str) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        if self.state != LinkState::Closed {
            warn!(reason, "transport_closed");
            self.close_reason = Some(reason.to_string());
        }
        self.state = LinkState::Closed;
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        // Unblocks the reader thread; it exits once its next send or read fails.
        if let Some(writer) = self.writer.take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
    }
}

fn run_reader(config: TransportConfig, sender: Sender<InboundEvent>) {
    let (stream, endpoint) = match connect_with_fallback(&config) {
        Ok(connected) => connected,
        Err(err) => {
            warn!(error = %err, "transport_connect_gave_up");
            let _ = sender.send(InboundEvent::Disconnected {
                reason: err.to_string(),
            });
            return;
        }
    };

    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(error = %err, "transport_clone_failed");
            let _ = sender.send(InboundEvent::Disconnected {
                reason: err.to_string(),
            });
            return;
        }
    };
    if sender
        .send(InboundEvent::Connected { endpoint, writer })
        .is_err()
    {
        return;
    }

    let reason = read_frames(stream, &sender);
    let _ = sender.send(InboundEvent::Disconnected { reason });
}

fn read_frames(mut stream: TcpStream, sender: &Sender<InboundEvent>) -> String {
    let mut assembler = FrameAssembler::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    let mut frames = Vec::new();
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return "closed_by_peer".to_string(),
            Ok(bytes_read) => {
                if let Err(err) = assembler.push(&chunk[..bytes_read], &mut frames) {
                    warn!(error = %err, "frame_oversized_dropped");
                }
                for frame in frames.drain(..) {
                    // Blocks while the tick loop is behind; frames are never dropped here.
                    if sender.send(InboundEvent::Frame(frame)).is_err() {
                        return "receiver_dropped".to_string();
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "transport_read_failed");
                return err.to_string();
            }
        }
    }
}

/// Tries the primary endpoint, then the fallback once.
fn connect_with_fallback(
    config: &TransportConfig,
) -> Result<(TcpStream, Endpoint), TransportError> {
    let primary_error = match connect_endpoint(&config.primary, config.connect_timeout) {
        Ok(stream) => return Ok((stream, config.primary.clone())),
        Err(err) => err,
    };
    let Some(fallback) = &config.fallback else {
        return Err(primary_error);
    };
    warn!(error = %primary_error, fallback = %fallback, "transport_trying_fallback");
    let stream = connect_endpoint(fallback, config.connect_timeout)?;
    Ok((stream, fallback.clone()))
}

fn connect_endpoint(
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let addrs = endpoint
        .resolve()
        .map_err(|source| TransportError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?;

    let mut last_error =
        io::Error::new(io::ErrorKind::AddrNotAvailable, "endpoint resolved to no addresses");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = err,
        }
    }
    Err(TransportError::Connect {
        endpoint: endpoint.clone(),
        source: last_error,
    })
}

fn flush_pending_chunks<F>(
    active_chunk: &mut Option<OutboundChunkState>,
    queued_chunks: &mut VecDeque<OutboundChunk>,
    queued_bytes: &mut usize,
    mut write_payload: F,
) -> io::Result<()>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    loop {
        if active_chunk.is_none() {
            let Some(chunk) = queued_chunks.pop_front() else {
                return Ok(());
            };
            *queued_bytes = queued_bytes.saturating_sub(chunk.bytes.len());
            *active_chunk = Some(OutboundChunkState { chunk, written: 0 });
        }
        let Some(state) = active_chunk.as_mut() else {
            return Ok(());
        };

        let remaining = &state.chunk.bytes[state.written..];
        match write_payload(remaining) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "voxwire_write_zero"));
            }
            Ok(bytes_written) => {
                state.written = state.written.saturating_add(bytes_written);
                if state.written >= state.chunk.bytes.len() {
                    *active_chunk = None;
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                if diag_enabled() {
                    info!(
                        written = state.written,
                        total = state.chunk.bytes.len(),
                        queued_len = queued_chunks.len(),
                        "voxwire_diag_flush_would_block"
                    );
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
}
