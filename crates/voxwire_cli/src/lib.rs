use std::fs;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use voxwire::net::{encode_frame, FrameAssembler};
use voxwire::protocol::build_request;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = voxwire::net::DEFAULT_PORT;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MS: u64 = 100;
pub const DEFAULT_QUIET_MS: u64 = 250;
const MAX_RETRY_BACKOFF_MS: u64 = 1_000;
const READ_POLL_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonOptions {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub retry_ms: u64,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Send { action: String, items: String },
    Script { path: String },
    Mirror,
}

/// How a received frame reads to a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Response { ok: bool },
    Action(String),
    Other,
}

pub fn classify_frame(frame: &str) -> FrameKind {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(frame) else {
        return FrameKind::Other;
    };
    if let Some(action) = fields.get("action").and_then(Value::as_str) {
        return FrameKind::Action(action.to_string());
    }
    match fields.get("ok").and_then(Value::as_bool) {
        Some(ok) => FrameKind::Response { ok },
        None => FrameKind::Other,
    }
}

pub fn parse_script_commands(content: &str) -> Vec<String> {
    let mut commands = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        commands.push(trimmed.to_string());
    }
    commands
}

/// Turns one script line into a frame. A line is either a complete JSON envelope or
/// `<action> <items-json>`.
pub fn script_line_to_frame(line: &str) -> Result<String, String> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(_)) => Ok(trimmed.to_string()),
            Ok(_) => Err(format!("frame is not a JSON object: {trimmed}")),
            Err(error) => Err(format!("invalid JSON frame '{trimmed}': {error}")),
        };
    }
    let (action, items) = match trimmed.split_once(char::is_whitespace) {
        Some((action, items)) => (action, items.trim()),
        None => (trimmed, ""),
    };
    request_frame(action, items)
}

pub fn request_frame(action: &str, items: &str) -> Result<String, String> {
    if action.is_empty() {
        return Err("missing action".to_string());
    }
    let items = if items.is_empty() {
        Value::Array(Vec::new())
    } else {
        serde_json::from_str::<Value>(items)
            .map_err(|error| format!("invalid items JSON for '{action}': {error}"))?
    };
    Ok(build_request(action, items))
}

pub fn run<W: Write>(kind: CommandKind, opts: CommonOptions, stdout: &mut W) -> Result<(), String> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let quiet_window = Duration::from_millis(DEFAULT_QUIET_MS);

    match kind {
        CommandKind::Send { action, items } => {
            let frame = request_frame(&action, &items)?;
            let mut session = connect_with_retry(&opts)?;
            session.send(&frame)?;
            session.read_until_quiet(timeout, quiet_window, |frame| emit_frame(stdout, frame))
        }
        CommandKind::Script { path } => {
            let content = fs::read_to_string(&path)
                .map_err(|error| format!("failed to read script file '{path}': {error}"))?;
            let frames = parse_script_commands(&content)
                .iter()
                .enumerate()
                .map(|(index, line)| {
                    script_line_to_frame(line)
                        .map_err(|error| format!("script line {}: {error}", index + 1))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut session = connect_with_retry(&opts)?;
            for frame in frames {
                session.send(&frame)?;
                session.read_until_quiet(timeout, quiet_window, |frame| {
                    emit_frame(stdout, frame)
                })?;
            }
            Ok(())
        }
        CommandKind::Mirror => {
            let listener = TcpListener::bind((opts.host.as_str(), opts.port))
                .map_err(|error| format!("failed to bind {}:{}: {error}", opts.host, opts.port))?;
            let local = listener
                .local_addr()
                .map_err(|error| format!("failed to read listener address: {error}"))?;
            let _ = writeln!(stdout, "voxwire.mirror listening on {local}");
            serve_mirror(&listener, stdout)
        }
    }
}

/// Accepts one peer, prints every frame it sends and echoes back the ones that are not
/// responses. Returns once the peer disconnects.
pub fn serve_mirror<W: Write>(listener: &TcpListener, stdout: &mut W) -> Result<(), String> {
    let (stream, peer) = listener
        .accept()
        .map_err(|error| format!("failed to accept peer: {error}"))?;
    let _ = writeln!(stdout, "voxwire.mirror peer connected {peer}");
    let mut session = Session::new(stream)?;

    let mut echo = Vec::new();
    loop {
        let outcome = session.read_frames(|frame| {
            emit_frame(stdout, frame);
            if !matches!(classify_frame(frame), FrameKind::Response { .. }) {
                echo.push(frame.to_string());
            }
        });
        for frame in echo.drain(..) {
            session.send(&frame)?;
        }
        match outcome {
            ReadOutcome::Frames | ReadOutcome::NoData => {}
            ReadOutcome::Disconnected => {
                let _ = writeln!(stdout, "voxwire.mirror peer disconnected");
                return Ok(());
            }
            ReadOutcome::IoError(error) => {
                return Err(format!("socket read error while mirroring: {error}"));
            }
        }
    }
}

struct Session {
    stream: TcpStream,
    assembler: FrameAssembler,
}

impl Session {
    fn new(stream: TcpStream) -> Result<Self, String> {
        stream
            .set_read_timeout(Some(Duration::from_millis(READ_POLL_MS)))
            .map_err(|error| format!("failed to set socket read timeout: {error}"))?;
        Ok(Self {
            stream,
            assembler: FrameAssembler::new(),
        })
    }

    fn send(&mut self, frame: &str) -> Result<(), String> {
        self.stream
            .write_all(&encode_frame(frame))
            .map_err(|error| format!("failed to send frame: {error}"))?;
        self.stream
            .flush()
            .map_err(|error| format!("failed to flush frame: {error}"))
    }

    fn read_frames<F>(&mut self, mut on_frame: F) -> ReadOutcome
    where
        F: FnMut(&str),
    {
        let mut chunk = [0u8; 4096];
        match self.stream.read(&mut chunk) {
            Ok(0) => ReadOutcome::Disconnected,
            Ok(bytes_read) => {
                let mut frames = Vec::new();
                if let Err(error) = self.assembler.push(&chunk[..bytes_read], &mut frames) {
                    return ReadOutcome::IoError(io::Error::new(io::ErrorKind::InvalidData, error));
                }
                for frame in &frames {
                    on_frame(frame);
                }
                if frames.is_empty() {
                    ReadOutcome::NoData
                } else {
                    ReadOutcome::Frames
                }
            }
            Err(error)
                if error.kind() == io::ErrorKind::WouldBlock
                    || error.kind() == io::ErrorKind::TimedOut
                    || error.kind() == io::ErrorKind::Interrupted =>
            {
                ReadOutcome::NoData
            }
            Err(error) => ReadOutcome::IoError(error),
        }
    }

    fn read_until_quiet<F>(
        &mut self,
        timeout: Duration,
        quiet_window: Duration,
        mut on_frame: F,
    ) -> Result<(), String>
    where
        F: FnMut(&str),
    {
        let deadline = Instant::now() + timeout;
        let mut last_frame_at = Instant::now();
        let mut saw_any_frame = false;

        while Instant::now() < deadline {
            match self.read_frames(&mut on_frame) {
                ReadOutcome::Frames => {
                    saw_any_frame = true;
                    last_frame_at = Instant::now();
                }
                ReadOutcome::NoData => {
                    let now = Instant::now();
                    if (saw_any_frame
                        && now.saturating_duration_since(last_frame_at) >= quiet_window)
                        || (!saw_any_frame && now + quiet_window >= deadline)
                    {
                        return Ok(());
                    }
                }
                ReadOutcome::Disconnected => {
                    return if saw_any_frame {
                        Ok(())
                    } else {
                        Err("socket disconnected before any response".to_string())
                    };
                }
                ReadOutcome::IoError(error) => {
                    return Err(format!("socket read error while waiting for responses: {error}"));
                }
            }
        }
        Ok(())
    }
}

enum ReadOutcome {
    Frames,
    NoData,
    Disconnected,
    IoError(io::Error),
}

fn connect_with_retry(opts: &CommonOptions) -> Result<Session, String> {
    let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms);
    let retry_base = Duration::from_millis(opts.retry_ms.max(1));
    let mut attempt = 0u32;

    while Instant::now() < deadline {
        if let Ok(stream) = TcpStream::connect((opts.host.as_str(), opts.port)) {
            return Session::new(stream);
        }

        let shift = attempt.min(8);
        let backoff_ms = (retry_base.as_millis() as u64)
            .saturating_mul(1u64 << shift)
            .min(MAX_RETRY_BACKOFF_MS);
        let sleep_for = Duration::from_millis(backoff_ms.max(1));
        if Instant::now() + sleep_for >= deadline {
            break;
        }
        thread::sleep(sleep_for);
        attempt = attempt.saturating_add(1);
    }

    Err(format!(
        "timed out connecting to {}:{}",
        opts.host, opts.port
    ))
}

fn emit_frame<W: Write>(stdout: &mut W, frame: &str) {
    let _ = writeln!(stdout, "{frame}");
}
