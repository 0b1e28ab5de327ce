use std::{
    fmt::Display,
    io::{ErrorKind, Read},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, error, info, warn};
use serialport::ClearBuffer;

use crate::protocol::Channel;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// Longest line we buffer while waiting for a newline.
pub const MAX_LINE_LENGTH: usize = 4096;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const SEND_POLL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Open(String),
    Io(String),
    LineTooLong(usize),
    StopTimedOut(Channel),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting(String),
    Connected(String),
    Failed(String),
    /// The stream ended on its own.
    Closed,
    /// The reader exited because it was asked to stop.
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Failed(_) | Self::Closed | Self::Disconnected => true,
            _ => false,
        }
    }
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting(endpoint) => write!(f, "Connecting to {}...", endpoint),
            Self::Connected(endpoint) => write!(f, "Connected to {}", endpoint),
            Self::Failed(reason) => write!(f, "Error: {}", reason),
            Self::Closed => write!(f, "Connection closed"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Line(Channel, String),
    Status(Channel, ConnectionStatus),
}

impl SourceEvent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Line(channel, _) => *channel,
            Self::Status(channel, _) => *channel,
        }
    }
}

/// Something a line source can read from. The id decides whether two
/// endpoints are the same device.
pub trait Endpoint: Send + 'static {
    fn id(&self) -> String;

    fn describe(&self) -> String {
        self.id()
    }

    fn open(&self) -> Result<Box<dyn Read + Send>, Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerialEndpoint {
    pub path: String,
    pub baud_rate: u32,
}

impl SerialEndpoint {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
        }
    }
}

impl Endpoint for SerialEndpoint {
    fn id(&self) -> String {
        self.path.clone()
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }

    fn open(&self) -> Result<Box<dyn Read + Send>, Error> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|err| Error::Open(format!("{}: {}", self.path, err)))?;
        port.clear(ClearBuffer::All)
            .map_err(|err| Error::Io(err.to_string()))?;
        Ok(Box::new(port))
    }
}

pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(err) => {
            warn!("Can't enumerate serial ports: {}", err);
            vec![]
        }
    }
}

/// Drops invalid UTF-8 sequences instead of replacing them.
pub fn decode_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(err) => {
                let (valid, rest) = bytes.split_at(err.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                // error_len is None for a sequence cut off at the end
                let skip = err.error_len().unwrap_or(rest.len());
                bytes = &rest[skip..];
            }
        }
    }
}

/// Cuts a byte stream into trimmed, non-empty text lines. `process`
/// returns false to abandon the rest of `data`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    overflowed: bool,
}

impl LineSplitter {
    pub fn feed(&mut self, data: &[u8], mut process: impl FnMut(String) -> bool) -> Result<(), Error> {
        let mut result = Ok(());
        for c in data {
            if *c == b'\n' {
                if self.overflowed {
                    // tail of a discarded line
                    self.overflowed = false;
                    continue;
                }
                let line = decode_dropping_invalid(&self.buffer);
                self.buffer.clear();
                let line = line.trim();
                if !line.is_empty() && !process(line.to_string()) {
                    break;
                }
            } else if self.overflowed {
                continue;
            } else if self.buffer.len() >= MAX_LINE_LENGTH {
                self.buffer.clear();
                self.overflowed = true;
                if result.is_ok() {
                    result = Err(Error::LineTooLong(MAX_LINE_LENGTH));
                }
            } else {
                self.buffer.push(*c);
            }
        }
        result
    }
}

struct Outbox {
    channel: Channel,
    sender: Sender<SourceEvent>,
    running: Arc<Mutex<bool>>,
}

impl Outbox {
    fn send(&self, mut event: SourceEvent) -> bool {
        loop {
            match self.sender.send_timeout(event, SEND_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if !is_running(&self.running) {
                        return false;
                    }
                    event = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn line(&self, line: String) -> bool {
        self.send(SourceEvent::Line(self.channel, line))
    }

    fn status(&self, status: ConnectionStatus) -> bool {
        self.send(SourceEvent::Status(self.channel, status))
    }
}

fn is_running(running: &Arc<Mutex<bool>>) -> bool {
    running.lock().map(|r| *r).unwrap_or(false)
}

fn work(endpoint: impl Endpoint, outbox: Outbox) {
    let channel = outbox.channel;
    outbox.status(ConnectionStatus::Connecting(endpoint.describe()));
    let mut reader = match endpoint.open() {
        Ok(reader) => reader,
        Err(err) => {
            error!("[{}] Can't open {}: {}", channel, endpoint.id(), err);
            outbox.status(ConnectionStatus::Failed(err.to_string()));
            return;
        }
    };
    info!("[{}] Connected to {}", channel, endpoint.describe());
    outbox.status(ConnectionStatus::Connected(endpoint.describe()));

    let mut splitter = LineSplitter::default();
    let mut buffer = [0; READ_CHUNK];
    loop {
        if !is_running(&outbox.running) {
            info!("[{}] Disconnecting from {}", channel, endpoint.id());
            outbox.status(ConnectionStatus::Disconnected);
            break;
        }
        match reader.read(&mut buffer) {
            Ok(0) => {
                info!("[{}] {} closed", channel, endpoint.id());
                outbox.status(ConnectionStatus::Closed);
                break;
            }
            Ok(num) => {
                let mut delivered = true;
                if let Err(err) = splitter.feed(&buffer[0..num], |line| {
                    delivered = outbox.line(line);
                    delivered
                }) {
                    warn!("[{}] Discarded input: {}", channel, err);
                }
                if !delivered {
                    info!("[{}] Stopped mid-read on {}", channel, endpoint.id());
                    outbox.status(ConnectionStatus::Disconnected);
                    break;
                }
            }
            Err(err) => match err.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {}
                _ => {
                    error!("[{}] Read from {} failed: {}", channel, endpoint.id(), err);
                    outbox.status(ConnectionStatus::Failed(Error::Io(err.to_string()).to_string()));
                    break;
                }
            },
        }
    }
    debug!("[{}] reader exits", channel);
}

/// A background reader for one channel. Lines and status changes go to
/// the shared queue handed to `spawn`.
pub struct LineSource {
    channel: Channel,
    worker: Option<JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
    finished: Receiver<()>,
}

impl LineSource {
    pub fn spawn(channel: Channel, endpoint: impl Endpoint, sender: Sender<SourceEvent>) -> Self {
        let running = Arc::new(Mutex::new(true));
        let (done, finished) = bounded::<()>(1);
        let outbox = Outbox {
            channel,
            sender,
            running: running.clone(),
        };
        let handle = thread::spawn(move || {
            work(endpoint, outbox);
            drop(done);
        });
        Self {
            channel,
            worker: Some(handle),
            running,
            finished,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// True once the reader has exited, for whatever reason.
    pub fn is_finished(&self) -> bool {
        match self.finished.try_recv() {
            Err(crossbeam_channel::TryRecvError::Empty) => false,
            _ => true,
        }
    }

    /// Asks the reader to exit after its current read and waits up to
    /// `timeout` for it. On timeout the thread is left to finish alone.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), Error> {
        if let Ok(mut running) = self.running.lock() {
            *running = false;
        }
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(()),
        };
        match self.finished.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("[{}] Reader did not stop within {:?}", self.channel, timeout);
                Err(Error::StopTimedOut(self.channel))
            }
            _ => {
                if worker.join().is_err() {
                    error!("[{}] Reader thread panicked", self.channel);
                }
                Ok(())
            }
        }
    }
}

impl Drop for LineSource {
    fn drop(&mut self) {
        let _ = self.stop(DEFAULT_STOP_TIMEOUT);
    }
}
