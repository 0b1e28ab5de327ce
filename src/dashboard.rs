use std::{fmt::Display, time::Duration};

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
#[cfg(test)]
use mock_instant::Instant;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use serde::Serialize;

#[cfg(not(test))]
use std::time::Instant;

use crate::{
    interpreter::interpret,
    line_source::{self, Endpoint, LineSource, SourceEvent, DEFAULT_STOP_TIMEOUT},
    protocol::Channel,
    recorder::Recorder,
    state::PanelState,
};

pub const DEFAULT_LOG_CAPACITY: usize = 5000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidEndpoint,
    SameEndpoint(String),
    AlreadyConnected,
    Source(line_source::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

impl From<line_source::Error> for Error {
    fn from(err: line_source::Error) -> Self {
        Self::Source(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogView {
    A,
    B,
    Combined,
}

impl LogView {
    fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::Combined => 2,
        }
    }
}

impl From<Channel> for LogView {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::A => Self::A,
            Channel::B => Self::B,
        }
    }
}

/// One entry of a log view. Notices from the dashboard itself carry no
/// channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub channel: Option<Channel>,
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl LogLine {
    pub fn new(channel: Option<Channel>, text: String) -> Self {
        Self {
            channel,
            timestamp: Local::now(),
            text,
        }
    }
}

impl Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let timestamp = self.timestamp.format("%H:%M:%S%.3f");
        match self.channel {
            Some(channel) => write!(f, "[{}] [{}] {}", timestamp, channel, self.text),
            None => write!(f, "[{}] {}", timestamp, self.text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub log_capacity: usize,
    pub queue_capacity: usize,
    pub stop_timeout: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub channel: Channel,
    pub silent_for_ms: u128,
    pub state: PanelState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub connected: bool,
    pub panels: Vec<PanelSnapshot>,
}

/// Two panels, three logs and the readers feeding them. All updates run
/// through `drive`/`process` on the owner's thread.
pub struct Dashboard {
    config: DashboardConfig,
    panels: [PanelState; 2],
    logs: [AllocRingBuffer<LogLine>; 3],
    sources: Vec<LineSource>,
    sender: Sender<SourceEvent>,
    receiver: Receiver<SourceEvent>,
    recorder: Option<Recorder>,
    start: Instant,
    last_heard: [Option<Instant>; 2],
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        let log_capacity = config.log_capacity.max(1);
        let (sender, receiver) = bounded::<SourceEvent>(config.queue_capacity.max(1));
        Self {
            config,
            panels: Default::default(),
            logs: [(); 3].map(|_| AllocRingBuffer::new(log_capacity)),
            sources: vec![],
            sender,
            receiver,
            recorder: None,
            start: Instant::now(),
            last_heard: [None, None],
        }
    }

    pub fn record_to(&mut self, recorder: Recorder) {
        self.recorder = Some(recorder);
    }

    pub fn is_connected(&self) -> bool {
        !self.sources.is_empty()
    }

    /// True when every reader has exited. Readers never reconnect on their
    /// own, so nothing more will arrive until the next `connect`.
    pub fn sources_finished(&self) -> bool {
        self.sources.iter().all(|source| source.is_finished())
    }

    pub fn connect(&mut self, a: impl Endpoint, b: impl Endpoint) -> Result<(), Error> {
        if self.is_connected() {
            self.notice("ERROR: already connected".into());
            return Err(Error::AlreadyConnected);
        }
        let (id_a, id_b) = (a.id(), b.id());
        if id_a.trim().is_empty() || id_b.trim().is_empty() {
            self.notice("ERROR: select valid ports".into());
            return Err(Error::InvalidEndpoint);
        }
        if id_a == id_b {
            self.notice("ERROR: A and B can't use the same port".into());
            return Err(Error::SameEndpoint(id_a));
        }
        info!("Connecting A to {} and B to {}", id_a, id_b);
        self.notice("=== Connecting... ===".into());
        self.sources
            .push(LineSource::spawn(Channel::A, a, self.sender.clone()));
        self.sources
            .push(LineSource::spawn(Channel::B, b, self.sender.clone()));
        Ok(())
    }

    /// Stops both readers. Does nothing when not connected.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        if !self.is_connected() {
            return Ok(());
        }
        self.notice("=== Disconnecting... ===".into());
        let mut result = Ok(());
        let timeout = self.config.stop_timeout;
        for mut source in self.sources.drain(..) {
            if let Err(err) = source.stop(timeout) {
                warn!("Stopping channel {} failed: {}", source.channel(), err);
                if result.is_ok() {
                    result = Err(err.into());
                }
            }
        }
        self.notice("=== DISCONNECTED ===".into());
        result
    }

    /// Waits up to `timeout` for the first queued event, then applies
    /// whatever else is already queued. Returns the number processed.
    pub fn drive(&mut self, timeout: Duration) -> usize {
        let first = match self.receiver.recv_timeout(timeout) {
            Ok(event) => event,
            Err(_) => return 0,
        };
        let pending: Vec<SourceEvent> = self
            .receiver
            .try_iter()
            .take(self.config.queue_capacity)
            .collect();
        let count = pending.len() + 1;
        self.process(first);
        for event in pending {
            self.process(event);
        }
        count
    }

    pub fn process(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Line(channel, text) => self.process_line(channel, text),
            SourceEvent::Status(channel, status) => {
                debug!("[{}] status {:?}", channel, status);
                self.append(LogView::Combined, LogLine::new(Some(channel), status.to_string()));
            }
        }
    }

    fn process_line(&mut self, channel: Channel, text: String) {
        self.last_heard[channel.index()] = Some(Instant::now());
        let events = interpret(channel, &text);
        let line = LogLine::new(Some(channel), text);
        self.logs[LogView::from(channel).index()].push(line.clone());
        self.append(LogView::Combined, line);
        self.panels[channel.index()].apply(&events);
    }

    fn notice(&mut self, text: String) {
        self.append(LogView::Combined, LogLine::new(None, text));
    }

    fn append(&mut self, view: LogView, line: LogLine) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.store(&line.to_string());
        }
        self.logs[view.index()].push(line);
    }

    pub fn panel(&self, channel: Channel) -> &PanelState {
        &self.panels[channel.index()]
    }

    pub fn log(&self, view: LogView) -> Vec<&LogLine> {
        self.logs[view.index()].iter().collect()
    }

    pub fn clear_logs(&mut self) {
        for log in self.logs.iter_mut() {
            log.clear();
        }
    }

    /// Time since the last line on `channel`, or since start if none
    /// arrived yet.
    pub fn heard_from_since(&self, channel: Channel) -> Duration {
        let since = self.last_heard[channel.index()].unwrap_or(self.start);
        Instant::now().duration_since(since)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connected: self.is_connected(),
            panels: Channel::ALL
                .iter()
                .map(|channel| PanelSnapshot {
                    channel: *channel,
                    silent_for_ms: self.heard_from_since(*channel).as_millis(),
                    state: self.panel(*channel).clone(),
                })
                .collect(),
        }
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use mock_instant::MockClock;

    use super::*;
    use crate::line_source::{
        tests::{FailingEndpoint, IdleEndpoint, ScriptedEndpoint},
        ConnectionStatus,
    };
    use crate::protocol::{LightState, SyncStatus};

    fn scripted(id: &str, data: &str) -> ScriptedEndpoint {
        ScriptedEndpoint {
            id: id.into(),
            data: data.as_bytes().to_vec(),
        }
    }

    fn idle(id: &str) -> IdleEndpoint {
        IdleEndpoint {
            id: id.into(),
            pause: Duration::from_millis(10),
        }
    }

    fn run_to_end(dashboard: &mut Dashboard) {
        for _ in 0..500 {
            let finished = dashboard.sources_finished();
            dashboard.drive(Duration::from_millis(10));
            if finished {
                // one more pass for anything sent right before exit
                while dashboard.drive(Duration::from_millis(10)) > 0 {}
                return;
            }
        }
        panic!("sources did not finish");
    }

    fn texts(dashboard: &Dashboard, view: LogView) -> Vec<String> {
        dashboard
            .log(view)
            .iter()
            .map(|line| line.text.clone())
            .collect()
    }

    #[test]
    fn test_lines_reach_their_panel() {
        let mut dashboard = Dashboard::default();
        dashboard
            .connect(
                scripted(
                    "/dev/ttyUSB0",
                    "1,100,1,45,1,0\nTX: estado=3, request=1, dist=12\ngarbage,,not,a,csv\n",
                ),
                scripted(
                    "/dev/ttyUSB1",
                    "RX de ESP 1: estado=3, request=1, dist=30\nPeer MAC: AA:BB:CC:DD:EE:FF\n",
                ),
            )
            .expect("connect");
        run_to_end(&mut dashboard);

        let a = dashboard.panel(Channel::A);
        assert_eq!(a.light, LightState::Red);
        assert_eq!(a.distance_cm, Some(12));
        assert!(a.local_request);
        assert_eq!(a.tx_count, 1);

        let b = dashboard.panel(Channel::B);
        assert_eq!(b.distance_cm, None);
        assert_eq!(b.remote_light, LightState::Red);
        assert!(b.remote_request);
        assert_eq!(b.rx_count, 1);
        assert_eq!(b.sync, SyncStatus::PeerMac("AA:BB:CC:DD:EE:FF".into()));

        assert_eq!(
            texts(&dashboard, LogView::A),
            vec![
                "1,100,1,45,1,0",
                "TX: estado=3, request=1, dist=12",
                "garbage,,not,a,csv"
            ]
        );
        assert_eq!(texts(&dashboard, LogView::B).len(), 2);
        let combined = texts(&dashboard, LogView::Combined);
        assert!(combined.contains(&"garbage,,not,a,csv".to_string()));
        assert!(combined.contains(&ConnectionStatus::Closed.to_string()));
        // 1 notice + 2x(connecting, connected, closed) + 5 lines
        assert_eq!(combined.len(), 12);
    }

    #[test]
    fn test_same_endpoint_is_rejected() {
        let mut dashboard = Dashboard::default();
        assert_eq!(
            dashboard.connect(idle("COM3"), idle("COM3")),
            Err(Error::SameEndpoint("COM3".into()))
        );
        assert!(!dashboard.is_connected());
        assert_eq!(dashboard.log(LogView::Combined).len(), 1);
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        let mut dashboard = Dashboard::default();
        assert_eq!(
            dashboard.connect(idle(""), idle("COM4")),
            Err(Error::InvalidEndpoint)
        );
        assert!(!dashboard.is_connected());
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let mut dashboard = Dashboard::default();
        dashboard.connect(idle("a"), idle("b")).expect("connect");
        assert_eq!(
            dashboard.connect(idle("c"), idle("d")),
            Err(Error::AlreadyConnected)
        );
        assert_eq!(dashboard.disconnect(), Ok(()));
        assert!(!dashboard.is_connected());
    }

    #[test]
    fn test_disconnect_when_not_connected_is_a_noop() {
        let mut dashboard = Dashboard::default();
        assert_eq!(dashboard.disconnect(), Ok(()));
        assert!(dashboard.log(LogView::Combined).is_empty());
    }

    #[test]
    fn test_failure_on_one_channel_leaves_the_other_alone() {
        let mut dashboard = Dashboard::default();
        dashboard
            .connect(FailingEndpoint, scripted("b", "-> VERDE\n"))
            .expect("connect");
        run_to_end(&mut dashboard);
        assert_eq!(dashboard.panel(Channel::B).light, LightState::Green);
        assert_eq!(*dashboard.panel(Channel::A), PanelState::default());
        assert!(dashboard
            .log(LogView::Combined)
            .iter()
            .any(|line| line.channel == Some(Channel::A) && line.text.starts_with("Error")));
    }

    #[test]
    fn test_counters_survive_reconnect() {
        let mut dashboard = Dashboard::default();
        let tx = "TX: estado=1, request=0, dist=50\n";
        dashboard
            .connect(scripted("a", tx), scripted("b", ""))
            .expect("connect");
        run_to_end(&mut dashboard);
        dashboard.disconnect().expect("disconnect");
        dashboard
            .connect(scripted("a", tx), scripted("b", ""))
            .expect("reconnect");
        run_to_end(&mut dashboard);
        assert_eq!(dashboard.panel(Channel::A).tx_count, 2);
    }

    #[test]
    fn test_clear_logs() {
        let mut dashboard = Dashboard::default();
        dashboard.process(SourceEvent::Line(Channel::A, "-> ROJO".into()));
        assert_eq!(dashboard.log(LogView::A).len(), 1);
        dashboard.clear_logs();
        assert!(dashboard.log(LogView::A).is_empty());
        assert!(dashboard.log(LogView::Combined).is_empty());
        assert_eq!(dashboard.panel(Channel::A).light, LightState::Red);
    }

    #[test]
    fn test_log_capacity_is_bounded() {
        let mut dashboard = Dashboard::new(DashboardConfig {
            log_capacity: 2,
            ..Default::default()
        });
        for line in ["one", "two", "three"] {
            dashboard.process(SourceEvent::Line(Channel::B, line.into()));
        }
        assert_eq!(texts(&dashboard, LogView::B), vec!["two", "three"]);
    }

    #[test]
    fn test_heard_from_since() {
        let mut dashboard = Dashboard::default();
        MockClock::advance(Duration::from_secs(3));
        assert!(dashboard.heard_from_since(Channel::A) >= Duration::from_secs(3));
        dashboard.process(SourceEvent::Line(Channel::A, "-> VERDE".into()));
        MockClock::advance(Duration::from_secs(5));
        assert!(dashboard.heard_from_since(Channel::A) >= Duration::from_secs(5));
        assert!(dashboard.heard_from_since(Channel::B) >= Duration::from_secs(8));
    }

    #[test]
    fn test_log_line_format() {
        let line = LogLine::new(Some(Channel::B), "dist=5".into());
        let text = line.to_string();
        assert!(text.ends_with("] [B] dist=5"));
        assert_eq!(&text[0..1], "[");
        assert_eq!(&text[13..15], "] ");
        let notice = LogLine::new(None, "=== DISCONNECTED ===".into());
        assert!(notice.to_string().ends_with("] === DISCONNECTED ==="));
    }

    #[test]
    fn test_snapshot_serialises() {
        let mut dashboard = Dashboard::default();
        dashboard.process(SourceEvent::Line(Channel::A, "TX: estado=2, request=0, dist=7".into()));
        let json = serde_json::to_string(&dashboard.snapshot()).expect("json");
        assert!(json.contains("\"light\":\"Yellow\""));
        assert!(json.contains("\"distance_cm\":7"));
        assert!(json.contains("\"connected\":false"));
    }
}
