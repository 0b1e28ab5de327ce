use serde::Serialize;

use crate::interpreter::Event;
use crate::protocol::{LightState, SyncStatus};

/// Consecutive transmit failures needed before the panel shows a TX error.
/// A single lost ESP-NOW frame is common and not worth flagging.
pub const TX_ERROR_THRESHOLD: u32 = 3;

/// Upper end of the distance bar, the sensor range in cm.
pub const DISTANCE_BAR_RANGE: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Priority {
    None,
    Local,
    Remote,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Proximity {
    Unknown,
    Near,
    Close,
    Far,
}

/// Everything shown for one side of the intersection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PanelState {
    pub light: LightState,
    pub remote_light: LightState,
    pub distance_cm: Option<u32>,
    pub vehicle_present: bool,
    pub local_request: bool,
    pub remote_request: bool,
    pub sync: SyncStatus,
    pub tx_count: u64,
    pub rx_count: u64,
    pub consecutive_tx_errors: u32,
    pub last_tx: Option<String>,
}

impl PanelState {
    /// Applies one line's events in order. Later events win.
    pub fn apply(&mut self, events: &[Event]) {
        for event in events {
            self.apply_event(event);
        }
    }

    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::LightChanged(light) => self.light = *light,
            Event::RemoteLightChanged(light) => self.remote_light = *light,
            Event::DistanceChanged(distance) => self.distance_cm = Some(*distance),
            Event::VehicleChanged(present) => self.vehicle_present = *present,
            Event::PriorityChanged { local, remote } => {
                self.local_request = *local;
                self.remote_request = *remote;
            }
            Event::TxCounted => self.tx_count += 1,
            Event::RxCounted => self.rx_count += 1,
            Event::LastTxInfo(info) => self.last_tx = Some(info.clone()),
            Event::SyncOk => self.clear_tx_errors(),
            Event::SyncChanged(status) => self.sync = status.clone(),
            Event::TxError => self.register_tx_error(),
        }
    }

    fn clear_tx_errors(&mut self) {
        self.consecutive_tx_errors = 0;
        if self.sync == SyncStatus::TxError {
            self.sync = SyncStatus::Ok;
        }
    }

    fn register_tx_error(&mut self) {
        self.consecutive_tx_errors += 1;
        if self.consecutive_tx_errors >= TX_ERROR_THRESHOLD {
            self.sync = SyncStatus::TxError;
        }
    }

    pub fn priority(&self) -> Priority {
        match (self.local_request, self.remote_request) {
            (true, true) => Priority::Conflict,
            (true, false) => Priority::Local,
            (false, true) => Priority::Remote,
            (false, false) => Priority::None,
        }
    }

    pub fn proximity(&self) -> Proximity {
        match self.distance_cm {
            None => Proximity::Unknown,
            Some(d) if d < 50 => Proximity::Near,
            Some(d) if d < 100 => Proximity::Close,
            Some(_) => Proximity::Far,
        }
    }

    /// Fill level of the distance bar, fuller when closer.
    pub fn distance_bar(&self) -> u32 {
        self.distance_cm
            .map(|d| DISTANCE_BAR_RANGE - d.min(DISTANCE_BAR_RANGE))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::interpret;
    use crate::protocol::Channel;

    fn feed(panel: &mut PanelState, line: &str) {
        panel.apply(&interpret(Channel::A, line));
    }

    #[test]
    fn test_defaults() {
        let panel = PanelState::default();
        assert_eq!(panel.light, LightState::Unknown);
        assert_eq!(panel.remote_light, LightState::Unknown);
        assert_eq!(panel.distance_cm, None);
        assert_eq!(panel.sync, SyncStatus::Unknown);
        assert_eq!(panel.priority(), Priority::None);
        assert_eq!(panel.proximity(), Proximity::Unknown);
    }

    #[test]
    fn test_tx_line() {
        let mut panel = PanelState::default();
        feed(&mut panel, "TX: estado=3, request=1, dist=12");
        assert_eq!(panel.light, LightState::Red);
        assert!(panel.local_request);
        assert_eq!(panel.distance_cm, Some(12));
        assert_eq!(panel.tx_count, 1);
        assert_eq!(panel.last_tx.as_deref(), Some("estado=3, req=1"));
        feed(&mut panel, "TX: estado=1, request=0, dist=300");
        assert_eq!(panel.tx_count, 2);
        assert_eq!(panel.light, LightState::Green);
    }

    #[test]
    fn test_rx_line_keeps_local_distance() {
        let mut panel = PanelState::default();
        feed(&mut panel, "1,2,1,45,1,0");
        feed(&mut panel, "RX de ESP 2: estado=1, request=0, dist=30");
        assert_eq!(panel.distance_cm, Some(45));
        assert_eq!(panel.remote_light, LightState::Green);
        assert_eq!(panel.rx_count, 1);
    }

    #[test]
    fn test_tx_errors_are_debounced() {
        let mut panel = PanelState::default();
        feed(&mut panel, "Peer añadido correctamente");
        feed(&mut panel, "Error TX ESP-NOW");
        feed(&mut panel, "Error TX ESP-NOW");
        assert_eq!(panel.sync, SyncStatus::PeerOk);
        assert_eq!(panel.consecutive_tx_errors, 2);
        feed(&mut panel, "Error TX ESP-NOW");
        assert_eq!(panel.sync, SyncStatus::TxError);
        feed(&mut panel, "Callback: Error");
        assert_eq!(panel.sync, SyncStatus::TxError);
        feed(&mut panel, "3,4,2,80,1,0");
        assert_eq!(panel.sync, SyncStatus::Ok);
        assert!(panel.sync.is_healthy());
        assert_eq!(panel.consecutive_tx_errors, 0);
    }

    #[test]
    fn test_healthy_line_interrupts_error_run() {
        let mut panel = PanelState::default();
        feed(&mut panel, "Error TX ESP-NOW");
        feed(&mut panel, "Error TX ESP-NOW");
        feed(&mut panel, "-> VERDE");
        feed(&mut panel, "Error TX ESP-NOW");
        assert_eq!(panel.consecutive_tx_errors, 1);
        assert_eq!(panel.sync, SyncStatus::Unknown);
    }

    #[test]
    fn test_sync_ok_keeps_other_sync_states() {
        let mut panel = PanelState::default();
        feed(&mut panel, "SIN SYNC");
        feed(&mut panel, "-> ROJO");
        assert_eq!(panel.sync, SyncStatus::NoSync);
    }

    #[test]
    fn test_peer_mac() {
        let mut panel = PanelState::default();
        feed(&mut panel, "Peer MAC: AA:BB:CC:DD:EE:FF");
        assert_eq!(panel.sync, SyncStatus::PeerMac("AA:BB:CC:DD:EE:FF".into()));
    }

    #[test]
    fn test_garbage_leaves_state_alone() {
        let mut panel = PanelState::default();
        feed(&mut panel, "1,2,3,10,1,1");
        let before = panel.clone();
        feed(&mut panel, "garbage,,not,a,csv");
        assert_eq!(panel, before);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let lines = [
            "5,100,1,60,1,1",
            "TX: estado=2, request=0, dist=70",
            "RX de ESP 1: estado=3, request=1, dist=10",
            "Error TX ESP-NOW",
        ];
        let mut first = PanelState::default();
        let mut second = PanelState::default();
        for line in lines {
            feed(&mut first, line);
        }
        for line in lines {
            feed(&mut second, line);
        }
        assert_eq!(first, second);
        assert_eq!(first.light, LightState::Yellow);
        assert_eq!(first.remote_light, LightState::Red);
        assert_eq!(first.priority(), Priority::Remote);
        assert_eq!(first.distance_cm, Some(70));
    }

    #[test]
    fn test_priority_and_proximity() {
        let mut panel = PanelState::default();
        panel.apply(&[
            Event::PriorityChanged {
                local: true,
                remote: true,
            },
            Event::DistanceChanged(30),
        ]);
        assert_eq!(panel.priority(), Priority::Conflict);
        assert_eq!(panel.proximity(), Proximity::Near);
        assert_eq!(panel.distance_bar(), 370);
        panel.apply_event(&Event::DistanceChanged(75));
        assert_eq!(panel.proximity(), Proximity::Close);
        panel.apply_event(&Event::DistanceChanged(900));
        assert_eq!(panel.proximity(), Proximity::Far);
        assert_eq!(panel.distance_bar(), 0);
    }
}
