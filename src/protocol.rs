use std::fmt::Display;

use serde::Serialize;

/// One of the two serial sources, each attached to one arm of the
/// intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    pub fn index(&self) -> usize {
        match self {
            Channel::A => 0,
            Channel::B => 1,
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::A => write!(f, "A"),
            Channel::B => write!(f, "B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LightState {
    AllRed,
    Green,
    Yellow,
    Red,
    Unknown,
}

impl Default for LightState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl LightState {
    /// Maps the state digit the firmware reports, as printed. `"01"` is
    /// not a light state.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::AllRed),
            "1" => Some(Self::Green),
            "2" => Some(Self::Yellow),
            "3" => Some(Self::Red),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::AllRed => "ALL RED",
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
            Self::Unknown => "---",
        }
    }

    /// Lamp pattern as (red, yellow, green).
    pub fn lamps(&self) -> (bool, bool, bool) {
        match self {
            Self::AllRed | Self::Red => (true, false, false),
            Self::Yellow => (false, true, false),
            Self::Green => (false, false, true),
            Self::Unknown => (false, false, false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Unknown,
    Ok,
    NoSync,
    PeerOk,
    InitOk,
    TxError,
    PeerMac(String),
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl SyncStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            Self::Ok | Self::PeerOk | Self::InitOk | Self::PeerMac(_) => true,
            _ => false,
        }
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "---"),
            Self::Ok => write!(f, "OK"),
            Self::NoSync => write!(f, "NO SYNC"),
            Self::PeerOk => write!(f, "PEER OK"),
            Self::InitOk => write!(f, "INIT OK"),
            Self::TxError => write!(f, "TX ERROR (status=1)"),
            Self::PeerMac(mac) => write!(f, "{}", mac),
        }
    }
}
