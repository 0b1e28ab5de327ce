//! Turns one status line from a traffic light controller into the list of
//! panel updates it implies.
//!
//! The firmware does not speak a single grammar. It prints CSV records,
//! free-text transition markers and `key=value` telemetry, often mixed on
//! the same line. Recognition is therefore a list of independent rules,
//! each scanning the raw line on its own. Only the CSV record is exclusive.
use log::trace;
use nom::{
    bytes::complete::{tag, tag_no_case, take_while, take_while_m_n},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, recognize},
    multi::count,
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::protocol::{Channel, LightState, SyncStatus};

/// Distance below which the fallback distance rule reports a vehicle.
pub const VEHICLE_DISTANCE_CM: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    LightChanged(LightState),
    RemoteLightChanged(LightState),
    DistanceChanged(u32),
    VehicleChanged(bool),
    PriorityChanged { local: bool, remote: bool },
    TxCounted,
    RxCounted,
    LastTxInfo(String),
    SyncOk,
    SyncChanged(SyncStatus),
    TxError,
}

#[derive(Debug, PartialEq)]
struct CsvRecord<'a> {
    seq: &'a str,
    timestamp: &'a str,
    state: &'a str,
    distance: &'a str,
    vehicle: bool,
    request: bool,
}

#[derive(Debug, PartialEq)]
struct Telemetry<'a> {
    state: &'a str,
    request: &'a str,
    distance: &'a str,
}

struct Scan<'a> {
    line: &'a str,
    events: Vec<Event>,
    // TX and RX lines carry their own distance; the fallback rule must
    // not read it a second time.
    distance_consumed: bool,
}

struct Rule {
    name: &'static str,
    apply: fn(&mut Scan) -> bool,
}

const RULES: [Rule; 5] = [
    Rule {
        name: "transition",
        apply: transition_rule,
    },
    Rule {
        name: "tx",
        apply: tx_rule,
    },
    Rule {
        name: "rx",
        apply: rx_rule,
    },
    Rule {
        name: "distance",
        apply: distance_rule,
    },
    Rule {
        name: "sync",
        apply: sync_rule,
    },
];

const TRANSITION_MARKERS: [(&str, LightState); 4] = [
    ("-> VERDE", LightState::Green),
    ("-> AMARILLO", LightState::Yellow),
    ("-> ROJO", LightState::Red),
    ("-> ALL_RED", LightState::AllRed),
];

const NO_SYNC_MARKERS: [&str; 2] = ["SIN SYNC", "Sin comunicación"];
const PEER_OK_MARKER: &str = "Peer añadido correctamente";
const INIT_OK_MARKER: &str = "ESP-NOW inicializado OK";
const TX_ERROR_MARKERS: [&str; 3] = ["Error TX ESP-NOW", "Callback: Error", "status=1"];
const PEER_MAC_MARKER: &str = "Peer MAC:";

pub fn interpret(channel: Channel, line: &str) -> Vec<Event> {
    if let Ok((_, record)) = csv_parser(line.trim()) {
        trace!(
            "[{}] csv record seq={} ts={}",
            channel,
            record.seq,
            record.timestamp
        );
        return csv_events(&record);
    }
    let mut scan = Scan {
        line,
        events: vec![],
        distance_consumed: false,
    };
    for rule in RULES.iter() {
        if (rule.apply)(&mut scan) {
            trace!("[{}] rule {} matched", channel, rule.name);
        }
    }
    if scan.events.is_empty() {
        trace!("[{}] unrecognised line: {}", channel, line);
    }
    scan.events
}

fn number(digits: &str) -> Option<u32> {
    digits.parse().ok()
}

fn mapped_light(digits: &str) -> LightState {
    LightState::from_code(digits).unwrap_or(LightState::Unknown)
}

/// Runs `parser` at every character boundary of `line` and returns the
/// first hit.
fn search<'a, O>(line: &'a str, mut parser: impl FnMut(&'a str) -> IResult<&'a str, O>) -> Option<O> {
    line.char_indices()
        .find_map(|(index, _)| parser(&line[index..]).ok().map(|(_, out)| out))
}

/// Any Unicode whitespace, not just the ASCII set `multispace0` knows.
fn space0(s: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_whitespace())(s)
}

fn csv_number(s: &str) -> IResult<&str, &str> {
    delimited(space0, digit1, space0)(s)
}

fn csv_flag(s: &str) -> IResult<&str, bool> {
    let (rest, flag) = delimited(space0, one_of("01"), space0)(s)?;
    Ok((rest, flag == '1'))
}

fn csv_parser(s: &str) -> IResult<&str, CsvRecord> {
    let (rest, (seq, _, timestamp, _, state, _, distance, _, vehicle, _, request)) =
        all_consuming(tuple((
            csv_number,
            char(','),
            csv_number,
            char(','),
            csv_number,
            char(','),
            csv_number,
            char(','),
            csv_flag,
            char(','),
            csv_flag,
        )))(s)?;
    Ok((
        rest,
        CsvRecord {
            seq,
            timestamp,
            state,
            distance,
            vehicle,
            request,
        },
    ))
}

fn csv_events(record: &CsvRecord) -> Vec<Event> {
    let mut events = vec![];
    if let Some(light) = LightState::from_code(record.state) {
        events.push(Event::LightChanged(light));
    }
    if let Some(distance) = number(record.distance) {
        events.push(Event::DistanceChanged(distance));
    }
    events.push(Event::VehicleChanged(record.vehicle));
    events.push(Event::PriorityChanged {
        local: record.request,
        remote: false,
    });
    events.push(Event::RemoteLightChanged(LightState::Unknown));
    events.push(Event::SyncOk);
    events
}

fn transition_rule(scan: &mut Scan) -> bool {
    match TRANSITION_MARKERS
        .iter()
        .find(|(marker, _)| scan.line.contains(marker))
    {
        Some((_, light)) => {
            scan.events.push(Event::LightChanged(*light));
            scan.events.push(Event::SyncOk);
            true
        }
        None => false,
    }
}

fn tx_parser(s: &str) -> IResult<&str, Telemetry> {
    let (rest, (_, state, _, request, _, distance)) = tuple((
        tag("TX: estado="),
        digit1,
        tag(", request="),
        digit1,
        tag(", dist="),
        digit1,
    ))(s)?;
    Ok((
        rest,
        Telemetry {
            state,
            request,
            distance,
        },
    ))
}

fn rx_parser(s: &str) -> IResult<&str, Telemetry> {
    let (rest, (_, _, _, state, _, request, _, distance)) = tuple((
        tag("RX de ESP "),
        digit1,
        tag(": estado="),
        digit1,
        tag(", request="),
        digit1,
        tag(", dist="),
        digit1,
    ))(s)?;
    Ok((
        rest,
        Telemetry {
            state,
            request,
            distance,
        },
    ))
}

fn tx_rule(scan: &mut Scan) -> bool {
    let telemetry = match search(scan.line, tx_parser) {
        Some(telemetry) => telemetry,
        None => return false,
    };
    scan.events.push(Event::TxCounted);
    scan.events.push(Event::LastTxInfo(format!(
        "estado={}, req={}",
        telemetry.state, telemetry.request
    )));
    if let Some(distance) = number(telemetry.distance) {
        scan.events.push(Event::DistanceChanged(distance));
    }
    scan.events.push(Event::PriorityChanged {
        local: telemetry.request == "1",
        remote: false,
    });
    scan.events
        .push(Event::LightChanged(mapped_light(telemetry.state)));
    scan.events.push(Event::SyncOk);
    scan.distance_consumed = true;
    true
}

fn rx_rule(scan: &mut Scan) -> bool {
    let telemetry = match search(scan.line, rx_parser) {
        Some(telemetry) => telemetry,
        None => return false,
    };
    // The distance belongs to the peer, never to this panel.
    scan.events.push(Event::RxCounted);
    scan.events.push(Event::PriorityChanged {
        local: false,
        remote: telemetry.request == "1",
    });
    scan.events
        .push(Event::RemoteLightChanged(mapped_light(telemetry.state)));
    scan.events.push(Event::SyncOk);
    scan.distance_consumed = true;
    true
}

fn is_distance_suffix(c: char) -> bool {
    "ancia".contains(c.to_ascii_lowercase())
}

fn distance_parser(s: &str) -> IResult<&str, &str> {
    let (rest, (_, _, _, _, digits)) = tuple((
        tag_no_case("dist"),
        take_while(is_distance_suffix),
        one_of("=:"),
        space0,
        digit1,
    ))(s)?;
    Ok((rest, digits))
}

fn distance_rule(scan: &mut Scan) -> bool {
    if scan.distance_consumed {
        return false;
    }
    match search(scan.line, distance_parser).and_then(number) {
        Some(distance) => {
            scan.events.push(Event::DistanceChanged(distance));
            scan.events
                .push(Event::VehicleChanged(distance < VEHICLE_DISTANCE_CM));
            true
        }
        None => false,
    }
}

fn is_upper_hex(c: char) -> bool {
    c.is_ascii_digit() || ('A'..='F').contains(&c)
}

fn hex_pair(s: &str) -> IResult<&str, &str> {
    take_while_m_n(2, 2, is_upper_hex)(s)
}

fn mac_parser(s: &str) -> IResult<&str, &str> {
    recognize(tuple((hex_pair, count(preceded(char(':'), hex_pair), 5))))(s)
}

fn sync_rule(scan: &mut Scan) -> bool {
    let line = scan.line;
    let event = if NO_SYNC_MARKERS.iter().any(|marker| line.contains(marker)) {
        Some(Event::SyncChanged(SyncStatus::NoSync))
    } else if line.contains(PEER_OK_MARKER) {
        Some(Event::SyncChanged(SyncStatus::PeerOk))
    } else if line.contains(INIT_OK_MARKER) {
        Some(Event::SyncChanged(SyncStatus::InitOk))
    } else if TX_ERROR_MARKERS.iter().any(|marker| line.contains(marker)) {
        Some(Event::TxError)
    } else if line.contains(PEER_MAC_MARKER) {
        search(line, mac_parser).map(|mac| Event::SyncChanged(SyncStatus::PeerMac(mac.into())))
    } else {
        None
    };
    match event {
        Some(event) => {
            scan.events.push(event);
            true
        }
        None => false,
    }
}
