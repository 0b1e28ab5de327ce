use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::{dashboard::DEFAULT_LOG_CAPACITY, line_source::DEFAULT_BAUD_RATE};

#[derive(Clone, Parser, Debug)]
#[clap(version, about = "Monitor two ESP-NOW traffic lights over serial", long_about = None)]
pub struct MonitorArgs {
    /// Serial port of traffic light A. Defaults to the first port found.
    #[clap(short = 'a', long)]
    pub port_a: Option<String>,
    /// Serial port of traffic light B. Defaults to the second port found.
    #[clap(short = 'b', long)]
    pub port_b: Option<String>,
    #[clap(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Record every log line to a timestamped file.
    #[clap(short, long, action = ArgAction::SetTrue)]
    pub record: bool,
    /// Record to this file instead.
    #[clap(long)]
    pub record_file: Option<PathBuf>,
    /// Print a JSON snapshot per tick instead of the text view.
    #[clap(long, action = ArgAction::SetTrue)]
    pub json: bool,
    #[clap(long, default_value_t = 500)]
    pub render_interval_ms: u64,
    #[clap(long, default_value_t = DEFAULT_LOG_CAPACITY)]
    pub log_capacity: usize,
    #[clap(short, long, action = ArgAction::SetTrue)]
    pub list_ports: bool,
}

#[derive(Clone, Parser, Debug)]
#[clap(version, about = "Send a supply order through an ESP-NOW board", long_about = None)]
pub struct SenderArgs {
    /// Serial port of the sending board. Defaults to the only port found.
    #[clap(short, long)]
    pub port: Option<String>,
    #[clap(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Product code or name, e.g. HBRGR or "Shrimp sauce".
    #[clap(long)]
    pub product: Option<String>,
    /// 1 to 255. Defaults to the product's usual order.
    #[clap(short, long)]
    pub quantity: Option<u32>,
    #[clap(long, action = ArgAction::SetTrue)]
    pub list_products: bool,
    #[clap(short, long, action = ArgAction::SetTrue)]
    pub list_ports: bool,
}

/// Picks the port for channel `index` when none was given.
pub fn pick_port(explicit: Option<String>, available: &[String], index: usize) -> Option<String> {
    explicit.or_else(|| available.get(index).cloned())
}
