use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::anyhow;
use clap::Parser;
use log::{info, warn};
use traffic_frontend::{
    args::{pick_port, MonitorArgs},
    dashboard::{Dashboard, DashboardConfig, LogView},
    line_source::{available_ports, SerialEndpoint},
    recorder::Recorder,
    render::render,
};

const DRIVE_TIMEOUT: Duration = Duration::from_millis(50);
const LOG_TAIL: usize = 12;
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[cfg(feature = "signals")]
fn register_signals(quit: &Arc<AtomicBool>) -> anyhow::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, quit.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, quit.clone())?;
    Ok(())
}

#[cfg(not(feature = "signals"))]
fn register_signals(_quit: &Arc<AtomicBool>) -> anyhow::Result<()> {
    Ok(())
}

fn show(dashboard: &Dashboard, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(&dashboard.snapshot())?);
        return Ok(());
    }
    let mut out = String::from(CLEAR_SCREEN);
    out.push_str(&render(dashboard));
    out.push_str("\nLog\n");
    let log = dashboard.log(LogView::Combined);
    for line in log.iter().skip(log.len().saturating_sub(LOG_TAIL)) {
        out.push_str(&format!("{}\n", line));
    }
    print!("{}", out);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_env()?;
    let args = MonitorArgs::parse();

    let ports = available_ports();
    if args.list_ports {
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }
    let port_a = pick_port(args.port_a.clone(), &ports, 0)
        .ok_or_else(|| anyhow!("No serial port for A, pass --port-a"))?;
    let port_b = pick_port(args.port_b.clone(), &ports, 1)
        .ok_or_else(|| anyhow!("No serial port for B, pass --port-b"))?;

    let mut dashboard = Dashboard::new(DashboardConfig {
        log_capacity: args.log_capacity,
        ..Default::default()
    });
    if let Some(path) = args.record_file.clone() {
        info!("Recording data to {:?}", path);
        dashboard.record_to(Recorder::new(path)?);
    } else if args.record {
        dashboard.record_to(Recorder::new_with_default_file()?);
    }
    dashboard.connect(
        SerialEndpoint::new(&port_a, args.baud),
        SerialEndpoint::new(&port_b, args.baud),
    )?;

    let quit = Arc::new(AtomicBool::new(false));
    register_signals(&quit)?;
    let interval = Duration::from_millis(args.render_interval_ms);
    let mut last_render = Instant::now();
    while !quit.load(Ordering::Relaxed) {
        let finished = dashboard.sources_finished();
        dashboard.drive(DRIVE_TIMEOUT);
        if last_render.elapsed() >= interval {
            last_render = Instant::now();
            show(&dashboard, args.json)?;
        }
        if finished {
            warn!("Both readers stopped, reconnect to continue");
            break;
        }
    }
    dashboard.disconnect()?;
    show(&dashboard, args.json)?;
    Ok(())
}
