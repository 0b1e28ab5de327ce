use std::fmt::Write;

use crate::{
    dashboard::Dashboard,
    protocol::{Channel, LightState},
    state::{PanelState, Priority, Proximity, DISTANCE_BAR_RANGE},
};

const BAR_WIDTH: u32 = 20;

fn lamp(on: bool, symbol: char) -> char {
    if on {
        symbol
    } else {
        '.'
    }
}

fn lamps(light: LightState) -> String {
    let (red, yellow, green) = light.lamps();
    format!("[{}{}{}]", lamp(red, 'R'), lamp(yellow, 'Y'), lamp(green, 'G'))
}

fn priority(panel: &PanelState) -> &'static str {
    match panel.priority() {
        Priority::None => "---",
        Priority::Local => "requested (local)",
        Priority::Remote => "remote",
        Priority::Conflict => "conflict (both)",
    }
}

fn distance(panel: &PanelState) -> String {
    let filled = panel.distance_bar() * BAR_WIDTH / DISTANCE_BAR_RANGE;
    let bar: String = (0..BAR_WIDTH)
        .map(|i| if i < filled { '#' } else { ' ' })
        .collect();
    let proximity = match panel.proximity() {
        Proximity::Unknown => "",
        Proximity::Near => " NEAR",
        Proximity::Close => " close",
        Proximity::Far => "",
    };
    match panel.distance_cm {
        Some(d) => format!("{:>4} cm |{}|{}", d, bar, proximity),
        None => format!("  -- cm |{}|", bar),
    }
}

pub fn render_panel(out: &mut String, channel: Channel, panel: &PanelState) -> std::fmt::Result {
    writeln!(out, "Traffic light {}", channel)?;
    writeln!(out, "  light    {} {}", lamps(panel.light), panel.light.name())?;
    writeln!(out, "  remote   {}", panel.remote_light.name())?;
    writeln!(out, "  distance {}", distance(panel))?;
    writeln!(
        out,
        "  vehicle  {}",
        if panel.vehicle_present { "YES" } else { "NO" }
    )?;
    writeln!(out, "  priority {}", priority(panel))?;
    writeln!(out, "  sync     {}", panel.sync)?;
    writeln!(
        out,
        "  tx/rx    {}/{}  last tx: {}",
        panel.tx_count,
        panel.rx_count,
        panel.last_tx.as_deref().unwrap_or("---")
    )
}

/// Both panels side by side is a GUI concern; the terminal gets them one
/// after the other.
pub fn render(dashboard: &Dashboard) -> String {
    let mut out = String::new();
    for channel in Channel::ALL {
        let _ = render_panel(&mut out, channel, dashboard.panel(channel));
        let _ = writeln!(
            out,
            "  silent   {:.1}s",
            dashboard.heard_from_since(channel).as_secs_f32()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::interpret;

    #[test]
    fn test_render_panel() {
        let mut panel = PanelState::default();
        panel.apply(&interpret(Channel::A, "TX: estado=1, request=1, dist=40"));
        let mut out = String::new();
        render_panel(&mut out, Channel::A, &panel).expect("string write");
        assert!(out.starts_with("Traffic light A\n"));
        assert!(out.contains("[..G] GREEN"));
        // 400 - 40 = 360 of 400 -> 18 of 20 cells
        let bar = format!("  40 cm |{}{}| NEAR", "#".repeat(18), "  ");
        assert!(out.contains(&bar));
        assert!(out.contains("requested (local)"));
        assert!(out.contains("1/0  last tx: estado=1, req=1"));
    }

    #[test]
    fn test_render_unknown_panel() {
        let mut out = String::new();
        render_panel(&mut out, Channel::B, &PanelState::default()).expect("string write");
        assert!(out.contains("[...] ---"));
        assert!(out.contains("  -- cm |"));
        assert!(out.contains("vehicle  NO"));
    }

    #[test]
    fn test_render_dashboard() {
        let dashboard = Dashboard::default();
        let out = render(&dashboard);
        assert!(out.contains("Traffic light A"));
        assert!(out.contains("Traffic light B"));
        assert!(out.contains("silent"));
    }
}
