//! Demand curves
//!
//! Tabulates each room's humidity demand across 0-100% humidity so a
//! threshold or multiplier can be checked before it goes live. Latched rooms
//! get two columns: the demand while humidity rises from an idle latch, and
//! while it falls from an engaged one.

use std::fmt::Write;

use breeze_core::demand::{hysteresis, proportional_demand};
use breeze_core::{ControlConfig, RoomBehavior};

/// Default humidity step between rows
pub const DEFAULT_STEP: u8 = 5;

/// One column of the table
struct Column {
    header: String,
    demand: Box<dyn Fn(f64) -> f64>,
}

fn columns(config: &ControlConfig) -> Vec<Column> {
    let mut columns = Vec::new();
    for (room_id, room) in config.rooms() {
        let label = room.label(room_id).to_string();
        match &room.behavior {
            RoomBehavior::Hysteresis { .. } => {
                let Some((on, off)) = room.humidity_thresholds(config.global()) else {
                    continue;
                };
                columns.push(Column {
                    header: format!("{label} (rising)"),
                    demand: Box::new(move |h| latch_demand(hysteresis(false, h, on, off))),
                });
                columns.push(Column {
                    header: format!("{label} (falling)"),
                    demand: Box::new(move |h| latch_demand(hysteresis(true, h, on, off))),
                });
            }
            RoomBehavior::Proportional {
                target_humidity,
                multiplier,
                ..
            } => {
                let (target, multiplier) = (*target_humidity, *multiplier);
                columns.push(Column {
                    header: label,
                    demand: Box::new(move |h| proportional_demand(h, target, multiplier)),
                });
            }
        }
    }
    columns
}

fn latch_demand(on: bool) -> f64 {
    if on { 100.0 } else { 0.0 }
}

/// Render the demand table with one row per `step` percent of humidity
pub fn render(config: &ControlConfig, step: u8) -> String {
    let step = usize::from(step.max(1));
    let columns = columns(config);
    let width = columns.iter().map(|c| c.header.len()).max().unwrap_or(0).max(8);

    let mut out = String::new();
    let _ = write!(out, "{:>8}", "Humidity");
    for column in &columns {
        let _ = write!(out, "  {:>width$}", column.header);
    }
    out.push('\n');

    for humidity in (0..=100).step_by(step) {
        let humidity = humidity as f64;
        let _ = write!(out, "{:>7.0}%", humidity);
        for column in &columns {
            let _ = write!(out, "  {:>width$.1}", (column.demand)(humidity));
        }
        out.push('\n');
    }

    let floor = config.global().proportional_fan_floor;
    let _ = writeln!(
        out,
        "Fan speed: min {}%, high {}%, proportional floor {}%",
        config.global().min_fan_speed,
        config.global().high_fan_speed,
        floor
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use breeze_core::{GlobalConfig, RoomConfig};
    use std::collections::BTreeMap;

    #[test]
    fn test_hysteresis_columns() {
        let rooms = BTreeMap::from([("bathroom".to_string(), RoomConfig::new("valve.bath", "sensor.bath_rh"))]);
        let config = ControlConfig::new(GlobalConfig::default(), rooms).unwrap();

        let table = render(&config, 10);
        assert!(table.contains("bathroom (rising)"));
        assert!(table.contains("bathroom (falling)"));

        let row = |h: &str| table.lines().find(|l| l.trim_start().starts_with(h)).unwrap().to_string();
        // dead band between 65 and 70
        let values: Vec<String> = row("70%").split_whitespace().skip(1).map(str::to_string).collect();
        assert_eq!(values, vec!["0.0", "100.0"]);
        let values: Vec<String> = row("80%").split_whitespace().skip(1).map(str::to_string).collect();
        assert_eq!(values, vec!["100.0", "100.0"]);
        let values: Vec<String> = row("60%").split_whitespace().skip(1).map(str::to_string).collect();
        assert_eq!(values, vec!["0.0", "0.0"]);
    }

    #[test]
    fn test_proportional_column() {
        let room = RoomConfig::new("valve.bath", "sensor.bath_rh").with_behavior(RoomBehavior::Proportional {
            target_humidity: 60.0,
            multiplier: 2.0,
            min_opening: 10.0,
            restricted_opening: 20.0,
        });
        let config = ControlConfig::new(GlobalConfig::default(), BTreeMap::from([("bath".to_string(), room)])).unwrap();

        let table = render(&config, 25);
        let rows: Vec<&str> = table.lines().collect();
        // header, 0/25/50/75/100, footer
        assert_eq!(rows.len(), 7);
        assert!(rows[4].ends_with("30.0"));
        assert!(rows[5].ends_with("80.0"));
        assert!(rows[1].ends_with("0.0"));
    }
}
