//! Cycle overview tables, logged after every cycle

use std::collections::BTreeMap;
use std::fmt::Write;

use breeze_core::{Allocation, ControlConfig, InputError, SystemState};

use crate::applier::ApplyReport;

/// Render the per-room overview as fixed-width text
pub fn render_overview(
    config: &ControlConfig,
    allocation: &Allocation,
    applied: &ApplyReport,
    rejected: &BTreeMap<String, InputError>,
    excluded: &BTreeMap<String, String>,
) -> String {
    let mut out = String::new();
    let rule = "-".repeat(92);

    let _ = writeln!(out, "STATE OVERVIEW");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "{:<20} {:>9} {:>8} {:>9} {:>9} {:>8} {:>11}  {}",
        "Room", "Humidity", "CO2", "Occupied", "Humidity%", "CO2%", "Valve", "Reason"
    );
    let _ = writeln!(out, "{rule}");

    for (room_id, room_config) in config.rooms() {
        let label = room_config.label(room_id);
        if let Some(room) = allocation.target.rooms.get(room_id) {
            let valve = applied
                .valves
                .get(room_id)
                .map(|c| format!("{}->{}", c.from, c.to))
                .unwrap_or_else(|| format!("{:.0}", room.valve_position));
            let reason = allocation
                .reasons
                .get(room_id)
                .map(|r| format!("{r:?}"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{:<20} {:>9} {:>8} {:>9} {:>9.1} {:>8} {:>11}  {}",
                label,
                room.humidity.map_or_else(|| "-".to_string(), |h| format!("{h:.1}%")),
                room.co2.map_or_else(|| "-".to_string(), |c| format!("{c:.0}")),
                room.occupied.map_or("-", |o| if o { "yes" } else { "no" }),
                room.humidity_demand,
                room.co2_demand.map_or_else(|| "-".to_string(), |d| format!("{d:.0}")),
                valve,
                reason
            );
        } else if let Some(error) = rejected.get(room_id) {
            let _ = writeln!(out, "{label:<20} skipped: {error}");
        } else if let Some(reason) = excluded.get(room_id) {
            let _ = writeln!(out, "{label:<20} skipped: {reason}");
        }
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "Fan {}% -> {}% | primary room: {} | max CO2 demand {:.0}% | total humidity demand {:.1}{}",
        applied.fan.from,
        applied.fan.to,
        allocation.primary_room.as_deref().unwrap_or("none"),
        allocation.max_co2_demand,
        allocation.total_demand,
        if applied.dry_run { " | dry-run" } else { "" }
    );
    out
}

/// Render the snapshot as read, with no targets. Used when automatic control
/// is suspended.
pub fn render_snapshot(config: &ControlConfig, state: &SystemState, excluded: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    let rule = "-".repeat(62);

    let _ = writeln!(out, "STATE OVERVIEW (manual override, read only)");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "{:<20} {:>9} {:>8} {:>9} {:>11}",
        "Room", "Humidity", "CO2", "Occupied", "Valve"
    );
    let _ = writeln!(out, "{rule}");

    for (room_id, room_config) in config.rooms() {
        let label = room_config.label(room_id);
        if let Some(room) = state.rooms.get(room_id) {
            let _ = writeln!(
                out,
                "{:<20} {:>9} {:>8} {:>9} {:>11}",
                label,
                room.humidity.map_or_else(|| "-".to_string(), |h| format!("{h:.1}%")),
                room.co2.map_or_else(|| "-".to_string(), |c| format!("{c:.0}")),
                room.occupied.map_or("-", |o| if o { "yes" } else { "no" }),
                format!("{:.0}", room.valve_position)
            );
        } else if let Some(reason) = excluded.get(room_id) {
            let _ = writeln!(out, "{label:<20} unreadable: {reason}");
        }
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Fan {}% | no changes commanded", state.ventilation_speed);
    out
}
