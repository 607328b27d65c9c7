//! State Applier
//!
//! Diffs the allocation target against the snapshot it was computed from and
//! commands only the actuators whose value actually changes.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use breeze_core::{ControlConfig, ControlMode, RoomBehavior, RoomConfig, SystemState};

use crate::homeassistant::{Platform, PlatformError};
use crate::settings::ApplySettings;

/// Value before and after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Change<T> {
    pub from: T,
    pub to: T,
}

impl<T: PartialEq> Change<T> {
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }
}

/// Actuator call that failed after all retries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFailure {
    pub entity_id: String,
    pub error: String,
}

/// What the applier did in one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReport {
    pub fan: Change<u8>,
    /// Commanded valve positions per room
    pub valves: BTreeMap<String, Change<u8>>,
    /// Actuator calls that succeeded (or would have, in dry-run)
    pub commands: usize,
    pub failures: Vec<CommandFailure>,
    pub dry_run: bool,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pushes target states to the platform
pub struct StateApplier<'a, P: Platform + ?Sized> {
    platform: &'a P,
    config: &'a ControlConfig,
    fan_entity: &'a str,
    settings: &'a ApplySettings,
}

impl<'a, P: Platform + ?Sized> StateApplier<'a, P> {
    pub fn new(platform: &'a P, config: &'a ControlConfig, fan_entity: &'a str, settings: &'a ApplySettings) -> Self {
        Self {
            platform,
            config,
            fan_entity,
            settings,
        }
    }

    /// Command every actuator whose quantized target differs from `current`
    pub fn apply(&self, current: &SystemState, target: &SystemState) -> ApplyReport {
        let (fan_min, fan_max) = self.fan_bounds();
        let mut report = ApplyReport {
            fan: Change {
                from: current.ventilation_speed,
                to: quantize_within(
                    f64::from(target.ventilation_speed),
                    self.settings.command_step,
                    fan_min,
                    fan_max,
                ),
            },
            valves: BTreeMap::new(),
            commands: 0,
            failures: Vec::new(),
            dry_run: self.settings.dry_run,
        };

        if report.fan.is_change() {
            info!("Fan: {}% -> {}%", report.fan.from, report.fan.to);
            let data = json!({ "entity_id": self.fan_entity, "percentage": report.fan.to });
            self.command(&mut report, self.fan_entity, "fan", "set_percentage", &data);
        } else {
            debug!("Fan already at {}%", report.fan.to);
        }

        for (room_id, room) in &target.rooms {
            let Some(room_config) = self.config.room(room_id) else {
                continue;
            };
            let Some(before) = current.rooms.get(room_id) else {
                continue;
            };
            let change = Change {
                from: quantize(before.valve_position, 0),
                to: quantize_within(
                    room.valve_position,
                    self.settings.command_step,
                    valve_floor(room_config, room.valve_position),
                    100,
                ),
            };

            if change.is_change() {
                info!("{}: valve {}% -> {}%", room_config.label(room_id), change.from, change.to);
                let entity = room_config.valve_entity.as_str();
                let data = json!({ "entity_id": entity, "position": change.to });
                self.command(&mut report, entity, "valve", "set_valve_position", &data);
            }
            report.valves.insert(room_id.clone(), change);
        }

        report
    }

    /// Fan limits the allocation already honors
    fn fan_bounds(&self) -> (u8, u8) {
        let global = self.config.global();
        let floor = match self.config.mode() {
            ControlMode::Threshold => global.min_fan_speed,
            ControlMode::Proportional => global.proportional_fan_floor,
        };
        (floor.min(global.high_fan_speed), global.high_fan_speed)
    }

    fn command(&self, report: &mut ApplyReport, entity_id: &str, domain: &str, service: &str, data: &serde_json::Value) {
        if self.settings.dry_run {
            info!("[dry-run] {}.{} {}", domain, service, data);
            report.commands += 1;
            return;
        }
        match self.call_with_retry(domain, service, data) {
            Ok(()) => report.commands += 1,
            Err(e) => {
                warn!("Failed to command {}: {}", entity_id, e);
                report.failures.push(CommandFailure {
                    entity_id: entity_id.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn call_with_retry(&self, domain: &str, service: &str, data: &serde_json::Value) -> Result<(), PlatformError> {
        let mut attempt = 0;
        loop {
            match self.platform.call_service(domain, service, data) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(self.settings.retry_backoff_ms * u64::from(attempt));
                    warn!(
                        "{}.{} failed ({}), retry {}/{} in {}ms",
                        domain,
                        service,
                        e,
                        attempt,
                        self.settings.retries,
                        delay.as_millis()
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Round to the nearest multiple of `step` (whole percent when `step` is 0)
pub fn quantize(value: f64, step: u8) -> u8 {
    let value = if value.is_finite() { value.clamp(0.0, 100.0) } else { 0.0 };
    let rounded = match step {
        0 | 1 => value.round(),
        step => (value / f64::from(step)).round() * f64::from(step),
    };
    rounded.clamp(0.0, 100.0) as u8
}

/// Proportional shares never drop below `min_opening` once they reach it
fn valve_floor(room: &RoomConfig, target: f64) -> u8 {
    match room.behavior {
        RoomBehavior::Proportional { min_opening, .. } if target >= min_opening => quantize(min_opening.ceil(), 0),
        _ => 0,
    }
}

/// [`quantize`] kept inside `[min, max]`.
///
/// If the nearest step falls outside the bounds, the closest step inside them
/// is used; if no step fits, the whole-percent value is used. A target already
/// outside the bounds widens them to include itself.
pub fn quantize_within(value: f64, step: u8, min: u8, max: u8) -> u8 {
    let exact = quantize(value, 0);
    let (min, max) = (min.min(exact), max.max(exact));
    let snapped = quantize(value, step);
    if (min..=max).contains(&snapped) {
        return snapped;
    }

    let step = u16::from(step.max(1));
    let candidate = if snapped > max {
        u16::from(max) / step * step
    } else {
        u16::from(min).div_ceil(step) * step
    };
    if (u16::from(min)..=u16::from(max)).contains(&candidate) {
        candidate as u8
    } else {
        exact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_whole_percent() {
        assert_eq!(quantize(33.4, 0), 33);
        assert_eq!(quantize(33.5, 0), 34);
        assert_eq!(quantize(-3.0, 0), 0);
        assert_eq!(quantize(140.0, 0), 100);
        assert_eq!(quantize(f64::NAN, 0), 0);
    }

    #[test]
    fn test_quantize_to_step() {
        assert_eq!(quantize(34.0, 10), 30);
        assert_eq!(quantize(35.0, 10), 40);
        assert_eq!(quantize(81.0, 10), 80);
        assert_eq!(quantize(98.0, 15), 100);
        assert_eq!(quantize(12.0, 5), 10);
    }

    #[test]
    fn test_quantize_within_bounds() {
        // fan ceiling and floor
        assert_eq!(quantize_within(85.0, 10, 30, 85), 80);
        assert_eq!(quantize_within(34.0, 10, 34, 100), 40);
        // proportional valve floor
        assert_eq!(quantize_within(14.0, 10, 14, 100), 20);
        // no step between 55 and 58
        assert_eq!(quantize_within(56.0, 10, 55, 58), 56);
        assert_eq!(quantize_within(85.0, 0, 30, 85), 85);
        assert_eq!(quantize_within(44.0, 10, 30, 100), 40);
        // targets outside the bounds are not pulled further away
        assert_eq!(quantize_within(20.0, 10, 30, 100), 20);
    }

    #[test]
    fn test_valve_floor_only_for_reached_min_opening() {
        let room = RoomConfig::new("valve.bath", "sensor.bath_rh").with_behavior(RoomBehavior::Proportional {
            target_humidity: 60.0,
            multiplier: 2.0,
            min_opening: 14.0,
            restricted_opening: 10.0,
        });
        assert_eq!(valve_floor(&room, 14.0), 14);
        assert_eq!(valve_floor(&room, 10.0), 0);
        assert_eq!(valve_floor(&RoomConfig::new("valve.bath", "sensor.bath_rh"), 20.0), 0);
    }

    #[test]
    fn test_change() {
        assert!(Change { from: 30u8, to: 100 }.is_change());
        assert!(!Change { from: 20u8, to: 20 }.is_change());
    }
}
