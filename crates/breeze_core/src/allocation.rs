//! Allocation Engine
//!
//! Derives the fan speed and every valve position from the per-room demands.
//! Threshold deployments hand the full valve to one primary room; proportional
//! deployments split the airflow by demand weight.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ControlConfig, ControlMode, RoomBehavior, RoomConfig};
use crate::demand::RoomDemand;
use crate::state::{RoomState, SystemState};

/// Why a valve ended up where it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValveReason {
    /// Room asks for nothing
    Idle,
    /// Humidity wants air but the room is occupied
    OccupiedSkip,
    /// Fan is at its floor with nobody activating
    FanIdle,
    /// Primary room
    Primary,
    /// Ventilating, but another room is primary
    Restricted,
    /// Proportional: no room has demand
    NoDemand,
    /// Proportional: capacity is needed elsewhere
    NoOwnDemand,
    /// Proportional: share of total demand
    Share,
}

/// Result of an allocation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Target state for the applier
    pub target: SystemState,
    pub primary_room: Option<String>,
    /// System-wide maximum CO2 demand (each room's own value stays in its state)
    pub max_co2_demand: f64,
    /// Sum of humidity demand across rooms
    pub total_demand: f64,
    pub reasons: BTreeMap<String, ValveReason>,
}

/// Fan and valve allocator
pub struct AllocationEngine<'a> {
    config: &'a ControlConfig,
}

impl<'a> AllocationEngine<'a> {
    pub fn new(config: &'a ControlConfig) -> Self {
        Self { config }
    }

    /// Compute the target state.
    ///
    /// Only rooms present in `demands` appear in the target; anything the
    /// demand pass rejected is left out so its actuator is not touched.
    pub fn allocate(&self, current: &SystemState, demands: &BTreeMap<String, RoomDemand>) -> Allocation {
        let rooms: Vec<(&String, &RoomState, &RoomDemand, &RoomConfig)> = demands
            .iter()
            .filter_map(|(id, demand)| {
                let state = current.rooms.get(id)?;
                let config = self.config.room(id)?;
                Some((id, state, demand, config))
            })
            .collect();

        // BTreeMap order makes this the lexicographically smallest id
        let primary_room = rooms
            .iter()
            .find(|(_, state, demand, config)| is_activating(state, demand, config))
            .map(|(id, ..)| (*id).clone());

        let max_co2_demand = rooms
            .iter()
            .filter_map(|(_, _, demand, _)| demand.co2_demand)
            .fold(0.0, f64::max);
        let total_demand: f64 = rooms.iter().map(|(_, _, demand, _)| demand.humidity_demand).sum();

        let ventilation_speed = match self.config.mode() {
            ControlMode::Threshold => self.threshold_fan_speed(&rooms, max_co2_demand),
            ControlMode::Proportional => self.proportional_fan_speed(total_demand, max_co2_demand),
        };

        let mut target = SystemState {
            manual_override: current.manual_override,
            ventilation_speed,
            rooms: BTreeMap::new(),
        };
        let mut reasons = BTreeMap::new();

        for (id, state, demand, config) in &rooms {
            let (position, reason) = match self.config.mode() {
                ControlMode::Threshold => {
                    self.threshold_valve(id, state, demand, config, primary_room.as_deref(), ventilation_speed)
                }
                ControlMode::Proportional => proportional_valve(demand, config, total_demand),
            };
            debug!("{}: valve {:.1}% ({:?})", config.label(id), position, reason);

            let mut room = (*state).clone();
            room.humidity_demand = demand.humidity_demand;
            room.co2_demand = demand.co2_demand;
            room.needs_ventilation = demand.needs_ventilation;
            room.valve_position = position;
            target.rooms.insert((*id).clone(), room);
            reasons.insert((*id).clone(), reason);
        }

        info!(
            "Fan speed {}% (primary room: {}, max CO2 demand {:.0}, total humidity demand {:.1})",
            ventilation_speed,
            primary_room.as_deref().unwrap_or("none"),
            max_co2_demand,
            total_demand
        );

        Allocation {
            target,
            primary_room,
            max_co2_demand,
            total_demand,
            reasons,
        }
    }

    fn threshold_fan_speed(&self, rooms: &[(&String, &RoomState, &RoomDemand, &RoomConfig)], max_co2: f64) -> u8 {
        let global = self.config.global();
        let humidity_contribution = if rooms
            .iter()
            .any(|(_, state, demand, config)| humidity_activating(state, demand, config))
        {
            100.0
        } else {
            0.0
        };
        let combined = (humidity_contribution + max_co2).min(100.0);
        let speed = combined
            .max(f64::from(global.min_fan_speed))
            .min(f64::from(global.high_fan_speed));
        to_percent(speed)
    }

    fn proportional_fan_speed(&self, total_demand: f64, max_co2: f64) -> u8 {
        let global = self.config.global();
        let speed = total_demand
            .max(f64::from(global.proportional_fan_floor))
            .min(100.0)
            .max(max_co2)
            .min(f64::from(global.high_fan_speed));
        to_percent(speed)
    }

    fn threshold_valve(
        &self,
        room_id: &str,
        state: &RoomState,
        demand: &RoomDemand,
        config: &RoomConfig,
        primary_room: Option<&str>,
        ventilation_speed: u8,
    ) -> (f64, ValveReason) {
        let global = self.config.global();

        if !demand.needs_ventilation && !demand.co2_active() {
            return (config.default_valve_position, ValveReason::Idle);
        }
        if demand.needs_ventilation && occupancy_blocks(state, config) && !demand.co2_active() {
            return (config.default_valve_position, ValveReason::OccupiedSkip);
        }
        if primary_room.is_none() && ventilation_speed <= global.min_fan_speed {
            return (global.valve_minimal, ValveReason::FanIdle);
        }
        if primary_room == Some(room_id) {
            (global.valve_open, ValveReason::Primary)
        } else {
            (global.valve_restricted, ValveReason::Restricted)
        }
    }
}

fn proportional_valve(demand: &RoomDemand, config: &RoomConfig, total_demand: f64) -> (f64, ValveReason) {
    let RoomBehavior::Proportional {
        min_opening,
        restricted_opening,
        ..
    } = &config.behavior
    else {
        return (config.default_valve_position, ValveReason::Idle);
    };

    if total_demand <= 0.0 {
        (*min_opening, ValveReason::NoDemand)
    } else if demand.humidity_demand <= 0.0 {
        (*restricted_opening, ValveReason::NoOwnDemand)
    } else {
        let share = demand.humidity_demand / total_demand * 100.0;
        (share.max(*min_opening), ValveReason::Share)
    }
}

fn occupancy_blocks(state: &RoomState, config: &RoomConfig) -> bool {
    config.skip_when_occupied && state.is_occupied()
}

fn humidity_activating(state: &RoomState, demand: &RoomDemand, config: &RoomConfig) -> bool {
    demand.needs_ventilation && !occupancy_blocks(state, config)
}

/// Humidity need outside an occupancy skip, or any CO2 need
fn is_activating(state: &RoomState, demand: &RoomDemand, config: &RoomConfig) -> bool {
    humidity_activating(state, demand, config) || demand.co2_active()
}

fn to_percent(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::demand::DemandEngine;

    fn threshold_config() -> ControlConfig {
        let rooms = BTreeMap::from([
            (
                "bathroom".to_string(),
                RoomConfig::new("valve.bath", "sensor.bath_rh")
                    .with_co2_sensor("sensor.bath_co2")
                    .with_occupancy_sensor("light.bath", true),
            ),
            (
                "kitchen".to_string(),
                RoomConfig::new("valve.kitchen", "sensor.kitchen_rh").with_co2_sensor("sensor.kitchen_co2"),
            ),
            (
                "living_room".to_string(),
                RoomConfig::new("valve.living", "sensor.living_rh").with_default_valve_position(50.0),
            ),
        ]);
        ControlConfig::new(GlobalConfig::default(), rooms).unwrap()
    }

    fn proportional(min_opening: f64) -> RoomBehavior {
        RoomBehavior::Proportional {
            target_humidity: 60.0,
            multiplier: 5.0,
            min_opening,
            restricted_opening: 15.0,
        }
    }

    fn proportional_config() -> ControlConfig {
        let rooms = BTreeMap::from([
            (
                "bathroom".to_string(),
                RoomConfig::new("valve.bath", "sensor.bath_rh").with_behavior(proportional(20.0)),
            ),
            (
                "living_room".to_string(),
                RoomConfig::new("valve.living", "sensor.living_rh").with_behavior(RoomBehavior::Proportional {
                    target_humidity: 55.0,
                    multiplier: 4.0,
                    min_opening: 10.0,
                    restricted_opening: 15.0,
                }),
            ),
        ]);
        ControlConfig::new(GlobalConfig::default(), rooms).unwrap()
    }

    fn run(config: &ControlConfig, state: &SystemState) -> Allocation {
        let report = DemandEngine::new(config).evaluate(state);
        assert!(report.rejected.is_empty());
        AllocationEngine::new(config).allocate(state, &report.demands)
    }

    fn dry_state() -> SystemState {
        SystemState::new(30)
            .with_room("bathroom", RoomState::reading(60.0, 20.0))
            .with_room("kitchen", RoomState::reading(55.0, 20.0))
            .with_room("living_room", RoomState::reading(55.0, 50.0))
    }

    #[test]
    fn test_no_room_needs_ventilation() {
        let config = threshold_config();
        let allocation = run(&config, &dry_state());

        assert_eq!(allocation.target.ventilation_speed, 30);
        assert_eq!(allocation.primary_room, None);
        assert_eq!(allocation.target.rooms["bathroom"].valve_position, 20.0);
        assert_eq!(allocation.target.rooms["living_room"].valve_position, 50.0);
        assert_eq!(allocation.reasons["kitchen"], ValveReason::Idle);
    }

    #[test]
    fn test_primary_room_gets_open_valve() {
        let config = threshold_config();
        let mut state = dry_state();
        state.rooms.get_mut("kitchen").unwrap().humidity = Some(75.0);
        state.rooms.get_mut("living_room").unwrap().humidity = Some(75.0);

        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 100);
        assert_eq!(allocation.primary_room.as_deref(), Some("kitchen"));
        assert_eq!(allocation.target.rooms["kitchen"].valve_position, 100.0);
        assert_eq!(allocation.target.rooms["living_room"].valve_position, 20.0);
        assert_eq!(allocation.reasons["living_room"], ValveReason::Restricted);
        assert_eq!(allocation.target.rooms["bathroom"].valve_position, 20.0);
    }

    #[test]
    fn test_occupied_bathroom_is_skipped() {
        let config = threshold_config();
        let mut state = dry_state();
        let bathroom = state.rooms.get_mut("bathroom").unwrap();
        bathroom.humidity = Some(75.0);
        bathroom.occupied = Some(true);

        let allocation = run(&config, &state);
        // still latched, but neither drives the fan nor opens its valve
        assert!(allocation.target.rooms["bathroom"].needs_ventilation);
        assert_eq!(allocation.target.ventilation_speed, 30);
        assert_eq!(allocation.target.rooms["bathroom"].valve_position, 20.0);
        assert_eq!(allocation.reasons["bathroom"], ValveReason::OccupiedSkip);
        assert_eq!(allocation.primary_room, None);
    }

    #[test]
    fn test_occupied_bathroom_still_counts_for_co2() {
        let config = threshold_config();
        let mut state = dry_state();
        let bathroom = state.rooms.get_mut("bathroom").unwrap();
        bathroom.humidity = Some(75.0);
        bathroom.occupied = Some(true);
        bathroom.co2 = Some(1050.0);

        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 50);
        assert_eq!(allocation.primary_room.as_deref(), Some("bathroom"));
        assert_eq!(allocation.target.rooms["bathroom"].valve_position, 100.0);
    }

    #[test]
    fn test_fan_combines_humidity_and_co2() {
        let config = threshold_config();
        let mut state = dry_state();
        state.rooms.get_mut("kitchen").unwrap().co2 = Some(825.0);

        let allocation = run(&config, &state);
        // 25% CO2 demand sits below the 30% floor
        assert_eq!(allocation.target.ventilation_speed, 30);
        assert_eq!(allocation.max_co2_demand, 25.0);
        assert_eq!(allocation.primary_room.as_deref(), Some("kitchen"));

        state.rooms.get_mut("kitchen").unwrap().co2 = Some(1275.0);
        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 75);

        state.rooms.get_mut("living_room").unwrap().humidity = Some(72.0);
        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 100);
        // kitchen sorts first and is activating through CO2
        assert_eq!(allocation.primary_room.as_deref(), Some("kitchen"));
        assert_eq!(allocation.target.rooms["living_room"].valve_position, 20.0);
        // per-room CO2 demand is kept apart from the system maximum
        assert_eq!(allocation.target.rooms["kitchen"].co2_demand, Some(75.0));
        assert_eq!(allocation.target.rooms["living_room"].co2_demand, None);
    }

    #[test]
    fn test_primary_is_order_independent() {
        let config = threshold_config();
        let demand = RoomDemand {
            humidity_demand: 100.0,
            co2_demand: None,
            needs_ventilation: true,
            mode: ControlMode::Threshold,
        };
        let mut demands = BTreeMap::new();
        demands.insert("living_room".to_string(), demand.clone());
        demands.insert("kitchen".to_string(), demand);

        let state = dry_state();
        let allocation = AllocationEngine::new(&config).allocate(&state, &demands);
        assert_eq!(allocation.primary_room.as_deref(), Some("kitchen"));
        // bathroom had no demand entry and is left out of the target
        assert!(!allocation.target.rooms.contains_key("bathroom"));
    }

    #[test]
    fn test_high_fan_speed_caps_output() {
        let mut global = GlobalConfig::default();
        global.high_fan_speed = 80;
        let rooms = threshold_config().rooms().clone();
        let config = ControlConfig::new(global, rooms).unwrap();

        let mut state = dry_state();
        state.rooms.get_mut("kitchen").unwrap().humidity = Some(75.0);
        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 80);
    }

    #[test]
    fn test_proportional_shares() {
        let config = proportional_config();
        // bathroom: (90 - 60) * 5 = 150, living room: (65 - 55) * 4 = 40
        let state = SystemState::new(25)
            .with_room("bathroom", RoomState::reading(90.0, 20.0))
            .with_room("living_room", RoomState::reading(65.0, 20.0));

        let allocation = run(&config, &state);
        assert_eq!(allocation.total_demand, 190.0);
        assert_eq!(allocation.target.ventilation_speed, 100);

        let bathroom = allocation.target.rooms["bathroom"].valve_position;
        let living = allocation.target.rooms["living_room"].valve_position;
        assert!((bathroom - 150.0 / 190.0 * 100.0).abs() < 1e-9);
        assert!((living - 40.0 / 190.0 * 100.0).abs() < 1e-9);
        assert!(bathroom >= 20.0 && living >= 10.0);
        assert_eq!(allocation.primary_room.as_deref(), Some("bathroom"));
    }

    #[test]
    fn test_proportional_floors_and_restricted() {
        let config = proportional_config();

        let state = SystemState::new(25)
            .with_room("bathroom", RoomState::reading(50.0, 20.0))
            .with_room("living_room", RoomState::reading(50.0, 20.0));
        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 25);
        assert_eq!(allocation.target.rooms["bathroom"].valve_position, 20.0);
        assert_eq!(allocation.target.rooms["living_room"].valve_position, 10.0);
        assert_eq!(allocation.reasons["bathroom"], ValveReason::NoDemand);

        // bathroom 2 * 5 = 10 demand, living room none
        let state = SystemState::new(25)
            .with_room("bathroom", RoomState::reading(62.0, 20.0))
            .with_room("living_room", RoomState::reading(50.0, 20.0));
        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 25);
        assert_eq!(allocation.target.rooms["bathroom"].valve_position, 100.0);
        assert_eq!(allocation.target.rooms["living_room"].valve_position, 15.0);
        assert_eq!(allocation.reasons["living_room"], ValveReason::NoOwnDemand);
    }

    #[test]
    fn test_proportional_min_opening_may_oversubscribe() {
        let config = proportional_config();
        // bathroom 0.2 * 5 = 1, living room (75 - 55) * 4 = 80
        let state = SystemState::new(25)
            .with_room("bathroom", RoomState::reading(60.2, 20.0))
            .with_room("living_room", RoomState::reading(75.0, 20.0));
        let allocation = run(&config, &state);

        let bathroom = allocation.target.rooms["bathroom"].valve_position;
        let living = allocation.target.rooms["living_room"].valve_position;
        assert_eq!(bathroom, 20.0);
        assert!(bathroom + living > 100.0);
        assert_eq!(allocation.target.ventilation_speed, 81);
    }

    #[test]
    fn test_proportional_fan_follows_co2() {
        let rooms = BTreeMap::from([(
            "office".to_string(),
            RoomConfig::new("valve.office", "sensor.office_rh")
                .with_co2_sensor("sensor.office_co2")
                .with_behavior(proportional(10.0)),
        )]);
        let config = ControlConfig::new(GlobalConfig::default(), rooms).unwrap();
        let state = SystemState::new(25).with_room("office", RoomState::reading(50.0, 10.0).with_co2(1275.0));

        let allocation = run(&config, &state);
        assert_eq!(allocation.target.ventilation_speed, 75);
        // CO2 does not enter the weight split
        assert_eq!(allocation.total_demand, 0.0);
        assert_eq!(allocation.target.rooms["office"].valve_position, 10.0);
    }
}
