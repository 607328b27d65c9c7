//! Control Configuration
//!
//! Global thresholds, per-room definitions and the validated [`ControlConfig`]
//! the engines run on. Loading from disk happens elsewhere; this module only
//! defines the shapes and their invariants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// System-wide thresholds and actuator constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default humidity (%) above which a hysteresis room starts ventilating
    pub humidity_threshold_on: f64,
    /// Default humidity (%) below which a hysteresis room stops ventilating
    pub humidity_threshold_off: f64,
    /// Fan floor in threshold mode (%)
    pub min_fan_speed: u8,
    /// Fan ceiling (%)
    pub high_fan_speed: u8,
    /// Fan floor in proportional mode (%)
    pub proportional_fan_floor: u8,
    /// CO2 (ppm) at which demand starts rising from 0
    pub co2_threshold_min: f64,
    /// CO2 (ppm) at which demand reaches 100
    pub co2_threshold_max: f64,
    /// Valve position for the primary room
    pub valve_open: f64,
    /// Valve position for ventilating rooms that are not primary
    pub valve_restricted: f64,
    /// Valve position while the fan idles
    pub valve_minimal: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            humidity_threshold_on: 70.0,
            humidity_threshold_off: 65.0,
            min_fan_speed: 30,
            high_fan_speed: 100,
            proportional_fan_floor: 25,
            co2_threshold_min: 600.0,
            co2_threshold_max: 1500.0,
            valve_open: 100.0,
            valve_restricted: 20.0,
            valve_minimal: 10.0,
        }
    }
}

/// How a room turns humidity into demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoomBehavior {
    /// Two-threshold latch; demand is 0 or 100.
    /// Missing thresholds fall back to the global defaults.
    Hysteresis {
        #[serde(default)]
        humidity_threshold_on: Option<f64>,
        #[serde(default)]
        humidity_threshold_off: Option<f64>,
    },
    /// Linear curve above a target; demand is an unbounded weight.
    Proportional {
        target_humidity: f64,
        multiplier: f64,
        #[serde(default)]
        min_opening: f64,
        #[serde(default)]
        restricted_opening: f64,
    },
}

impl Default for RoomBehavior {
    fn default() -> Self {
        RoomBehavior::Hysteresis {
            humidity_threshold_on: None,
            humidity_threshold_off: None,
        }
    }
}

impl RoomBehavior {
    fn mode(&self) -> ControlMode {
        match self {
            RoomBehavior::Hysteresis { .. } => ControlMode::Threshold,
            RoomBehavior::Proportional { .. } => ControlMode::Proportional,
        }
    }
}

/// Per-room sensors, actuator and behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Display name (defaults to the room id)
    #[serde(default)]
    pub name: Option<String>,
    pub valve_entity: String,
    pub humidity_sensor: String,
    #[serde(default)]
    pub co2_sensor: Option<String>,
    #[serde(default)]
    pub occupancy_sensor: Option<String>,
    /// Valve position when the room has nothing to ask for
    #[serde(default = "default_valve_position")]
    pub default_valve_position: f64,
    /// Avoid humidity-driven airflow while the room is occupied
    #[serde(default)]
    pub skip_when_occupied: bool,
    #[serde(default)]
    pub co2_threshold_min: Option<f64>,
    #[serde(default)]
    pub co2_threshold_max: Option<f64>,
    #[serde(default)]
    pub behavior: RoomBehavior,
}

fn default_valve_position() -> f64 {
    20.0
}

impl RoomConfig {
    /// Minimal hysteresis room with global thresholds
    pub fn new(valve_entity: impl Into<String>, humidity_sensor: impl Into<String>) -> Self {
        Self {
            name: None,
            valve_entity: valve_entity.into(),
            humidity_sensor: humidity_sensor.into(),
            co2_sensor: None,
            occupancy_sensor: None,
            default_valve_position: default_valve_position(),
            skip_when_occupied: false,
            co2_threshold_min: None,
            co2_threshold_max: None,
            behavior: RoomBehavior::default(),
        }
    }

    pub fn with_behavior(mut self, behavior: RoomBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_default_valve_position(mut self, position: f64) -> Self {
        self.default_valve_position = position;
        self
    }

    pub fn with_co2_sensor(mut self, entity: impl Into<String>) -> Self {
        self.co2_sensor = Some(entity.into());
        self
    }

    pub fn with_occupancy_sensor(mut self, entity: impl Into<String>, skip_when_occupied: bool) -> Self {
        self.occupancy_sensor = Some(entity.into());
        self.skip_when_occupied = skip_when_occupied;
        self
    }

    /// Display label, falling back to the room id
    pub fn label<'a>(&'a self, room_id: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(room_id)
    }

    /// Effective (on, off) humidity thresholds, or `None` for proportional rooms
    pub fn humidity_thresholds(&self, global: &GlobalConfig) -> Option<(f64, f64)> {
        match &self.behavior {
            RoomBehavior::Hysteresis {
                humidity_threshold_on,
                humidity_threshold_off,
            } => Some((
                humidity_threshold_on.unwrap_or(global.humidity_threshold_on),
                humidity_threshold_off.unwrap_or(global.humidity_threshold_off),
            )),
            RoomBehavior::Proportional { .. } => None,
        }
    }

    /// Effective (min, max) CO2 thresholds
    pub fn co2_thresholds(&self, global: &GlobalConfig) -> (f64, f64) {
        (
            self.co2_threshold_min.unwrap_or(global.co2_threshold_min),
            self.co2_threshold_max.unwrap_or(global.co2_threshold_max),
        )
    }
}

/// System-level allocation strategy, derived from the room behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Binary humidity triggers plus CO2 percentages; primary room gets the open valve
    Threshold,
    /// Humidity weights shared out proportionally
    Proportional,
}

/// Validated configuration. The engines only accept this type.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    global: GlobalConfig,
    rooms: BTreeMap<String, RoomConfig>,
    mode: ControlMode,
}

impl ControlConfig {
    /// Validate a global config and room set
    pub fn new(global: GlobalConfig, rooms: BTreeMap<String, RoomConfig>) -> Result<Self, ConfigError> {
        validate_global(&global)?;

        let mut mode: Option<(ControlMode, &str)> = None;
        for (room_id, room) in &rooms {
            validate_room(room_id, room, &global)?;

            let room_mode = room.behavior.mode();
            match mode {
                None => mode = Some((room_mode, room_id)),
                Some((first, first_id)) if first != room_mode => {
                    let (hysteresis, proportional) = match first {
                        ControlMode::Threshold => (first_id, room_id.as_str()),
                        ControlMode::Proportional => (room_id.as_str(), first_id),
                    };
                    return Err(ConfigError::MixedModes {
                        hysteresis: hysteresis.to_string(),
                        proportional: proportional.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        let Some((mode, _)) = mode else {
            return Err(ConfigError::NoRooms);
        };

        Ok(Self { global, rooms, mode })
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn rooms(&self) -> &BTreeMap<String, RoomConfig> {
        &self.rooms
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomConfig> {
        self.rooms.get(room_id)
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }
}

fn check_percent(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.into(),
            value,
        })
    }
}

fn check_humidity_band(scope: &str, on: f64, off: f64) -> Result<(), ConfigError> {
    check_percent(format!("{scope}.humidity_threshold_on"), on)?;
    check_percent(format!("{scope}.humidity_threshold_off"), off)?;
    if off >= on {
        return Err(ConfigError::HumidityThresholds {
            scope: scope.to_string(),
            on,
            off,
        });
    }
    Ok(())
}

fn check_co2_band(scope: &str, min: f64, max: f64) -> Result<(), ConfigError> {
    // NaN fails the comparison below as well
    if !(min < max) || min < 0.0 {
        return Err(ConfigError::Co2Thresholds {
            scope: scope.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

fn validate_global(global: &GlobalConfig) -> Result<(), ConfigError> {
    check_percent("min_fan_speed", f64::from(global.min_fan_speed))?;
    check_percent("high_fan_speed", f64::from(global.high_fan_speed))?;
    check_percent("proportional_fan_floor", f64::from(global.proportional_fan_floor))?;
    if global.min_fan_speed > global.high_fan_speed {
        return Err(ConfigError::FanBounds {
            min: global.min_fan_speed,
            high: global.high_fan_speed,
        });
    }

    check_percent("valve_open", global.valve_open)?;
    check_percent("valve_restricted", global.valve_restricted)?;
    check_percent("valve_minimal", global.valve_minimal)?;

    check_humidity_band("global", global.humidity_threshold_on, global.humidity_threshold_off)?;
    check_co2_band("global", global.co2_threshold_min, global.co2_threshold_max)
}

fn validate_room(room_id: &str, room: &RoomConfig, global: &GlobalConfig) -> Result<(), ConfigError> {
    let empty = |field| ConfigError::EmptyEntity {
        room: room_id.to_string(),
        field,
    };
    if room.valve_entity.trim().is_empty() {
        return Err(empty("valve_entity"));
    }
    if room.humidity_sensor.trim().is_empty() {
        return Err(empty("humidity_sensor"));
    }
    if room.co2_sensor.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(empty("co2_sensor"));
    }
    if room.occupancy_sensor.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(empty("occupancy_sensor"));
    }

    check_percent(format!("{room_id}.default_valve_position"), room.default_valve_position)?;

    let (co2_min, co2_max) = room.co2_thresholds(global);
    check_co2_band(room_id, co2_min, co2_max)?;

    match &room.behavior {
        RoomBehavior::Hysteresis { .. } => {
            if let Some((on, off)) = room.humidity_thresholds(global) {
                check_humidity_band(room_id, on, off)?;
            }
        }
        RoomBehavior::Proportional {
            target_humidity,
            multiplier,
            min_opening,
            restricted_opening,
        } => {
            check_percent(format!("{room_id}.target_humidity"), *target_humidity)?;
            check_percent(format!("{room_id}.min_opening"), *min_opening)?;
            check_percent(format!("{room_id}.restricted_opening"), *restricted_opening)?;
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(ConfigError::Multiplier {
                    room: room_id.to_string(),
                    value: *multiplier,
                });
            }
        }
    }

    Ok(())
}
