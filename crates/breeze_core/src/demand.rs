//! Demand Engine
//!
//! Turns each room's readings into humidity and CO2 demand. Rooms are
//! evaluated independently; nothing here looks across rooms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ControlConfig, ControlMode, RoomBehavior};
use crate::error::InputError;
use crate::state::{RoomState, SystemState};

/// Demand computed for one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDemand {
    /// Percentage (0/100) in threshold mode, weight in proportional mode
    pub humidity_demand: f64,
    /// Percentage, `None` when the room reported no CO2
    pub co2_demand: Option<f64>,
    /// Humidity latch output
    pub needs_ventilation: bool,
    pub mode: ControlMode,
}

impl RoomDemand {
    pub fn co2(&self) -> f64 {
        self.co2_demand.unwrap_or(0.0)
    }

    /// Whether CO2 asks for any airflow
    pub fn co2_active(&self) -> bool {
        self.co2() > 0.0
    }

    /// Humidity and CO2 folded into one figure.
    ///
    /// Threshold mode adds the two percentages and caps at 100. Proportional
    /// mode returns the humidity weight untouched.
    pub fn combined(&self) -> f64 {
        match self.mode {
            ControlMode::Threshold => (self.humidity_demand + self.co2()).min(100.0),
            ControlMode::Proportional => self.humidity_demand,
        }
    }
}

/// Output of a demand pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandReport {
    pub demands: BTreeMap<String, RoomDemand>,
    /// Rooms that could not be evaluated this cycle
    pub rejected: BTreeMap<String, InputError>,
}

/// Dead-band latch.
///
/// Latched rooms stay on while `humidity >= off`; idle rooms switch on only
/// when `humidity > on`.
pub fn hysteresis(previous: bool, humidity: f64, on: f64, off: f64) -> bool {
    if previous {
        humidity >= off
    } else {
        humidity > on
    }
}

/// `max(0, (humidity - target) * multiplier)`, unbounded above
pub fn proportional_demand(humidity: f64, target: f64, multiplier: f64) -> f64 {
    ((humidity - target) * multiplier).max(0.0)
}

/// Linear CO2 demand between the two thresholds, clamped to 0-100
pub fn co2_demand(co2: f64, min: f64, max: f64) -> f64 {
    if co2 < min {
        0.0
    } else if co2 >= max {
        100.0
    } else {
        (co2 - min) / (max - min) * 100.0
    }
}

/// Per-room demand calculator
pub struct DemandEngine<'a> {
    config: &'a ControlConfig,
}

impl<'a> DemandEngine<'a> {
    pub fn new(config: &'a ControlConfig) -> Self {
        Self { config }
    }

    /// Evaluate every room in the snapshot. Rooms with unusable input land
    /// in `rejected` instead of failing the whole pass.
    pub fn evaluate(&self, state: &SystemState) -> DemandReport {
        let mut report = DemandReport::default();
        for (room_id, room) in &state.rooms {
            match self.evaluate_room(room_id, room) {
                Ok(demand) => {
                    report.demands.insert(room_id.clone(), demand);
                }
                Err(e) => {
                    report.rejected.insert(room_id.clone(), e);
                }
            }
        }
        report
    }

    /// Evaluate a single room
    pub fn evaluate_room(&self, room_id: &str, room: &RoomState) -> Result<RoomDemand, InputError> {
        let config = self
            .config
            .room(room_id)
            .ok_or_else(|| InputError::UnknownRoom(room_id.to_string()))?;
        let global = self.config.global();

        let humidity = room
            .humidity
            .ok_or_else(|| InputError::MissingHumidity(room_id.to_string()))?;
        if !humidity.is_finite() {
            return Err(InputError::InvalidHumidity {
                room: room_id.to_string(),
                value: humidity,
            });
        }

        let (humidity_demand, needs_ventilation) = match &config.behavior {
            RoomBehavior::Hysteresis { .. } => {
                let (on, off) = config
                    .humidity_thresholds(global)
                    .unwrap_or((global.humidity_threshold_on, global.humidity_threshold_off));
                let active = hysteresis(room.previous_needs_ventilation, humidity, on, off);
                (if active { 100.0 } else { 0.0 }, active)
            }
            RoomBehavior::Proportional {
                target_humidity,
                multiplier,
                ..
            } => {
                let demand = proportional_demand(humidity, *target_humidity, *multiplier);
                (demand, demand > 0.0)
            }
        };

        let (co2_min, co2_max) = config.co2_thresholds(global);
        let co2_demand = room
            .co2
            .filter(|ppm| ppm.is_finite())
            .map(|ppm| co2_demand(ppm, co2_min, co2_max));

        if humidity_demand > 0.0 || co2_demand.is_some_and(|d| d > 0.0) {
            debug!(
                "{}: humidity {}% -> demand {:.1}, CO2 {:?}ppm -> demand {:?}",
                config.label(room_id),
                humidity,
                humidity_demand,
                room.co2,
                co2_demand
            );
        }

        Ok(RoomDemand {
            humidity_demand,
            co2_demand,
            needs_ventilation,
            mode: self.config.mode(),
        })
    }
}
