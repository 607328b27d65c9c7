//! Cycle snapshots
//!
//! `SystemState` is both the input read from the building and the target
//! handed back for actuation. Nothing here outlives a cycle except
//! `needs_ventilation`, which the caller feeds back as
//! `previous_needs_ventilation` on the next read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-room readings and computed outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    /// Relative humidity (%), one decimal. `None` when the sensor gave no reading.
    pub humidity: Option<f64>,
    /// CO2 (ppm). `None` when the room has no CO2 sensor.
    pub co2: Option<f64>,
    /// Occupancy. `None` when the room has no occupancy sensor.
    pub occupied: Option<bool>,
    /// Latch value from the previous cycle
    pub previous_needs_ventilation: bool,
    /// 0 or 100 in hysteresis mode, unbounded weight in proportional mode
    pub humidity_demand: f64,
    /// 0-100, `None` without a CO2 reading
    pub co2_demand: Option<f64>,
    /// Humidity latch output; becomes next cycle's `previous_needs_ventilation`
    pub needs_ventilation: bool,
    /// Valve position (%): current position on input, target on output
    pub valve_position: f64,
}

impl RoomState {
    /// Fresh reading with no computed fields
    pub fn reading(humidity: f64, valve_position: f64) -> Self {
        Self {
            humidity: Some(humidity),
            co2: None,
            occupied: None,
            previous_needs_ventilation: false,
            humidity_demand: 0.0,
            co2_demand: None,
            needs_ventilation: false,
            valve_position,
        }
    }

    pub fn with_co2(mut self, co2: f64) -> Self {
        self.co2 = Some(co2);
        self
    }

    pub fn with_occupied(mut self, occupied: bool) -> Self {
        self.occupied = Some(occupied);
        self
    }

    pub fn with_previous(mut self, previous_needs_ventilation: bool) -> Self {
        self.previous_needs_ventilation = previous_needs_ventilation;
        self
    }

    /// Whether occupancy was reported as true
    pub fn is_occupied(&self) -> bool {
        self.occupied.unwrap_or(false)
    }
}

/// Whole-building snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub manual_override: bool,
    /// Fan output (%)
    pub ventilation_speed: u8,
    pub rooms: BTreeMap<String, RoomState>,
}

impl SystemState {
    pub fn new(ventilation_speed: u8) -> Self {
        Self {
            manual_override: false,
            ventilation_speed,
            rooms: BTreeMap::new(),
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>, room: RoomState) -> Self {
        self.rooms.insert(room_id.into(), room);
        self
    }

    /// Latch values to persist for the next cycle
    pub fn ventilation_bits(&self) -> BTreeMap<String, bool> {
        self.rooms
            .iter()
            .map(|(id, room)| (id.clone(), room.needs_ventilation))
            .collect()
    }

    /// Carry this target's latch values into `next` as its previous state
    pub fn carry_into(&self, next: &mut SystemState) {
        for (id, room) in next.rooms.iter_mut() {
            if let Some(prev) = self.rooms.get(id) {
                room.previous_needs_ventilation = prev.needs_ventilation;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carry_into_updates_only_known_rooms() {
        let mut target = SystemState::new(100)
            .with_room("bathroom", RoomState::reading(72.0, 100.0))
            .with_room("kitchen", RoomState::reading(50.0, 20.0));
        target.rooms.get_mut("bathroom").unwrap().needs_ventilation = true;

        let mut next = SystemState::new(100)
            .with_room("bathroom", RoomState::reading(68.0, 100.0))
            .with_room("hall", RoomState::reading(40.0, 20.0).with_previous(true));
        target.carry_into(&mut next);

        assert!(next.rooms["bathroom"].previous_needs_ventilation);
        assert!(next.rooms["hall"].previous_needs_ventilation);
        assert_eq!(
            target.ventilation_bits(),
            BTreeMap::from([("bathroom".to_string(), true), ("kitchen".to_string(), false)])
        );
    }
}
