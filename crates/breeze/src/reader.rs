//! State Reader
//!
//! Builds the cycle's [`SystemState`] from platform entities. Per-room read
//! failures never abort the cycle: a missing humidity reading is passed on as
//! `None` for the demand engine to reject, and a room whose valve cannot be
//! read is left out of the snapshot.

use std::collections::BTreeMap;

use tracing::{info, warn};

use breeze_core::{ControlConfig, RoomConfig, RoomState, SystemState};

use crate::homeassistant::{EntityState, Platform, PlatformError};

/// Error type for snapshot reads that cannot be isolated to one room
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Fan {entity}: {reason}")]
    Fan { entity: String, reason: String },

    #[error("Manual override entity {entity}: {source}")]
    ManualOverride {
        entity: String,
        #[source]
        source: PlatformError,
    },
}

/// Snapshot plus the rooms that could not be read
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: SystemState,
    /// room id -> reason
    pub excluded: BTreeMap<String, String>,
}

/// Reads a [`SystemState`] from the platform
pub struct StateReader<'a, P: Platform + ?Sized> {
    platform: &'a P,
    config: &'a ControlConfig,
    fan_entity: &'a str,
    manual_override_entity: Option<&'a str>,
}

impl<'a, P: Platform + ?Sized> StateReader<'a, P> {
    pub fn new(platform: &'a P, config: &'a ControlConfig, fan_entity: &'a str) -> Self {
        Self {
            platform,
            config,
            fan_entity,
            manual_override_entity: None,
        }
    }

    pub fn with_manual_override(mut self, entity: Option<&'a str>) -> Self {
        self.manual_override_entity = entity;
        self
    }

    /// Read the full snapshot. `previous` holds last cycle's latch bits.
    pub fn read(&self, previous: &BTreeMap<String, bool>) -> Result<Snapshot, ReadError> {
        info!("Fetching current conditions");

        let manual_override = self.read_manual_override()?;
        let ventilation_speed = self.read_fan_speed()?;
        info!("Current fan speed: {}%", ventilation_speed);

        let mut state = SystemState {
            manual_override,
            ventilation_speed,
            rooms: BTreeMap::new(),
        };
        let mut excluded = BTreeMap::new();

        for (room_id, room) in self.config.rooms() {
            let previous = previous.get(room_id).copied().unwrap_or(false);
            match self.read_room(room_id, room, previous) {
                Ok(room_state) => {
                    state.rooms.insert(room_id.clone(), room_state);
                }
                Err(reason) => {
                    warn!("{}: excluded from this cycle ({})", room.label(room_id), reason);
                    excluded.insert(room_id.clone(), reason);
                }
            }
        }

        Ok(Snapshot { state, excluded })
    }

    fn read_manual_override(&self) -> Result<bool, ReadError> {
        let Some(entity) = self.manual_override_entity else {
            return Ok(false);
        };
        match self.platform.entity(entity) {
            Ok(Some(state)) => Ok(state.is_on()),
            Ok(None) => {
                warn!("Manual override entity {} does not exist, assuming off", entity);
                Ok(false)
            }
            Err(source) => Err(ReadError::ManualOverride {
                entity: entity.to_string(),
                source,
            }),
        }
    }

    fn read_fan_speed(&self) -> Result<u8, ReadError> {
        let fan_error = |reason: String| ReadError::Fan {
            entity: self.fan_entity.to_string(),
            reason,
        };
        let entity = self
            .platform
            .entity(self.fan_entity)
            .map_err(|e| fan_error(e.to_string()))?
            .ok_or_else(|| fan_error("entity not found".to_string()))?;

        // an idle fan reports no percentage
        let percentage = match entity.attribute_f64("percentage") {
            Some(p) => p,
            None if entity.state.eq_ignore_ascii_case("off") => 0.0,
            None => return Err(fan_error("no percentage attribute".to_string())),
        };
        Ok(percentage.clamp(0.0, 100.0).round() as u8)
    }

    fn read_room(&self, room_id: &str, room: &RoomConfig, previous: bool) -> Result<RoomState, String> {
        let valve_position = self
            .fetch(&room.valve_entity)
            .and_then(|e| e.attribute_f64("current_position"))
            .ok_or_else(|| format!("valve {} has no current_position", room.valve_entity))?;

        let humidity = self
            .fetch(&room.humidity_sensor)
            .and_then(|e| e.numeric())
            .map(|h| (h * 10.0).round() / 10.0);

        let co2 = room
            .co2_sensor
            .as_deref()
            .and_then(|sensor| self.fetch(sensor))
            .and_then(|e| e.numeric())
            .map(f64::round);

        let occupied = room
            .occupancy_sensor
            .as_deref()
            .and_then(|sensor| self.fetch(sensor))
            .map(|e| occupancy(&e));

        info!(
            "{}: humidity={}%{}, occupied={}, valve={}%",
            room.label(room_id),
            humidity.map_or_else(|| "?".to_string(), |h| h.to_string()),
            co2.map(|c| format!(", CO2={c}ppm")).unwrap_or_default(),
            occupied.unwrap_or(false),
            valve_position
        );

        Ok(RoomState {
            humidity,
            co2,
            occupied,
            previous_needs_ventilation: previous,
            humidity_demand: 0.0,
            co2_demand: None,
            needs_ventilation: false,
            valve_position,
        })
    }

    /// Fetch an entity, logging and swallowing failures
    fn fetch(&self, entity_id: &str) -> Option<EntityState> {
        match self.platform.entity(entity_id) {
            Ok(Some(entity)) => Some(entity),
            Ok(None) => {
                warn!("Entity {} not found", entity_id);
                None
            }
            Err(e) => {
                warn!("Failed to read {}: {}", entity_id, e);
                None
            }
        }
    }
}

/// Lights count as occupancy when lit; anything else when `on`
fn occupancy(entity: &EntityState) -> bool {
    if entity.entity_id.starts_with("light.") {
        entity.attribute_f64("brightness").is_some_and(|b| b > 0.0)
    } else {
        entity.is_on()
    }
}
