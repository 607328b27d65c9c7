//! Error types for the ventilation core.

/// A configuration that violates an invariant. Fatal for the process:
/// no cycle may run on an invalid configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("No rooms configured")]
    NoRooms,

    #[error("{field} must be within 0-100, got {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("min_fan_speed ({min}) exceeds high_fan_speed ({high})")]
    FanBounds { min: u8, high: u8 },

    #[error("{scope}: humidity_threshold_off ({off}) must be below humidity_threshold_on ({on})")]
    HumidityThresholds { scope: String, on: f64, off: f64 },

    #[error("{scope}: co2_threshold_min ({min}) must be below co2_threshold_max ({max})")]
    Co2Thresholds { scope: String, min: f64, max: f64 },

    #[error("Room {room}: multiplier must be a positive number, got {value}")]
    Multiplier { room: String, value: f64 },

    #[error("Room {room}: {field} must not be empty")]
    EmptyEntity { room: String, field: &'static str },

    #[error("Rooms mix hysteresis and proportional behavior ({hysteresis} vs {proportional})")]
    MixedModes {
        hysteresis: String,
        proportional: String,
    },
}

/// A room whose sensor snapshot cannot be evaluated this cycle.
///
/// Scoped to one room: callers may drop the room and continue with the rest.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("Room {0}: humidity reading missing")]
    MissingHumidity(String),

    #[error("Room {room}: humidity reading is not a number ({value})")]
    InvalidHumidity { room: String, value: f64 },

    #[error("Room {0} is not configured")]
    UnknownRoom(String),
}

impl InputError {
    /// The room this error belongs to
    pub fn room(&self) -> &str {
        match self {
            InputError::MissingHumidity(room) => room,
            InputError::InvalidHumidity { room, .. } => room,
            InputError::UnknownRoom(room) => room,
        }
    }
}
