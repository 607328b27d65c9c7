//! Breeze Core - ventilation decision logic
//!
//! Pure, synchronous computation over one sensor snapshot:
//! - [`DemandEngine`]: per-room humidity (hysteresis or proportional) and CO2 demand
//! - [`AllocationEngine`]: fan speed, primary room and valve positions
//!
//! No I/O happens here. The only state carried between cycles is each
//! room's `needs_ventilation` bit, which the caller persists and feeds back.

pub mod allocation;
pub mod config;
pub mod demand;
pub mod error;
pub mod state;

pub use allocation::{Allocation, AllocationEngine, ValveReason};
pub use config::{ControlConfig, ControlMode, GlobalConfig, RoomBehavior, RoomConfig};
pub use demand::{DemandEngine, DemandReport, RoomDemand};
pub use error::{ConfigError, InputError};
pub use state::{RoomState, SystemState};
