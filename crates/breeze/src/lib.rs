//! Breeze - demand-controlled ventilation for Home Assistant
//!
//! This crate wires the decision logic in `breeze_core` to a live building:
//! - Settings loading (TOML file plus environment overrides)
//! - Home Assistant REST adapter
//! - Snapshot reading, actuation and hysteresis persistence
//! - The control cycle and its periodic driver

// Re-export decision logic
pub use breeze_core;

// Configuration
pub mod settings;

// Home Assistant REST adapter
pub mod homeassistant;

// Cycle stages
pub mod applier;
pub mod reader;
pub mod store;

// Orchestration
pub mod controller;
pub mod schedule;

// Operator output
pub mod curves;
pub mod report;
