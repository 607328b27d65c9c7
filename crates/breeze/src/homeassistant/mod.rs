//! Home Assistant Integration
//!
//! The [`Platform`] trait is the boundary between the control cycle and the
//! building-automation platform. [`HomeAssistant`] implements it over the
//! REST API; tests substitute an in-memory platform.

mod client;
mod types;

pub use client::HomeAssistant;
pub use types::EntityState;

use serde_json::Value;

/// Errors talking to the automation platform
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Read entities and call services on an automation platform
pub trait Platform: Send + Sync {
    /// Current state of an entity, `None` if the platform does not know it
    fn entity(&self, entity_id: &str) -> Result<Option<EntityState>, PlatformError>;

    /// Invoke `domain.service` with a JSON payload
    fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), PlatformError>;

    /// Create or overwrite an entity's state
    fn set_state(&self, entity_id: &str, state: &str, attributes: &Value) -> Result<(), PlatformError>;
}
