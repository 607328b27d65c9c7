//! Settings
//!
//! Everything loaded once per process: Home Assistant connection, system
//! entities, control thresholds, room definitions and the hysteresis store.

mod loader;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use breeze_core::{ConfigError, ControlConfig, GlobalConfig, RoomConfig};

pub use loader::{DEFAULT_CONFIG_PATH, SettingsError};

/// Top-level settings file (breeze.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub homeassistant: HomeAssistantSettings,
    pub fan: FanSettings,
    /// Entity whose `on` state suspends automatic control
    #[serde(default)]
    pub manual_override_entity: Option<String>,
    #[serde(default)]
    pub control: GlobalConfig,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub apply: ApplySettings,
    pub rooms: BTreeMap<String, RoomConfig>,
}

impl Settings {
    /// Validate thresholds and rooms into the engines' configuration
    pub fn control_config(&self) -> Result<ControlConfig, ConfigError> {
        ControlConfig::new(self.control.clone(), self.rooms.clone())
    }

    /// Copy with credentials masked, for printing
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.homeassistant.token.is_empty() {
            copy.homeassistant.token = "********".to_string();
        }
        copy
    }
}

/// Home Assistant REST API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantSettings {
    /// Base URL, e.g. http://homeassistant.local:8123
    pub url: String,
    /// Long-lived access token
    pub token: String,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for HomeAssistantSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Ventilation unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanSettings {
    /// Fan entity exposing a `percentage` attribute
    pub entity: String,
}

/// Where the per-room hysteresis bit lives between cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum MemorySettings {
    /// JSON file on local disk
    File { path: PathBuf },
    /// One Home Assistant entity per room (`<prefix><room_id>`)
    Entity {
        #[serde(default = "default_entity_prefix")]
        prefix: String,
    },
    /// Process memory only (lost on restart)
    Memory,
}

fn default_entity_prefix() -> String {
    "input_boolean.breeze_".to_string()
}

impl Default for MemorySettings {
    fn default() -> Self {
        MemorySettings::File {
            path: PathBuf::from("breeze-state.json"),
        }
    }
}

/// Actuation behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplySettings {
    /// Extra attempts per failed actuator call
    pub retries: u32,
    /// Backoff between attempts, multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// Round commanded values to this step (0 = whole percent)
    pub command_step: u8,
    /// Compute and log changes without commanding anything
    pub dry_run: bool,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_backoff_ms: 500,
            command_step: 0,
            dry_run: false,
        }
    }
}
