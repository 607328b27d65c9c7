//! Hysteresis Store
//!
//! Keeps each room's `needs_ventilation` bit between cycles. It is the only
//! state that survives a cycle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::homeassistant::{Platform, PlatformError};
use crate::settings::MemorySettings;

/// Error type for hysteresis persistence
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Persistence for per-room latch bits
pub trait HysteresisStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, bool>, StoreError>;

    fn save(&self, bits: &BTreeMap<String, bool>) -> Result<(), StoreError>;
}

/// Build the store selected in settings
pub fn from_settings<P: Platform + 'static>(
    settings: &MemorySettings,
    platform: Arc<P>,
    rooms: Vec<String>,
) -> Box<dyn HysteresisStore> {
    match settings {
        MemorySettings::File { path } => Box::new(FileStore::new(path)),
        MemorySettings::Entity { prefix } => Box::new(EntityStore::new(platform, prefix.clone(), rooms)),
        MemorySettings::Memory => Box::new(MemoryStore::default()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct StoredBits {
    saved_at: DateTime<Utc>,
    rooms: BTreeMap<String, bool>,
}

/// JSON file on disk. A missing file reads as "nothing latched".
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl HysteresisStore for FileStore {
    fn load(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No hysteresis state at {}, starting fresh", self.path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        let stored: StoredBits = serde_json::from_str(&content).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        Ok(stored.rooms)
    }

    fn save(&self, bits: &BTreeMap<String, bool>) -> Result<(), StoreError> {
        let stored = StoredBits {
            saved_at: Utc::now(),
            rooms: bits.clone(),
        };
        let content = serde_json::to_string_pretty(&stored).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        // write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform entities
// ─────────────────────────────────────────────────────────────────────────────

/// One `on`/`off` entity per room on the automation platform
pub struct EntityStore<P: Platform> {
    platform: Arc<P>,
    prefix: String,
    rooms: Vec<String>,
}

impl<P: Platform> EntityStore<P> {
    pub fn new(platform: Arc<P>, prefix: impl Into<String>, rooms: Vec<String>) -> Self {
        Self {
            platform,
            prefix: prefix.into(),
            rooms,
        }
    }

    fn entity_id(&self, room_id: &str) -> String {
        format!("{}{}", self.prefix, room_id)
    }
}

impl<P: Platform> HysteresisStore for EntityStore<P> {
    fn load(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        let mut bits = BTreeMap::new();
        for room_id in &self.rooms {
            if let Some(entity) = self.platform.entity(&self.entity_id(room_id))? {
                bits.insert(room_id.clone(), entity.is_on());
            }
        }
        Ok(bits)
    }

    fn save(&self, bits: &BTreeMap<String, bool>) -> Result<(), StoreError> {
        for (room_id, needs_ventilation) in bits {
            let state = if *needs_ventilation { "on" } else { "off" };
            self.platform.set_state(
                &self.entity_id(room_id),
                state,
                &json!({ "friendly_name": format!("{room_id} needs ventilation") }),
            )?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// In-process store; survives cycles but not restarts
#[derive(Debug, Default)]
pub struct MemoryStore {
    bits: Mutex<BTreeMap<String, bool>>,
}

impl HysteresisStore for MemoryStore {
    fn load(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        // the map is replaced whole on save, so a poisoned lock still guards a complete value
        Ok(self.bits.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, bits: &BTreeMap<String, bool>) -> Result<(), StoreError> {
        *self.bits.lock().unwrap_or_else(PoisonError::into_inner) = bits.clone();
        Ok(())
    }
}
