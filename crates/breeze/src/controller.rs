//! Controller
//!
//! One control cycle: load latch bits, read the building, evaluate demand,
//! allocate airflow, apply, persist. A manual override short-circuits the
//! cycle right after the read; no engine runs and no actuator is touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use breeze_core::{Allocation, AllocationEngine, ControlConfig, DemandEngine, InputError, SystemState};

use crate::applier::{ApplyReport, StateApplier};
use crate::homeassistant::Platform;
use crate::reader::{ReadError, StateReader};
use crate::report::{render_overview, render_snapshot};
use crate::settings::{ApplySettings, Settings, SettingsError};
use crate::store::{self, HysteresisStore, StoreError};

/// Error type for a failed cycle
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Failed to read building state: {0}")]
    Read(#[from] ReadError),

    #[error("Failed to persist hysteresis state: {0}")]
    Store(#[from] StoreError),
}

/// Everything an applied cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Snapshot the cycle started from
    pub current: SystemState,
    pub allocation: Allocation,
    pub applied: ApplyReport,
    /// Rooms the demand engine could not evaluate
    pub rejected: BTreeMap<String, InputError>,
    /// Rooms the reader could not read
    pub excluded: BTreeMap<String, String>,
    /// Latch bits computed for the next cycle
    pub bits: BTreeMap<String, bool>,
    /// Whether `bits` were written to the store
    pub persisted: bool,
}

/// Result of [`Controller::run_cycle`]
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Automatic control suspended; `state` is the snapshot as read
    ManualOverride { state: SystemState },
    Applied(Box<CycleReport>),
}

/// Drives control cycles against a platform
pub struct Controller<P: Platform> {
    platform: Arc<P>,
    config: ControlConfig,
    store: Box<dyn HysteresisStore>,
    fan_entity: String,
    manual_override_entity: Option<String>,
    apply: ApplySettings,
}

impl<P: Platform + 'static> Controller<P> {
    /// Build a controller from loaded settings
    pub fn from_settings(settings: &Settings, platform: Arc<P>) -> Result<Self, SettingsError> {
        let config = settings.control_config()?;
        let rooms = config.rooms().keys().cloned().collect();
        let store = store::from_settings(&settings.memory, platform.clone(), rooms);
        Ok(Self {
            platform,
            config,
            store,
            fan_entity: settings.fan.entity.clone(),
            manual_override_entity: settings.manual_override_entity.clone(),
            apply: settings.apply.clone(),
        })
    }
}

impl<P: Platform> Controller<P> {
    pub fn new(platform: Arc<P>, config: ControlConfig, store: Box<dyn HysteresisStore>, fan_entity: impl Into<String>) -> Self {
        Self {
            platform,
            config,
            store,
            fan_entity: fan_entity.into(),
            manual_override_entity: None,
            apply: ApplySettings::default(),
        }
    }

    pub fn with_manual_override(mut self, entity: impl Into<String>) -> Self {
        self.manual_override_entity = Some(entity.into());
        self
    }

    pub fn with_apply_settings(mut self, apply: ApplySettings) -> Self {
        self.apply = apply;
        self
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Run one control cycle. Blocks on platform I/O.
    pub fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        // an unreadable store must not be overwritten with latches computed without it
        let (previous, store_readable) = match self.store.load() {
            Ok(bits) => (bits, true),
            Err(e) => {
                warn!("Failed to load hysteresis state, this cycle will not persist it: {}", e);
                (BTreeMap::new(), false)
            }
        };

        let snapshot = StateReader::new(self.platform.as_ref(), &self.config, &self.fan_entity)
            .with_manual_override(self.manual_override_entity.as_deref())
            .read(&previous)?;

        if snapshot.state.manual_override {
            info!("Manual override active, skipping automatic control");
            let overview = render_snapshot(&self.config, &snapshot.state, &snapshot.excluded);
            for line in overview.lines() {
                info!("{}", line);
            }
            return Ok(CycleOutcome::ManualOverride { state: snapshot.state });
        }

        let demand = DemandEngine::new(&self.config).evaluate(&snapshot.state);
        for (room_id, error) in &demand.rejected {
            warn!("{}: skipped this cycle ({})", room_id, error);
        }

        let allocation = AllocationEngine::new(&self.config).allocate(&snapshot.state, &demand.demands);
        let applied = StateApplier::new(self.platform.as_ref(), &self.config, &self.fan_entity, &self.apply)
            .apply(&snapshot.state, &allocation.target);

        // rooms left out of this cycle keep whatever bit they had
        let mut bits: BTreeMap<String, bool> = previous
            .into_iter()
            .filter(|(room_id, _)| self.config.room(room_id).is_some())
            .collect();
        bits.extend(allocation.target.ventilation_bits());

        let persisted = if self.apply.dry_run {
            info!("[dry-run] Not persisting hysteresis state");
            false
        } else if !store_readable {
            warn!("Keeping stored hysteresis state untouched after the failed load");
            false
        } else {
            self.store.save(&bits)?;
            true
        };

        let overview = render_overview(&self.config, &allocation, &applied, &demand.rejected, &snapshot.excluded);
        for line in overview.lines() {
            info!("{}", line);
        }

        Ok(CycleOutcome::Applied(Box::new(CycleReport {
            current: snapshot.state,
            allocation,
            applied,
            rejected: demand.rejected,
            excluded: snapshot.excluded,
            bits,
            persisted,
        })))
    }
}
