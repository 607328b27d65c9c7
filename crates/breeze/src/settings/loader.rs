//! Settings Loader
//!
//! Reads breeze.toml and layers environment variables on top:
//! `HA_URL`/`HA_TOKEN` for the Home Assistant connection and
//! `BREEZE_<SECTION>__<KEY>` for everything else.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use tracing::{debug, info};

use breeze_core::ConfigError;

use super::Settings;

/// Config file used when none is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "breeze.toml";

/// Error type for settings loading
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigError),

    #[error("Home Assistant {0} is not set (use HA_URL / HA_TOKEN or the [homeassistant] section)")]
    MissingConnection(&'static str),
}

impl Settings {
    /// Load settings from a TOML file plus environment overrides.
    ///
    /// Room and threshold invariants are checked here so an invalid file
    /// never reaches a control cycle.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }

        info!("Loading settings from: {}", path.display());
        let settings: Settings = Self::figment(path).extract()?;
        settings.control_config()?;

        debug!(
            "Loaded {} rooms, fan entity {}",
            settings.rooms.len(),
            settings.fan.entity
        );
        Ok(settings)
    }

    /// Provider stack used by [`Settings::load`]
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BREEZE_").split("__"))
            .merge(
                Env::raw()
                    .only(&["HA_URL", "HA_TOKEN"])
                    .map(|key| key.as_str().to_ascii_lowercase().replacen("ha_", "homeassistant.", 1).into()),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use breeze_core::{ControlMode, RoomBehavior};
    use figment::Jail;

    const SETTINGS: &str = r#"
manual_override_entity = "input_boolean.ventilation_manual"

[homeassistant]
url = "http://ha.local:8123"

[fan]
entity = "fan.open_air_mini"

[control]
min_fan_speed = 30
co2_threshold_max = 1400

[memory]
backend = "entity"

[rooms.bathroom]
name = "Bathroom"
valve_entity = "valve.open_air_valve_2"
humidity_sensor = "sensor.open_air_valve_2_humidity"
occupancy_sensor = "light.spots_badkamer"
skip_when_occupied = true

[rooms.living_room]
name = "Living Room"
valve_entity = "valve.open_air_valve_5"
humidity_sensor = "sensor.open_air_valve_5_humidity"
co2_sensor = "sensor.living_co2"
default_valve_position = 50

[rooms.living_room.behavior]
mode = "hysteresis"
humidity_threshold_on = 75
humidity_threshold_off = 68
"#;

    #[test]
    fn test_load_settings_file() {
        Jail::expect_with(|jail| {
            jail.create_file("breeze.toml", SETTINGS)?;
            jail.set_env("HA_TOKEN", "secret-token");

            let settings = Settings::load("breeze.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.homeassistant.url, "http://ha.local:8123");
            assert_eq!(settings.homeassistant.token, "secret-token");
            assert_eq!(settings.homeassistant.timeout_secs, 10);
            assert_eq!(settings.fan.entity, "fan.open_air_mini");
            assert_eq!(settings.control.co2_threshold_max, 1400.0);
            assert_eq!(settings.control.humidity_threshold_on, 70.0);
            assert_eq!(
                settings.memory,
                MemorySettings::Entity {
                    prefix: "input_boolean.breeze_".to_string()
                }
            );
            assert_eq!(settings.apply.retries, 2);

            let living = &settings.rooms["living_room"];
            assert_eq!(living.default_valve_position, 50.0);
            assert_eq!(
                living.behavior,
                RoomBehavior::Hysteresis {
                    humidity_threshold_on: Some(75.0),
                    humidity_threshold_off: Some(68.0),
                }
            );

            let control = settings.control_config().map_err(|e| e.to_string())?;
            assert_eq!(control.mode(), ControlMode::Threshold);
            assert_eq!(settings.redacted().homeassistant.token, "********");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file("breeze.toml", SETTINGS)?;
            jail.set_env("HA_URL", "http://10.0.0.2:8123");
            jail.set_env("BREEZE_CONTROL__MIN_FAN_SPEED", "40");
            jail.set_env("BREEZE_APPLY__DRY_RUN", "true");

            let settings = Settings::load("breeze.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.homeassistant.url, "http://10.0.0.2:8123");
            assert_eq!(settings.control.min_fan_speed, 40);
            assert!(settings.apply.dry_run);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_thresholds_are_fatal() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "breeze.toml",
                r#"
[fan]
entity = "fan.unit"

[control]
humidity_threshold_on = 60
humidity_threshold_off = 65

[rooms.bathroom]
valve_entity = "valve.bath"
humidity_sensor = "sensor.bath_rh"
"#,
            )?;

            let err = Settings::load("breeze.toml").unwrap_err();
            assert!(matches!(err, SettingsError::Invalid(ConfigError::HumidityThresholds { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::load("/nonexistent/breeze.toml").unwrap_err();
        assert!(matches!(err, SettingsError::NotFound(_)));
    }
}
