//! Home Assistant REST client
//!
//! Synchronous client over `/api/states` and `/api/services`. Calls block,
//! so async callers run cycles on the blocking pool.

use std::time::Duration;

use serde_json::{Value, json};

use super::types::EntityState;
use super::{Platform, PlatformError};
use crate::settings::{HomeAssistantSettings, SettingsError};

/// Home Assistant REST API client
pub struct HomeAssistant {
    base_url: String,
    token: String,
    agent: ureq::Agent,
}

impl std::fmt::Debug for HomeAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistant")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HomeAssistant {
    /// Create a client for the given base URL and long-lived token
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token: token.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Create a client from settings, requiring both URL and token
    pub fn from_settings(settings: &HomeAssistantSettings) -> Result<Self, SettingsError> {
        if settings.url.trim().is_empty() {
            return Err(SettingsError::MissingConnection("url"));
        }
        if settings.token.trim().is_empty() {
            return Err(SettingsError::MissingConnection("token"));
        }
        Ok(Self::new(
            settings.url.as_str(),
            settings.token.as_str(),
            Duration::from_secs(settings.timeout_secs),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Content-Type", "application/json")
    }

    fn post(&self, path: &str, body: &Value) -> Result<(), PlatformError> {
        let url = self.url(path);
        self.request("POST", &url)
            .send_json(body)
            .map(|_| ())
            .map_err(|e| request_error(&url, e))
    }
}

fn request_error(url: &str, error: ureq::Error) -> PlatformError {
    match error {
        ureq::Error::Status(status, _) => PlatformError::Status {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(t) => PlatformError::Transport {
            url: url.to_string(),
            message: t.to_string(),
        },
    }
}

impl Platform for HomeAssistant {
    fn entity(&self, entity_id: &str) -> Result<Option<EntityState>, PlatformError> {
        let url = self.url(&format!("/api/states/{entity_id}"));
        match self.request("GET", &url).call() {
            Ok(response) => response
                .into_json::<EntityState>()
                .map(Some)
                .map_err(|e| PlatformError::Decode {
                    url,
                    message: e.to_string(),
                }),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(request_error(&url, e)),
        }
    }

    fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), PlatformError> {
        tracing::debug!("Calling {}.{} with {}", domain, service, data);
        self.post(&format!("/api/services/{domain}/{service}"), data)
    }

    fn set_state(&self, entity_id: &str, state: &str, attributes: &Value) -> Result<(), PlatformError> {
        self.post(
            &format!("/api/states/{entity_id}"),
            &json!({ "state": state, "attributes": attributes }),
        )
    }
}
