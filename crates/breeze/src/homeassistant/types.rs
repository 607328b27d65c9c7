//! Home Assistant entity types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// States Home Assistant reports when a device has no usable value
const UNAVAILABLE: [&str; 4] = ["unavailable", "unknown", "none", ""];

/// Entity as returned by `GET /api/states/<entity_id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Whether the state carries a real value
    pub fn is_available(&self) -> bool {
        !UNAVAILABLE.contains(&self.state.trim().to_ascii_lowercase().as_str())
    }

    /// State parsed as a finite number
    pub fn numeric(&self) -> Option<f64> {
        if !self.is_available() {
            return None;
        }
        self.state.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn is_on(&self) -> bool {
        self.state.eq_ignore_ascii_case("on")
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }

    /// Numeric attribute; numeric strings are accepted too
    pub fn attribute_f64(&self, name: &str) -> Option<f64> {
        let value = match self.attribute(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }
}
