// ── Domain model ──
//
// Serde types for the structure document the controller serves after
// authentication, plus the runtime types built from it: controls and the
// state records their telemetry lands in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use casalink_proto::{ObjectId, StateValue};

use crate::error::CoreError;

// ── Structure document (wire shape) ──────────────────────────────────

/// The configuration document describing every control the controller
/// exposes. Keys of `controls` are textual object identifiers.
#[derive(Debug, Clone, Deserialize)]
pub struct StructureDoc {
    #[serde(default)]
    pub controls: HashMap<String, ControlDef>,
}

impl StructureDoc {
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::StructureInvalid {
            detail: e.to_string(),
        })
    }
}

/// One control as described by the structure document.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// State name to state identifier(s). Some state kinds carry an array
    /// of identifiers; each entry routes to the same named state.
    #[serde(default)]
    pub states: HashMap<String, StateRef>,
    /// Nested controls, promoted to first-class controls at load time.
    #[serde(rename = "subControls", default)]
    pub sub_controls: HashMap<String, ControlDef>,
}

/// A state's identifier slot: a single id or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StateRef {
    One(String),
    Many(Vec<String>),
}

impl StateRef {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::One(id) => std::slice::from_ref(id).iter().map(String::as_str),
            Self::Many(ids) => ids.as_slice().iter().map(String::as_str),
        }
    }
}

// ── Runtime types ────────────────────────────────────────────────────

/// A live control: identity plus the state records telemetry updates.
#[derive(Debug)]
pub struct Control {
    pub id: ObjectId,
    pub name: String,
    pub kind: String,
    pub states: Vec<Arc<StateRecord>>,
}

impl Control {
    /// The record for a named state, if the control has one.
    pub fn state(&self, name: &str) -> Option<&Arc<StateRecord>> {
        self.states.iter().find(|s| s.name == name)
    }
}

/// Mutable holder for one state's current value.
///
/// Shared between the dispatcher (writer) and control accessors (readers);
/// the lock is held only for the copy, never across await points.
#[derive(Debug)]
pub struct StateRecord {
    /// Identifier telemetry records carry; the dispatch key.
    pub id: ObjectId,
    /// The control this record belongs to.
    pub control: ObjectId,
    /// State name within the control, e.g. `"value"` or `"position"`.
    pub name: String,
    value: Mutex<Option<StateValue>>,
}

impl StateRecord {
    pub fn new(id: ObjectId, control: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            control,
            name: name.into(),
            value: Mutex::new(None),
        }
    }

    /// Current value; `None` until the first update arrives.
    pub fn value(&self) -> Option<StateValue> {
        self.value
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, value: StateValue) {
        *self
            .value
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "controls": {
            "10000000-0000-0000-0000000000000001": {
                "name": "Kitchen Light",
                "type": "Switch",
                "states": { "active": "20000000-0000-0000-0000000000000001" }
            },
            "10000000-0000-0000-0000000000000002": {
                "name": "Blinds",
                "type": "Jalousie",
                "states": {
                    "position": "20000000-0000-0000-0000000000000002",
                    "safety": ["20000000-0000-0000-0000000000000003",
                               "20000000-0000-0000-0000000000000004"]
                },
                "subControls": {
                    "10000000-0000-0000-0000000000000003": {
                        "name": "Blinds Lock",
                        "type": "Lock",
                        "states": { "locked": "20000000-0000-0000-0000000000000005" }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn parses_controls_states_and_sub_controls() {
        let doc = StructureDoc::parse(DOC).expect("parse");
        assert_eq!(doc.controls.len(), 2);

        let blinds = &doc.controls["10000000-0000-0000-0000000000000002"];
        assert_eq!(blinds.kind, "Jalousie");
        assert_eq!(blinds.states["position"].ids().count(), 1);
        assert_eq!(blinds.states["safety"].ids().count(), 2);
        assert_eq!(blinds.sub_controls.len(), 1);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            StructureDoc::parse("<html>"),
            Err(CoreError::StructureInvalid { .. })
        ));
    }

    #[test]
    fn state_record_starts_empty() {
        let record = StateRecord::new(ObjectId([1; 16]), ObjectId([2; 16]), "active");
        assert_eq!(record.value(), None);
        record.set(StateValue::Number(1.0));
        assert_eq!(record.value(), Some(StateValue::Number(1.0)));
    }
}
