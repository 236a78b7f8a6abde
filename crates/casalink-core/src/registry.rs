// ── Control registry ──
//
// Owns the live set of controls and keeps the dispatcher's routing table
// in step with it. Loading a structure document replaces everything;
// individual controls can also be added or removed at runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use casalink_proto::ObjectId;

use crate::dispatcher::StateDispatcher;
use crate::error::CoreError;
use crate::model::{Control, ControlDef, StateRecord, StructureDoc};

#[derive(Debug, Default)]
pub struct ControlRegistry {
    controls: Mutex<HashMap<ObjectId, Arc<Control>>>,
    dispatcher: StateDispatcher,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatcher(&self) -> &StateDispatcher {
        &self.dispatcher
    }

    /// Replace the registry's contents with the document's controls.
    ///
    /// Nested controls are promoted to first-class entries. Returns the
    /// number of controls registered. State values do not survive a
    /// reload; they refill as telemetry arrives.
    pub fn load_structure(&self, doc: &StructureDoc) -> Result<usize, CoreError> {
        let mut built = Vec::new();
        for (id, def) in &doc.controls {
            collect_controls(id, def, &mut built)?;
        }

        self.dispatcher.clear();
        let mut controls = self.lock();
        controls.clear();
        let count = built.len();
        for control in built {
            for record in &control.states {
                self.dispatcher.register(Arc::clone(record));
            }
            controls.insert(control.id, control);
        }

        tracing::info!(
            controls = count,
            states = self.dispatcher.len(),
            "structure loaded"
        );
        Ok(count)
    }

    /// Register one control and wire its states into the dispatcher.
    pub fn add_control(&self, control: Arc<Control>) {
        for record in &control.states {
            self.dispatcher.register(Arc::clone(record));
        }
        self.lock().insert(control.id, control);
    }

    /// Remove a control and all of its state routing.
    pub fn remove_control(&self, id: &ObjectId) -> Result<(), CoreError> {
        let removed = self.lock().remove(id);
        match removed {
            Some(_) => {
                self.dispatcher.unregister_control(*id);
                Ok(())
            }
            None => Err(CoreError::ControlNotFound {
                identifier: id.to_string(),
            }),
        }
    }

    pub fn control(&self, id: &ObjectId) -> Option<Arc<Control>> {
        self.lock().get(id).cloned()
    }

    pub fn control_by_name(&self, name: &str) -> Option<Arc<Control>> {
        self.lock().values().find(|c| c.name == name).cloned()
    }

    /// Snapshot of all registered controls, unordered.
    pub fn controls(&self) -> Vec<Arc<Control>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectId, Arc<Control>>> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build a control (and, recursively, its nested controls) from its
/// definition.
fn collect_controls(
    id: &str,
    def: &ControlDef,
    out: &mut Vec<Arc<Control>>,
) -> Result<(), CoreError> {
    let control_id = parse_id(id)?;

    let mut states = Vec::new();
    for (state_name, state_ref) in &def.states {
        for raw in state_ref.ids() {
            let state_id = parse_id(raw)?;
            states.push(Arc::new(StateRecord::new(state_id, control_id, state_name)));
        }
    }

    out.push(Arc::new(Control {
        id: control_id,
        name: def.name.clone(),
        kind: def.kind.clone(),
        states,
    }));

    for (sub_id, sub_def) in &def.sub_controls {
        collect_controls(sub_id, sub_def, out)?;
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<ObjectId, CoreError> {
    ObjectId::parse(raw).map_err(|e| CoreError::StructureInvalid {
        detail: e.to_string(),
    })
}
