// ── State dispatch ──
//
// Routes decoded telemetry records to the state records registered for
// their identifier. Several controls may listen to the same identifier;
// each registered record gets the value.
//
// Lock discipline: one coarse mutex over the whole routing table. Updates
// arrive from a single supervisor task and registrations happen in bursts
// at (re)configuration time, so contention is not a concern; what matters
// is that lookup plus delivery is atomic against concurrent rewiring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use casalink_proto::{ObjectId, StateUpdate, StateValue};

use crate::model::StateRecord;

#[derive(Debug, Default)]
pub struct StateDispatcher {
    routes: Mutex<HashMap<ObjectId, Vec<Arc<StateRecord>>>>,
}

impl StateDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record under its state identifier.
    pub fn register(&self, record: Arc<StateRecord>) {
        self.lock().entry(record.id).or_default().push(record);
    }

    /// Remove every record belonging to `control`, pruning buckets that
    /// end up empty.
    pub fn unregister_control(&self, control: ObjectId) {
        let mut routes = self.lock();
        routes.retain(|_, records| {
            records.retain(|r| r.control != control);
            !records.is_empty()
        });
    }

    /// Drop the whole routing table.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Deliver one telemetry record. Returns how many state records it
    /// reached; zero is normal for states no control cares about.
    pub fn apply(&self, update: &StateUpdate) -> usize {
        let routes = self.lock();
        let Some(records) = routes.get(&update.id) else {
            tracing::trace!(id = %update.id, "update for unregistered state");
            return 0;
        };
        for record in records {
            record.set(update.value.clone());
        }
        records.len()
    }

    /// Current value under a state identifier, from the first registered
    /// record.
    pub fn value(&self, id: &ObjectId) -> Option<StateValue> {
        self.lock().get(id)?.first()?.value()
    }

    /// Number of distinct state identifiers with at least one listener.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectId, Vec<Arc<StateRecord>>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
