use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use osdk_types::{LinkSides, ObjectIdentity, ObjectRecord, OntologySchema, PropertyMap};
use serde_json::Value;

use crate::edit::Edit;
use crate::error::{StoreError, StoreResult};
use crate::traits::ObjectBackend;

/// Backend for a remote ontology: records edits for later submission.
///
/// Only objects seeded with [`seed`](Self::seed) or created through the
/// queue are visible locally, so conflicts and missing objects elsewhere are
/// left for the server to report. Each backend call appends one pending
/// wire edit; modifications are queued as minimal patches.
pub struct RecordingEditQueue {
    schema: Arc<OntologySchema>,
    state: RwLock<QueueState>,
}

#[derive(Default)]
struct QueueState {
    view: BTreeMap<ObjectIdentity, PropertyMap>,
    deleted: BTreeSet<ObjectIdentity>,
    links: BTreeSet<(ObjectIdentity, String, ObjectIdentity)>,
    pending: Vec<Edit>,
}

impl RecordingEditQueue {
    pub fn new(schema: Arc<OntologySchema>) -> Self {
        Self {
            schema,
            state: RwLock::new(QueueState::default()),
        }
    }

    /// Make a server-side object visible to subsequent edits.
    pub fn seed(&self, record: ObjectRecord) {
        let mut state = self.state.write().expect("lock poisoned");
        state.deleted.remove(&record.identity);
        state.view.insert(record.identity, record.properties);
    }

    /// Local view of an object after the queued edits.
    pub fn view(&self, identity: &ObjectIdentity) -> Option<ObjectRecord> {
        let state = self.state.read().expect("lock poisoned");
        state
            .view
            .get(identity)
            .map(|props| ObjectRecord::new(identity.clone(), props.clone()))
    }

    /// Whether the queue has seen `identity` deleted.
    pub fn is_deleted(&self, identity: &ObjectIdentity) -> bool {
        self.state
            .read()
            .expect("lock poisoned")
            .deleted
            .contains(identity)
    }

    pub fn pending_len(&self) -> usize {
        self.state.read().expect("lock poisoned").pending.len()
    }

    /// Drain the queued edits, in submission order.
    pub fn take_pending(&self) -> Vec<Edit> {
        std::mem::take(&mut self.state.write().expect("lock poisoned").pending)
    }
}

impl ObjectBackend for RecordingEditQueue {
    fn schema(&self) -> &OntologySchema {
        &self.schema
    }

    fn read(&self, identity: &ObjectIdentity) -> StoreResult<Option<ObjectRecord>> {
        Ok(self.view(identity))
    }

    fn insert(&self, record: ObjectRecord) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.view.contains_key(&record.identity) {
            return Err(StoreError::Conflict(record.identity));
        }
        state.deleted.remove(&record.identity);
        state.pending.push(Edit::AddObject {
            object_type: record.identity.object_type.clone(),
            primary_key: record.identity.primary_key.clone(),
            properties: record.properties.clone(),
        });
        state.view.insert(record.identity, record.properties);
        Ok(())
    }

    fn replace(&self, record: ObjectRecord) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let current = state
            .view
            .get(&record.identity)
            .ok_or_else(|| StoreError::NotFound(record.identity.clone()))?;
        let patch = diff(current, &record.properties);
        state.pending.push(Edit::ModifyObject {
            object_type: record.identity.object_type.clone(),
            primary_key: record.identity.primary_key.clone(),
            properties: patch,
        });
        state.view.insert(record.identity, record.properties);
        Ok(())
    }

    fn remove(&self, identity: &ObjectIdentity) -> StoreResult<ObjectRecord> {
        let mut state = self.state.write().expect("lock poisoned");
        let properties = state
            .view
            .remove(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        state
            .links
            .retain(|(source, _, target)| source != identity && target != identity);
        state.deleted.insert(identity.clone());
        state.pending.push(Edit::DeleteObject {
            object_type: identity.object_type.clone(),
            primary_key: identity.primary_key.clone(),
        });
        Ok(ObjectRecord::new(identity.clone(), properties))
    }

    fn link(
        &self,
        sides: &LinkSides,
        source: &ObjectIdentity,
        target: &ObjectIdentity,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().expect("lock poisoned");
        if !state
            .links
            .insert((source.clone(), sides.forward.clone(), target.clone()))
        {
            return Ok(false);
        }
        if let Some(inverse) = &sides.inverse {
            state
                .links
                .insert((target.clone(), inverse.clone(), source.clone()));
        }
        state.pending.push(Edit::AddLink {
            link_type_api_name_a_to_b: sides.forward.clone(),
            link_type_api_name_b_to_a: sides.inverse.clone(),
            a_side_object: source.clone(),
            b_side_object: target.clone(),
        });
        Ok(true)
    }

    fn unlink(
        &self,
        sides: &LinkSides,
        source: &ObjectIdentity,
        target: &ObjectIdentity,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().expect("lock poisoned");
        state
            .links
            .remove(&(source.clone(), sides.forward.clone(), target.clone()));
        if let Some(inverse) = &sides.inverse {
            state
                .links
                .remove(&(target.clone(), inverse.clone(), source.clone()));
        }
        // Links created before the queue existed are unknown locally, so
        // removal is always forwarded.
        state.pending.push(Edit::RemoveLink {
            link_type_api_name_a_to_b: sides.forward.clone(),
            link_type_api_name_b_to_a: sides.inverse.clone(),
            a_side_object: source.clone(),
            b_side_object: target.clone(),
        });
        Ok(true)
    }

    fn exists(&self, identity: &ObjectIdentity) -> StoreResult<bool> {
        Ok(self.state.read().expect("lock poisoned").view.contains_key(identity))
    }
}

impl std::fmt::Debug for RecordingEditQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("RecordingEditQueue")
            .field("visible", &state.view.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// Patch turning `from` into `to`; removed keys map to `null`.
fn diff(from: &PropertyMap, to: &PropertyMap) -> PropertyMap {
    let mut patch = PropertyMap::new();
    for (key, value) in to {
        if from.get(key) != Some(value) {
            patch.insert(key.clone(), value.clone());
        }
    }
    for key in from.keys() {
        if !to.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    patch
}
