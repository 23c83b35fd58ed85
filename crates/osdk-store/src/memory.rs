use std::sync::{Arc, RwLock};

use osdk_query::{LoadObjectsRequest, LoadObjectsResponse, ObjectSet};
use osdk_types::{
    LinkCardinality, LinkSides, ObjectIdentity, ObjectRecord, OntologySchema, PropertyMap,
};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::evaluate::{Evaluator, StoreState};
use crate::traits::ObjectBackend;

/// Page size used when a request does not name one.
pub const DEFAULT_PAGE_SIZE: u32 = 1_000;
/// Largest page a single request may return.
pub const MAX_PAGE_SIZE: u32 = 10_000;

/// In-memory ontology object store.
///
/// Holds objects and a bidirectional link index behind one `RwLock`, and
/// evaluates object-set expressions against them. Used as the faux backend
/// and by tests. [`fork`](Self::fork) and [`absorb`](Self::absorb) give
/// copy-on-write transactions.
pub struct InMemoryObjectStore {
    schema: Arc<OntologySchema>,
    state: RwLock<StoreState>,
}

impl InMemoryObjectStore {
    pub fn new(schema: OntologySchema) -> Self {
        Self {
            schema: Arc::new(schema),
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().expect("lock poisoned").objects.is_empty()
    }

    /// Remove every object and link.
    pub fn clear(&self) {
        *self.state.write().expect("lock poisoned") = StoreState::default();
    }

    /// Every stored identity, sorted.
    pub fn identities(&self) -> Vec<ObjectIdentity> {
        let state = self.state.read().expect("lock poisoned");
        state.objects.keys().cloned().collect()
    }

    /// Identities reachable from `source` through `link`.
    pub fn linked(&self, source: &ObjectIdentity, link: &str) -> StoreResult<Vec<ObjectIdentity>> {
        self.schema.link(&source.object_type, link).map_err(|_| {
            StoreError::LinkTypeNotFound {
                object_type: source.object_type.clone(),
                link: link.to_string(),
            }
        })?;
        let state = self.state.read().expect("lock poisoned");
        Ok(state.targets(source, link))
    }

    /// Independent copy of the current contents, sharing the schema.
    pub fn fork(&self) -> Self {
        let state = self.state.read().expect("lock poisoned").clone();
        Self {
            schema: Arc::clone(&self.schema),
            state: RwLock::new(state),
        }
    }

    /// Replace this store's contents with those of `other`.
    pub fn absorb(&self, other: InMemoryObjectStore) {
        let incoming = match other.state.into_inner() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *self.state.write().expect("lock poisoned") = incoming;
    }

    /// Every member of `object_set`, after validating it against the schema.
    pub fn evaluate(&self, object_set: &ObjectSet) -> StoreResult<Vec<ObjectRecord>> {
        object_set.validate(&self.schema)?;
        let state = self.state.read().expect("lock poisoned");
        Evaluator::new(&self.schema, &state).objects(object_set, None)
    }

    /// One page of a load request.
    ///
    /// Results are sorted by the request's `order_by` (stable, so ties keep
    /// evaluation order), timestamps and dates chronologically and other
    /// strings byte-wise. Continuation tokens are decimal offsets.
    pub fn load_page(&self, request: &LoadObjectsRequest) -> StoreResult<LoadObjectsResponse> {
        let mut rows = self.evaluate(&request.object_set)?;
        if !request.order_by.is_empty() {
            let definition = request.object_set.result_definition(&self.schema)?;
            rows.sort_by(|a, b| {
                request
                    .order_by
                    .compare_typed(&definition, &a.properties, &b.properties)
            });
        }
        let offset = match &request.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::InvalidPageToken(token.clone()))?,
            None => 0,
        };
        let total = rows.len();
        if offset > total {
            return Err(StoreError::InvalidPageToken(offset.to_string()));
        }
        let size = request
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE) as usize;
        let end = (offset + size).min(total);
        let data: Vec<ObjectRecord> = rows.drain(offset..end).collect();
        debug!(
            returned = data.len(),
            total,
            offset,
            "loaded object page"
        );
        Ok(LoadObjectsResponse {
            data,
            next_page_token: (end < total).then(|| end.to_string()),
            total_count: Some(total as u64),
        })
    }

    fn check_link(&self, sides: &LinkSides, source: &ObjectIdentity, target: &ObjectIdentity) -> StoreResult<()> {
        if source.object_type != sides.source_type || target.object_type != sides.target_type {
            return Err(StoreError::InvalidEdit(format!(
                "link {}.{} joins {} to {}, got {source} and {target}",
                sides.source_type, sides.forward, sides.source_type, sides.target_type
            )));
        }
        Ok(())
    }

    fn is_single(&self, object_type: &str, link: &str) -> StoreResult<bool> {
        Ok(self.schema.link(object_type, link)?.cardinality == LinkCardinality::One)
    }
}

impl ObjectBackend for InMemoryObjectStore {
    fn schema(&self) -> &OntologySchema {
        &self.schema
    }

    fn read(&self, identity: &ObjectIdentity) -> StoreResult<Option<ObjectRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.record(identity))
    }

    fn insert(&self, record: ObjectRecord) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.objects.contains_key(&record.identity) {
            return Err(StoreError::Conflict(record.identity));
        }
        state.objects.insert(record.identity, record.properties);
        Ok(())
    }

    fn replace(&self, record: ObjectRecord) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        match state.objects.get_mut(&record.identity) {
            Some(props) => {
                *props = record.properties;
                Ok(())
            }
            None => Err(StoreError::NotFound(record.identity)),
        }
    }

    fn remove(&self, identity: &ObjectIdentity) -> StoreResult<ObjectRecord> {
        let mut state = self.state.write().expect("lock poisoned");
        let properties: PropertyMap = state
            .objects
            .remove(identity)
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;
        state.unlink_all(identity);
        Ok(ObjectRecord::new(identity.clone(), properties))
    }

    fn link(
        &self,
        sides: &LinkSides,
        source: &ObjectIdentity,
        target: &ObjectIdentity,
    ) -> StoreResult<bool> {
        self.check_link(sides, source, target)?;
        let forward_single = self.is_single(&sides.source_type, &sides.forward)?;
        let inverse_single = match &sides.inverse {
            Some(inverse) => self.is_single(&sides.target_type, inverse)?,
            None => false,
        };

        let mut state = self.state.write().expect("lock poisoned");
        for identity in [source, target] {
            if !state.objects.contains_key(identity) {
                return Err(StoreError::NotFound(identity.clone()));
            }
        }
        let added = state.add_side(
            source,
            &sides.forward,
            forward_single,
            target,
            sides.inverse.as_deref(),
        );
        if let Some(inverse) = &sides.inverse {
            state.add_side(target, inverse, inverse_single, source, Some(&sides.forward));
        }
        Ok(added)
    }

    fn unlink(
        &self,
        sides: &LinkSides,
        source: &ObjectIdentity,
        target: &ObjectIdentity,
    ) -> StoreResult<bool> {
        self.check_link(sides, source, target)?;
        let mut state = self.state.write().expect("lock poisoned");
        for identity in [source, target] {
            if !state.objects.contains_key(identity) {
                return Err(StoreError::NotFound(identity.clone()));
            }
        }
        let removed = state.remove_side(source, &sides.forward, target);
        if let Some(inverse) = &sides.inverse {
            state.remove_side(target, inverse, source);
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &state.objects.len())
            .field("linked_objects", &state.links.len())
            .finish()
    }
}
