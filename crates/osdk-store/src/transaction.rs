use tracing::{debug, info};

use crate::batch::EditBatch;
use crate::edit::{EditRequest, ObjectEdits};
use crate::error::StoreResult;
use crate::memory::InMemoryObjectStore;

/// Copy-on-write transaction over an [`InMemoryObjectStore`].
///
/// Edits run against a fork; `commit` swaps the fork in, `abort` (or drop)
/// discards it. Callers serialize transactions on one store: two forks
/// committed concurrently keep only the later one's contents.
pub struct Transaction<'s> {
    target: &'s InMemoryObjectStore,
    working: InMemoryObjectStore,
}

impl<'s> Transaction<'s> {
    pub fn begin(target: &'s InMemoryObjectStore) -> Self {
        Self {
            target,
            working: target.fork(),
        }
    }

    /// The transaction's private view.
    pub fn store(&self) -> &InMemoryObjectStore {
        &self.working
    }

    /// A batch writing to the transaction's view.
    pub fn batch(&self) -> EditBatch<'_, InMemoryObjectStore> {
        EditBatch::new(&self.working)
    }

    pub fn commit(self) {
        debug!(objects = self.working.len(), "committing transaction");
        self.target.absorb(self.working);
    }

    pub fn abort(self) {
        debug!("aborting transaction");
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("working", &self.working)
            .finish()
    }
}

/// Run `body` in a transaction, committing on success and discarding every
/// effect on error.
pub fn transact<T>(
    store: &InMemoryObjectStore,
    body: impl FnOnce(&mut EditBatch<'_, InMemoryObjectStore>) -> StoreResult<T>,
) -> StoreResult<(T, ObjectEdits)> {
    let tx = Transaction::begin(store);
    let mut batch = tx.batch();
    match body(&mut batch) {
        Ok(value) => {
            let edits = batch.finish();
            tx.commit();
            info!(
                edits = edits.edits.len(),
                added = edits.counters.added_object_count,
                modified = edits.counters.modified_objects_count,
                deleted = edits.counters.deleted_objects_count,
                "transaction committed"
            );
            Ok((value, edits))
        }
        Err(err) => {
            drop(batch);
            tx.abort();
            Err(err)
        }
    }
}

/// Replay a submitted edit list in one transaction.
///
/// The returned log holds only the edits that changed something.
pub fn apply_edits(store: &InMemoryObjectStore, request: EditRequest) -> StoreResult<ObjectEdits> {
    let ((), edits) = transact(store, |batch| {
        request.edits.into_iter().try_for_each(|edit| batch.apply(edit))
    })?;
    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::Edit;
    use crate::error::StoreError;
    use crate::traits::ObjectBackend;
    use osdk_types::{ObjectIdentity, ObjectTypeDefinition, OntologySchema, PropertyKind, PropertyMap};

    fn store() -> InMemoryObjectStore {
        InMemoryObjectStore::new(OntologySchema::new().with_object_type(
            ObjectTypeDefinition::new("Todo", "id").with_property("id", PropertyKind::String),
        ))
    }

    #[test]
    fn commit_publishes_edits() {
        let store = store();
        let (id, edits) = transact(&store, |batch| {
            batch.add_object("Todo", "1", PropertyMap::new())
        })
        .unwrap();
        assert_eq!(id, ObjectIdentity::new("Todo", "1"));
        assert_eq!(edits.counters.added_object_count, 1);
        assert!(store.exists(&id).unwrap());
    }

    #[test]
    fn error_discards_whole_batch() {
        let store = store();
        let err = transact(&store, |batch| {
            batch.add_object("Todo", "1", PropertyMap::new())?;
            batch.add_object("Todo", "2", PropertyMap::new())?;
            batch.add_object("Todo", "1", PropertyMap::new())
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn abort_leaves_target_untouched() {
        let store = store();
        let tx = Transaction::begin(&store);
        {
            let mut batch = tx.batch();
            batch.add_object("Todo", "1", PropertyMap::new()).unwrap();
        }
        assert_eq!(tx.store().len(), 1);
        assert!(store.is_empty());
        tx.abort();
        assert!(store.is_empty());
    }

    #[test]
    fn submitted_edits_apply_all_or_none() {
        let store = store();
        let add = |pk: &str| Edit::AddObject {
            object_type: "Todo".into(),
            primary_key: pk.into(),
            properties: PropertyMap::new(),
        };

        let edits = apply_edits(&store, EditRequest { edits: vec![add("1"), add("2")] }).unwrap();
        assert_eq!(edits.counters.added_object_count, 2);
        assert_eq!(store.len(), 2);

        let err = apply_edits(&store, EditRequest { edits: vec![add("3"), add("1")] }).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.len(), 2);
    }
}
