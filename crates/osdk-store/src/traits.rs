use osdk_types::{LinkSides, ObjectIdentity, ObjectRecord, OntologySchema};

use crate::error::StoreResult;

/// Backing store for an [`EditBatch`](crate::EditBatch).
///
/// Implementations must satisfy:
/// - `insert` never overwrites: an existing identity is a conflict.
/// - `replace` and `remove` never create: a missing identity is not found.
/// - `link`/`unlink` update both sides of a link type in one call, so no
///   reader observes only one side.
pub trait ObjectBackend: Send + Sync {
    /// Ontology the stored objects conform to.
    fn schema(&self) -> &OntologySchema;

    /// Read one object. `Ok(None)` when absent.
    fn read(&self, identity: &ObjectIdentity) -> StoreResult<Option<ObjectRecord>>;

    /// Store a new object.
    fn insert(&self, record: ObjectRecord) -> StoreResult<()>;

    /// Overwrite an existing object.
    fn replace(&self, record: ObjectRecord) -> StoreResult<()>;

    /// Delete an object and every link touching it. Returns the removed record.
    fn remove(&self, identity: &ObjectIdentity) -> StoreResult<ObjectRecord>;

    /// Link `source` to `target` through `sides.forward` and, when declared,
    /// `target` back to `source` through `sides.inverse`. Returns `false`
    /// when the link already existed.
    fn link(
        &self,
        sides: &LinkSides,
        source: &ObjectIdentity,
        target: &ObjectIdentity,
    ) -> StoreResult<bool>;

    /// Remove both sides of a link. Returns `false` when it did not exist.
    fn unlink(
        &self,
        sides: &LinkSides,
        source: &ObjectIdentity,
        target: &ObjectIdentity,
    ) -> StoreResult<bool>;

    /// Whether an object exists.
    fn exists(&self, identity: &ObjectIdentity) -> StoreResult<bool> {
        Ok(self.read(identity)?.is_some())
    }
}
