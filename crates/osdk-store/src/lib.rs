//! Ontology object storage and edits for the OSDK core.
//!
//! This crate holds the in-memory object store that backs the faux ontology
//! server and deterministic tests. It evaluates object-set expressions
//! (set algebra, link traversal, derived properties), serves pages, and
//! applies edit batches with copy-on-write transactions.
//!
//! # Backends
//!
//! All backends implement [`ObjectBackend`]:
//!
//! - [`InMemoryObjectStore`] -- objects plus a bidirectional link index
//! - [`RecordingEditQueue`] -- local view of a remote ontology that queues
//!   wire edits for submission
//!
//! # Design Rules
//!
//! 1. A failed edit leaves the backend, the edit log, and the counters as
//!    they were.
//! 2. A modification whose result equals the current record is not an edit.
//! 3. Both sides of a link change in one backend call.
//! 4. Union, intersect, and subtract compare members by identity; no result
//!    contains the same identity twice.

pub mod batch;
pub mod edit;
pub mod error;
mod evaluate;
pub mod memory;
pub mod queue;
pub mod traits;
pub mod transaction;

pub use batch::EditBatch;
pub use edit::{Edit, EditCounters, EditRequest, ObjectEdits};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryObjectStore, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use queue::RecordingEditQueue;
pub use traits::ObjectBackend;
pub use transaction::{apply_edits, transact, Transaction};
