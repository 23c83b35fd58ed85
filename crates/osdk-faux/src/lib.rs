//! Faux ontology server for the OSDK core.
//!
//! Serves an [`InMemoryObjectStore`](osdk_store::InMemoryObjectStore) over
//! the same HTTP surface a remote ontology exposes, so clients can be
//! exercised end to end without one:
//!
//! - `POST /api/v2/ontologies/{ontology}/objectSets/loadObjects` -- one page
//! - `POST /api/v2/ontologies/{ontology}/edits` -- all-or-none edit lists
//! - `POST /api/v2/ontologies/{ontology}/objectSets/subscribe` -- live
//!   changes as server-sent events
//!
//! # Design Rules
//!
//! 1. Edit submissions are serialized; a failed one publishes nothing.
//! 2. Every subscription hears about every committed change to the object
//!    types its set reads, in commit order.
//! 3. Failures answer with the wire error payload and its status code.

pub mod config;
pub mod error;
pub mod fixture;
pub mod handler;
pub mod ontology;
pub mod router;
pub mod server;

pub use config::FauxConfig;
pub use error::{FauxError, FauxResult};
pub use fixture::{Fixture, FixtureLink};
pub use handler::AppState;
pub use ontology::FauxOntology;
pub use router::build_router;
pub use server::FauxServer;
