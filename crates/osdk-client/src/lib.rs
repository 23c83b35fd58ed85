//! Observable ontology client for the OSDK core.
//!
//! [`ObservableClient`] ties a [`Transport`] to one [`osdk_cache::ObservableCache`].
//! Page fetches go through a [`FetchOrchestrator`] that coalesces identical
//! in-flight requests by fingerprint. [`LiveQuery`] keeps a subscribed list
//! current from the server's event stream, and edits are shown in the cache
//! before the server confirms them.
//!
//! Two transports ship with the crate: [`HttpTransport`] for a real server
//! and [`InMemoryTransport`] for an in-process [`osdk_faux::FauxOntology`].
//!
//! # Design Rules
//!
//! 1. Expressions are validated before anything is sent.
//! 2. Equivalent requests in flight at the same time reach the server once;
//!    completed results are not reused.
//! 3. A rejected edit submission leaves the cache exactly as it was.
//! 4. A lost or closed event stream marks its list out of date; the client
//!    does not reconnect on its own.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod orchestrator;
pub mod pager;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{LiveQuery, ObservableClient};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, TransportError, TransportResult};
pub use http::HttpTransport;
pub use memory::InMemoryTransport;
pub use orchestrator::{FetchOrchestrator, PageOptions};
pub use pager::Pager;
pub use transport::{ByteStream, Transport};
