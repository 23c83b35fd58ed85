//! Foundation types for the OSDK core.
//!
//! This crate provides the identity, record, and schema types shared by every
//! other OSDK crate: the query algebra validates against the schema, the
//! in-memory store keys objects by identity, and the cache hands out record
//! snapshots.
//!
//! # Key Types
//!
//! - [`PrimaryKey`]: primitive primary-key value (string, integer, boolean)
//! - [`ObjectIdentity`]: `(object type, primary key)` cache and store key
//! - [`ObjectRecord`]: identity plus property values, with the Ontology wire form
//! - [`OntologySchema`]: object types, property kinds, and link types
//! - [`ApiError`]: the wire error payload surfaced across the HTTP boundary

pub mod api_error;
pub mod error;
pub mod identity;
pub mod object;
pub mod schema;

pub use api_error::ApiError;
pub use error::{TypeError, TypeResult};
pub use identity::{ObjectIdentity, PrimaryKey};
pub use object::{apply_patch, ObjectRecord, PropertyMap, API_NAME_KEY, PRIMARY_KEY_KEY};
pub use schema::{
    LinkCardinality, LinkSides, LinkTypeDefinition, ObjectTypeDefinition, OntologySchema,
    PropertyDefinition, PropertyKind,
};
