//! ObjectSet query algebra for the OSDK core.
//!
//! An [`ObjectSet`] is an immutable expression tree over ontology objects:
//! base sets, filters, unions, intersections, subtractions, link traversals
//! and derived-property projections. This crate builds and validates those
//! expressions against an [`osdk_types::OntologySchema`], evaluates where
//! clauses against records, resolves the object types an expression depends
//! on, and computes canonical request fingerprints.
//!
//! # Modules
//!
//! - [`object_set`]: the expression model and its pure builders
//! - [`where_clause`] / [`eval`]: predicate model and interpreter
//! - [`geo`]: geo regions and the distance-unit alias table
//! - [`derived`]: derived-property definitions and their evaluation
//! - [`resolver`]: referenced object types for subscriptions
//! - [`fingerprint`]: page requests and their canonical cache keys
//!
//! # Design Rules
//!
//! 1. Builders never mutate; structurally equal expressions are equal.
//! 2. Invalid expressions fail at construction, never during a fetch.
//! 3. Union and intersect fingerprints ignore member order; subtract does not.

pub mod derived;
pub mod error;
pub mod eval;
pub mod fingerprint;
pub mod geo;
pub mod object_set;
pub mod order;
pub mod resolver;
pub mod value;
pub mod where_clause;

pub use derived::{evaluate_derived, DatetimePart, DerivedContext, DerivedProperty, SelectionOp};
pub use error::{QueryError, QueryResult};
pub use eval::{evaluate, evaluate_typed};
pub use fingerprint::{fingerprint, Fingerprint, LoadObjectsRequest, LoadObjectsResponse};
pub use geo::{DistanceUnit, GeoFilter, GeoPoint, Geometry};
pub use object_set::{ObjectSet, MAX_EXPRESSION_DEPTH};
pub use order::{OrderBy, OrderByField, SortDirection};
pub use resolver::{extract_object_types, referenced_object_types};
pub use value::StringOrder;
pub use where_clause::{Operand, PropertyFilter, WhereClause};
