//! Local decisions about whether an object belongs to a subscribed list.

use osdk_query::{ObjectSet, WhereClause};
use osdk_types::{ObjectIdentity, ObjectTypeDefinition, OntologySchema};

use crate::entry::CacheEntry;

/// How far list membership can be decided from cached state alone.
///
/// Only a base set, optionally narrowed by filters, is decidable: set
/// algebra, link traversal and derived properties need data the cache may
/// not hold.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Membership {
    Decidable {
        /// Filters compare by this type's property kinds.
        definition: ObjectTypeDefinition,
        clauses: Vec<WhereClause>,
    },
    Opaque,
}

impl Membership {
    pub(crate) fn of(expression: &ObjectSet, schema: &OntologySchema) -> Self {
        match expression {
            ObjectSet::Base { object_type } => match schema.object_type(object_type) {
                Ok(definition) => Self::Decidable {
                    definition: definition.clone(),
                    clauses: Vec::new(),
                },
                Err(_) => Self::Opaque,
            },
            ObjectSet::Filtered {
                source,
                where_clause,
            } => match Self::of(source, schema) {
                Self::Decidable {
                    definition,
                    mut clauses,
                } => {
                    clauses.push(where_clause.clone());
                    Self::Decidable {
                        definition,
                        clauses,
                    }
                }
                Self::Opaque => Self::Opaque,
            },
            _ => Self::Opaque,
        }
    }

    pub(crate) fn is_decidable(&self) -> bool {
        matches!(self, Self::Decidable { .. })
    }

    /// `Some(member?)` when decidable; `None` when the cache cannot tell.
    pub(crate) fn admits(&self, identity: &ObjectIdentity, entry: Option<&CacheEntry>) -> Option<bool> {
        match self {
            Self::Opaque => None,
            Self::Decidable {
                definition,
                clauses,
            } => Some(match entry {
                None => false,
                Some(entry) => {
                    identity.object_type == definition.api_name
                        && clauses
                            .iter()
                            .all(|c| c.matches_typed(definition, &entry.properties))
                }
            }),
        }
    }
}
