//! Fixtures shared by the unit tests.

use std::sync::Arc;

use osdk_faux::FauxOntology;
use osdk_store::{Edit, EditRequest};
use osdk_types::{LinkCardinality, ObjectTypeDefinition, OntologySchema, PropertyKind};
use serde_json::json;

use crate::memory::InMemoryTransport;

pub(crate) fn todo_schema() -> OntologySchema {
    OntologySchema::new()
        .with_object_type(
            ObjectTypeDefinition::new("Todo", "id")
                .with_property("id", PropertyKind::Integer)
                .with_property("title", PropertyKind::String)
                .with_property("done", PropertyKind::Boolean)
                .with_link("assignee", "Person", Some("todos"), LinkCardinality::One),
        )
        .with_object_type(
            ObjectTypeDefinition::new("Person", "name")
                .with_property("name", PropertyKind::String)
                .with_link("todos", "Todo", Some("assignee"), LinkCardinality::Many),
        )
}

/// Faux ontology holding todos `1..=count`, none done.
pub(crate) fn seeded_ontology(count: i64) -> Arc<FauxOntology> {
    let ontology = FauxOntology::new(todo_schema(), 64);
    let edits = (1..=count)
        .map(|id| Edit::AddObject {
            object_type: "Todo".into(),
            primary_key: id.into(),
            properties: serde_json::from_value(json!({
                "title": format!("todo {id}"),
                "done": false,
            }))
            .unwrap(),
        })
        .collect();
    ontology.apply_edits(EditRequest { edits }).unwrap();
    Arc::new(ontology)
}

pub(crate) fn seeded_transport(count: i64) -> InMemoryTransport {
    InMemoryTransport::new(seeded_ontology(count))
}
