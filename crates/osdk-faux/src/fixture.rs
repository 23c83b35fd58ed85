//! Seed data for the faux ontology.

use std::path::Path;

use osdk_store::{transact, InMemoryObjectStore, ObjectEdits};
use osdk_types::{ObjectIdentity, ObjectRecord, OntologySchema};
use serde::{Deserialize, Serialize};

use crate::error::{FauxError, FauxResult};

/// A link to create after every object exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixtureLink {
    pub source: ObjectIdentity,
    pub link: String,
    pub target: ObjectIdentity,
}

/// Schema plus initial objects and links.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub schema: OntologySchema,
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    #[serde(default)]
    pub links: Vec<FixtureLink>,
}

impl Fixture {
    pub fn from_json_str(text: &str) -> FauxResult<Self> {
        let fixture: Self =
            serde_json::from_str(text).map_err(|e| FauxError::Fixture(e.to_string()))?;
        fixture
            .schema
            .validate()
            .map_err(|e| FauxError::Fixture(e.to_string()))?;
        Ok(fixture)
    }

    pub fn load(path: &Path) -> FauxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Insert the fixture's objects and links in one transaction.
    pub fn seed(&self, store: &InMemoryObjectStore) -> FauxResult<ObjectEdits> {
        let ((), edits) = transact(store, |batch| {
            for object in &self.objects {
                batch.add_object(
                    &object.identity.object_type,
                    object.identity.primary_key.clone(),
                    object.properties.clone(),
                )?;
            }
            for FixtureLink {
                source,
                link,
                target,
            } in &self.links
            {
                batch.add_link(source, link, target)?;
            }
            Ok(())
        })?;
        Ok(edits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osdk_types::{LinkCardinality, ObjectTypeDefinition, PropertyKind};
    use serde_json::json;

    fn schema() -> OntologySchema {
        OntologySchema::new()
            .with_object_type(
                ObjectTypeDefinition::new("Todo", "id")
                    .with_property("id", PropertyKind::Integer)
                    .with_property("title", PropertyKind::String)
                    .with_link("assignee", "Person", None, LinkCardinality::One),
            )
            .with_object_type(
                ObjectTypeDefinition::new("Person", "name")
                    .with_property("name", PropertyKind::String),
            )
    }

    fn fixture_json() -> String {
        json!({
            "schema": serde_json::to_value(schema()).unwrap(),
            "objects": [
                {"__apiName": "Todo", "__primaryKey": 1, "title": "write docs"},
                {"__apiName": "Person", "__primaryKey": "ada"}
            ],
            "links": [{
                "source": {"objectType": "Todo", "primaryKey": 1},
                "link": "assignee",
                "target": {"objectType": "Person", "primaryKey": "ada"}
            }]
        })
        .to_string()
    }

    #[test]
    fn parses_and_seeds() {
        let fixture = Fixture::from_json_str(&fixture_json()).unwrap();
        assert_eq!(fixture.objects.len(), 2);

        let store = InMemoryObjectStore::new(fixture.schema.clone());
        let edits = fixture.seed(&store).unwrap();
        assert_eq!(edits.counters.added_object_count, 2);
        assert_eq!(edits.counters.added_links_count, 1);
        assert_eq!(
            store
                .linked(&ObjectIdentity::new("Todo", 1), "assignee")
                .unwrap(),
            vec![ObjectIdentity::new("Person", "ada")]
        );
    }

    #[test]
    fn failing_seed_leaves_store_empty() {
        let mut fixture = Fixture::from_json_str(&fixture_json()).unwrap();
        fixture.links[0].target = ObjectIdentity::new("Person", "nobody");
        let store = InMemoryObjectStore::new(fixture.schema.clone());
        assert!(fixture.seed(&store).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_fixture_is_rejected() {
        assert!(matches!(
            Fixture::from_json_str("{\"objects\": 3}"),
            Err(FauxError::Fixture(_))
        ));
    }
}
