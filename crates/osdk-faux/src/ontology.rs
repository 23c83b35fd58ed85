//! The faux ontology: an in-memory store plus a live change feed.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream, StreamExt};
use osdk_query::{referenced_object_types, LoadObjectsRequest, LoadObjectsResponse};
use osdk_store::{apply_edits, Edit, EditRequest, InMemoryObjectStore, ObjectBackend, ObjectEdits};
use osdk_stream::{ObjectSetUpdate, ObjectState, StreamMessage, SubscribeRequest, SubscribeResponse};
use osdk_types::{ObjectIdentity, ObjectRecord, OntologySchema};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::error::FauxResult;
use crate::fixture::Fixture;

type ChangeBatch = Arc<Vec<ObjectSetUpdate>>;

/// In-memory stand-in for a remote ontology.
///
/// Pages are served straight from the store. Edit submissions are
/// serialized, applied all-or-none, and fanned out to every open
/// subscription as `objectSetChanged` messages.
pub struct FauxOntology {
    store: InMemoryObjectStore,
    commit: Mutex<()>,
    feed: broadcast::Sender<ChangeBatch>,
}

impl FauxOntology {
    pub fn new(schema: OntologySchema, feed_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            store: InMemoryObjectStore::new(schema),
            commit: Mutex::new(()),
            feed,
        }
    }

    /// Build an ontology from a fixture and seed its objects and links.
    pub fn from_fixture(fixture: &Fixture, feed_capacity: usize) -> FauxResult<Self> {
        let ontology = Self::new(fixture.schema.clone(), feed_capacity);
        let edits = fixture.seed(&ontology.store)?;
        info!(
            objects = edits.counters.added_object_count,
            links = edits.counters.added_links_count,
            "seeded faux ontology"
        );
        Ok(ontology)
    }

    pub fn store(&self) -> &InMemoryObjectStore {
        &self.store
    }

    pub fn schema(&self) -> &OntologySchema {
        self.store.schema()
    }

    /// Number of open change-feed subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.feed.receiver_count()
    }

    pub fn load_objects(&self, request: &LoadObjectsRequest) -> FauxResult<LoadObjectsResponse> {
        Ok(self.store.load_page(request)?)
    }

    /// Apply a submitted edit list and publish the resulting object states.
    pub fn apply_edits(&self, request: EditRequest) -> FauxResult<ObjectEdits> {
        let _guard = self.commit.lock().expect("lock poisoned");
        let before: Vec<(ObjectIdentity, Option<ObjectRecord>)> = object_targets(&request.edits)
            .into_iter()
            .map(|identity| -> FauxResult<_> {
                let record = self.store.read(&identity)?;
                Ok((identity, record))
            })
            .collect::<FauxResult<_>>()?;

        let applied = apply_edits(&self.store, request)?;
        let changed: BTreeSet<ObjectIdentity> = object_targets(&applied.edits).into_iter().collect();

        let mut updates = Vec::new();
        for (identity, prior) in before {
            if !changed.contains(&identity) {
                continue;
            }
            match (self.store.read(&identity)?, prior) {
                (Some(object), _) => updates.push(ObjectSetUpdate::Object {
                    state: ObjectState::AddedOrUpdated,
                    object,
                }),
                (None, Some(object)) => updates.push(ObjectSetUpdate::Object {
                    state: ObjectState::Removed,
                    object,
                }),
                (None, None) => {}
            }
        }
        if !updates.is_empty() {
            let published = updates.len();
            // No receivers is fine: nobody is listening.
            let _ = self.feed.send(Arc::new(updates));
            debug!(published, "published object changes");
        }
        Ok(applied)
    }

    /// Open a change stream for one object set.
    ///
    /// The first message acknowledges the subscription; later ones carry
    /// changes to the object types the set reads. A subscriber that falls
    /// behind the feed is told to refetch instead of receiving a gap.
    pub fn subscribe(&self, request: SubscribeRequest) -> FauxResult<BoxStream<'static, StreamMessage>> {
        let SubscribeRequest { id, object_set } = request;
        object_set.validate(self.schema())?;
        let referenced = referenced_object_types(&object_set, self.schema())?;
        let refresh_type = referenced.iter().next().cloned().unwrap_or_default();
        let receiver = self.feed.subscribe();
        debug!(%id, types = referenced.len(), "opened change feed");

        let ack = StreamMessage::SubscribeResponses {
            id: id.clone(),
            responses: vec![SubscribeResponse::Success { id: id.clone() }],
        };
        let changes = BroadcastStream::new(receiver).filter_map(move |batch| {
            let message = match batch {
                Ok(batch) => {
                    let updates: Vec<ObjectSetUpdate> = batch
                        .iter()
                        .filter(|update| match update {
                            ObjectSetUpdate::Object { object, .. } => {
                                referenced.contains(object.object_type())
                            }
                            ObjectSetUpdate::Reference { object_type, .. } => {
                                referenced.contains(object_type)
                            }
                        })
                        .cloned()
                        .collect();
                    (!updates.is_empty()).then(|| StreamMessage::ObjectSetChanged {
                        id: id.clone(),
                        updates,
                    })
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%id, skipped, "subscriber lagged behind change feed");
                    Some(StreamMessage::RefreshObjectSet {
                        id: id.clone(),
                        object_type: refresh_type.clone(),
                    })
                }
            };
            futures::future::ready(message)
        });
        Ok(stream::once(futures::future::ready(ack)).chain(changes).boxed())
    }
}

/// Objects whose stored state an edit list may change, in first-seen order.
fn object_targets(edits: &[Edit]) -> Vec<ObjectIdentity> {
    let mut targets: Vec<ObjectIdentity> = Vec::new();
    for edit in edits {
        if matches!(edit, Edit::AddLink { .. } | Edit::RemoveLink { .. }) {
            continue;
        }
        for identity in edit.touched() {
            if !targets.contains(&identity) {
                targets.push(identity);
            }
        }
    }
    targets
}

impl std::fmt::Debug for FauxOntology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FauxOntology")
            .field("objects", &self.store.len())
            .field("subscribers", &self.feed.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osdk_query::{ObjectSet, PropertyFilter, WhereClause};
    use osdk_store::StoreError;
    use osdk_types::{ObjectTypeDefinition, PrimaryKey, PropertyKind, PropertyMap};
    use serde_json::json;

    fn schema() -> OntologySchema {
        OntologySchema::new()
            .with_object_type(
                ObjectTypeDefinition::new("Todo", "id")
                    .with_property("id", PropertyKind::Integer)
                    .with_property("title", PropertyKind::String),
            )
            .with_object_type(
                ObjectTypeDefinition::new("Person", "name")
                    .with_property("name", PropertyKind::String),
            )
    }

    fn props(value: serde_json::Value) -> PropertyMap {
        serde_json::from_value(value).unwrap()
    }

    fn add(object_type: &str, pk: impl Into<PrimaryKey>, properties: PropertyMap) -> Edit {
        Edit::AddObject {
            object_type: object_type.into(),
            primary_key: pk.into(),
            properties,
        }
    }

    fn request(edits: Vec<Edit>) -> EditRequest {
        EditRequest { edits }
    }

    fn subscribe(ontology: &FauxOntology, set: ObjectSet) -> BoxStream<'static, StreamMessage> {
        ontology
            .subscribe(SubscribeRequest {
                id: "sub".into(),
                object_set: set,
            })
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Pages and edits
    // -----------------------------------------------------------------------

    #[test]
    fn edits_are_visible_to_page_loads() {
        let ontology = FauxOntology::new(schema(), 8);
        let applied = ontology
            .apply_edits(request(vec![
                add("Todo", 1, props(json!({"title": "a"}))),
                add("Todo", 2, props(json!({"title": "b"}))),
            ]))
            .unwrap();
        assert_eq!(applied.counters.added_object_count, 2);

        let page = ontology
            .load_objects(&LoadObjectsRequest::new(ObjectSet::base("Todo")).with_page_size(1))
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("1"));
        assert_eq!(page.total_count, Some(2));
    }

    #[test]
    fn failed_submission_changes_nothing() {
        let ontology = FauxOntology::new(schema(), 8);
        let err = ontology
            .apply_edits(request(vec![
                add("Todo", 1, PropertyMap::new()),
                add("Todo", 1, PropertyMap::new()),
            ]))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::FauxError::Store(StoreError::Conflict(_))
        ));
        assert!(ontology.store().is_empty());
    }

    // -----------------------------------------------------------------------
    // Change feed
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn subscription_acknowledges_then_streams_matching_types() {
        let ontology = FauxOntology::new(schema(), 8);
        let set = ObjectSet::base("Todo")
            .filter(WhereClause::unchecked("title", PropertyFilter::IsNull(false)));
        let mut feed = subscribe(&ontology, set);
        assert_eq!(ontology.subscriber_count(), 1);

        let ack = feed.next().await.unwrap();
        assert!(matches!(ack, StreamMessage::SubscribeResponses { .. }));

        ontology
            .apply_edits(request(vec![add("Person", "ada", PropertyMap::new())]))
            .unwrap();
        ontology
            .apply_edits(request(vec![add("Todo", 7, props(json!({"title": "x"})))]))
            .unwrap();

        let StreamMessage::ObjectSetChanged { id, updates } = feed.next().await.unwrap() else {
            panic!("change expected");
        };
        assert_eq!(id, "sub");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].identity().unwrap(), ObjectIdentity::new("Todo", 7));
    }

    #[tokio::test]
    async fn deletes_publish_the_removed_state() {
        let ontology = FauxOntology::new(schema(), 8);
        ontology
            .apply_edits(request(vec![add("Todo", 1, props(json!({"title": "a"})))]))
            .unwrap();
        let mut feed = subscribe(&ontology, ObjectSet::base("Todo"));
        feed.next().await.unwrap();

        ontology
            .apply_edits(request(vec![Edit::DeleteObject {
                object_type: "Todo".into(),
                primary_key: 1.into(),
            }]))
            .unwrap();
        let StreamMessage::ObjectSetChanged { updates, .. } = feed.next().await.unwrap() else {
            panic!("change expected");
        };
        let ObjectSetUpdate::Object { state, object } = &updates[0] else {
            panic!("object update expected");
        };
        assert_eq!(*state, ObjectState::Removed);
        assert_eq!(object.get("title"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_refresh() {
        let ontology = FauxOntology::new(schema(), 1);
        let mut feed = subscribe(&ontology, ObjectSet::base("Todo"));
        feed.next().await.unwrap();
        for pk in 0..3 {
            ontology
                .apply_edits(request(vec![add("Todo", pk, PropertyMap::new())]))
                .unwrap();
        }
        assert_eq!(
            feed.next().await.unwrap(),
            StreamMessage::RefreshObjectSet {
                id: "sub".into(),
                object_type: "Todo".into(),
            }
        );
    }

    #[test]
    fn invalid_subscription_is_rejected() {
        let ontology = FauxOntology::new(schema(), 8);
        let result = ontology.subscribe(SubscribeRequest {
            id: "bad".into(),
            object_set: ObjectSet::base("Nope"),
        });
        assert!(result.is_err());
        assert_eq!(ontology.subscriber_count(), 0);
    }
}
