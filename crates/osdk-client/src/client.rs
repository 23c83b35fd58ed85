//! The observable client: cached fetches, live queries, and optimistic edits.

use std::fmt;
use std::sync::Arc;

use futures::stream::StreamExt;
use osdk_cache::{
    AttachMode, CacheChange, CacheError, ObservableCache, OptimisticUpdate, Subscription,
    SubscriptionEvent, SubscriptionId,
};
use osdk_query::{LoadObjectsResponse, ObjectSet};
use osdk_store::{Edit, EditBatch, EditRequest, ObjectEdits, RecordingEditQueue, StoreResult};
use osdk_stream::{
    parse_sse_events, ObjectSetUpdate, ObjectState, StreamError, StreamMessage, StreamResult,
    SubscribeRequest, SubscribeResponse,
};
use osdk_types::{ObjectIdentity, ObjectRecord, OntologySchema, PropertyMap};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::http::HttpTransport;
use crate::orchestrator::{FetchOrchestrator, PageOptions};
use crate::pager::Pager;
use crate::transport::{ByteStream, Transport};

/// Entry point for reading and writing an ontology through one shared
/// cache.
///
/// Cloning yields another handle to the same cache, transport, and
/// in-flight fetches.
#[derive(Clone)]
pub struct ObservableClient {
    schema: Arc<OntologySchema>,
    transport: Arc<dyn Transport>,
    cache: ObservableCache,
    orchestrator: FetchOrchestrator,
    page_size: Option<u32>,
    edits: Arc<Mutex<()>>,
}

impl ObservableClient {
    pub fn new(schema: OntologySchema, transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        let schema = Arc::new(schema);
        let cache = ObservableCache::with_config(Arc::clone(&schema), config.cache.clone());
        let orchestrator = FetchOrchestrator::new(Arc::clone(&transport), Arc::clone(&schema))
            .with_cache(cache.clone());
        Self {
            schema,
            transport,
            cache,
            orchestrator,
            page_size: config.page_size,
            edits: Arc::new(Mutex::new(())),
        }
    }

    /// Client speaking HTTP to `config.base_url`.
    pub fn connect(schema: OntologySchema, config: &ClientConfig) -> ClientResult<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(schema, Arc::new(transport), config))
    }

    pub fn schema(&self) -> &OntologySchema {
        &self.schema
    }

    pub fn cache(&self) -> &ObservableCache {
        &self.cache
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    /// Fetch one page; its objects are merged into the cache.
    pub async fn fetch_page(
        &self,
        object_set: &ObjectSet,
        options: PageOptions,
    ) -> ClientResult<Arc<LoadObjectsResponse>> {
        self.orchestrator.fetch_page(object_set, options).await
    }

    /// Fetch a single object by identity and merge it into the cache.
    ///
    /// `None` when the server has no such object; a cached copy is then
    /// dropped.
    pub async fn fetch_one(&self, identity: &ObjectIdentity) -> ClientResult<Option<ObjectRecord>> {
        let object_set = ObjectSet::for_object(&self.schema, identity)?;
        let page = self
            .fetch_page(&object_set, PageOptions::default().with_page_size(1))
            .await?;
        match page.data.first() {
            Some(record) => Ok(Some(record.clone())),
            None => {
                if self.cache.remove(identity).is_some() {
                    debug!(%identity, "dropped object the server no longer has");
                }
                Ok(None)
            }
        }
    }

    pub fn pager(&self, object_set: ObjectSet) -> Pager {
        let pager = Pager::new(self.orchestrator.clone(), object_set);
        match self.page_size {
            Some(size) => pager.with_page_size(size),
            None => pager,
        }
    }

    /// Follow `object_set`: load its first page and keep the list current
    /// from the server's change stream.
    ///
    /// The stream is opened before the first page is fetched, so no change
    /// committed after the fetch is missed.
    pub async fn subscribe(&self, object_set: ObjectSet) -> ClientResult<LiveQuery> {
        let subscription = self.cache.subscribe(object_set.clone())?;
        let id = subscription.id();
        let request = SubscribeRequest {
            id: id.to_string(),
            object_set: object_set.clone(),
        };
        let bytes = self.transport.subscribe(&request).await?;
        let listener = tokio::spawn(listen(self.cache.clone(), id, bytes));

        let mut query = LiveQuery {
            client: self.clone(),
            object_set,
            subscription,
            listener,
            next_page: None,
        };
        query.refresh().await?;
        Ok(query)
    }

    /// Follow a single object: the list holds it while it exists.
    pub async fn observe_object(&self, identity: &ObjectIdentity) -> ClientResult<LiveQuery> {
        self.subscribe(ObjectSet::for_object(&self.schema, identity)?)
            .await
    }

    /// Tell every live query reading `object_type` to refetch.
    pub fn invalidate_object_type(&self, object_type: &str) -> usize {
        self.cache.invalidate_object_type(object_type)
    }

    /// Tell every live query holding one of `identities` to refetch.
    pub fn invalidate_objects(&self, identities: &[ObjectIdentity]) -> usize {
        self.cache.invalidate_objects(identities)
    }

    /// Tell every live query to refetch.
    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate_all()
    }

    /// Build an edit batch against the cached objects, show its effect in
    /// the cache at once, and submit it.
    ///
    /// Only cached objects can be modified or deleted. Local validation
    /// failures send nothing. When the server rejects the submission every
    /// optimistic change is rolled back, newest first, and the server error
    /// is returned. Submissions from one client are serialized.
    pub async fn apply_edits<F>(&self, build: F) -> ClientResult<ObjectEdits>
    where
        F: FnOnce(&mut EditBatch<'_, RecordingEditQueue>) -> StoreResult<()>,
    {
        let _serial = self.edits.lock().await;
        let queue = RecordingEditQueue::new(Arc::clone(&self.schema));
        for entry in self.cache.entries() {
            queue.seed(entry.to_record());
        }
        let local = {
            let mut batch = EditBatch::new(&queue);
            build(&mut batch)?;
            batch.finish()
        };
        if local.is_empty() {
            debug!("edit batch changed nothing");
            return Ok(local);
        }

        let request = EditRequest {
            edits: queue.take_pending(),
        };
        let optimistic: Vec<OptimisticUpdate> = edited_objects(&request.edits)
            .into_iter()
            .map(|identity| {
                let next = queue.view(&identity).map(|record| record.properties);
                self.cache.apply_optimistic_update(&identity, move |_| next)
            })
            .collect();

        match self.transport.apply_edits(&request).await {
            Ok(applied) => {
                optimistic.into_iter().for_each(OptimisticUpdate::confirm);
                info!(
                    edits = applied.edits.len(),
                    added = applied.counters.added_object_count,
                    modified = applied.counters.modified_objects_count,
                    deleted = applied.counters.deleted_objects_count,
                    "edits applied"
                );
                Ok(applied)
            }
            Err(err) => {
                let rolled_back = optimistic.len();
                for update in optimistic.into_iter().rev() {
                    update.rollback();
                }
                warn!(%err, rolled_back, "edits rejected");
                Err(err.into())
            }
        }
    }
}

impl fmt::Debug for ObservableClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableClient")
            .field("cache", &self.cache)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

/// Objects whose properties an edit list changes, in first-seen order.
fn edited_objects(edits: &[Edit]) -> Vec<ObjectIdentity> {
    let mut objects: Vec<ObjectIdentity> = Vec::new();
    for edit in edits {
        if matches!(edit, Edit::AddLink { .. } | Edit::RemoveLink { .. }) {
            continue;
        }
        for identity in edit.touched() {
            if !objects.contains(&identity) {
                objects.push(identity);
            }
        }
    }
    objects
}

/// A subscribed object-set list, kept current from fetches and the
/// server's change stream.
///
/// Dropping it unsubscribes and closes the stream.
pub struct LiveQuery {
    client: ObservableClient,
    object_set: ObjectSet,
    subscription: Subscription,
    listener: JoinHandle<()>,
    next_page: Option<String>,
}

impl LiveQuery {
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    pub fn object_set(&self) -> &ObjectSet {
        &self.object_set
    }

    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.subscription.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        self.subscription.try_recv()
    }

    pub fn drain(&mut self) -> Vec<SubscriptionEvent> {
        self.subscription.drain()
    }

    /// Whether the server has more pages of the list.
    pub fn has_more(&self) -> bool {
        self.next_page.is_some()
    }

    /// Reload the first page; the list becomes exactly that page.
    pub async fn refresh(&mut self) -> ClientResult<()> {
        let page = self.fetch(None).await?;
        self.next_page = page.next_page_token.clone();
        self.attach(&page, AttachMode::Replace)
    }

    /// Append the next page. Returns `false` when there is none.
    pub async fn load_more(&mut self) -> ClientResult<bool> {
        let Some(token) = self.next_page.clone() else {
            return Ok(false);
        };
        let page = self.fetch(Some(token)).await?;
        self.next_page = page.next_page_token.clone();
        self.attach(&page, AttachMode::Extend)?;
        Ok(true)
    }

    async fn fetch(&self, page_token: Option<String>) -> ClientResult<Arc<LoadObjectsResponse>> {
        let options = PageOptions {
            page_size: self.client.page_size,
            page_token,
            ..PageOptions::default()
        };
        match self.client.fetch_page(&self.object_set, options).await {
            Ok(page) => Ok(page),
            Err(err) => {
                // The subscription may already be gone; the caller still
                // gets the error.
                let _ = self.client.cache.report_error(self.id(), err.to_cache_error());
                Err(err)
            }
        }
    }

    fn attach(&self, page: &LoadObjectsResponse, mode: AttachMode) -> ClientResult<()> {
        let identities: Vec<ObjectIdentity> =
            page.data.iter().map(|record| record.identity.clone()).collect();
        self.client.cache.attach_results(self.id(), &identities, mode)?;
        Ok(())
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.id())
            .field("has_more", &self.has_more())
            .finish()
    }
}

/// Feed one subscription's change stream into the cache until the stream
/// ends, the server closes it, or the subscription goes away.
async fn listen(cache: ObservableCache, id: SubscriptionId, bytes: ByteStream) {
    let mut events = Box::pin(parse_sse_events(bytes));
    while let Some(event) = events.next().await {
        let open = match event.and_then(|event| StreamMessage::decode(&event)) {
            Ok(message) => handle_message(&cache, id, message),
            Err(StreamError::Transport(msg)) => {
                if cache.report_error(id, CacheError::Stream(msg)).is_err() {
                    return;
                }
                break;
            }
            Err(err) => cache
                .report_error(id, CacheError::Stream(err.to_string()))
                .is_ok(),
        };
        if !open {
            return;
        }
    }
    debug!(%id, "change stream ended");
    let _ = cache.mark_out_of_date(id);
}

/// Apply one stream message. Returns whether to keep listening.
fn handle_message(cache: &ObservableCache, id: SubscriptionId, message: StreamMessage) -> bool {
    match message {
        StreamMessage::SubscribeResponses { responses, .. } => {
            responses.into_iter().all(|response| match response {
                SubscribeResponse::Error { errors } => {
                    let detail = serde_json::Value::Array(errors).to_string();
                    cache.report_error(id, CacheError::Stream(detail)).is_ok()
                }
                SubscribeResponse::Success { .. } | SubscribeResponse::Qos => true,
            })
        }
        StreamMessage::ObjectSetChanged { updates, .. } => {
            let mut changes = Vec::with_capacity(updates.len());
            for update in updates {
                match to_change(update) {
                    Ok(change) => changes.push(change),
                    Err(err) => {
                        if cache.report_error(id, CacheError::Stream(err.to_string())).is_err() {
                            return false;
                        }
                    }
                }
            }
            cache.apply_stream_updates(changes);
            true
        }
        StreamMessage::RefreshObjectSet { object_type, .. } => {
            debug!(%id, %object_type, "server asked for refetch");
            cache.mark_out_of_date(id).is_ok()
        }
        StreamMessage::SubscriptionClosed { cause, .. } => {
            warn!(%id, %cause, "server closed subscription");
            let reason = CacheError::Stream(format!("subscription closed: {cause}"));
            if cache.report_error(id, reason).is_ok() {
                let _ = cache.mark_out_of_date(id);
            }
            false
        }
        StreamMessage::InitialLoadCompleted { .. } => {
            debug!(%id, "initial load completed");
            true
        }
    }
}

fn to_change(update: ObjectSetUpdate) -> StreamResult<CacheChange> {
    let identity = update.identity()?;
    Ok(match update {
        ObjectSetUpdate::Object {
            state: ObjectState::AddedOrUpdated,
            object,
        } => CacheChange::Upsert(object.into()),
        ObjectSetUpdate::Object {
            state: ObjectState::Removed,
            ..
        } => CacheChange::Remove(identity),
        ObjectSetUpdate::Reference {
            property, value, ..
        } => CacheChange::Patch {
            identity,
            patch: PropertyMap::from([(property, value)]),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use osdk_cache::ListUpdate;
    use osdk_query::{PropertyFilter, WhereClause};
    use osdk_store::StoreError;
    use osdk_types::{ApiError, PrimaryKey};
    use serde_json::json;

    use crate::error::{ClientError, TransportError};
    use crate::memory::InMemoryTransport;
    use crate::testing::{seeded_transport, todo_schema};

    fn client(count: i64) -> (ObservableClient, Arc<InMemoryTransport>) {
        let transport = Arc::new(seeded_transport(count));
        let client = ObservableClient::new(todo_schema(), transport.clone(), &ClientConfig::default());
        (client, transport)
    }

    fn todo(id: i64) -> ObjectIdentity {
        ObjectIdentity::new("Todo", id)
    }

    fn props(value: serde_json::Value) -> PropertyMap {
        serde_json::from_value(value).unwrap()
    }

    fn keys(update: &ListUpdate) -> Vec<PrimaryKey> {
        update
            .objects
            .iter()
            .map(|entry| entry.identity.primary_key.clone())
            .collect()
    }

    /// Wait for the next list update, skipping other events.
    async fn next_update(query: &mut LiveQuery) -> ListUpdate {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), query.recv())
                .await
                .expect("timed out waiting for an update")
                .expect("subscription closed");
            if let SubscriptionEvent::Updated(update) = event {
                return update;
            }
        }
    }

    async fn next_event(query: &mut LiveQuery) -> SubscriptionEvent {
        tokio::time::timeout(Duration::from_secs(5), query.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("subscription closed")
    }

    // -----------------------------------------------------------------------
    // Live queries
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn subscribe_loads_first_page() {
        let (client, transport) = client(3);
        let mut query = client.subscribe(ObjectSet::base("Todo")).await.unwrap();
        let update = next_update(&mut query).await;
        assert_eq!(keys(&update), vec![1.into(), 2.into(), 3.into()]);
        assert!(!query.has_more());
        assert_eq!(transport.subscribe_calls(), 1);
        assert_eq!(client.cache().len(), 3);
    }

    #[tokio::test]
    async fn load_more_extends_the_list() {
        let transport = Arc::new(seeded_transport(3));
        let config = ClientConfig {
            page_size: Some(2),
            ..ClientConfig::default()
        };
        let client = ObservableClient::new(todo_schema(), transport, &config);
        let mut query = client.subscribe(ObjectSet::base("Todo")).await.unwrap();
        assert_eq!(keys(&next_update(&mut query).await).len(), 2);
        assert!(query.has_more());

        assert!(query.load_more().await.unwrap());
        assert_eq!(keys(&next_update(&mut query).await).len(), 3);
        assert!(!query.load_more().await.unwrap());
    }

    #[tokio::test]
    async fn server_changes_flow_into_the_list() {
        let (client, transport) = client(2);
        let open = ObjectSet::base("Todo")
            .filter(WhereClause::unchecked("done", PropertyFilter::Eq(false.into())));
        let mut query = client.subscribe(open).await.unwrap();
        next_update(&mut query).await;

        // Another writer marks todo 1 done and adds todo 9.
        transport
            .ontology()
            .apply_edits(EditRequest {
                edits: vec![
                    Edit::ModifyObject {
                        object_type: "Todo".into(),
                        primary_key: 1.into(),
                        properties: props(json!({"done": true})),
                    },
                    Edit::AddObject {
                        object_type: "Todo".into(),
                        primary_key: 9.into(),
                        properties: props(json!({"title": "new", "done": false})),
                    },
                ],
            })
            .unwrap();

        let update = next_update(&mut query).await;
        assert_eq!(keys(&update), vec![2.into(), 9.into()]);
        assert!(!update.invalidated);
        assert_eq!(client.cache().get(&todo(1)).unwrap().properties["done"], json!(true));
    }

    #[tokio::test]
    async fn failed_subscribe_call_leaves_no_subscription() {
        let (client, transport) = client(1);
        transport.fail_next(TransportError::Network("refused".into()));
        let err = client
            .subscribe(ObjectSet::base("Todo"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert_eq!(client.cache().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn refresh_failure_reaches_the_subscription() {
        let (client, transport) = client(1);
        let mut query = client.subscribe(ObjectSet::base("Todo")).await.unwrap();
        next_update(&mut query).await;

        transport.fail_next(TransportError::Server(ApiError::internal("down")));
        assert!(query.refresh().await.is_err());
        assert!(matches!(
            next_event(&mut query).await,
            SubscriptionEvent::Error(CacheError::Server(_))
        ));

        query.refresh().await.unwrap();
        assert_eq!(keys(&next_update(&mut query).await), vec![1.into()]);
    }

    #[tokio::test]
    async fn fetch_one_reads_through_and_forgets_missing_objects() {
        let (client, transport) = client(2);
        let record = client.fetch_one(&todo(2)).await.unwrap().unwrap();
        assert_eq!(record.properties["title"], json!("todo 2"));
        assert_eq!(client.cache().len(), 1);

        transport
            .ontology()
            .apply_edits(EditRequest {
                edits: vec![Edit::DeleteObject {
                    object_type: "Todo".into(),
                    primary_key: 2.into(),
                }],
            })
            .unwrap();
        assert!(client.fetch_one(&todo(2)).await.unwrap().is_none());
        assert!(client.cache().get(&todo(2)).is_none());

        let err = client
            .fetch_one(&ObjectIdentity::new("Todo", "two"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Query(_)));
    }

    #[tokio::test]
    async fn observed_object_sees_local_and_server_changes() {
        let (client, transport) = client(2);
        let mut query = client.observe_object(&todo(1)).await.unwrap();
        assert_eq!(keys(&next_update(&mut query).await), vec![1.into()]);

        client
            .apply_edits(|batch| {
                batch
                    .modify_object(&todo(1), props(json!({"title": "mine"})))
                    .map(drop)
            })
            .await
            .unwrap();
        let update = next_update(&mut query).await;
        assert_eq!(update.objects[0].properties["title"], json!("mine"));

        transport
            .ontology()
            .apply_edits(EditRequest {
                edits: vec![Edit::ModifyObject {
                    object_type: "Todo".into(),
                    primary_key: 1.into(),
                    properties: props(json!({"title": "theirs"})),
                }],
            })
            .unwrap();
        loop {
            let update = next_update(&mut query).await;
            if update.objects[0].properties["title"] == json!("theirs") {
                break;
            }
        }
        // Only the observed object was fetched.
        assert!(client.cache().get(&todo(2)).is_none());
    }

    #[tokio::test]
    async fn invalidation_marks_live_queries_out_of_date() {
        let (client, _transport) = client(2);
        let mut todos = client.subscribe(ObjectSet::base("Todo")).await.unwrap();
        next_update(&mut todos).await;

        assert_eq!(client.invalidate_objects(&[todo(9)]), 0);
        assert_eq!(client.invalidate_objects(&[todo(2)]), 1);
        assert_eq!(next_event(&mut todos).await, SubscriptionEvent::OutOfDate);
        assert_eq!(client.invalidate_object_type("Person"), 0);
        assert_eq!(client.invalidate_all(), 1);
        assert_eq!(next_event(&mut todos).await, SubscriptionEvent::OutOfDate);

        todos.refresh().await.unwrap();
        assert_eq!(keys(&next_update(&mut todos).await).len(), 2);
    }

    #[tokio::test]
    async fn dropping_the_query_unsubscribes() {
        let (client, transport) = client(1);
        let query = client.subscribe(ObjectSet::base("Todo")).await.unwrap();
        assert_eq!(client.cache().subscriber_count(), 1);
        drop(query);
        assert_eq!(client.cache().subscriber_count(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.ontology().subscriber_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn accepted_edits_stay_applied() {
        let (client, transport) = client(2);
        let mut query = client.subscribe(ObjectSet::base("Todo")).await.unwrap();
        next_update(&mut query).await;

        let applied = client
            .apply_edits(|batch| {
                batch.modify_object(&todo(1), props(json!({"title": "renamed"})))?;
                batch.add_object("Todo", 3, props(json!({"title": "third"})))?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(applied.counters.modified_objects_count, 1);
        assert_eq!(applied.counters.added_object_count, 1);
        assert_eq!(transport.edit_calls(), 1);

        // Visible before any stream message arrives.
        let update = next_update(&mut query).await;
        assert_eq!(update.changed, vec![todo(1)]);
        assert_eq!(client.cache().get(&todo(1)).unwrap().properties["title"], json!("renamed"));
        assert_eq!(client.cache().get(&todo(3)).unwrap().properties["title"], json!("third"));
        assert_eq!(transport.ontology().store().len(), 3);
    }

    #[tokio::test]
    async fn rejected_edits_roll_back() {
        let (client, transport) = client(1);
        client
            .fetch_page(&ObjectSet::base("Todo"), PageOptions::default())
            .await
            .unwrap();
        let before = client.cache().get(&todo(1)).unwrap();

        transport.fail_next(TransportError::Server(ApiError::internal("rejected")));
        let err = client
            .apply_edits(|batch| {
                batch.modify_object(&todo(1), props(json!({"done": true})))?;
                batch.delete_object(&todo(1))?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));
        assert_eq!(client.cache().get(&todo(1)), Some(before));
    }

    #[tokio::test]
    async fn locally_invalid_batch_sends_nothing() {
        let (client, transport) = client(0);
        let err = client
            .apply_edits(|batch| batch.delete_object(&todo(42)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Store(StoreError::NotFound(_))));
        assert_eq!(transport.edit_calls(), 0);
    }

    #[tokio::test]
    async fn server_conflict_is_surfaced_with_its_payload() {
        let (client, _transport) = client(1);
        // Todo 1 exists on the server but not in the cache, so only the
        // server can see the conflict.
        let err = client
            .apply_edits(|batch| batch.add_object("Todo", 1, PropertyMap::new()).map(drop))
            .await
            .unwrap_err();
        let ClientError::Server(api) = err else {
            panic!("server error expected");
        };
        assert_eq!(api.error_name, "ObjectAlreadyExists");
        assert!(client.cache().get(&todo(1)).is_none());
    }

    // -----------------------------------------------------------------------
    // Stream conversion
    // -----------------------------------------------------------------------

    fn bare_cache() -> (ObservableCache, Subscription) {
        let cache = ObservableCache::new(Arc::new(todo_schema()));
        let subscription = cache.subscribe(ObjectSet::base("Todo")).unwrap();
        (cache, subscription)
    }

    #[test]
    fn closed_subscription_reports_and_stops() {
        let (cache, mut sub) = bare_cache();
        let open = handle_message(
            &cache,
            sub.id(),
            StreamMessage::SubscriptionClosed {
                id: "s".into(),
                cause: json!("server shutting down"),
            },
        );
        assert!(!open);
        let events = sub.drain();
        assert!(matches!(events[0], SubscriptionEvent::Error(CacheError::Stream(_))));
        assert_eq!(events[1], SubscriptionEvent::OutOfDate);
    }

    #[test]
    fn refresh_request_marks_out_of_date() {
        let (cache, mut sub) = bare_cache();
        let open = handle_message(
            &cache,
            sub.id(),
            StreamMessage::RefreshObjectSet {
                id: "s".into(),
                object_type: "Todo".into(),
            },
        );
        assert!(open);
        assert_eq!(sub.drain(), vec![SubscriptionEvent::OutOfDate]);
    }

    #[test]
    fn rejected_subscription_is_reported() {
        let (cache, mut sub) = bare_cache();
        let open = handle_message(
            &cache,
            sub.id(),
            StreamMessage::SubscribeResponses {
                id: "s".into(),
                responses: vec![SubscribeResponse::Error {
                    errors: vec![json!({"errorName": "ObjectSetNotFound"})],
                }],
            },
        );
        assert!(open);
        assert!(matches!(
            sub.drain().as_slice(),
            [SubscriptionEvent::Error(CacheError::Stream(_))]
        ));
    }

    #[tokio::test]
    async fn stream_end_marks_out_of_date() {
        let (cache, mut sub) = bare_cache();
        let bytes: ByteStream = futures::stream::iter(vec![Ok(bytes::Bytes::from_static(
            b": keep-alive\n\n",
        ))])
        .boxed();
        listen(cache.clone(), sub.id(), bytes).await;
        assert_eq!(sub.drain(), vec![SubscriptionEvent::OutOfDate]);
    }

    #[tokio::test]
    async fn transport_failure_is_reported_then_out_of_date() {
        let (cache, mut sub) = bare_cache();
        let bytes: ByteStream =
            futures::stream::iter(vec![Err(TransportError::Network("reset".into()))]).boxed();
        listen(cache.clone(), sub.id(), bytes).await;
        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SubscriptionEvent::Error(CacheError::Stream(_))));
        assert_eq!(events[1], SubscriptionEvent::OutOfDate);
    }

    #[test]
    fn reference_updates_become_patches() {
        let change = to_change(ObjectSetUpdate::Reference {
            object_type: "Todo".into(),
            primary_key: props(json!({"id": 4})),
            property: "title".into(),
            value: json!("x"),
        })
        .unwrap();
        assert_eq!(
            change,
            CacheChange::Patch {
                identity: todo(4),
                patch: props(json!({"title": "x"})),
            }
        );
    }

    #[test]
    fn link_edits_do_not_touch_cached_objects() {
        let edits = vec![
            Edit::AddLink {
                link_type_api_name_a_to_b: "assignee".into(),
                link_type_api_name_b_to_a: Some("todos".into()),
                a_side_object: todo(1),
                b_side_object: ObjectIdentity::new("Person", "ada"),
            },
            Edit::DeleteObject {
                object_type: "Todo".into(),
                primary_key: 2.into(),
            },
            Edit::DeleteObject {
                object_type: "Todo".into(),
                primary_key: 2.into(),
            },
        ];
        assert_eq!(edited_objects(&edits), vec![todo(2)]);
    }
}
