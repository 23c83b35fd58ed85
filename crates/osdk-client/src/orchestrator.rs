//! Coalesced page fetches.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use osdk_cache::ObservableCache;
use osdk_query::{Fingerprint, LoadObjectsRequest, LoadObjectsResponse, ObjectSet, OrderBy};
use osdk_types::OntologySchema;
use tracing::debug;

use crate::error::{ClientResult, TransportError};
use crate::transport::Transport;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<LoadObjectsResponse>, TransportError>>>;

/// Page parameters of one fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageOptions {
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    pub order_by: OrderBy,
}

impl PageOptions {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_page_token(mut self, page_token: impl Into<String>) -> Self {
        self.page_token = Some(page_token.into());
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }
}

/// Issues page fetches, sharing one request among all concurrent callers
/// asking for the same page.
///
/// Each distinct request runs as a spawned task: a caller that stops
/// waiting does not cancel it for the others. The task clears its in-flight
/// slot when it finishes, so a failure is delivered to the callers that
/// were waiting and never to later ones.
#[derive(Clone)]
pub struct FetchOrchestrator {
    transport: Arc<dyn Transport>,
    schema: Arc<OntologySchema>,
    cache: Option<ObservableCache>,
    in_flight: Arc<Mutex<HashMap<Fingerprint, SharedFetch>>>,
}

impl FetchOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, schema: Arc<OntologySchema>) -> Self {
        Self {
            transport,
            schema,
            cache: None,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Merge every fetched page into `cache` exactly once, before any
    /// caller sees it.
    pub fn with_cache(mut self, cache: ObservableCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Number of distinct requests currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("lock poisoned").len()
    }

    /// Fetch one page of `object_set`.
    ///
    /// The expression is validated before anything is sent.
    pub async fn fetch_page(
        &self,
        object_set: &ObjectSet,
        options: PageOptions,
    ) -> ClientResult<Arc<LoadObjectsResponse>> {
        object_set.validate(&self.schema)?;
        let request = LoadObjectsRequest {
            object_set: object_set.clone(),
            page_size: options.page_size,
            page_token: options.page_token,
            order_by: options.order_by,
        };
        let fingerprint = request.fingerprint()?;

        let fetch = {
            let mut in_flight = self.in_flight.lock().expect("lock poisoned");
            match in_flight.get(&fingerprint) {
                Some(running) => {
                    debug!(fingerprint = %fingerprint.short_hex(), "joined in-flight fetch");
                    running.clone()
                }
                None => {
                    // Spawned under the lock: the task cannot clear its slot
                    // before the slot exists.
                    let fetch = self.spawn(fingerprint, request);
                    in_flight.insert(fingerprint, fetch.clone());
                    fetch
                }
            }
        };
        Ok(fetch.await?)
    }

    fn spawn(&self, fingerprint: Fingerprint, request: LoadObjectsRequest) -> SharedFetch {
        let transport = Arc::clone(&self.transport);
        let in_flight = Arc::clone(&self.in_flight);
        let cache = self.cache.clone();
        let ticket = cache.as_ref().map(ObservableCache::begin_fetch);
        debug!(fingerprint = %fingerprint.short_hex(), "issuing fetch");

        let task = tokio::spawn(async move {
            let result = transport.load_objects(&request).await.map(Arc::new);
            if let (Ok(page), Some(cache), Some(ticket)) = (&result, &cache, &ticket) {
                cache.merge_fetch_result(ticket, page.data.iter().cloned());
            }
            in_flight.lock().expect("lock poisoned").remove(&fingerprint);
            debug!(
                fingerprint = %fingerprint.short_hex(),
                ok = result.is_ok(),
                "fetch finished"
            );
            result
        });
        async move {
            task.await
                .unwrap_or_else(|e| Err(TransportError::Network(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("in_flight", &self.in_flight_count())
            .field("caching", &self.cache.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use osdk_query::{PropertyFilter, WhereClause};
    use osdk_types::{ApiError, ObjectIdentity};

    use crate::error::ClientError;
    use crate::testing::{seeded_transport, todo_schema};
    use crate::InMemoryTransport;

    fn orchestrator(transport: &Arc<InMemoryTransport>) -> FetchOrchestrator {
        FetchOrchestrator::new(transport.clone(), Arc::new(todo_schema()))
    }

    fn todos() -> ObjectSet {
        ObjectSet::base("Todo")
    }

    // -----------------------------------------------------------------------
    // Coalescing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn concurrent_identical_fetches_share_one_request() {
        let transport = Arc::new(seeded_transport(3).with_latency(Duration::from_millis(20)));
        let orch = orchestrator(&transport);

        let (q1, q2) = (todos(), todos());
        let (a, b) = tokio::join!(
            orch.fetch_page(&q1, PageOptions::default()),
            orch.fetch_page(&q2, PageOptions::default()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(transport.load_calls(), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.data.len(), 3);
        assert_eq!(orch.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn equivalent_expressions_coalesce() {
        let transport = Arc::new(seeded_transport(3).with_latency(Duration::from_millis(20)));
        let orch = orchestrator(&transport);
        let x = todos().filter(WhereClause::unchecked("id", PropertyFilter::Gte(1.into())));
        let y = todos().filter(WhereClause::unchecked("id", PropertyFilter::Lt(3.into())));

        let (q1, q2) = (x.union([y.clone()]), y.union([x.clone()]));
        let (a, b) = tokio::join!(
            orch.fetch_page(&q1, PageOptions::default()),
            orch.fetch_page(&q2, PageOptions::default()),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(transport.load_calls(), 1);
    }

    #[tokio::test]
    async fn different_pages_are_separate_requests() {
        let transport = Arc::new(seeded_transport(3));
        let orch = orchestrator(&transport);
        let (q1, q2) = (todos(), todos());
        let (a, b) = tokio::join!(
            orch.fetch_page(&q1, PageOptions::default().with_page_size(1)),
            orch.fetch_page(&q2, PageOptions::default().with_page_size(2)),
        );
        assert_eq!(a.unwrap().data.len(), 1);
        assert_eq!(b.unwrap().data.len(), 2);
        assert_eq!(transport.load_calls(), 2);
    }

    #[tokio::test]
    async fn sequential_fetches_are_not_cached() {
        let transport = Arc::new(seeded_transport(1));
        let orch = orchestrator(&transport);
        orch.fetch_page(&todos(), PageOptions::default()).await.unwrap();
        orch.fetch_page(&todos(), PageOptions::default()).await.unwrap();
        assert_eq!(transport.load_calls(), 2);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_cancel_shared_fetch() {
        let transport = Arc::new(seeded_transport(2).with_latency(Duration::from_millis(50)));
        let orch = orchestrator(&transport);

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.fetch_page(&todos(), PageOptions::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(orch.in_flight_count(), 1);
        first.abort();

        let page = orch.fetch_page(&todos(), PageOptions::default()).await.unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(transport.load_calls(), 1);
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failure_reaches_waiters_but_not_later_calls() {
        let transport = Arc::new(seeded_transport(1).with_latency(Duration::from_millis(10)));
        let orch = orchestrator(&transport);
        transport.fail_next(TransportError::Server(ApiError::internal("down")));

        let (q1, q2) = (todos(), todos());
        let (a, b) = tokio::join!(
            orch.fetch_page(&q1, PageOptions::default()),
            orch.fetch_page(&q2, PageOptions::default()),
        );
        assert!(matches!(a, Err(ClientError::Server(_))));
        assert!(matches!(b, Err(ClientError::Server(_))));
        assert_eq!(orch.in_flight_count(), 0);

        let page = orch.fetch_page(&todos(), PageOptions::default()).await.unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(transport.load_calls(), 2);
    }

    #[tokio::test]
    async fn invalid_expression_is_rejected_before_sending() {
        let transport = Arc::new(seeded_transport(1));
        let orch = orchestrator(&transport);
        let err = orch
            .fetch_page(&ObjectSet::base("Nope"), PageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Query(_)));
        assert_eq!(transport.load_calls(), 0);
    }

    #[tokio::test]
    async fn bad_page_token_is_a_server_error() {
        let transport = Arc::new(seeded_transport(1));
        let orch = orchestrator(&transport);
        let err = orch
            .fetch_page(&todos(), PageOptions::default().with_page_token("nope"))
            .await
            .unwrap_err();
        let ClientError::Server(api) = err else {
            panic!("server error expected");
        };
        assert_eq!(api.error_name, "InvalidPageToken");
    }

    // -----------------------------------------------------------------------
    // Cache merge
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn fetched_pages_are_merged_into_the_cache() {
        let transport = Arc::new(seeded_transport(2));
        let cache = ObservableCache::new(Arc::new(todo_schema()));
        let orch = orchestrator(&transport).with_cache(cache.clone());

        orch.fetch_page(&todos(), PageOptions::default()).await.unwrap();
        assert_eq!(cache.len(), 2);
        let entry = cache.get(&ObjectIdentity::new("Todo", 1)).unwrap();
        assert_eq!(entry.version, 1);

        orch.fetch_page(&todos(), PageOptions::default()).await.unwrap();
        assert_eq!(cache.get(&ObjectIdentity::new("Todo", 1)).unwrap().version, 1);
    }
}
