use std::sync::Arc;

use osdk_query::{LoadObjectsResponse, ObjectSet, OrderBy};
use osdk_types::ObjectRecord;

use crate::error::ClientResult;
use crate::orchestrator::{FetchOrchestrator, PageOptions};

#[derive(Clone, Debug, PartialEq, Eq)]
enum PagerState {
    /// The next fetch uses this continuation token; `None` is the first page.
    Ready(Option<String>),
    Exhausted,
}

/// Walks an object set page by page.
///
/// A failed fetch leaves the pager where it was, so the same page can be
/// retried.
#[derive(Debug)]
pub struct Pager {
    orchestrator: FetchOrchestrator,
    object_set: ObjectSet,
    page_size: Option<u32>,
    order_by: OrderBy,
    state: PagerState,
}

impl Pager {
    pub fn new(orchestrator: FetchOrchestrator, object_set: ObjectSet) -> Self {
        Self {
            orchestrator,
            object_set,
            page_size: None,
            order_by: OrderBy::default(),
            state: PagerState::Ready(None),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == PagerState::Exhausted
    }

    /// Start over from the first page.
    pub fn reset(&mut self) {
        self.state = PagerState::Ready(None);
    }

    /// The next page, or `None` once the last one has been returned.
    pub async fn next_page(&mut self) -> ClientResult<Option<Arc<LoadObjectsResponse>>> {
        let PagerState::Ready(token) = &self.state else {
            return Ok(None);
        };
        let options = PageOptions {
            page_size: self.page_size,
            page_token: token.clone(),
            order_by: self.order_by.clone(),
        };
        let page = self.orchestrator.fetch_page(&self.object_set, options).await?;
        self.state = match &page.next_page_token {
            Some(next) => PagerState::Ready(Some(next.clone())),
            None => PagerState::Exhausted,
        };
        Ok(Some(page))
    }

    /// Every remaining object, in page order.
    pub async fn collect_all(&mut self) -> ClientResult<Vec<ObjectRecord>> {
        let mut objects = Vec::new();
        while let Some(page) = self.next_page().await? {
            objects.extend(page.data.iter().cloned());
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use osdk_types::{ApiError, PrimaryKey};

    use crate::error::{ClientError, TransportError};
    use crate::testing::{seeded_transport, todo_schema};

    fn pager(transport: &Arc<crate::InMemoryTransport>) -> Pager {
        let orchestrator = FetchOrchestrator::new(transport.clone(), Arc::new(todo_schema()));
        Pager::new(orchestrator, ObjectSet::base("Todo"))
    }

    #[tokio::test]
    async fn walks_pages_until_exhausted() {
        let transport = Arc::new(seeded_transport(5));
        let mut pager = pager(&transport).with_page_size(2);

        let mut sizes = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            sizes.push(page.data.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(pager.is_exhausted());
        assert!(pager.next_page().await.unwrap().is_none());
        assert_eq!(transport.load_calls(), 3);
    }

    #[tokio::test]
    async fn collect_all_respects_order() {
        let transport = Arc::new(seeded_transport(4));
        let mut pager = pager(&transport)
            .with_page_size(3)
            .with_order_by(OrderBy::new().desc("id"));
        let keys: Vec<PrimaryKey> = pager
            .collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.identity.primary_key)
            .collect();
        assert_eq!(keys, vec![4.into(), 3.into(), 2.into(), 1.into()]);
    }

    #[tokio::test]
    async fn failed_page_can_be_retried() {
        let transport = Arc::new(seeded_transport(3));
        let mut pager = pager(&transport).with_page_size(2);
        pager.next_page().await.unwrap();

        transport.fail_next(TransportError::Server(ApiError::internal("flaky")));
        assert!(matches!(
            pager.next_page().await,
            Err(ClientError::Server(_))
        ));
        assert!(!pager.is_exhausted());

        let last = pager.next_page().await.unwrap().unwrap();
        assert_eq!(last.data.len(), 1);
        assert!(pager.is_exhausted());
    }

    #[tokio::test]
    async fn reset_starts_over() {
        let transport = Arc::new(seeded_transport(1));
        let mut pager = pager(&transport);
        assert_eq!(pager.collect_all().await.unwrap().len(), 1);
        pager.reset();
        assert_eq!(pager.collect_all().await.unwrap().len(), 1);
    }
}
