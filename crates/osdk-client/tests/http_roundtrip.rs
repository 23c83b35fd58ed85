//! The HTTP transport against a faux ontology server on a local port.

use std::sync::Arc;
use std::time::Duration;

use osdk_cache::{ListUpdate, SubscriptionEvent};
use osdk_client::{ClientConfig, ClientError, LiveQuery, ObservableClient, PageOptions};
use osdk_faux::{FauxConfig, FauxOntology, FauxServer};
use osdk_query::{ObjectSet, OrderBy};
use osdk_types::{ObjectIdentity, ObjectTypeDefinition, OntologySchema, PropertyKind, PropertyMap};
use serde_json::json;
use tokio::net::TcpListener;

fn schema() -> OntologySchema {
    OntologySchema::new().with_object_type(
        ObjectTypeDefinition::new("Todo", "id")
            .with_property("id", PropertyKind::Integer)
            .with_property("title", PropertyKind::String),
    )
}

fn props(value: serde_json::Value) -> PropertyMap {
    serde_json::from_value(value).unwrap()
}

async fn start_server() -> (ClientConfig, Arc<FauxOntology>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ontology = Arc::new(FauxOntology::new(schema(), 64));
    let server = FauxServer::new(
        FauxConfig {
            ontology: "todos".into(),
            ..FauxConfig::default()
        },
        ontology.clone(),
    );
    tokio::spawn(server.serve_on(listener));

    let config = ClientConfig {
        base_url: format!("http://{addr}"),
        ontology: "todos".into(),
        ..ClientConfig::default()
    };
    (config, ontology)
}

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

#[tokio::test]
async fn edits_and_pages_over_http() {
    let (config, _ontology) = start_server().await;
    let client = ObservableClient::connect(schema(), &config).unwrap();

    let applied = client
        .apply_edits(|batch| {
            for id in 1..=3 {
                batch.add_object("Todo", id, props(json!({"title": format!("t{id}")})))?;
            }
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(applied.counters.added_object_count, 3);

    let page = client
        .fetch_page(
            &ObjectSet::base("Todo"),
            PageOptions::default()
                .with_page_size(2)
                .with_order_by(OrderBy::new().desc("id")),
        )
        .await
        .unwrap();
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.total_count, Some(3));
    assert_eq!(page.data[0].identity, ObjectIdentity::new("Todo", 3));
    assert!(page.next_page_token.is_some());

    let all = client.pager(ObjectSet::base("Todo")).collect_all().await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn server_errors_keep_their_payload() {
    let (config, ontology) = start_server().await;
    ontology
        .apply_edits(osdk_store::EditRequest {
            edits: vec![osdk_store::Edit::AddObject {
                object_type: "Todo".into(),
                primary_key: 1.into(),
                properties: PropertyMap::new(),
            }],
        })
        .unwrap();
    let client = ObservableClient::connect(schema(), &config).unwrap();

    let err = client
        .apply_edits(|batch| batch.add_object("Todo", 1, PropertyMap::new()).map(drop))
        .await
        .unwrap_err();
    let ClientError::Server(api) = err else {
        panic!("server error expected, got {err:?}");
    };
    assert_eq!(api.error_name, "ObjectAlreadyExists");
    assert_eq!(api.status_code(), 409);
}

#[tokio::test]
async fn unknown_ontology_is_not_found() {
    let (mut config, _ontology) = start_server().await;
    config.ontology = "elsewhere".into();
    let client = ObservableClient::connect(schema(), &config).unwrap();
    let err = client
        .fetch_page(&ObjectSet::base("Todo"), PageOptions::default())
        .await
        .unwrap_err();
    let ClientError::Server(api) = err else {
        panic!("server error expected, got {err:?}");
    };
    assert_eq!(api.error_name, "OntologyNotFound");
}

#[tokio::test]
async fn live_query_follows_the_event_stream() {
    let (config, ontology) = start_server().await;
    let client = ObservableClient::connect(schema(), &config).unwrap();
    let mut query = client.subscribe(ObjectSet::base("Todo")).await.unwrap();
    assert!(next_update(&mut query).await.objects.is_empty());

    // A write that bypasses this client reaches it only through the stream.
    ontology
        .apply_edits(osdk_store::EditRequest {
            edits: vec![osdk_store::Edit::AddObject {
                object_type: "Todo".into(),
                primary_key: 7.into(),
                properties: props(json!({"title": "pushed"})),
            }],
        })
        .unwrap();

    let update = next_update(&mut query).await;
    assert_eq!(update.changed, vec![ObjectIdentity::new("Todo", 7)]);
    assert_eq!(update.objects[0].properties["title"], json!("pushed"));
}
