use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use osdk_query::{LoadObjectsRequest, LoadObjectsResponse};
use osdk_store::{EditRequest, ObjectEdits};
use osdk_stream::SubscribeRequest;
use osdk_types::ApiError;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, TransportError, TransportResult};
use crate::transport::{ByteStream, Transport};

/// Transport speaking the ontology REST API over HTTP.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    ontology: String,
    timeout: std::time::Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        // Event streams stay open indefinitely; only connects and unary
        // requests time out.
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ontology: config.ontology.clone(),
            timeout: config.request_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/ontologies/{}/{path}", self.base_url, self.ontology)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> TransportResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(network)?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(network)
    }
}

fn network(err: reqwest::Error) -> TransportError {
    TransportError::Network(err.to_string())
}

/// Pass successful responses through; decode the error payload otherwise.
async fn check_status(response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.map_err(network)?;
    match serde_json::from_slice::<ApiError>(&body) {
        Ok(api) => Err(TransportError::Server(api)),
        Err(_) => Err(TransportError::Network(format!(
            "HTTP {status}: {}",
            String::from_utf8_lossy(&body)
        ))),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn load_objects(&self, request: &LoadObjectsRequest) -> TransportResult<LoadObjectsResponse> {
        self.post_json("objectSets/loadObjects", request).await
    }

    async fn apply_edits(&self, request: &EditRequest) -> TransportResult<ObjectEdits> {
        self.post_json("edits", request).await
    }

    async fn subscribe(&self, request: &SubscribeRequest) -> TransportResult<ByteStream> {
        let url = self.url("objectSets/subscribe");
        debug!(%url, id = %request.id, "opening event stream");
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;
        Ok(response.bytes_stream().map_err(network).boxed())
    }
}
