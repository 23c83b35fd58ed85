use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::FauxConfig;
use crate::error::{FauxError, FauxResult};
use crate::fixture::Fixture;
use crate::ontology::FauxOntology;
use crate::router::build_router;

/// HTTP front of a [`FauxOntology`].
pub struct FauxServer {
    config: FauxConfig,
    ontology: Arc<FauxOntology>,
}

impl FauxServer {
    pub fn new(config: FauxConfig, ontology: Arc<FauxOntology>) -> Self {
        Self { config, ontology }
    }

    /// Build the ontology from the configured fixture, or empty without one.
    pub fn from_config(config: FauxConfig) -> FauxResult<Self> {
        let ontology = match &config.fixture {
            Some(path) => FauxOntology::from_fixture(&Fixture::load(path)?, config.feed_capacity)?,
            None => FauxOntology::new(Default::default(), config.feed_capacity),
        };
        Ok(Self::new(config, Arc::new(ontology)))
    }

    pub fn config(&self) -> &FauxConfig {
        &self.config
    }

    pub fn ontology(&self) -> &Arc<FauxOntology> {
        &self.ontology
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(Arc::clone(&self.ontology), self.config.ontology.clone())
    }

    /// Bind the configured address and serve until the process stops.
    pub async fn serve(self) -> FauxResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> FauxResult<()> {
        let app = self.router();
        tracing::info!(
            addr = %listener.local_addr()?,
            ontology = %self.config.ontology,
            "faux ontology listening"
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| FauxError::Internal(e.to_string()))
    }
}
