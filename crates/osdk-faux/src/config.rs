use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FauxError, FauxResult};

/// Settings of the faux ontology server, loadable from TOML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FauxConfig {
    pub bind_addr: SocketAddr,
    /// Ontology API name accepted in request paths.
    pub ontology: String,
    /// Change batches buffered per subscriber before it is told to refetch.
    pub feed_capacity: usize,
    /// JSON fixture loaded at startup.
    pub fixture: Option<PathBuf>,
}

impl Default for FauxConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            ontology: "default".into(),
            feed_capacity: 256,
            fixture: None,
        }
    }
}

impl FauxConfig {
    pub fn from_toml_str(text: &str) -> FauxResult<Self> {
        toml::from_str(text).map_err(|e| FauxError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> FauxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
