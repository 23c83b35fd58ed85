use std::path::Path;
use std::time::Duration;

use osdk_cache::CacheConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Client settings, loadable from TOML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root URL of the ontology service, without a trailing slash.
    pub base_url: String,
    /// Ontology API name used in request paths.
    pub ontology: String,
    /// Page size for live queries and pagers; the server default when unset.
    pub page_size: Option<u32>,
    pub request_timeout_secs: u64,
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            ontology: "default".into(),
            page_size: None,
            request_timeout_secs: 30,
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> ClientResult<Self> {
        toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ClientConfig::default();
        assert_eq!(c.base_url, "http://127.0.0.1:8080");
        assert_eq!(c.ontology, "default");
        assert_eq!(c.page_size, None);
        assert_eq!(c.request_timeout(), Duration::from_secs(30));
        assert!(c.cache.honor_sequence);
    }

    #[test]
    fn nested_cache_table() {
        let c = ClientConfig::from_toml_str(
            "ontology = \"todos\"\npage_size = 50\n\n[cache]\nappend_new_rows = false\n",
        )
        .unwrap();
        assert_eq!(c.ontology, "todos");
        assert_eq!(c.page_size, Some(50));
        assert!(!c.cache.append_new_rows);
        assert!(c.cache.honor_sequence);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "base_url = \"http://example.test\"\nrequest_timeout_secs = 5\n")
            .unwrap();
        let c = ClientConfig::load(&path).unwrap();
        assert_eq!(c.base_url, "http://example.test");
        assert_eq!(c.request_timeout_secs, 5);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ClientConfig::load(Path::new("/nonexistent/client.toml")).unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
