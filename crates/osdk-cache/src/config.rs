use serde::{Deserialize, Serialize};

/// Tuning for an [`crate::ObservableCache`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CacheConfig {
    /// Reject incoming records whose server sequence is older than the
    /// cached one. When off, the last merge always wins.
    pub honor_sequence: bool,
    /// Append newly matching objects to subscribed lists when membership can
    /// be decided locally. When off, such changes only invalidate the list.
    pub append_new_rows: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            honor_sequence: true,
            append_new_rows: true,
        }
    }
}
