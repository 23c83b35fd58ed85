use osdk_types::{apply_patch, ObjectIdentity, ObjectRecord, PropertyMap};
use serde::{Deserialize, Serialize};

/// Latest known state of one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub identity: ObjectIdentity,
    pub properties: PropertyMap,
    /// Starts at 1 and increases with every change to `properties`.
    pub version: u64,
    /// Server ordering of the last merged state, when the server sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl CacheEntry {
    pub fn to_record(&self) -> ObjectRecord {
        ObjectRecord::new(self.identity.clone(), self.properties.clone())
    }
}

/// A record arriving from a fetch or the update stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Incoming {
    pub record: ObjectRecord,
    pub sequence: Option<u64>,
}

impl Incoming {
    pub fn sequenced(record: ObjectRecord, sequence: u64) -> Self {
        Self {
            record,
            sequence: Some(sequence),
        }
    }
}

impl From<ObjectRecord> for Incoming {
    fn from(record: ObjectRecord) -> Self {
        Self {
            record,
            sequence: None,
        }
    }
}

/// One change pushed by the server's update stream.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheChange {
    /// Full object state.
    Upsert(Incoming),
    /// New values for some properties of a cached object; `null` removes.
    Patch {
        identity: ObjectIdentity,
        patch: PropertyMap,
    },
    Remove(ObjectIdentity),
}

impl CacheChange {
    pub fn identity(&self) -> &ObjectIdentity {
        match self {
            Self::Upsert(incoming) => &incoming.record.identity,
            Self::Patch { identity, .. } | Self::Remove(identity) => identity,
        }
    }

    /// Fold a later change to the same identity into this one.
    pub(crate) fn absorb(&mut self, later: CacheChange) {
        match (&mut *self, later) {
            (Self::Upsert(incoming), Self::Patch { patch, .. }) => {
                apply_patch(&mut incoming.record.properties, &patch);
            }
            (Self::Patch { patch, .. }, Self::Patch { patch: more, .. }) => {
                patch.extend(more);
            }
            // A patch cannot revive a removed object.
            (Self::Remove(_), Self::Patch { .. }) => {}
            (slot, later) => *slot = later,
        }
    }
}

/// What a merge did, counted per record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Older than the cached state by server sequence.
    pub stale: usize,
    /// Held back because a newer optimistic update is pending.
    pub deferred: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: serde_json::Value) -> PropertyMap {
        serde_json::from_value(value).unwrap()
    }

    fn id() -> ObjectIdentity {
        ObjectIdentity::new("Todo", 1)
    }

    #[test]
    fn patch_after_upsert_folds_into_record() {
        let mut change = CacheChange::Upsert(
            ObjectRecord::new(id(), props(json!({"title": "a", "done": false}))).into(),
        );
        change.absorb(CacheChange::Patch {
            identity: id(),
            patch: props(json!({"done": true, "title": null})),
        });
        let CacheChange::Upsert(incoming) = change else {
            panic!("upsert expected");
        };
        assert_eq!(incoming.record.properties, props(json!({"done": true})));
    }

    #[test]
    fn later_full_state_replaces_earlier() {
        let mut change = CacheChange::Remove(id());
        let upsert = CacheChange::Upsert(ObjectRecord::new(id(), PropertyMap::new()).into());
        change.absorb(upsert.clone());
        assert_eq!(change, upsert);

        change.absorb(CacheChange::Remove(id()));
        assert_eq!(change, CacheChange::Remove(id()));
        change.absorb(CacheChange::Patch {
            identity: id(),
            patch: props(json!({"title": "x"})),
        });
        assert_eq!(change, CacheChange::Remove(id()));
    }

    #[test]
    fn patches_merge_with_later_values_winning() {
        let mut change = CacheChange::Patch {
            identity: id(),
            patch: props(json!({"a": 1, "b": 1})),
        };
        change.absorb(CacheChange::Patch {
            identity: id(),
            patch: props(json!({"b": 2})),
        });
        assert_eq!(
            change,
            CacheChange::Patch {
                identity: id(),
                patch: props(json!({"a": 1, "b": 2})),
            }
        );
    }
}
