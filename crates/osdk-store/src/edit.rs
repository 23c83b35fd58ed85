use osdk_types::{ObjectIdentity, PrimaryKey, PropertyMap};
use serde::{Deserialize, Serialize};

/// One logged mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Edit {
    #[serde(rename_all = "camelCase")]
    AddObject {
        object_type: String,
        primary_key: PrimaryKey,
        properties: PropertyMap,
    },
    #[serde(rename_all = "camelCase")]
    ModifyObject {
        object_type: String,
        primary_key: PrimaryKey,
        /// Patch: a `null` value removes the property.
        properties: PropertyMap,
    },
    #[serde(rename_all = "camelCase")]
    DeleteObject {
        object_type: String,
        primary_key: PrimaryKey,
    },
    #[serde(rename_all = "camelCase")]
    AddLink {
        link_type_api_name_a_to_b: String,
        link_type_api_name_b_to_a: Option<String>,
        a_side_object: ObjectIdentity,
        b_side_object: ObjectIdentity,
    },
    #[serde(rename_all = "camelCase")]
    RemoveLink {
        link_type_api_name_a_to_b: String,
        link_type_api_name_b_to_a: Option<String>,
        a_side_object: ObjectIdentity,
        b_side_object: ObjectIdentity,
    },
}

impl Edit {
    /// Identities whose stored state this edit changes.
    pub fn touched(&self) -> Vec<ObjectIdentity> {
        match self {
            Self::AddObject {
                object_type,
                primary_key,
                ..
            }
            | Self::ModifyObject {
                object_type,
                primary_key,
                ..
            }
            | Self::DeleteObject {
                object_type,
                primary_key,
            } => vec![ObjectIdentity::new(object_type.clone(), primary_key.clone())],
            Self::AddLink {
                a_side_object,
                b_side_object,
                ..
            }
            | Self::RemoveLink {
                a_side_object,
                b_side_object,
                ..
            } => vec![a_side_object.clone(), b_side_object.clone()],
        }
    }
}

/// Aggregate counts of a batch's effective edits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditCounters {
    pub added_object_count: u64,
    pub modified_objects_count: u64,
    pub deleted_objects_count: u64,
    pub added_links_count: u64,
    pub deleted_links_count: u64,
}

impl EditCounters {
    pub fn total(&self) -> u64 {
        self.added_object_count
            + self.modified_objects_count
            + self.deleted_objects_count
            + self.added_links_count
            + self.deleted_links_count
    }
}

/// Body of an edit submission: wire edits replayed in order, all or none.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    pub edits: Vec<Edit>,
}

/// Finished batch: the ordered edit log plus its counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEdits {
    pub edits: Vec<Edit>,
    #[serde(flatten)]
    pub counters: EditCounters,
}

impl ObjectEdits {
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}
