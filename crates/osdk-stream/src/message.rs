//! Object-set subscription messages carried in event `data`.

use osdk_query::ObjectSet;
use osdk_types::{ObjectIdentity, ObjectRecord, PrimaryKey, PropertyMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{StreamError, StreamResult};
use crate::sse::SseEvent;

/// Opens a live stream of changes to one object set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Client-chosen id echoed in every message of the stream.
    pub id: String,
    pub object_set: ObjectSet,
}

/// One message of an object-set subscription stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    /// Per-request outcome of a subscribe call.
    #[serde(rename_all = "camelCase")]
    SubscribeResponses {
        id: String,
        responses: Vec<SubscribeResponse>,
    },
    /// Incremental changes to objects in a subscribed set.
    #[serde(rename_all = "camelCase")]
    ObjectSetChanged {
        id: String,
        updates: Vec<ObjectSetUpdate>,
    },
    /// The server can no longer describe changes incrementally; refetch.
    #[serde(rename_all = "camelCase")]
    RefreshObjectSet { id: String, object_type: String },
    #[serde(rename_all = "camelCase")]
    SubscriptionClosed { id: String, cause: Value },
    #[serde(rename_all = "camelCase")]
    InitialLoadCompleted {
        initial_load_completed: InitialLoad,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialLoad {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubscribeResponse {
    Success { id: String },
    Error { errors: Vec<Value> },
    Qos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectState {
    AddedOrUpdated,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObjectSetUpdate {
    /// Full object state.
    Object {
        state: ObjectState,
        object: ObjectRecord,
    },
    /// A single property value change.
    #[serde(rename_all = "camelCase")]
    Reference {
        object_type: String,
        primary_key: PropertyMap,
        property: String,
        value: Value,
    },
}

impl ObjectSetUpdate {
    /// Identity of the object this update touches.
    ///
    /// Reference updates carry the primary key as a single-entry map keyed by
    /// the primary-key property.
    pub fn identity(&self) -> StreamResult<ObjectIdentity> {
        match self {
            Self::Object { object, .. } => Ok(object.identity.clone()),
            Self::Reference {
                object_type,
                primary_key,
                ..
            } => {
                let mut values = primary_key.values();
                match (values.next(), values.next()) {
                    (Some(value), None) => {
                        let pk = PrimaryKey::from_json(value)
                            .map_err(|e| StreamError::InvalidMessage(e.to_string()))?;
                        Ok(ObjectIdentity::new(object_type.clone(), pk))
                    }
                    _ => Err(StreamError::InvalidMessage(format!(
                        "reference update for {object_type} needs exactly one primary key value"
                    ))),
                }
            }
        }
    }
}

impl StreamMessage {
    /// Subscription id the message belongs to.
    pub fn subscription_id(&self) -> &str {
        match self {
            Self::SubscribeResponses { id, .. }
            | Self::ObjectSetChanged { id, .. }
            | Self::RefreshObjectSet { id, .. }
            | Self::SubscriptionClosed { id, .. } => id,
            Self::InitialLoadCompleted {
                initial_load_completed,
            } => &initial_load_completed.id,
        }
    }

    pub fn decode(event: &SseEvent) -> StreamResult<Self> {
        let message: Self = serde_json::from_str(&event.data)
            .map_err(|e| StreamError::InvalidMessage(e.to_string()))?;
        trace!(id = message.subscription_id(), "decoded stream message");
        Ok(message)
    }

    pub fn encode(&self) -> StreamResult<SseEvent> {
        let data =
            serde_json::to_string(self).map_err(|e| StreamError::Serialization(e.to_string()))?;
        Ok(SseEvent::new(data))
    }
}
