use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::ObjectIdentity;

/// Error payload exchanged across the HTTP boundary.
///
/// Every field is preserved when a server error is re-raised on the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{error_name} ({error_code}) [{error_instance_id}]")]
pub struct ApiError {
    pub error_code: String,
    pub error_name: String,
    pub error_instance_id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ApiError {
    pub const CONFLICT: &'static str = "CONFLICT";
    pub const NOT_FOUND: &'static str = "NOT_FOUND";
    pub const INVALID_ARGUMENT: &'static str = "INVALID_ARGUMENT";
    pub const INTERNAL: &'static str = "INTERNAL";

    /// New payload with a fresh error instance id.
    pub fn new(
        error_code: impl Into<String>,
        error_name: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            error_name: error_name.into(),
            error_instance_id: uuid::Uuid::now_v7().to_string(),
            parameters,
        }
    }

    pub fn object_already_exists(identity: &ObjectIdentity) -> Self {
        Self::new(
            Self::CONFLICT,
            "ObjectAlreadyExists",
            identity_parameters(identity),
        )
    }

    pub fn object_not_found(identity: &ObjectIdentity) -> Self {
        Self::new(
            Self::NOT_FOUND,
            "ObjectNotFound",
            identity_parameters(identity),
        )
    }

    pub fn link_type_not_found(object_type: &str, link: &str) -> Self {
        let mut parameters = Map::new();
        parameters.insert("objectType".into(), Value::String(object_type.into()));
        parameters.insert("linkType".into(), Value::String(link.into()));
        Self::new(Self::NOT_FOUND, "LinkTypeNotFound", parameters)
    }

    pub fn invalid_argument(error_name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("message".into(), Value::String(message.into()));
        Self::new(Self::INVALID_ARGUMENT, error_name, parameters)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("message".into(), Value::String(message.into()));
        Self::new(Self::INTERNAL, "Internal", parameters)
    }

    /// HTTP status conventionally paired with the error code.
    pub fn status_code(&self) -> u16 {
        match self.error_code.as_str() {
            Self::CONFLICT => 409,
            Self::NOT_FOUND => 404,
            Self::INVALID_ARGUMENT => 400,
            "PERMISSION_DENIED" => 403,
            _ => 500,
        }
    }
}

fn identity_parameters(identity: &ObjectIdentity) -> Map<String, Value> {
    let mut parameters = Map::new();
    parameters.insert(
        "objectType".into(),
        Value::String(identity.object_type.clone()),
    );
    parameters.insert("primaryKey".into(), identity.primary_key.to_json());
    parameters
}
