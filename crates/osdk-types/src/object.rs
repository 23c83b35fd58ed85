use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::identity::{ObjectIdentity, PrimaryKey};

/// Property values of one object, keyed by property API name.
///
/// Sorted keys make deep equality and serialization deterministic. A JSON
/// `null` and an absent key are equivalent for predicate evaluation.
pub type PropertyMap = BTreeMap<String, Value>;

/// Wire key carrying the object type API name.
pub const API_NAME_KEY: &str = "__apiName";
/// Wire key carrying the primary key value.
pub const PRIMARY_KEY_KEY: &str = "__primaryKey";

/// A single ontology object: identity plus property values.
///
/// Serializes to the flat Ontology object form:
/// `{"__apiName": "Todo", "__primaryKey": 1, "title": "..."}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ObjectRecord {
    pub identity: ObjectIdentity,
    pub properties: PropertyMap,
}

impl ObjectRecord {
    pub fn new(identity: ObjectIdentity, properties: PropertyMap) -> Self {
        Self {
            identity,
            properties,
        }
    }

    pub fn object_type(&self) -> &str {
        &self.identity.object_type
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.identity.primary_key
    }

    /// Property value, treating JSON `null` as absent.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties.get(property).filter(|v| !v.is_null())
    }

    /// Build a record from the flat wire form.
    pub fn from_wire(value: Value) -> Result<Self, TypeError> {
        let Value::Object(mut map) = value else {
            return Err(TypeError::Serialization(
                "object record must be a JSON object".into(),
            ));
        };
        let object_type = match map.remove(API_NAME_KEY) {
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(TypeError::Serialization(format!(
                    "{API_NAME_KEY} must be a string"
                )))
            }
            None => return Err(TypeError::MissingField(API_NAME_KEY)),
        };
        let primary_key = map
            .remove(PRIMARY_KEY_KEY)
            .ok_or(TypeError::MissingField(PRIMARY_KEY_KEY))
            .and_then(|pk| PrimaryKey::from_json(&pk))?;
        // Other double-underscore keys are server metadata (rid, title).
        let properties = map
            .into_iter()
            .filter(|(k, _)| !k.starts_with("__"))
            .collect();
        Ok(Self {
            identity: ObjectIdentity {
                object_type,
                primary_key,
            },
            properties,
        })
    }

    /// Flatten into the wire form.
    pub fn to_wire(&self) -> Value {
        let mut map = Map::with_capacity(self.properties.len() + 2);
        map.insert(
            API_NAME_KEY.to_string(),
            Value::String(self.identity.object_type.clone()),
        );
        map.insert(
            PRIMARY_KEY_KEY.to_string(),
            self.identity.primary_key.to_json(),
        );
        for (k, v) in &self.properties {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// Overlay `patch` onto `properties`; `null` values remove keys.
pub fn apply_patch(properties: &mut PropertyMap, patch: &PropertyMap) {
    for (key, value) in patch {
        if value.is_null() {
            properties.remove(key);
        } else {
            properties.insert(key.clone(), value.clone());
        }
    }
}

impl TryFrom<Value> for ObjectRecord {
    type Error = TypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_wire(value)
    }
}

impl From<ObjectRecord> for Value {
    fn from(record: ObjectRecord) -> Self {
        record.to_wire()
    }
}
