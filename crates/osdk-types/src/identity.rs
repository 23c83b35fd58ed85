use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// A primary-key value.
///
/// Primary keys are primitives on the wire; the JSON form is the bare value.
/// Ordering is total so identities can live in ordered collections.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl PrimaryKey {
    /// Convert a JSON primitive into a primary key.
    ///
    /// Floats are accepted only when they carry an exact integer value.
    pub fn from_json(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Bool(b) => Ok(Self::Boolean(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::Integer(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Self::Integer(f as i64))
                    }
                    _ => Err(TypeError::InvalidPrimaryKey(n.to_string())),
                }
            }
            other => Err(TypeError::InvalidPrimaryKey(other.to_string())),
        }
    }

    /// The JSON form of this key.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Debug for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PrimaryKey {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for PrimaryKey {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<bool> for PrimaryKey {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Identity of an ontology object: its type API name plus primary key.
///
/// Two identities are equal iff both components are equal by value. This is
/// the key of the in-memory store and of the observable cache.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectIdentity {
    pub object_type: String,
    pub primary_key: PrimaryKey,
}

impl ObjectIdentity {
    pub fn new(object_type: impl Into<String>, primary_key: impl Into<PrimaryKey>) -> Self {
        Self {
            object_type: object_type.into(),
            primary_key: primary_key.into(),
        }
    }
}

impl fmt::Debug for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectIdentity({}:{:?})", self.object_type, self.primary_key)
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identities_compare_by_value() {
        let a = ObjectIdentity::new("Todo", "1");
        let b = ObjectIdentity::new(String::from("Todo"), String::from("1"));
        assert_eq!(a, b);
        assert_ne!(a, ObjectIdentity::new("Todo", 1));
        assert_ne!(a, ObjectIdentity::new("Task", "1"));
    }

    #[test]
    fn primary_key_from_json() {
        assert_eq!(PrimaryKey::from_json(&json!("x")).unwrap(), PrimaryKey::from("x"));
        assert_eq!(PrimaryKey::from_json(&json!(7)).unwrap(), PrimaryKey::from(7));
        assert_eq!(PrimaryKey::from_json(&json!(7.0)).unwrap(), PrimaryKey::from(7));
        assert_eq!(PrimaryKey::from_json(&json!(true)).unwrap(), PrimaryKey::from(true));
        assert!(PrimaryKey::from_json(&json!(7.5)).is_err());
        assert!(PrimaryKey::from_json(&json!(null)).is_err());
        assert!(PrimaryKey::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn primary_key_json_is_bare_primitive() {
        assert_eq!(serde_json::to_value(PrimaryKey::from("a")).unwrap(), json!("a"));
        assert_eq!(serde_json::to_value(PrimaryKey::from(3)).unwrap(), json!(3));
        let back: PrimaryKey = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(back, PrimaryKey::Integer(3));
    }

    #[test]
    fn identity_serde_uses_camel_case() {
        let id = ObjectIdentity::new("Todo", 4);
        let v = serde_json::to_value(&id).unwrap();
        assert_eq!(v, json!({"objectType": "Todo", "primaryKey": 4}));
        let back: ObjectIdentity = serde_json::from_value(v).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_and_debug() {
        let id = ObjectIdentity::new("Todo", "a");
        assert_eq!(id.to_string(), "Todo:a");
        assert_eq!(format!("{id:?}"), "ObjectIdentity(Todo:\"a\")");
    }

    #[test]
    fn ordering_is_total() {
        let mut ids = vec![
            ObjectIdentity::new("B", 1),
            ObjectIdentity::new("A", "z"),
            ObjectIdentity::new("A", 2),
        ];
        ids.sort();
        assert_eq!(ids[0], ObjectIdentity::new("A", 2));
        assert_eq!(ids[1], ObjectIdentity::new("A", "z"));
        assert_eq!(ids[2], ObjectIdentity::new("B", 1));
    }
}
