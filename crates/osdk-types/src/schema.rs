use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Kind of a property, as described by generated ontology metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyKind {
    String,
    Integer,
    Long,
    Double,
    Boolean,
    Timestamp,
    Date,
    GeoPoint,
    GeoShape,
    Array(Box<PropertyKind>),
}

impl PropertyKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Long | Self::Double)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String)
    }

    pub fn is_datetime(&self) -> bool {
        matches!(self, Self::Timestamp | Self::Date)
    }

    pub fn is_geo(&self) -> bool {
        matches!(self, Self::GeoPoint | Self::GeoShape)
    }

    /// Element kind for arrays, `None` for scalars.
    pub fn element_kind(&self) -> Option<&PropertyKind> {
        match self {
            Self::Array(inner) => Some(inner),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub kind: PropertyKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl PropertyDefinition {
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkCardinality {
    One,
    #[default]
    Many,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTypeDefinition {
    pub target_type: String,
    /// API name of the same link seen from the target type.
    #[serde(default)]
    pub inverse: Option<String>,
    #[serde(default)]
    pub cardinality: LinkCardinality,
}

/// Schema of one object type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTypeDefinition {
    pub api_name: String,
    pub primary_key: String,
    #[serde(default)]
    pub title_property: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
    #[serde(default)]
    pub links: BTreeMap<String, LinkTypeDefinition>,
}

impl ObjectTypeDefinition {
    pub fn new(api_name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
            primary_key: primary_key.into(),
            title_property: None,
            properties: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties
            .insert(name.into(), PropertyDefinition::new(kind));
        self
    }

    pub fn with_link(
        mut self,
        name: impl Into<String>,
        target_type: impl Into<String>,
        inverse: Option<&str>,
        cardinality: LinkCardinality,
    ) -> Self {
        self.links.insert(
            name.into(),
            LinkTypeDefinition {
                target_type: target_type.into(),
                inverse: inverse.map(str::to_string),
                cardinality,
            },
        );
        self
    }

    pub fn property(&self, name: &str) -> TypeResult<&PropertyDefinition> {
        self.properties
            .get(name)
            .ok_or_else(|| TypeError::UnknownProperty {
                object_type: self.api_name.clone(),
                property: name.to_string(),
            })
    }

    pub fn link(&self, name: &str) -> TypeResult<&LinkTypeDefinition> {
        self.links.get(name).ok_or_else(|| TypeError::UnknownLink {
            object_type: self.api_name.clone(),
            link: name.to_string(),
        })
    }
}

/// Both sides of a link type, resolved from metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSides {
    pub source_type: String,
    pub forward: String,
    pub target_type: String,
    /// Name of the link on the target type pointing back, when declared.
    pub inverse: Option<String>,
}

/// The ontology: every object type keyed by API name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OntologySchema {
    #[serde(default)]
    pub object_types: BTreeMap<String, ObjectTypeDefinition>,
}

impl OntologySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object_type(mut self, definition: ObjectTypeDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&mut self, definition: ObjectTypeDefinition) {
        self.object_types
            .insert(definition.api_name.clone(), definition);
    }

    pub fn object_type(&self, api_name: &str) -> TypeResult<&ObjectTypeDefinition> {
        self.object_types
            .get(api_name)
            .ok_or_else(|| TypeError::UnknownObjectType(api_name.to_string()))
    }

    pub fn link(&self, object_type: &str, link: &str) -> TypeResult<&LinkTypeDefinition> {
        self.object_type(object_type)?.link(link)
    }

    /// Resolve the forward and inverse names of a link type.
    ///
    /// When the forward definition does not name its inverse, the target
    /// type is searched for a link back to the source that names `link` as
    /// its inverse.
    pub fn link_sides(&self, object_type: &str, link: &str) -> TypeResult<LinkSides> {
        let forward = self.link(object_type, link)?;
        let target = self.object_type(&forward.target_type)?;
        let inverse = match &forward.inverse {
            Some(name) => {
                target.link(name)?;
                Some(name.clone())
            }
            None => target
                .links
                .iter()
                .find(|(_, def)| {
                    def.target_type == object_type && def.inverse.as_deref() == Some(link)
                })
                .map(|(name, _)| name.clone()),
        };
        Ok(LinkSides {
            source_type: object_type.to_string(),
            forward: link.to_string(),
            target_type: forward.target_type.clone(),
            inverse,
        })
    }

    /// Check that links point at known types and inverses agree.
    pub fn validate(&self) -> TypeResult<()> {
        for (name, def) in &self.object_types {
            if name != &def.api_name {
                return Err(TypeError::InvalidSchema(format!(
                    "object type keyed as {name} declares api name {}",
                    def.api_name
                )));
            }
            if !def.properties.contains_key(&def.primary_key) {
                return Err(TypeError::InvalidSchema(format!(
                    "{name}: primary key {} is not a property",
                    def.primary_key
                )));
            }
            for (link_name, link) in &def.links {
                let target = self.object_type(&link.target_type)?;
                if let Some(inverse) = &link.inverse {
                    let back = target.link(inverse)?;
                    if back.target_type != *name {
                        return Err(TypeError::InvalidSchema(format!(
                            "{name}.{link_name}: inverse {inverse} targets {}",
                            back.target_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> OntologySchema {
        OntologySchema::new()
            .with_object_type(
                ObjectTypeDefinition::new("Employee", "id")
                    .with_property("id", PropertyKind::Integer)
                    .with_property("name", PropertyKind::String)
                    .with_link("lead", "Employee", Some("reports"), LinkCardinality::One)
                    .with_link("reports", "Employee", Some("lead"), LinkCardinality::Many)
                    .with_link("office", "Office", None, LinkCardinality::One),
            )
            .with_object_type(
                ObjectTypeDefinition::new("Office", "code")
                    .with_property("code", PropertyKind::String)
                    .with_link("occupants", "Employee", Some("office"), LinkCardinality::Many),
            )
    }

    #[test]
    fn lookups() {
        let s = schema();
        assert!(s.object_type("Employee").is_ok());
        assert_eq!(
            s.object_type("Nope").unwrap_err(),
            TypeError::UnknownObjectType("Nope".into())
        );
        assert_eq!(
            s.object_type("Employee").unwrap().property("name").unwrap().kind,
            PropertyKind::String
        );
        assert!(matches!(
            s.link("Employee", "missing"),
            Err(TypeError::UnknownLink { .. })
        ));
    }

    #[test]
    fn link_sides_declared_inverse() {
        let sides = schema().link_sides("Employee", "lead").unwrap();
        assert_eq!(sides.target_type, "Employee");
        assert_eq!(sides.inverse.as_deref(), Some("reports"));
    }

    #[test]
    fn link_sides_discovers_inverse_from_target() {
        let sides = schema().link_sides("Employee", "office").unwrap();
        assert_eq!(sides.target_type, "Office");
        assert_eq!(sides.inverse.as_deref(), Some("occupants"));
    }

    #[test]
    fn validate_accepts_consistent_schema() {
        schema().validate().unwrap();
    }

    #[test]
    fn validate_rejects_dangling_link() {
        let s = OntologySchema::new().with_object_type(
            ObjectTypeDefinition::new("A", "id")
                .with_property("id", PropertyKind::String)
                .with_link("b", "B", None, LinkCardinality::Many),
        );
        assert_eq!(
            s.validate().unwrap_err(),
            TypeError::UnknownObjectType("B".into())
        );
    }

    #[test]
    fn schema_deserializes_from_json() {
        let json = serde_json::json!({
            "objectTypes": {
                "Todo": {
                    "apiName": "Todo",
                    "primaryKey": "id",
                    "properties": {
                        "id": {"kind": "string", "nullable": false},
                        "tags": {"kind": {"array": "string"}}
                    }
                }
            }
        });
        let s: OntologySchema = serde_json::from_value(json).unwrap();
        let todo = s.object_type("Todo").unwrap();
        assert!(!todo.property("id").unwrap().nullable);
        let tags = todo.property("tags").unwrap();
        assert!(tags.nullable);
        assert_eq!(tags.kind.element_kind(), Some(&PropertyKind::String));
    }
}
