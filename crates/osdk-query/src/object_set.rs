use std::collections::BTreeMap;

use osdk_types::{ObjectIdentity, ObjectTypeDefinition, OntologySchema, PropertyDefinition};
use serde::{Deserialize, Serialize};

use crate::derived::DerivedProperty;
use crate::error::{QueryError, QueryResult};
use crate::where_clause::{PropertyFilter, WhereClause};

/// Maximum nesting of object-set and derived-property nodes.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// An immutable object-set query expression.
///
/// Builders never mutate the receiver: each wraps a clone of it in a new
/// node, so an expression can only reference previously built expressions
/// and is acyclic. Equality is structural.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObjectSet {
    Base {
        #[serde(rename = "objectType")]
        object_type: String,
    },
    #[serde(rename = "filter")]
    Filtered {
        #[serde(rename = "objectSet")]
        source: Box<ObjectSet>,
        #[serde(rename = "where")]
        where_clause: WhereClause,
    },
    Union {
        #[serde(rename = "objectSets")]
        sources: Vec<ObjectSet>,
    },
    Intersect {
        #[serde(rename = "objectSets")]
        sources: Vec<ObjectSet>,
    },
    Subtract {
        #[serde(rename = "objectSet")]
        source: Box<ObjectSet>,
        #[serde(rename = "objectSets")]
        subtrahends: Vec<ObjectSet>,
    },
    SearchAround {
        #[serde(rename = "objectSet")]
        source: Box<ObjectSet>,
        link: String,
    },
    WithProperties {
        #[serde(rename = "objectSet")]
        source: Box<ObjectSet>,
        #[serde(rename = "derivedProperties")]
        derived: BTreeMap<String, DerivedProperty>,
    },
    /// The object a derived property is being computed for. Only valid
    /// inside a derived-property definition.
    MethodInput,
}

impl ObjectSet {
    pub fn base(object_type: impl Into<String>) -> Self {
        Self::Base {
            object_type: object_type.into(),
        }
    }

    pub fn method_input() -> Self {
        Self::MethodInput
    }

    /// The set holding exactly the object `identity`, if it exists.
    pub fn for_object(schema: &OntologySchema, identity: &ObjectIdentity) -> QueryResult<Self> {
        let definition = schema.object_type(&identity.object_type)?;
        let clause = WhereClause::property(
            definition,
            definition.primary_key.clone(),
            PropertyFilter::Eq((&identity.primary_key).into()),
        )?;
        Ok(Self::base(identity.object_type.clone()).filter(clause))
    }

    /// Restrict to objects matching `clause`.
    pub fn filter(&self, clause: WhereClause) -> Self {
        Self::Filtered {
            source: Box::new(self.clone()),
            where_clause: clause,
        }
    }

    /// Validate `clause` against this set's result type, then filter.
    pub fn filter_checked(&self, schema: &OntologySchema, clause: WhereClause) -> QueryResult<Self> {
        let definition = self.resolve(schema, None, 0)?;
        clause.validate(&definition)?;
        Ok(self.filter(clause))
    }

    /// Union with `others`, splicing one level of nested unions.
    pub fn union(&self, others: impl IntoIterator<Item = ObjectSet>) -> Self {
        Self::Union {
            sources: self.splice(others, |s| match s {
                Self::Union { sources } => Some(sources),
                _ => None,
            }),
        }
    }

    /// Intersection with `others`, splicing one level of nested intersections.
    pub fn intersect(&self, others: impl IntoIterator<Item = ObjectSet>) -> Self {
        Self::Intersect {
            sources: self.splice(others, |s| match s {
                Self::Intersect { sources } => Some(sources),
                _ => None,
            }),
        }
    }

    /// Objects of this set that are in none of `others`. Operand order is
    /// significant.
    pub fn subtract(&self, others: impl IntoIterator<Item = ObjectSet>) -> Self {
        Self::Subtract {
            source: Box::new(self.clone()),
            subtrahends: others.into_iter().collect(),
        }
    }

    /// Follow `link` from every object in the set.
    pub fn pivot_to(&self, link: impl Into<String>) -> Self {
        Self::SearchAround {
            source: Box::new(self.clone()),
            link: link.into(),
        }
    }

    pub fn with_properties(&self, derived: BTreeMap<String, DerivedProperty>) -> Self {
        Self::WithProperties {
            source: Box::new(self.clone()),
            derived,
        }
    }

    pub fn with_property(&self, name: impl Into<String>, definition: DerivedProperty) -> Self {
        self.with_properties(BTreeMap::from([(name.into(), definition)]))
    }

    fn splice(
        &self,
        others: impl IntoIterator<Item = ObjectSet>,
        same_op: impl Fn(&ObjectSet) -> Option<&Vec<ObjectSet>>,
    ) -> Vec<ObjectSet> {
        let mut sources = match same_op(self) {
            Some(inner) => inner.clone(),
            None => vec![self.clone()],
        };
        for other in others {
            match same_op(&other).map(|inner| inner.to_vec()) {
                Some(inner) => sources.extend(inner),
                None => sources.push(other),
            }
        }
        sources
    }

    /// Direct sub-expressions, not including derived-property definitions.
    pub fn children(&self) -> Vec<&ObjectSet> {
        match self {
            Self::Base { .. } | Self::MethodInput => Vec::new(),
            Self::Filtered { source, .. }
            | Self::SearchAround { source, .. }
            | Self::WithProperties { source, .. } => vec![source.as_ref()],
            Self::Union { sources } | Self::Intersect { sources } => sources.iter().collect(),
            Self::Subtract {
                source,
                subtrahends,
            } => std::iter::once(source.as_ref())
                .chain(subtrahends.iter())
                .collect(),
        }
    }

    /// Check the expression against the schema and return its result type.
    pub fn validate(&self, schema: &OntologySchema) -> QueryResult<String> {
        Ok(self.resolve(schema, None, 0)?.api_name)
    }

    /// Result type definition, extended with any derived properties.
    pub fn result_definition(&self, schema: &OntologySchema) -> QueryResult<ObjectTypeDefinition> {
        self.resolve(schema, None, 0)
    }

    /// Result type definition with method input bound to `input`, as inside
    /// a derived-property selection.
    pub fn result_definition_bound(
        &self,
        schema: &OntologySchema,
        input: Option<&ObjectTypeDefinition>,
    ) -> QueryResult<ObjectTypeDefinition> {
        self.resolve(schema, input, 0)
    }

    pub(crate) fn resolve(
        &self,
        schema: &OntologySchema,
        method_input: Option<&ObjectTypeDefinition>,
        depth: usize,
    ) -> QueryResult<ObjectTypeDefinition> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(QueryError::DepthExceeded {
                max: MAX_EXPRESSION_DEPTH,
            });
        }
        let next = depth + 1;
        match self {
            Self::Base { object_type } => Ok(schema.object_type(object_type)?.clone()),
            Self::MethodInput => method_input.cloned().ok_or(QueryError::UnboundMethodInput),
            Self::Filtered {
                source,
                where_clause,
            } => {
                let definition = source.resolve(schema, method_input, next)?;
                where_clause.validate(&definition)?;
                Ok(definition)
            }
            Self::Union { sources } => resolve_same(schema, sources, method_input, next, "union"),
            Self::Intersect { sources } => {
                resolve_same(schema, sources, method_input, next, "intersect")
            }
            Self::Subtract {
                source,
                subtrahends,
            } => {
                let definition = source.resolve(schema, method_input, next)?;
                for other in subtrahends {
                    let found = other.resolve(schema, method_input, next)?;
                    same_type(&definition, &found)?;
                }
                Ok(definition)
            }
            Self::SearchAround { source, link } => {
                let definition = source.resolve(schema, method_input, next)?;
                let target = &definition.link(link)?.target_type;
                Ok(schema.object_type(target)?.clone())
            }
            Self::WithProperties { source, derived } => {
                let definition = source.resolve(schema, method_input, next)?;
                let mut extended = definition.clone();
                for (name, def) in derived {
                    if definition.properties.contains_key(name) {
                        return Err(QueryError::DerivedPropertyConflict(name.clone()));
                    }
                    let kind = def.kind_at(schema, &definition, next)?;
                    extended
                        .properties
                        .insert(name.clone(), PropertyDefinition::new(kind));
                }
                Ok(extended)
            }
        }
    }

    /// Normal form used for fingerprinting.
    ///
    /// Union and intersect members are flattened, sorted, and deduplicated;
    /// a single remaining member replaces the node. Subtract keeps operand
    /// order. Where clauses are canonicalized and a filter by `And([])` is
    /// dropped.
    pub fn canonicalize(&self) -> ObjectSet {
        match self {
            Self::Base { .. } | Self::MethodInput => self.clone(),
            Self::Filtered {
                source,
                where_clause,
            } => {
                let source = source.canonicalize();
                match where_clause.canonicalize() {
                    WhereClause::And(children) if children.is_empty() => source,
                    clause => Self::Filtered {
                        source: Box::new(source),
                        where_clause: clause,
                    },
                }
            }
            Self::Union { sources } => canonical_junction(sources, true),
            Self::Intersect { sources } => canonical_junction(sources, false),
            Self::Subtract {
                source,
                subtrahends,
            } => Self::Subtract {
                source: Box::new(source.canonicalize()),
                subtrahends: subtrahends.iter().map(ObjectSet::canonicalize).collect(),
            },
            Self::SearchAround { source, link } => Self::SearchAround {
                source: Box::new(source.canonicalize()),
                link: link.clone(),
            },
            Self::WithProperties { source, derived } => Self::WithProperties {
                source: Box::new(source.canonicalize()),
                derived: derived
                    .iter()
                    .map(|(k, v)| (k.clone(), v.canonicalize()))
                    .collect(),
            },
        }
    }
}

fn resolve_same(
    schema: &OntologySchema,
    sources: &[ObjectSet],
    method_input: Option<&ObjectTypeDefinition>,
    depth: usize,
    op: &'static str,
) -> QueryResult<ObjectTypeDefinition> {
    let (first, rest) = sources
        .split_first()
        .ok_or(QueryError::EmptySetOperation(op))?;
    let definition = first.resolve(schema, method_input, depth)?;
    for other in rest {
        let found = other.resolve(schema, method_input, depth)?;
        same_type(&definition, &found)?;
    }
    Ok(definition)
}

fn same_type(expected: &ObjectTypeDefinition, found: &ObjectTypeDefinition) -> QueryResult<()> {
    if expected.api_name != found.api_name {
        return Err(QueryError::MismatchedSetTypes {
            expected: expected.api_name.clone(),
            found: found.api_name.clone(),
        });
    }
    Ok(())
}

fn canonical_junction(sources: &[ObjectSet], is_union: bool) -> ObjectSet {
    let mut flat = Vec::with_capacity(sources.len());
    for source in sources {
        match (source.canonicalize(), is_union) {
            (ObjectSet::Union { sources: inner }, true)
            | (ObjectSet::Intersect { sources: inner }, false) => flat.extend(inner),
            (other, _) => flat.push(other),
        }
    }
    flat.sort_by_cached_key(|s| serde_json::to_string(s).unwrap_or_default());
    flat.dedup();
    if flat.len() == 1 {
        return flat.remove(0);
    }
    if is_union {
        ObjectSet::Union { sources: flat }
    } else {
        ObjectSet::Intersect { sources: flat }
    }
}
