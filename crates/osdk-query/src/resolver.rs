//! Object types an expression depends on.
//!
//! Subscriptions use these sets to decide which cache mutations could affect
//! a query: a change to an object of any referenced type may change the
//! result.

use std::collections::BTreeSet;

use osdk_types::OntologySchema;

use crate::derived::DerivedProperty;
use crate::error::{QueryError, QueryResult};
use crate::object_set::{ObjectSet, MAX_EXPRESSION_DEPTH};

/// Distinct object types read by a derived-property definition.
///
/// Selections contribute the types of their object set, including link
/// targets. Arithmetic nodes contribute only what their operands do.
/// `owner_type` binds method input.
pub fn extract_object_types(
    definition: &DerivedProperty,
    schema: &OntologySchema,
    owner_type: &str,
) -> QueryResult<BTreeSet<String>> {
    let mut collector = TypeCollector::new(schema);
    collector.visit_derived(definition, owner_type, 0)?;
    Ok(collector.types)
}

/// Distinct object types an object-set expression reads, including link
/// targets and types read by derived properties.
pub fn referenced_object_types(
    object_set: &ObjectSet,
    schema: &OntologySchema,
) -> QueryResult<BTreeSet<String>> {
    let mut collector = TypeCollector::new(schema);
    collector.visit_set(object_set, None, 0)?;
    Ok(collector.types)
}

struct TypeCollector<'a> {
    schema: &'a OntologySchema,
    types: BTreeSet<String>,
}

impl<'a> TypeCollector<'a> {
    fn new(schema: &'a OntologySchema) -> Self {
        Self {
            schema,
            types: BTreeSet::new(),
        }
    }

    fn check_depth(depth: usize) -> QueryResult<()> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(QueryError::DepthExceeded {
                max: MAX_EXPRESSION_DEPTH,
            });
        }
        Ok(())
    }

    /// Record the types of `set` and return its result type.
    fn visit_set(
        &mut self,
        set: &ObjectSet,
        method_input: Option<&str>,
        depth: usize,
    ) -> QueryResult<String> {
        Self::check_depth(depth)?;
        let next = depth + 1;
        match set {
            ObjectSet::Base { object_type } => {
                self.types.insert(object_type.clone());
                Ok(object_type.clone())
            }
            ObjectSet::MethodInput => {
                let owner = method_input.ok_or(QueryError::UnboundMethodInput)?;
                self.types.insert(owner.to_string());
                Ok(owner.to_string())
            }
            ObjectSet::Filtered { source, .. } => self.visit_set(source, method_input, next),
            ObjectSet::Union { sources } | ObjectSet::Intersect { sources } => {
                let mut result = None;
                for source in sources {
                    let ty = self.visit_set(source, method_input, next)?;
                    result.get_or_insert(ty);
                }
                result.ok_or(QueryError::EmptySetOperation("set operation"))
            }
            ObjectSet::Subtract {
                source,
                subtrahends,
            } => {
                let ty = self.visit_set(source, method_input, next)?;
                for other in subtrahends {
                    self.visit_set(other, method_input, next)?;
                }
                Ok(ty)
            }
            ObjectSet::SearchAround { source, link } => {
                let source_type = self.visit_set(source, method_input, next)?;
                let target = self.schema.link(&source_type, link)?.target_type.clone();
                self.types.insert(target.clone());
                Ok(target)
            }
            ObjectSet::WithProperties { source, derived } => {
                let ty = self.visit_set(source, method_input, next)?;
                for definition in derived.values() {
                    self.visit_derived(definition, &ty, next)?;
                }
                Ok(ty)
            }
        }
    }

    fn visit_derived(
        &mut self,
        definition: &DerivedProperty,
        owner_type: &str,
        depth: usize,
    ) -> QueryResult<()> {
        Self::check_depth(depth)?;
        if let DerivedProperty::Selection { object_set, .. } = definition {
            self.visit_set(object_set, Some(owner_type), depth + 1)?;
        }
        for operand in definition.operands() {
            self.visit_derived(operand, owner_type, depth + 1)?;
        }
        Ok(())
    }
}
