//! Where-clause interpreter.
//!
//! Used by the in-memory store to filter objects and by the cache to decide
//! list membership locally. Evaluation never fails: predicates that cannot
//! apply to a value (wrong type, null, undecodable geometry) are `false`.

use std::cmp::Ordering;

use osdk_types::{ObjectTypeDefinition, PropertyMap};
use serde_json::Value;

use crate::geo::Geometry;
use crate::value::{compare_json, json_equal, StringOrder};
use crate::where_clause::{Operand, PropertyFilter, WhereClause};

/// Evaluate `clause` against one record without schema knowledge.
///
/// Strings compare byte-wise. Use [`evaluate_typed`] when timestamp and
/// date properties should compare as instants.
pub fn evaluate(clause: &WhereClause, properties: &PropertyMap) -> bool {
    evaluate_with(clause, None, properties)
}

/// Evaluate `clause` against one record of `definition`'s type.
///
/// `And([])` is `true`, `Or([])` is `false`. Only `isNull` matches an absent
/// or null property.
pub fn evaluate_typed(
    clause: &WhereClause,
    definition: &ObjectTypeDefinition,
    properties: &PropertyMap,
) -> bool {
    evaluate_with(clause, Some(definition), properties)
}

fn evaluate_with(
    clause: &WhereClause,
    definition: Option<&ObjectTypeDefinition>,
    properties: &PropertyMap,
) -> bool {
    match clause {
        WhereClause::And(children) => children
            .iter()
            .all(|c| evaluate_with(c, definition, properties)),
        WhereClause::Or(children) => children
            .iter()
            .any(|c| evaluate_with(c, definition, properties)),
        WhereClause::Not(child) => !evaluate_with(child, definition, properties),
        WhereClause::Property { property, filter } => {
            let kind = definition
                .and_then(|d| d.properties.get(property))
                .map(|p| &p.kind);
            let value = properties.get(property).filter(|v| !v.is_null());
            evaluate_filter(filter, value, StringOrder::for_kind(kind))
        }
    }
}

fn evaluate_filter(filter: &PropertyFilter, value: Option<&Value>, strings: StringOrder) -> bool {
    let Some(value) = value else {
        return matches!(filter, PropertyFilter::IsNull(true));
    };
    let equal = |a: &Value, op: &Operand| json_equal(a, &op.to_json(), strings);
    let compare = |op: &Operand| compare_json(value, &op.to_json(), strings);
    match filter {
        PropertyFilter::Eq(op) => equal(value, op),
        PropertyFilter::Ne(op) => !equal(value, op),
        PropertyFilter::Gt(op) => compare(op) == Some(Ordering::Greater),
        PropertyFilter::Gte(op) => {
            matches!(compare(op), Some(Ordering::Greater | Ordering::Equal))
        }
        PropertyFilter::Lt(op) => compare(op) == Some(Ordering::Less),
        PropertyFilter::Lte(op) => matches!(compare(op), Some(Ordering::Less | Ordering::Equal)),
        PropertyFilter::In(ops) => ops.iter().any(|op| equal(value, op)),
        PropertyFilter::Contains(op) => value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| equal(item, op))),
        PropertyFilter::StartsWith(prefix) => {
            value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
        }
        PropertyFilter::ContainsAllTerms(query) => {
            text_match(value, query, TermMatch::All)
        }
        PropertyFilter::ContainsAnyTerm(query) => text_match(value, query, TermMatch::Any),
        PropertyFilter::ContainsAllTermsInOrder(query) => {
            text_match(value, query, TermMatch::InOrder)
        }
        PropertyFilter::Within(region) => {
            Geometry::from_value(value).is_some_and(|g| region.within(&g))
        }
        PropertyFilter::Intersects(region) => {
            Geometry::from_value(value).is_some_and(|g| region.intersects(&g))
        }
        PropertyFilter::IsNull(expected) => !expected,
    }
}

#[derive(Clone, Copy)]
enum TermMatch {
    All,
    Any,
    InOrder,
}

fn tokenize(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_lowercase).collect()
}

/// Full-text term matching: a term matches a token when it is a substring
/// of it, ignoring case.
fn text_match(value: &Value, query: &str, mode: TermMatch) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    let tokens = tokenize(text);
    let terms = tokenize(query);
    let position = |term: &str, from: usize| {
        tokens
            .iter()
            .skip(from)
            .position(|t| t.contains(term))
            .map(|i| i + from)
    };
    match mode {
        TermMatch::All => terms.iter().all(|t| position(t, 0).is_some()),
        TermMatch::Any => terms.iter().any(|t| position(t, 0).is_some()),
        TermMatch::InOrder => {
            let mut from = 0;
            for term in &terms {
                match position(term, from) {
                    Some(i) => from = i,
                    None => return false,
                }
            }
            true
        }
    }
}
