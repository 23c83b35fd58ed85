use std::fmt;

use osdk_types::{ObjectTypeDefinition, PrimaryKey, PropertyKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::geo::GeoFilter;
use crate::value::{parse_date, parse_timestamp};

/// A primitive predicate operand.
///
/// Timestamp and date properties take RFC 3339 and `YYYY-MM-DD` strings,
/// checked when the predicate is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
}

impl Operand {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::Double(d) => Value::from(*d),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Operand {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Operand {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Operand {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Operand {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&PrimaryKey> for Operand {
    fn from(key: &PrimaryKey) -> Self {
        match key {
            PrimaryKey::Boolean(b) => Self::Boolean(*b),
            PrimaryKey::Integer(i) => Self::Integer(*i),
            PrimaryKey::String(s) => Self::String(s.clone()),
        }
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Operator applied to a single property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyFilter {
    Eq(Operand),
    Ne(Operand),
    Gt(Operand),
    Gte(Operand),
    Lt(Operand),
    Lte(Operand),
    In(Vec<Operand>),
    IsNull(bool),
    Contains(Operand),
    StartsWith(String),
    ContainsAllTerms(String),
    ContainsAnyTerm(String),
    ContainsAllTermsInOrder(String),
    Within(GeoFilter),
    Intersects(GeoFilter),
}

impl PropertyFilter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq(_) => "eq",
            Self::Ne(_) => "ne",
            Self::Gt(_) => "gt",
            Self::Gte(_) => "gte",
            Self::Lt(_) => "lt",
            Self::Lte(_) => "lte",
            Self::In(_) => "in",
            Self::IsNull(_) => "isNull",
            Self::Contains(_) => "contains",
            Self::StartsWith(_) => "startsWith",
            Self::ContainsAllTerms(_) => "containsAllTerms",
            Self::ContainsAnyTerm(_) => "containsAnyTerm",
            Self::ContainsAllTermsInOrder(_) => "containsAllTermsInOrder",
            Self::Within(_) => "within",
            Self::Intersects(_) => "intersects",
        }
    }
}

/// Structured filter over the properties of one object type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WhereClause {
    And(Vec<WhereClause>),
    Or(Vec<WhereClause>),
    Not(Box<WhereClause>),
    Property {
        property: String,
        filter: PropertyFilter,
    },
}

impl WhereClause {
    /// Build a property predicate, checking it against the object type.
    pub fn property(
        definition: &ObjectTypeDefinition,
        property: impl Into<String>,
        filter: PropertyFilter,
    ) -> QueryResult<Self> {
        let property = property.into();
        let kind = &definition.property(&property)?.kind;
        check_filter(&property, kind, &filter)?;
        Ok(Self::Property { property, filter })
    }

    /// Build a predicate without schema checks (e.g. for deserialized input
    /// that is validated later).
    pub fn unchecked(property: impl Into<String>, filter: PropertyFilter) -> Self {
        Self::Property {
            property: property.into(),
            filter,
        }
    }

    pub fn and(clauses: impl IntoIterator<Item = WhereClause>) -> Self {
        Self::And(clauses.into_iter().collect())
    }

    pub fn or(clauses: impl IntoIterator<Item = WhereClause>) -> Self {
        Self::Or(clauses.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(clause: WhereClause) -> Self {
        Self::Not(Box::new(clause))
    }

    /// Re-check every predicate against the object type.
    pub fn validate(&self, definition: &ObjectTypeDefinition) -> QueryResult<()> {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.iter().try_for_each(|c| c.validate(definition))
            }
            Self::Not(child) => child.validate(definition),
            Self::Property { property, filter } => {
                let kind = &definition.property(property)?.kind;
                check_filter(property, kind, filter)
            }
        }
    }

    /// Names of every property the clause reads.
    pub fn properties(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_properties(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_properties<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.iter().for_each(|c| c.collect_properties(out))
            }
            Self::Not(child) => child.collect_properties(out),
            Self::Property { property, .. } => out.push(property),
        }
    }

    /// Semantically equivalent normal form.
    ///
    /// Nested `And`/`Or` are flattened, single-child `And`/`Or` collapse to
    /// the child, double negation is removed, and children and `in` operands
    /// are sorted and deduplicated. Empty `And`/`Or` are kept: they mean
    /// `true` and `false` respectively.
    pub fn canonicalize(&self) -> WhereClause {
        match self {
            Self::And(children) => canonical_junction(children, true),
            Self::Or(children) => canonical_junction(children, false),
            Self::Not(child) => match child.canonicalize() {
                Self::Not(inner) => *inner,
                other => Self::Not(Box::new(other)),
            },
            Self::Property { property, filter } => {
                let filter = match filter {
                    PropertyFilter::In(values) => {
                        let mut values = values.clone();
                        values.sort_by_key(|v| v.to_json().to_string());
                        values.dedup();
                        PropertyFilter::In(values)
                    }
                    other => other.clone(),
                };
                Self::Property {
                    property: property.clone(),
                    filter,
                }
            }
        }
    }

    /// Evaluate against a record's properties. See [`crate::eval::evaluate`].
    pub fn matches(&self, properties: &osdk_types::PropertyMap) -> bool {
        crate::eval::evaluate(self, properties)
    }

    /// Evaluate against a record of `definition`'s type, comparing
    /// timestamps and dates as instants. See [`crate::eval::evaluate_typed`].
    pub fn matches_typed(
        &self,
        definition: &ObjectTypeDefinition,
        properties: &osdk_types::PropertyMap,
    ) -> bool {
        crate::eval::evaluate_typed(self, definition, properties)
    }
}

fn canonical_junction(children: &[WhereClause], is_and: bool) -> WhereClause {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match (child.canonicalize(), is_and) {
            (WhereClause::And(inner), true) | (WhereClause::Or(inner), false) => {
                flat.extend(inner)
            }
            (other, _) => flat.push(other),
        }
    }
    flat.sort_by_cached_key(canonical_key);
    flat.dedup();
    if flat.len() == 1 {
        return flat.remove(0);
    }
    if is_and {
        WhereClause::And(flat)
    } else {
        WhereClause::Or(flat)
    }
}

fn canonical_key(clause: &WhereClause) -> String {
    serde_json::to_string(clause).unwrap_or_default()
}

fn mismatch(property: &str, expected: &str, found: &Operand) -> QueryError {
    QueryError::OperandTypeMismatch {
        property: property.to_string(),
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

fn unsupported(property: &str, filter: &PropertyFilter, kind: &PropertyKind) -> QueryError {
    QueryError::UnsupportedFilter {
        property: property.to_string(),
        filter: filter.name(),
        kind: format!("{kind:?}"),
    }
}

/// Check that a scalar operand can be compared with a property of `kind`.
fn check_operand(property: &str, kind: &PropertyKind, operand: &Operand) -> QueryResult<()> {
    match (kind, operand) {
        (PropertyKind::String, Operand::String(_)) => Ok(()),
        (PropertyKind::Integer | PropertyKind::Long, Operand::Integer(_)) => Ok(()),
        (PropertyKind::Double, Operand::Integer(_) | Operand::Double(_)) => Ok(()),
        (PropertyKind::Boolean, Operand::Boolean(_)) => Ok(()),
        (PropertyKind::Timestamp, Operand::String(s)) => parse_timestamp(s)
            .map(|_| ())
            .ok_or_else(|| QueryError::InvalidDatetime(s.clone())),
        (PropertyKind::Date, Operand::String(s)) => parse_date(s)
            .map(|_| ())
            .ok_or_else(|| QueryError::InvalidDatetime(s.clone())),
        (kind, operand) => Err(mismatch(property, &format!("{kind:?}"), operand)),
    }
}

fn check_filter(property: &str, kind: &PropertyKind, filter: &PropertyFilter) -> QueryResult<()> {
    let scalar = !kind.is_geo() && kind.element_kind().is_none();
    match filter {
        PropertyFilter::IsNull(_) => Ok(()),
        PropertyFilter::Eq(op) | PropertyFilter::Ne(op) if scalar => {
            check_operand(property, kind, op)
        }
        PropertyFilter::Gt(op)
        | PropertyFilter::Gte(op)
        | PropertyFilter::Lt(op)
        | PropertyFilter::Lte(op)
            if scalar && *kind != PropertyKind::Boolean =>
        {
            check_operand(property, kind, op)
        }
        PropertyFilter::In(ops) if scalar => ops
            .iter()
            .try_for_each(|op| check_operand(property, kind, op)),
        PropertyFilter::Contains(op) => match kind.element_kind() {
            Some(elem) => check_operand(property, elem, op),
            None => Err(unsupported(property, filter, kind)),
        },
        PropertyFilter::StartsWith(_)
        | PropertyFilter::ContainsAllTerms(_)
        | PropertyFilter::ContainsAnyTerm(_)
        | PropertyFilter::ContainsAllTermsInOrder(_)
            if kind.is_string() =>
        {
            Ok(())
        }
        PropertyFilter::Within(geo) | PropertyFilter::Intersects(geo) if kind.is_geo() => {
            geo.validate()
        }
        _ => Err(unsupported(property, filter, kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use serde_json::json;

    fn todo_type() -> ObjectTypeDefinition {
        ObjectTypeDefinition::new("Todo", "id")
            .with_property("id", PropertyKind::String)
            .with_property("title", PropertyKind::String)
            .with_property("priority", PropertyKind::Integer)
            .with_property("score", PropertyKind::Double)
            .with_property("done", PropertyKind::Boolean)
            .with_property("due", PropertyKind::Timestamp)
            .with_property("day", PropertyKind::Date)
            .with_property("tags", PropertyKind::Array(Box::new(PropertyKind::String)))
            .with_property("location", PropertyKind::GeoPoint)
    }

    fn eq(property: &str, op: impl Into<Operand>) -> WhereClause {
        WhereClause::unchecked(property, PropertyFilter::Eq(op.into()))
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn matching_operands_accepted() {
        let t = todo_type();
        WhereClause::property(&t, "title", PropertyFilter::StartsWith("a".into())).unwrap();
        WhereClause::property(&t, "priority", PropertyFilter::Gt(3.into())).unwrap();
        WhereClause::property(&t, "score", PropertyFilter::Lte(3.into())).unwrap();
        WhereClause::property(&t, "done", PropertyFilter::Eq(true.into())).unwrap();
        WhereClause::property(&t, "due", PropertyFilter::Gte("2024-01-01T00:00:00Z".into()))
            .unwrap();
        WhereClause::property(&t, "day", PropertyFilter::Lt("2024-01-01".into())).unwrap();
        WhereClause::property(&t, "tags", PropertyFilter::Contains("x".into())).unwrap();
        WhereClause::property(&t, "id", PropertyFilter::IsNull(false)).unwrap();
    }

    #[test]
    fn operand_mismatch_rejected() {
        let t = todo_type();
        let err = WhereClause::property(&t, "priority", PropertyFilter::Eq("high".into()))
            .unwrap_err();
        assert!(matches!(err, QueryError::OperandTypeMismatch { .. }));
        assert!(err.is_construction());
        assert!(WhereClause::property(&t, "priority", PropertyFilter::Eq(1.5.into())).is_err());
        assert!(WhereClause::property(&t, "done", PropertyFilter::Gt(true.into())).is_err());
    }

    #[test]
    fn invalid_datetime_rejected() {
        let t = todo_type();
        let err = WhereClause::property(&t, "due", PropertyFilter::Gt("yesterday".into()))
            .unwrap_err();
        assert_eq!(err, QueryError::InvalidDatetime("yesterday".into()));
    }

    #[test]
    fn unsupported_operator_rejected() {
        let t = todo_type();
        let err = WhereClause::property(&t, "priority", PropertyFilter::StartsWith("1".into()))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedFilter { filter: "startsWith", .. }));
        assert!(WhereClause::property(&t, "title", PropertyFilter::Contains("a".into())).is_err());
        let geo = GeoFilter::polygon(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(1.0, 1.0),
        ])
        .unwrap();
        assert!(WhereClause::property(&t, "title", PropertyFilter::Within(geo.clone())).is_err());
        WhereClause::property(&t, "location", PropertyFilter::Within(geo)).unwrap();
    }

    #[test]
    fn unknown_property_rejected() {
        let err = WhereClause::property(&todo_type(), "nope", PropertyFilter::IsNull(true))
            .unwrap_err();
        assert!(matches!(err, QueryError::Schema(_)));
    }

    #[test]
    fn validate_walks_nested_clauses() {
        let clause = WhereClause::and([
            eq("title", "a"),
            WhereClause::not(WhereClause::or([eq("priority", "bad")])),
        ]);
        assert!(clause.validate(&todo_type()).is_err());
    }

    // -----------------------------------------------------------------------
    // Canonicalization
    // -----------------------------------------------------------------------

    #[test]
    fn canonical_form_flattens_and_sorts() {
        let a = WhereClause::and([eq("b", 1), WhereClause::and([eq("a", 1), eq("c", 1)])]);
        let b = WhereClause::and([eq("c", 1), eq("a", 1), eq("b", 1)]);
        assert_eq!(a.canonicalize(), b.canonicalize());
    }

    #[test]
    fn canonical_form_collapses_singletons_and_double_negation() {
        let clause = WhereClause::or([WhereClause::not(WhereClause::not(eq("a", 1)))]);
        assert_eq!(clause.canonicalize(), eq("a", 1));
    }

    #[test]
    fn canonical_form_keeps_empty_junctions_distinct() {
        assert_eq!(WhereClause::and([]).canonicalize(), WhereClause::And(vec![]));
        assert_eq!(WhereClause::or([]).canonicalize(), WhereClause::Or(vec![]));
    }

    #[test]
    fn canonical_form_does_not_mix_junctions() {
        let clause = WhereClause::and([WhereClause::or([eq("a", 1), eq("b", 1)]), eq("c", 1)]);
        let canon = clause.canonicalize();
        let WhereClause::And(children) = canon else {
            panic!("expected and");
        };
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn canonical_in_is_a_set() {
        let a = WhereClause::unchecked("p", PropertyFilter::In(vec![2.into(), 1.into(), 2.into()]));
        let b = WhereClause::unchecked("p", PropertyFilter::In(vec![1.into(), 2.into()]));
        assert_eq!(a.canonicalize(), b.canonicalize());
    }

    #[test]
    fn properties_lists_each_once() {
        let clause = WhereClause::or([eq("b", 1), WhereClause::not(eq("a", 1)), eq("b", 2)]);
        assert_eq!(clause.properties(), vec!["a", "b"]);
    }

    #[test]
    fn wire_shape() {
        let clause = WhereClause::and([WhereClause::unchecked(
            "priority",
            PropertyFilter::Gte(2.into()),
        )]);
        assert_eq!(
            serde_json::to_value(&clause).unwrap(),
            json!({"and": [{"property": {"property": "priority", "filter": {"gte": 2}}}]})
        );
    }
}
