//! Derived properties: values computed at query time from the owning object
//! or from object sets related to it.

use std::cmp::Ordering;

use chrono::Datelike;
use osdk_types::{ObjectTypeDefinition, OntologySchema, PropertyKind, PropertyMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::object_set::{ObjectSet, MAX_EXPRESSION_DEPTH};
use crate::value::{compare_json, json_equal, parse_instant, sort_order, StringOrder};

/// Operation applied to the objects of a selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SelectionOp {
    /// The property of the single selected object; null when none.
    Get { property: String },
    Count,
    Sum { property: String },
    Min { property: String },
    Max { property: String },
    Avg { property: String },
    CollectList { property: String },
    CollectSet { property: String },
}

impl SelectionOp {
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::Count => None,
            Self::Get { property }
            | Self::Sum { property }
            | Self::Min { property }
            | Self::Max { property }
            | Self::Avg { property }
            | Self::CollectList { property }
            | Self::CollectSet { property } => Some(property),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatetimePart {
    Year,
    Quarter,
    Month,
    Week,
    Day,
}

/// Definition of a derived property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DerivedProperty {
    Selection {
        #[serde(rename = "objectSet")]
        object_set: ObjectSet,
        operation: SelectionOp,
    },
    Property {
        name: String,
    },
    Literal {
        value: Value,
    },
    Add {
        operands: Vec<DerivedProperty>,
    },
    Multiply {
        operands: Vec<DerivedProperty>,
    },
    Subtract {
        left: Box<DerivedProperty>,
        right: Box<DerivedProperty>,
    },
    Divide {
        left: Box<DerivedProperty>,
        right: Box<DerivedProperty>,
    },
    Negate {
        operand: Box<DerivedProperty>,
    },
    AbsoluteValue {
        operand: Box<DerivedProperty>,
    },
    Least {
        operands: Vec<DerivedProperty>,
    },
    Greatest {
        operands: Vec<DerivedProperty>,
    },
    Extract {
        part: DatetimePart,
        operand: Box<DerivedProperty>,
    },
}

impl DerivedProperty {
    pub fn selection(object_set: ObjectSet, operation: SelectionOp) -> Self {
        Self::Selection {
            object_set,
            operation,
        }
    }

    pub fn property(name: impl Into<String>) -> Self {
        Self::Property { name: name.into() }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Child definitions, not including selection object sets.
    pub fn operands(&self) -> Vec<&DerivedProperty> {
        match self {
            Self::Selection { .. } | Self::Property { .. } | Self::Literal { .. } => Vec::new(),
            Self::Add { operands }
            | Self::Multiply { operands }
            | Self::Least { operands }
            | Self::Greatest { operands } => operands.iter().collect(),
            Self::Subtract { left, right } | Self::Divide { left, right } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Self::Negate { operand }
            | Self::AbsoluteValue { operand }
            | Self::Extract { operand, .. } => vec![operand.as_ref()],
        }
    }

    pub(crate) fn canonicalize(&self) -> DerivedProperty {
        match self {
            Self::Selection {
                object_set,
                operation,
            } => Self::Selection {
                object_set: object_set.canonicalize(),
                operation: operation.clone(),
            },
            Self::Property { .. } | Self::Literal { .. } => self.clone(),
            Self::Add { operands } => Self::Add {
                operands: canonical_all(operands),
            },
            Self::Multiply { operands } => Self::Multiply {
                operands: canonical_all(operands),
            },
            Self::Least { operands } => Self::Least {
                operands: canonical_all(operands),
            },
            Self::Greatest { operands } => Self::Greatest {
                operands: canonical_all(operands),
            },
            Self::Subtract { left, right } => Self::Subtract {
                left: Box::new(left.canonicalize()),
                right: Box::new(right.canonicalize()),
            },
            Self::Divide { left, right } => Self::Divide {
                left: Box::new(left.canonicalize()),
                right: Box::new(right.canonicalize()),
            },
            Self::Negate { operand } => Self::Negate {
                operand: Box::new(operand.canonicalize()),
            },
            Self::AbsoluteValue { operand } => Self::AbsoluteValue {
                operand: Box::new(operand.canonicalize()),
            },
            Self::Extract { part, operand } => Self::Extract {
                part: *part,
                operand: Box::new(operand.canonicalize()),
            },
        }
    }

    /// Check the definition against the owning object type and return the
    /// kind of the computed value.
    pub fn validate(
        &self,
        schema: &OntologySchema,
        owner: &ObjectTypeDefinition,
    ) -> QueryResult<PropertyKind> {
        self.kind_at(schema, owner, 0)
    }

    pub(crate) fn kind_at(
        &self,
        schema: &OntologySchema,
        owner: &ObjectTypeDefinition,
        depth: usize,
    ) -> QueryResult<PropertyKind> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(QueryError::DepthExceeded {
                max: MAX_EXPRESSION_DEPTH,
            });
        }
        match self {
            Self::Selection {
                object_set,
                operation,
            } => {
                let selected = object_set.resolve(schema, Some(owner), depth + 1)?;
                selection_kind(&selected, operation)
            }
            Self::Property { name } => Ok(owner.property(name)?.kind.clone()),
            Self::Literal { value } => literal_kind(value),
            Self::Add { operands } | Self::Multiply { operands } => {
                let kinds = self.operand_kinds(operands.iter(), schema, owner, depth)?;
                numeric_result(&kinds, self.name())
            }
            Self::Subtract { left, right } => {
                let kinds = self.operand_kinds([&**left, &**right], schema, owner, depth)?;
                numeric_result(&kinds, "subtract")
            }
            Self::Divide { left, right } => {
                let kinds = self.operand_kinds([&**left, &**right], schema, owner, depth)?;
                numeric_result(&kinds, "divide").map(|_| PropertyKind::Double)
            }
            Self::Negate { operand } | Self::AbsoluteValue { operand } => {
                let kinds = self.operand_kinds([&**operand], schema, owner, depth)?;
                numeric_result(&kinds, self.name())
            }
            Self::Least { operands } | Self::Greatest { operands } => {
                let kinds = self.operand_kinds(operands.iter(), schema, owner, depth)?;
                if kinds.iter().all(PropertyKind::is_datetime) {
                    if kinds.iter().all(|k| *k == PropertyKind::Date) {
                        return Ok(PropertyKind::Date);
                    }
                    return Ok(PropertyKind::Timestamp);
                }
                numeric_result(&kinds, self.name())
            }
            Self::Extract { operand, .. } => {
                let kind = operand.kind_at(schema, owner, depth + 1)?;
                if !kind.is_datetime() {
                    return Err(QueryError::InvalidDerivedProperty(format!(
                        "extract requires a datetime operand, got {kind:?}"
                    )));
                }
                Ok(PropertyKind::Integer)
            }
        }
    }

    fn operand_kinds<'a>(
        &self,
        operands: impl IntoIterator<Item = &'a DerivedProperty>,
        schema: &OntologySchema,
        owner: &ObjectTypeDefinition,
        depth: usize,
    ) -> QueryResult<Vec<PropertyKind>> {
        let kinds = operands
            .into_iter()
            .map(|op| op.kind_at(schema, owner, depth + 1))
            .collect::<QueryResult<Vec<_>>>()?;
        if kinds.is_empty() {
            return Err(QueryError::InvalidDerivedProperty(format!(
                "{} requires at least one operand",
                self.name()
            )));
        }
        Ok(kinds)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Selection { .. } => "selection",
            Self::Property { .. } => "property",
            Self::Literal { .. } => "literal",
            Self::Add { .. } => "add",
            Self::Multiply { .. } => "multiply",
            Self::Subtract { .. } => "subtract",
            Self::Divide { .. } => "divide",
            Self::Negate { .. } => "negate",
            Self::AbsoluteValue { .. } => "absoluteValue",
            Self::Least { .. } => "least",
            Self::Greatest { .. } => "greatest",
            Self::Extract { .. } => "extract",
        }
    }
}

fn canonical_all(operands: &[DerivedProperty]) -> Vec<DerivedProperty> {
    operands.iter().map(DerivedProperty::canonicalize).collect()
}

fn selection_kind(
    selected: &ObjectTypeDefinition,
    operation: &SelectionOp,
) -> QueryResult<PropertyKind> {
    let Some(property) = operation.property() else {
        return Ok(PropertyKind::Integer);
    };
    let kind = selected.property(property)?.kind.clone();
    match operation {
        SelectionOp::Sum { .. } | SelectionOp::Avg { .. } if !kind.is_numeric() => {
            Err(QueryError::InvalidDerivedProperty(format!(
                "cannot aggregate non-numeric property {property}"
            )))
        }
        SelectionOp::Sum { .. } | SelectionOp::Avg { .. } => Ok(PropertyKind::Double),
        SelectionOp::CollectList { .. } | SelectionOp::CollectSet { .. } => {
            Ok(PropertyKind::Array(Box::new(kind)))
        }
        _ => Ok(kind),
    }
}

fn literal_kind(value: &Value) -> QueryResult<PropertyKind> {
    match value {
        Value::Bool(_) => Ok(PropertyKind::Boolean),
        Value::Number(n) if n.is_i64() => Ok(PropertyKind::Integer),
        Value::Number(_) => Ok(PropertyKind::Double),
        Value::String(s) if parse_instant(s).is_some() => Ok(PropertyKind::Timestamp),
        Value::String(_) => Ok(PropertyKind::String),
        other => Err(QueryError::InvalidDerivedProperty(format!(
            "unsupported literal {other}"
        ))),
    }
}

fn numeric_result(kinds: &[PropertyKind], op: &str) -> QueryResult<PropertyKind> {
    if let Some(bad) = kinds.iter().find(|k| !k.is_numeric()) {
        return Err(QueryError::InvalidDerivedProperty(format!(
            "{op} requires numeric operands, got {bad:?}"
        )));
    }
    if kinds.iter().all(|k| *k != PropertyKind::Double) {
        Ok(PropertyKind::Integer)
    } else {
        Ok(PropertyKind::Double)
    }
}

/// What an evaluator needs from the data source.
pub trait DerivedContext {
    /// Property of the object the definition is evaluated for.
    fn property(&self, name: &str) -> Option<Value>;

    /// Properties of every object in `object_set`, with method input bound
    /// to the owning object.
    fn select(&self, object_set: &ObjectSet) -> QueryResult<Vec<PropertyMap>>;

    /// Kind of `property` on members of `object_set`, when the context knows
    /// the schema. Unknown kinds aggregate strings byte-wise.
    fn property_kind(&self, _object_set: &ObjectSet, _property: &str) -> Option<PropertyKind> {
        None
    }
}

/// Compute a derived value. Nulls propagate through arithmetic; aggregates
/// skip them.
pub fn evaluate_derived(
    definition: &DerivedProperty,
    ctx: &dyn DerivedContext,
) -> QueryResult<Value> {
    match definition {
        DerivedProperty::Selection {
            object_set,
            operation,
        } => {
            let rows = ctx.select(object_set)?;
            let kind = operation
                .property()
                .and_then(|p| ctx.property_kind(object_set, p));
            aggregate(operation, &rows, StringOrder::for_kind(kind.as_ref()))
        }
        DerivedProperty::Property { name } => Ok(ctx.property(name).unwrap_or(Value::Null)),
        DerivedProperty::Literal { value } => Ok(value.clone()),
        DerivedProperty::Add { operands } => fold_numeric(operands, ctx, i64::checked_add, |a, b| a + b),
        DerivedProperty::Multiply { operands } => {
            fold_numeric(operands, ctx, i64::checked_mul, |a, b| a * b)
        }
        DerivedProperty::Subtract { left, right } => {
            let pair = [(**left).clone(), (**right).clone()];
            fold_numeric(&pair, ctx, i64::checked_sub, |a, b| a - b)
        }
        DerivedProperty::Divide { left, right } => {
            let l = evaluate_derived(left, ctx)?;
            let r = evaluate_derived(right, ctx)?;
            match (l.as_f64(), r.as_f64()) {
                (Some(_), Some(d)) if d == 0.0 => Ok(Value::Null),
                (Some(n), Some(d)) => Ok(Value::from(n / d)),
                _ => Ok(Value::Null),
            }
        }
        DerivedProperty::Negate { operand } => {
            Ok(match Number::of(&evaluate_derived(operand, ctx)?) {
                Some(Number::Int(i)) => i
                    .checked_neg()
                    .map_or_else(|| Value::from(-(i as f64)), Value::from),
                Some(Number::Float(f)) => Value::from(-f),
                None => Value::Null,
            })
        }
        DerivedProperty::AbsoluteValue { operand } => {
            Ok(match Number::of(&evaluate_derived(operand, ctx)?) {
                Some(Number::Int(i)) => i
                    .checked_abs()
                    .map_or_else(|| Value::from((i as f64).abs()), Value::from),
                Some(Number::Float(f)) => Value::from(f.abs()),
                None => Value::Null,
            })
        }
        DerivedProperty::Least { operands } => extreme(operands, ctx, Ordering::Less),
        DerivedProperty::Greatest { operands } => extreme(operands, ctx, Ordering::Greater),
        DerivedProperty::Extract { part, operand } => {
            let value = evaluate_derived(operand, ctx)?;
            let Some(instant) = value.as_str().and_then(parse_instant) else {
                return Ok(Value::Null);
            };
            let ts = instant.as_timestamp();
            let n = match part {
                DatetimePart::Year => i64::from(ts.year()),
                DatetimePart::Quarter => i64::from((ts.month() - 1) / 3 + 1),
                DatetimePart::Month => i64::from(ts.month()),
                DatetimePart::Week => i64::from(ts.iso_week().week()),
                DatetimePart::Day => i64::from(ts.day()),
            };
            Ok(Value::from(n))
        }
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Self> {
        let n = value.as_number()?;
        Some(match n.as_i64() {
            Some(i) => Self::Int(i),
            None => Self::Float(n.as_f64()?),
        })
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Int(i) => Value::from(i),
            Self::Float(f) => Value::from(f),
        }
    }
}

/// Left fold staying in integers until a float appears or overflow occurs.
fn fold_numeric(
    operands: &[DerivedProperty],
    ctx: &dyn DerivedContext,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> QueryResult<Value> {
    let mut acc: Option<Number> = None;
    for operand in operands {
        let Some(next) = Number::of(&evaluate_derived(operand, ctx)?) else {
            return Ok(Value::Null);
        };
        acc = Some(match (acc, next) {
            (None, n) => n,
            (Some(Number::Int(a)), Number::Int(b)) => match int_op(a, b) {
                Some(r) => Number::Int(r),
                None => Number::Float(float_op(a as f64, b as f64)),
            },
            (Some(a), b) => Number::Float(float_op(a.as_f64(), b.as_f64())),
        });
    }
    Ok(acc.map_or(Value::Null, Number::into_value))
}

fn extreme(
    operands: &[DerivedProperty],
    ctx: &dyn DerivedContext,
    keep: Ordering,
) -> QueryResult<Value> {
    let mut best: Option<Value> = None;
    for operand in operands {
        let value = evaluate_derived(operand, ctx)?;
        if value.is_null() {
            continue;
        }
        best = Some(match best {
            None => value,
            // Operands are all numeric or all datetime once validated.
            Some(current) => match compare_json(&value, &current, StringOrder::Chronological) {
                Some(ord) if ord == keep => value,
                Some(_) => current,
                None => {
                    return Err(QueryError::Evaluation(format!(
                        "cannot compare {value} with {current}"
                    )))
                }
            },
        });
    }
    Ok(best.unwrap_or(Value::Null))
}

fn aggregate(
    operation: &SelectionOp,
    rows: &[PropertyMap],
    strings: StringOrder,
) -> QueryResult<Value> {
    let values = |property: &str| -> Vec<Value> {
        rows.iter()
            .filter_map(|r| r.get(property).filter(|v| !v.is_null()).cloned())
            .collect()
    };
    match operation {
        SelectionOp::Count => Ok(Value::from(rows.len() as u64)),
        SelectionOp::Get { property } => match rows {
            [] => Ok(Value::Null),
            [row] => Ok(row.get(property).cloned().unwrap_or(Value::Null)),
            _ => Err(QueryError::Evaluation(format!(
                "selection of {property} matched {} objects, expected at most one",
                rows.len()
            ))),
        },
        SelectionOp::Sum { property } => {
            let mut acc = Number::Int(0);
            for n in values(property).iter().filter_map(Number::of) {
                acc = match (acc, n) {
                    (Number::Int(a), Number::Int(b)) => a
                        .checked_add(b)
                        .map_or(Number::Float(a as f64 + b as f64), Number::Int),
                    (a, b) => Number::Float(a.as_f64() + b.as_f64()),
                };
            }
            Ok(acc.into_value())
        }
        SelectionOp::Avg { property } => {
            let nums: Vec<f64> = values(property).iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                return Ok(Value::Null);
            }
            Ok(Value::from(nums.iter().sum::<f64>() / nums.len() as f64))
        }
        SelectionOp::Min { property } => {
            Ok(values(property)
                .into_iter()
                .min_by(|a, b| sort_order(a, b, strings))
                .unwrap_or(Value::Null))
        }
        SelectionOp::Max { property } => {
            Ok(values(property)
                .into_iter()
                .max_by(|a, b| sort_order(a, b, strings))
                .unwrap_or(Value::Null))
        }
        SelectionOp::CollectList { property } => Ok(Value::Array(values(property))),
        SelectionOp::CollectSet { property } => {
            let mut out: Vec<Value> = Vec::new();
            for v in values(property) {
                if !out.iter().any(|seen| json_equal(seen, &v, strings)) {
                    out.push(v);
                }
            }
            Ok(Value::Array(out))
        }
    }
}
