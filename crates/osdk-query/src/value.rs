//! Comparison helpers over JSON property values.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use osdk_types::PropertyKind;
use serde_json::Value;

/// A parsed point in time: RFC 3339 timestamp or calendar date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Instant {
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl Instant {
    pub fn as_timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Timestamp(ts) => *ts,
            Self::Date(d) => d.and_time(chrono::NaiveTime::default()).and_utc(),
        }
    }
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub fn parse_instant(s: &str) -> Option<Instant> {
    parse_timestamp(s)
        .map(Instant::Timestamp)
        .or_else(|| parse_date(s).map(Instant::Date))
}

/// How string values are ordered, chosen from the property's kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringOrder {
    /// Byte-wise. Used for every kind except timestamps and dates.
    #[default]
    Lexical,
    /// By the instant a string denotes. Strings that do not parse sort after
    /// those that do, byte-wise among themselves.
    Chronological,
}

impl StringOrder {
    pub fn for_kind(kind: Option<&PropertyKind>) -> Self {
        match kind {
            Some(k) if k.is_datetime() => Self::Chronological,
            Some(PropertyKind::Array(inner)) if inner.is_datetime() => Self::Chronological,
            _ => Self::Lexical,
        }
    }

    fn compare(self, a: &str, b: &str) -> Option<Ordering> {
        match self {
            Self::Lexical => Some(a.cmp(b)),
            Self::Chronological => match (parse_instant(a), parse_instant(b)) {
                (Some(x), Some(y)) => Some(x.as_timestamp().cmp(&y.as_timestamp())),
                (None, None) if a == b => Some(Ordering::Equal),
                _ => None,
            },
        }
    }

    fn sort(self, a: &str, b: &str) -> Ordering {
        match self {
            Self::Lexical => a.cmp(b),
            Self::Chronological => match (parse_instant(a), parse_instant(b)) {
                (Some(x), Some(y)) => x.as_timestamp().cmp(&y.as_timestamp()),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            },
        }
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Order two values of the same primitive class.
///
/// Numbers compare numerically and strings per `strings`. Mixed classes,
/// nulls, composites and unparseable instants are unordered.
pub fn compare_json(a: &Value, b: &Value, strings: StringOrder) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => strings.compare(x, y),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Value equality with numeric normalization, and instant normalization for
/// chronological strings.
pub fn json_equal(a: &Value, b: &Value, strings: StringOrder) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_json(a, b, strings) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

fn class_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting. Values of different classes order by
/// class; composites by their JSON text.
pub fn sort_order(a: &Value, b: &Value, strings: StringOrder) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            compare_numbers(x, y).unwrap_or_else(|| x.to_string().cmp(&y.to_string()))
        }
        (Value::String(x), Value::String(y)) => strings.sort(x, y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => class_rank(a).cmp(&class_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LEX: StringOrder = StringOrder::Lexical;
    const TIME: StringOrder = StringOrder::Chronological;

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(compare_json(&json!(2), &json!(2.0), LEX), Some(Ordering::Equal));
        assert_eq!(compare_json(&json!(1), &json!(1.5), LEX), Some(Ordering::Less));
        assert!(json_equal(&json!(3), &json!(3.0), LEX));
    }

    #[test]
    fn timestamps_compare_as_instants() {
        let a = json!("2024-01-01T10:00:00+02:00");
        let b = json!("2024-01-01T09:00:00Z");
        assert_eq!(compare_json(&a, &b, TIME), Some(Ordering::Less));
        assert!(json_equal(
            &json!("2024-01-01T08:00:00Z"),
            &json!("2024-01-01T10:00:00+02:00"),
            TIME
        ));
    }

    #[test]
    fn dates_compare_with_timestamps() {
        assert_eq!(
            compare_json(&json!("2024-01-02"), &json!("2024-01-01T23:00:00Z"), TIME),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn plain_strings_never_compare_as_instants() {
        assert!(!json_equal(&json!("2024-01-01"), &json!("2024-01-01T00:00:00Z"), LEX));
        assert!(!json_equal(
            &json!("2024-01-01T08:00:00Z"),
            &json!("2024-01-01T10:00:00+02:00"),
            LEX
        ));
        assert_eq!(
            compare_json(&json!("2024-01-01T10:00:00+02:00"), &json!("2024-01-01T09:00:00Z"), LEX),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn kind_selects_string_order() {
        assert_eq!(StringOrder::for_kind(Some(&PropertyKind::String)), LEX);
        assert_eq!(StringOrder::for_kind(None), LEX);
        assert_eq!(StringOrder::for_kind(Some(&PropertyKind::Date)), TIME);
        assert_eq!(
            StringOrder::for_kind(Some(&PropertyKind::Array(Box::new(PropertyKind::Timestamp)))),
            TIME
        );
    }

    #[test]
    fn unparseable_instants_are_unordered_but_still_sort() {
        assert_eq!(compare_json(&json!("soon"), &json!("2024-01-01"), TIME), None);
        assert_eq!(sort_order(&json!("2024-01-01"), &json!("soon"), TIME), Ordering::Less);
        assert_eq!(sort_order(&json!("later"), &json!("soon"), TIME), Ordering::Less);
    }

    #[test]
    fn sort_order_is_total_over_mixed_values() {
        let values = [
            json!("2024-01-01"),
            json!("2024-01-01T00:00:00Z"),
            json!("2023-12-31T23:00:00-02:00"),
            json!("b"),
            json!("A"),
            json!(1),
            json!(0.5),
            json!(true),
            json!(null),
            json!([1]),
            json!({"a": 1}),
        ];
        for order in [LEX, TIME] {
            for a in &values {
                for b in &values {
                    assert_eq!(sort_order(a, b, order), sort_order(b, a, order).reverse());
                    for c in &values {
                        if sort_order(a, b, order).is_le() && sort_order(b, c, order).is_le() {
                            assert!(sort_order(a, c, order).is_le(), "{a} <= {b} <= {c}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn mixed_classes_are_unordered() {
        assert_eq!(compare_json(&json!(1), &json!("1"), LEX), None);
        assert_eq!(compare_json(&json!(null), &json!(null), LEX), None);
        assert!(!json_equal(&json!(1), &json!("1"), LEX));
    }
}
