use std::cmp::Ordering;

use osdk_types::{ObjectTypeDefinition, PropertyMap};
use serde::{Deserialize, Serialize};

use crate::value::{sort_order, StringOrder};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderByField {
    pub property: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Ordered sort keys for a page request. Nulls always sort last.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderBy {
    pub fields: Vec<OrderByField>,
}

impl OrderBy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, property: impl Into<String>) -> Self {
        self.fields.push(OrderByField {
            property: property.into(),
            direction: SortDirection::Asc,
        });
        self
    }

    pub fn desc(mut self, property: impl Into<String>) -> Self {
        self.fields.push(OrderByField {
            property: property.into(),
            direction: SortDirection::Desc,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compare two records by the sort keys in order, strings byte-wise.
    pub fn compare(&self, a: &PropertyMap, b: &PropertyMap) -> Ordering {
        self.compare_with(None, a, b)
    }

    /// Compare two records of `definition`'s type. Timestamp and date keys
    /// order chronologically, everything else as [`compare`](Self::compare).
    /// Both are total orders, so either is safe to hand to a sort.
    pub fn compare_typed(
        &self,
        definition: &ObjectTypeDefinition,
        a: &PropertyMap,
        b: &PropertyMap,
    ) -> Ordering {
        self.compare_with(Some(definition), a, b)
    }

    fn compare_with(
        &self,
        definition: Option<&ObjectTypeDefinition>,
        a: &PropertyMap,
        b: &PropertyMap,
    ) -> Ordering {
        for field in &self.fields {
            let strings = StringOrder::for_kind(
                definition
                    .and_then(|d| d.properties.get(&field.property))
                    .map(|p| &p.kind),
            );
            let left = a.get(&field.property).filter(|v| !v.is_null());
            let right = b.get(&field.property).filter(|v| !v.is_null());
            let ord = match (left, right) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(x), Some(y)) => match field.direction {
                    SortDirection::Asc => sort_order(x, y, strings),
                    SortDirection::Desc => sort_order(y, x, strings),
                },
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
