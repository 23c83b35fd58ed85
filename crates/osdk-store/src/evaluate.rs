//! Object-set evaluation over a store snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use osdk_query::{evaluate_derived, DerivedContext, ObjectSet, QueryError, QueryResult};
use osdk_types::{
    ObjectIdentity, ObjectRecord, ObjectTypeDefinition, OntologySchema, PropertyKind, PropertyMap,
};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Objects and the link index, as held behind the store lock.
#[derive(Clone, Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) objects: BTreeMap<ObjectIdentity, PropertyMap>,
    /// source -> link name -> targets
    pub(crate) links: BTreeMap<ObjectIdentity, BTreeMap<String, BTreeSet<ObjectIdentity>>>,
}

impl StoreState {
    pub(crate) fn record(&self, identity: &ObjectIdentity) -> Option<ObjectRecord> {
        self.objects
            .get(identity)
            .map(|props| ObjectRecord::new(identity.clone(), props.clone()))
    }

    pub(crate) fn of_type<'s>(&'s self, object_type: &'s str) -> impl Iterator<Item = ObjectRecord> + 's {
        self.objects
            .iter()
            .filter(move |(id, _)| id.object_type == object_type)
            .map(|(id, props)| ObjectRecord::new(id.clone(), props.clone()))
    }

    pub(crate) fn targets(&self, source: &ObjectIdentity, link: &str) -> Vec<ObjectIdentity> {
        self.links
            .get(source)
            .and_then(|by_link| by_link.get(link))
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add one side of a link. A single-valued side drops its previous
    /// target, and `back` names the side to clear on that displaced target.
    pub(crate) fn add_side(
        &mut self,
        from: &ObjectIdentity,
        link: &str,
        single: bool,
        to: &ObjectIdentity,
        back: Option<&str>,
    ) -> bool {
        let targets = self
            .links
            .entry(from.clone())
            .or_default()
            .entry(link.to_string())
            .or_default();
        if targets.contains(to) {
            return false;
        }
        let displaced = if single {
            std::mem::take(targets)
        } else {
            BTreeSet::new()
        };
        targets.insert(to.clone());
        if let Some(back) = back {
            for old in &displaced {
                self.remove_side(old, back, from);
            }
        }
        true
    }

    pub(crate) fn remove_side(
        &mut self,
        from: &ObjectIdentity,
        link: &str,
        to: &ObjectIdentity,
    ) -> bool {
        let Some(by_link) = self.links.get_mut(from) else {
            return false;
        };
        let Some(targets) = by_link.get_mut(link) else {
            return false;
        };
        let removed = targets.remove(to);
        if targets.is_empty() {
            by_link.remove(link);
        }
        if by_link.is_empty() {
            self.links.remove(from);
        }
        removed
    }

    /// Drop every link from or to `identity`.
    pub(crate) fn unlink_all(&mut self, identity: &ObjectIdentity) {
        self.links.remove(identity);
        for by_link in self.links.values_mut() {
            for targets in by_link.values_mut() {
                targets.remove(identity);
            }
            by_link.retain(|_, targets| !targets.is_empty());
        }
        self.links.retain(|_, by_link| !by_link.is_empty());
    }
}

/// Evaluates validated object-set expressions against a snapshot.
pub(crate) struct Evaluator<'a> {
    schema: &'a OntologySchema,
    state: &'a StoreState,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(schema: &'a OntologySchema, state: &'a StoreState) -> Self {
        Self { schema, state }
    }

    /// Result type of `set`, which supplies the property kinds filters and
    /// aggregates compare by.
    fn definition_of(
        &self,
        set: &ObjectSet,
        method_input: Option<&ObjectRecord>,
    ) -> StoreResult<ObjectTypeDefinition> {
        let input = method_input
            .map(|r| self.schema.object_type(&r.identity.object_type))
            .transpose()?;
        Ok(set.result_definition_bound(self.schema, input)?)
    }

    /// Members of `set`, without duplicate identities. Base sets are in
    /// primary-key order; set operations keep first-seen order.
    pub(crate) fn objects(
        &self,
        set: &ObjectSet,
        method_input: Option<&ObjectRecord>,
    ) -> StoreResult<Vec<ObjectRecord>> {
        match set {
            ObjectSet::Base { object_type } => Ok(self.state.of_type(object_type).collect()),
            ObjectSet::MethodInput => method_input
                .cloned()
                .map(|r| vec![r])
                .ok_or(StoreError::Query(QueryError::UnboundMethodInput)),
            ObjectSet::Filtered {
                source,
                where_clause,
            } => {
                let definition = self.definition_of(source, method_input)?;
                let mut rows = self.objects(source, method_input)?;
                rows.retain(|r| where_clause.matches_typed(&definition, &r.properties));
                Ok(rows)
            }
            ObjectSet::Union { sources } => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for source in sources {
                    for row in self.objects(source, method_input)? {
                        if seen.insert(row.identity.clone()) {
                            out.push(row);
                        }
                    }
                }
                Ok(out)
            }
            ObjectSet::Intersect { sources } => {
                let Some((first, rest)) = sources.split_first() else {
                    return Ok(Vec::new());
                };
                let mut out = dedup(self.objects(first, method_input)?);
                for other in rest {
                    let mut matches: HashMap<ObjectIdentity, PropertyMap> = self
                        .objects(other, method_input)?
                        .into_iter()
                        .map(|r| (r.identity, r.properties))
                        .collect();
                    out.retain_mut(|row| match matches.remove(&row.identity) {
                        // Derived properties computed on either side survive.
                        Some(props) => {
                            row.properties.extend(props);
                            true
                        }
                        None => false,
                    });
                }
                Ok(out)
            }
            ObjectSet::Subtract {
                source,
                subtrahends,
            } => {
                let mut removed = HashSet::new();
                for other in subtrahends {
                    removed.extend(
                        self.objects(other, method_input)?
                            .into_iter()
                            .map(|r| r.identity),
                    );
                }
                let mut out = dedup(self.objects(source, method_input)?);
                out.retain(|r| !removed.contains(&r.identity));
                Ok(out)
            }
            ObjectSet::SearchAround { source, link } => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for row in self.objects(source, method_input)? {
                    for target in self.state.targets(&row.identity, link) {
                        if !seen.insert(target.clone()) {
                            continue;
                        }
                        if let Some(record) = self.state.record(&target) {
                            out.push(record);
                        }
                    }
                }
                Ok(out)
            }
            ObjectSet::WithProperties { source, derived } => {
                let rows = self.objects(source, method_input)?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut extra = PropertyMap::new();
                    {
                        let ctx = RecordContext {
                            evaluator: self,
                            record: &row,
                        };
                        for (name, definition) in derived {
                            let value = evaluate_derived(definition, &ctx)?;
                            if !value.is_null() {
                                extra.insert(name.clone(), value);
                            }
                        }
                    }
                    let mut row = row;
                    row.properties.extend(extra);
                    out.push(row);
                }
                Ok(out)
            }
        }
    }
}

fn dedup(rows: Vec<ObjectRecord>) -> Vec<ObjectRecord> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|r| seen.insert(r.identity.clone()))
        .collect()
}

/// Derived-property context bound to one owning object.
struct RecordContext<'e, 'a> {
    evaluator: &'e Evaluator<'a>,
    record: &'e ObjectRecord,
}

impl DerivedContext for RecordContext<'_, '_> {
    fn property(&self, name: &str) -> Option<Value> {
        self.record.properties.get(name).cloned()
    }

    fn select(&self, object_set: &ObjectSet) -> QueryResult<Vec<PropertyMap>> {
        match self.evaluator.objects(object_set, Some(self.record)) {
            Ok(rows) => Ok(rows.into_iter().map(|r| r.properties).collect()),
            Err(StoreError::Query(err)) => Err(err),
            Err(other) => Err(QueryError::Evaluation(other.to_string())),
        }
    }

    fn property_kind(&self, object_set: &ObjectSet, property: &str) -> Option<PropertyKind> {
        let definition = self
            .evaluator
            .definition_of(object_set, Some(self.record))
            .ok()?;
        definition.properties.get(property).map(|p| p.kind.clone())
    }
}
