use osdk_types::{
    apply_patch, LinkSides, ObjectIdentity, ObjectRecord, ObjectTypeDefinition, PrimaryKey,
    PropertyMap, TypeError,
};
use tracing::debug;

use crate::edit::{Edit, EditCounters, ObjectEdits};
use crate::error::{StoreError, StoreResult};
use crate::traits::ObjectBackend;

/// Ordered object and link mutations applied against a backend.
///
/// Every operation is applied to the backend immediately and, when it had
/// an effect, appended to the edit log and counted. Failed operations leave
/// both the log and the counters untouched. The batch has no partial-commit
/// mode: to discard it, run it against a fork (see
/// [`Transaction`](crate::Transaction)) and drop the fork.
pub struct EditBatch<'a, B: ObjectBackend + ?Sized> {
    backend: &'a B,
    edits: Vec<Edit>,
    counters: EditCounters,
}

impl<'a, B: ObjectBackend + ?Sized> EditBatch<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            edits: Vec::new(),
            counters: EditCounters::default(),
        }
    }

    /// Create an object. Fails with [`StoreError::Conflict`] when the
    /// identity already exists.
    pub fn add_object(
        &mut self,
        object_type: &str,
        primary_key: impl Into<PrimaryKey>,
        properties: PropertyMap,
    ) -> StoreResult<ObjectIdentity> {
        let primary_key = primary_key.into();
        let definition = self.backend.schema().object_type(object_type)?;
        check_properties(definition, &properties)?;
        if let Some(given) = properties.get(&definition.primary_key) {
            if PrimaryKey::from_json(given).ok().as_ref() != Some(&primary_key) {
                return Err(StoreError::InvalidEdit(format!(
                    "{} is {given} but the primary key is {primary_key}",
                    definition.primary_key
                )));
            }
        }

        let mut stored: PropertyMap = properties
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        stored.insert(definition.primary_key.clone(), primary_key.to_json());
        let identity = ObjectIdentity::new(object_type, primary_key.clone());
        self.backend
            .insert(ObjectRecord::new(identity.clone(), stored))?;

        debug!(object = %identity, "added object");
        self.edits.push(Edit::AddObject {
            object_type: object_type.to_string(),
            primary_key,
            properties,
        });
        self.counters.added_object_count += 1;
        Ok(identity)
    }

    /// Patch an object's properties; a `null` value removes the property.
    ///
    /// Returns `false`, logging nothing, when the patched record is
    /// deep-equal to the current one.
    pub fn modify_object(
        &mut self,
        identity: &ObjectIdentity,
        patch: PropertyMap,
    ) -> StoreResult<bool> {
        let definition = self.backend.schema().object_type(&identity.object_type)?;
        check_properties(definition, &patch)?;
        if let Some(given) = patch.get(&definition.primary_key) {
            if *given != identity.primary_key.to_json() {
                return Err(StoreError::InvalidEdit(format!(
                    "cannot change primary key {} of {identity}",
                    definition.primary_key
                )));
            }
        }
        let current = self
            .backend
            .read(identity)?
            .ok_or_else(|| StoreError::NotFound(identity.clone()))?;

        let mut next = current.properties.clone();
        apply_patch(&mut next, &patch);
        if next == current.properties {
            return Ok(false);
        }
        self.backend
            .replace(ObjectRecord::new(identity.clone(), next))?;

        debug!(object = %identity, "modified object");
        self.edits.push(Edit::ModifyObject {
            object_type: identity.object_type.clone(),
            primary_key: identity.primary_key.clone(),
            properties: patch,
        });
        self.counters.modified_objects_count += 1;
        Ok(true)
    }

    /// Delete an object and its links. Fails with
    /// [`StoreError::NotFound`] when it does not exist.
    pub fn delete_object(&mut self, identity: &ObjectIdentity) -> StoreResult<()> {
        self.backend.remove(identity)?;
        debug!(object = %identity, "deleted object");
        self.edits.push(Edit::DeleteObject {
            object_type: identity.object_type.clone(),
            primary_key: identity.primary_key.clone(),
        });
        self.counters.deleted_objects_count += 1;
        Ok(())
    }

    /// Link `source` to `target` through `link`, updating the inverse side
    /// as well. Returns `false` when the link already existed.
    pub fn add_link(
        &mut self,
        source: &ObjectIdentity,
        link: &str,
        target: &ObjectIdentity,
    ) -> StoreResult<bool> {
        let sides = self.resolve_link(source, link)?;
        if !self.backend.link(&sides, source, target)? {
            return Ok(false);
        }
        debug!(%source, link, %target, "added link");
        self.edits.push(link_edit(true, &sides, source, target));
        self.counters.added_links_count += 1;
        Ok(true)
    }

    /// Remove both sides of a link. Returns `false` when it did not exist.
    pub fn remove_link(
        &mut self,
        source: &ObjectIdentity,
        link: &str,
        target: &ObjectIdentity,
    ) -> StoreResult<bool> {
        let sides = self.resolve_link(source, link)?;
        if !self.backend.unlink(&sides, source, target)? {
            return Ok(false);
        }
        debug!(%source, link, %target, "removed link");
        self.edits.push(link_edit(false, &sides, source, target));
        self.counters.deleted_links_count += 1;
        Ok(true)
    }

    /// Apply a previously logged edit, as received over the wire.
    pub fn apply(&mut self, edit: Edit) -> StoreResult<()> {
        match edit {
            Edit::AddObject {
                object_type,
                primary_key,
                properties,
            } => self
                .add_object(&object_type, primary_key, properties)
                .map(drop),
            Edit::ModifyObject {
                object_type,
                primary_key,
                properties,
            } => self
                .modify_object(&ObjectIdentity::new(object_type, primary_key), properties)
                .map(drop),
            Edit::DeleteObject {
                object_type,
                primary_key,
            } => self.delete_object(&ObjectIdentity::new(object_type, primary_key)),
            Edit::AddLink {
                link_type_api_name_a_to_b,
                a_side_object,
                b_side_object,
                ..
            } => self
                .add_link(&a_side_object, &link_type_api_name_a_to_b, &b_side_object)
                .map(drop),
            Edit::RemoveLink {
                link_type_api_name_a_to_b,
                a_side_object,
                b_side_object,
                ..
            } => self
                .remove_link(&a_side_object, &link_type_api_name_a_to_b, &b_side_object)
                .map(drop),
        }
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn counters(&self) -> EditCounters {
        self.counters
    }

    pub fn finish(self) -> ObjectEdits {
        ObjectEdits {
            edits: self.edits,
            counters: self.counters,
        }
    }

    fn resolve_link(&self, source: &ObjectIdentity, link: &str) -> StoreResult<LinkSides> {
        self.backend
            .schema()
            .link_sides(&source.object_type, link)
            .map_err(|err| match err {
                TypeError::UnknownLink { object_type, link } => {
                    StoreError::LinkTypeNotFound { object_type, link }
                }
                other => StoreError::Schema(other),
            })
    }
}

impl<B: ObjectBackend + ?Sized> std::fmt::Debug for EditBatch<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditBatch")
            .field("edits", &self.edits.len())
            .field("counters", &self.counters)
            .finish()
    }
}

fn check_properties(definition: &ObjectTypeDefinition, properties: &PropertyMap) -> StoreResult<()> {
    match properties
        .keys()
        .find(|k| !definition.properties.contains_key(*k))
    {
        Some(unknown) => Err(StoreError::InvalidEdit(format!(
            "unknown property {unknown} on {}",
            definition.api_name
        ))),
        None => Ok(()),
    }
}

fn link_edit(add: bool, sides: &LinkSides, source: &ObjectIdentity, target: &ObjectIdentity) -> Edit {
    let a_to_b = sides.forward.clone();
    let b_to_a = sides.inverse.clone();
    let (a, b) = (source.clone(), target.clone());
    if add {
        Edit::AddLink {
            link_type_api_name_a_to_b: a_to_b,
            link_type_api_name_b_to_a: b_to_a,
            a_side_object: a,
            b_side_object: b,
        }
    } else {
        Edit::RemoveLink {
            link_type_api_name_a_to_b: a_to_b,
            link_type_api_name_b_to_a: b_to_a,
            a_side_object: a,
            b_side_object: b,
        }
    }
}
