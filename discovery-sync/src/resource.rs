//! Resource data model and the merge of collector results.
//!
//! A [`Resource`] is identified by its [`ResourceKey`] (kind + id). A
//! [`ResourceSet`] holds at most one resource per key; when two resources
//! with the same key meet, the one that was there first is kept.

use std::collections::hash_map::{self, Entry};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::proto::accessgraph as pb;

/// Stable identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub id: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A discovered unit of external state.
///
/// Fields are private: once a collector hands a resource out it is never
/// modified, a later poll produces a new value instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    kind: String,
    id: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind.clone(),
            id: self.id.clone(),
        }
    }
}

impl From<&Resource> for pb::Resource {
    fn from(r: &Resource) -> Self {
        pb::Resource {
            kind: r.kind.clone(),
            id: r.id.clone(),
            attributes: r.attributes.clone(),
        }
    }
}

impl From<pb::Resource> for Resource {
    fn from(r: pb::Resource) -> Self {
        Resource {
            kind: r.kind,
            id: r.id,
            attributes: r.attributes,
        }
    }
}

/// Unordered collection of resources, unique by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    resources: HashMap<ResourceKey, Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub fn contains_key(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    /// Insert a resource unless one with the same key is already present.
    ///
    /// Returns `false` if the key was taken; the existing resource is kept.
    pub fn insert(&mut self, resource: Resource) -> bool {
        match self.resources.entry(resource.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(resource);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    /// Merge several sets into a new one.
    ///
    /// Sets are visited in iteration order and the first resource seen for a
    /// key wins. Callers order the input by collector registration, so the
    /// first registered collector takes precedence on collisions. The inputs
    /// are not modified and the result shares nothing with them.
    pub fn merge<'a>(sets: impl IntoIterator<Item = &'a ResourceSet>) -> ResourceSet {
        let mut merged = ResourceSet::new();
        for set in sets {
            for resource in set.iter() {
                if !merged.contains_key(&resource.key()) {
                    merged.insert(resource.clone());
                }
            }
        }
        merged
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        for resource in iter {
            set.insert(resource);
        }
        set
    }
}

impl IntoIterator for ResourceSet {
    type Item = Resource;
    type IntoIter = hash_map::IntoValues<ResourceKey, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_values()
    }
}
