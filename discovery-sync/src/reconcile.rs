//! Diff between the last acknowledged snapshot and freshly discovered state.

use crate::resource::{Resource, ResourceSet};

/// Changes needed to move the remote side from one resource set to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Resources that are new or whose content changed.
    pub upsert: Vec<Resource>,
    /// Resources that disappeared.
    pub delete: Vec<Resource>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.delete.is_empty()
    }
}

/// Compute the minimal diff from `previous` to `current`.
///
/// Unchanged resources land in neither list. Runs in linear time using
/// key lookups; neither input is modified. The caller swaps its snapshot for
/// `current` once the diff has been pushed.
pub fn reconcile(previous: &ResourceSet, current: &ResourceSet) -> Diff {
    let upsert = current
        .iter()
        .filter(|r| previous.get(&r.key()) != Some(*r))
        .cloned()
        .collect();

    let delete = previous
        .iter()
        .filter(|r| !current.contains_key(&r.key()))
        .cloned()
        .collect();

    Diff { upsert, delete }
}
