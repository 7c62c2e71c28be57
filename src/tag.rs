//! Tag registry.
//!
//! Tags are identified by a dense [`TagId`] that doubles as their bit
//! position in every [`TagSet`](crate::TagSet). The tree never destroys tags;
//! it only updates their cached root node.

use crate::btree::NodeId;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Stable index of a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub(crate) u32);

impl TagId {
    /// Bit position of this tag in tag sets.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named tag with display priority and optional elide attribute.
#[derive(Clone, Debug)]
pub struct Tag {
    name: String,
    id: TagId,
    /// Higher priority wins when several tags configure the same attribute.
    priority: u32,
    /// `Some(true)` hides tagged content, `Some(false)` explicitly shows it,
    /// `None` leaves the decision to lower-priority tags.
    elide: Option<bool>,
    /// Deepest node whose subtree holds every occurrence of the tag.
    pub(crate) root: Option<NodeId>,
}

impl Tag {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn id(&self) -> TagId {
        self.id
    }

    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.priority
    }

    #[must_use]
    pub const fn elide(&self) -> Option<bool> {
        self.elide
    }
}

/// All tags known to one tree, indexed by [`TagId`].
#[derive(Clone, Debug, Default)]
pub struct TagTable {
    tags: Vec<Tag>,
    by_name: HashMap<String, TagId>,
}

impl TagTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the tag named `name`, creating it with the highest priority
    /// if it does not exist yet.
    pub fn intern(&mut self, name: &str) -> TagId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = TagId(self.tags.len() as u32);
        self.tags.push(Tag {
            name: name.to_string(),
            id,
            priority: self.tags.len() as u32,
            elide: None,
            root: None,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Look up a tag by name.
    pub fn lookup(&self, name: &str) -> Result<TagId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownTag(name.to_string()))
    }

    #[must_use]
    pub fn get(&self, id: TagId) -> &Tag {
        &self.tags[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: TagId) -> &mut Tag {
        &mut self.tags[id.index()]
    }

    /// Look up a tag by its bit index.
    #[must_use]
    pub fn by_index(&self, index: usize) -> Option<&Tag> {
        self.tags.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// Check whether any tag carries an elide attribute.
    #[must_use]
    pub fn any_elide(&self) -> bool {
        self.tags.iter().any(|t| t.elide.is_some())
    }

    pub(crate) fn set_elide(&mut self, id: TagId, elide: Option<bool>) -> bool {
        let tag = &mut self.tags[id.index()];
        let changed = tag.elide != elide;
        tag.elide = elide;
        changed
    }

    /// Move `id` to `priority`, shifting the tags in between so priorities
    /// stay a permutation of `0..len`. Returns whether anything moved.
    pub(crate) fn set_priority(&mut self, id: TagId, priority: u32) -> bool {
        let max = self.tags.len().saturating_sub(1) as u32;
        let new = priority.min(max);
        let old = self.tags[id.index()].priority;
        if new == old {
            return false;
        }
        for tag in &mut self.tags {
            if tag.id == id {
                tag.priority = new;
            } else if new < old && (new..old).contains(&tag.priority) {
                tag.priority += 1;
            } else if old < new && (old + 1..=new).contains(&tag.priority) {
                tag.priority -= 1;
            }
        }
        true
    }

    /// Decide elision for a segment carrying `tags`: the highest-priority tag
    /// with an elide attribute wins.
    #[must_use]
    pub fn elided(&self, tags: &crate::TagSet) -> bool {
        let mut best: Option<(u32, bool)> = None;
        for index in tags.iter() {
            let Some(tag) = self.tags.get(index) else {
                continue;
            };
            if let Some(flag) = tag.elide {
                if best.is_none_or(|(p, _)| tag.priority > p) {
                    best = Some((tag.priority, flag));
                }
            }
        }
        best.is_some_and(|(_, flag)| flag)
    }

    /// Sort tag ids by ascending priority.
    pub(crate) fn sort_by_priority(&self, ids: &mut [TagId]) {
        ids.sort_by_key(|id| self.tags[id.index()].priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TagSet;

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = TagTable::new();
        let a = table.intern("bold");
        let b = table.intern("bold");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("bold").unwrap(), a);
        assert!(table.lookup("missing").is_err());
    }

    #[test]
    fn test_priority_permutation() {
        let mut table = TagTable::new();
        let a = table.intern("a");
        let b = table.intern("b");
        let c = table.intern("c");
        assert!(table.set_priority(c, 0));
        assert_eq!(table.get(c).priority(), 0);
        assert_eq!(table.get(a).priority(), 1);
        assert_eq!(table.get(b).priority(), 2);
        assert!(table.set_priority(c, 99));
        assert_eq!(table.get(c).priority(), 2);
        assert_eq!(table.get(a).priority(), 0);
        assert_eq!(table.get(b).priority(), 1);
        assert!(!table.set_priority(c, 2));
    }

    #[test]
    fn test_highest_priority_elide_wins() {
        let mut table = TagTable::new();
        let hide = table.intern("hide");
        let show = table.intern("show");
        table.set_elide(hide, Some(true));
        table.set_elide(show, Some(false));
        let both = TagSet::from_indices([hide.index(), show.index()]);
        assert!(!table.elided(&both));
        table.set_priority(hide, 1);
        assert!(table.elided(&both));
        assert!(table.elided(&TagSet::from_indices([hide.index()])));
        assert!(!table.elided(&TagSet::empty()));
    }
}
