//! The text B-tree.
//!
//! A [`BTree`] stores a document as a sequence of lines. Each line owns a
//! chain of typed segments (character runs, hyphens, embedded objects,
//! marks and branch/link elision markers) that is subdivided into sections
//! of 20 to 60 segments. Lines are the leaves of a multiway tree whose
//! nodes cache line counts, byte sizes, branch counts, per-peer pixel
//! totals and tag summaries.
//!
//! The last line is a sentinel holding a single newline; it is never
//! edited, tagged or deleted. The line before it ends with the document's
//! final newline, which is likewise never deleted.
//!
//! # Examples
//!
//! ```
//! use textbtree::{BTree, TextIndex};
//!
//! let mut tree = BTree::new();
//! assert_eq!(tree.line_count(), 2);
//!
//! tree.insert(TextIndex::START, "hello\nworld\n");
//! assert_eq!(tree.line_count(), 4);
//! assert_eq!(tree.line_text(0), "hello\n");
//!
//! let bold = tree.create_tag("bold");
//! let change = tree.tag(TextIndex::new(0, 0), TextIndex::new(0, 5), bold, true);
//! assert!(change.changed);
//! assert!(tree.tags_at(TextIndex::new(0, 2)).contains(&bold));
//! tree.check();
//! ```

mod arena;
mod check;
mod edit;
mod elide;
mod index;
mod line;
mod load;
mod marks;
mod node;
mod peer;
mod search;
mod section;
mod segment;
mod tagging;

pub use arena::NodeId;
pub use index::TextIndex;
pub use line::PixelInfo;
pub use load::Record;
pub use node::{MAX_CHILDREN, MIN_CHILDREN, NodeInfo};
pub use peer::PeerId;
pub use section::{MAX_SECTION, MIN_SECTION};
pub use segment::{EmbedKind, Gravity};
pub use tagging::TagChange;

pub(crate) use arena::{Arena, LineId, SectionId, SegId};
pub(crate) use line::{Line, LineFlags};
pub(crate) use node::{Node, NodePixels};
pub(crate) use section::Section;
pub(crate) use segment::{MarkInfo, SavedSegment, Segment, SegmentKind};
pub(crate) use marks::SavedMark;

use crate::event::{LogLevel, emit_log};
use crate::tag::TagTable;
use crate::tagset::TagSet;
use std::collections::HashMap;
use std::fmt;

/// How newly inserted characters pick up tags from their surroundings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tagging {
    /// Tags present on both the character before and the character after.
    #[default]
    Within,
    /// Tags of the neighbour on the side the gravity points to.
    Gravity(Gravity),
    /// No tags.
    None,
}

/// Tree configuration.
#[derive(Clone, Debug, Default)]
pub struct BTreeOptions {
    /// Run the full consistency check after every mutating call.
    pub debug: bool,
    /// Tagging mode used by [`BTree::insert`].
    pub tagging: Tagging,
}

/// Notification sent to the display layer when line metrics go stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Invalidation {
    /// `count` lines were inserted after line `line` (0 for an in-line edit).
    Inserted { line: usize, count: usize },
    /// `count` lines following line `line` were removed.
    Deleted { line: usize, count: usize },
    /// Elision changed on `count` lines starting at `line`.
    Elided { line: usize, count: usize },
}

type InvalidateCallback = Box<dyn FnMut(Invalidation)>;

#[derive(Clone, Debug, Default)]
pub(crate) struct Peer {
    /// Restricted start/end markers; `None` uses the shared markers.
    pub range: Option<(SegId, SegId)>,
}

/// Balanced tree of lines with tag, elision and metric summaries.
pub struct BTree {
    pub(crate) segs: Arena<SegId, Segment>,
    pub(crate) sections: Arena<SectionId, Section>,
    pub(crate) lines: Arena<LineId, Line>,
    pub(crate) nodes: Arena<NodeId, Node>,
    pub(crate) root: NodeId,
    /// First line; never deleted.
    pub(crate) first_line: LineId,
    /// Sentinel last line; never edited.
    pub(crate) last_line: LineId,
    pub(crate) tags: TagTable,
    pub(crate) marks: HashMap<String, SegId>,
    pub(crate) start_marker: SegId,
    pub(crate) end_marker: SegId,
    pub(crate) peers: Vec<Peer>,
    pub(crate) epoch: u64,
    pub(crate) options: BTreeOptions,
    pub(crate) on_invalidate: Option<InvalidateCallback>,
}

impl Default for BTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTree")
            .field("lines", &self.line_count())
            .field("size", &self.size_bytes())
            .field("depth", &(self.nodes[self.root].level + 1))
            .field("tags", &self.tags.len())
            .field("peers", &self.peers.len())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl BTree {
    /// Create a tree holding one empty line plus the sentinel line.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(BTreeOptions::default())
    }

    /// Create an empty tree with custom options.
    #[must_use]
    pub fn with_options(options: BTreeOptions) -> Self {
        let mut lines: Arena<LineId, Line> = Arena::new();
        let mut nodes: Arena<NodeId, Node> = Arena::new();
        let root = nodes.alloc(Node::leaf_placeholder());
        let first_line = lines.alloc(Line::new(root, 0));
        let last_line = lines.alloc(Line::new(root, 0));
        lines[first_line].next = Some(last_line);
        lines[last_line].prev = Some(first_line);
        {
            let node = &mut nodes[root];
            node.first_line = first_line;
            node.last_line = last_line;
            node.num_children = 2;
            node.num_lines = 2;
            node.num_logical_lines = 2;
        }

        let mut segs: Arena<SegId, Segment> = Arena::new();
        let start_marker = segs.alloc(Segment::new(
            SegmentKind::Mark(MarkInfo {
                name: None,
                gravity: Gravity::Left,
            }),
            TagSet::empty(),
        ));
        let end_marker = segs.alloc(Segment::new(
            SegmentKind::Mark(MarkInfo {
                name: None,
                gravity: Gravity::Right,
            }),
            TagSet::empty(),
        ));

        let mut tree = Self {
            segs,
            sections: Arena::new(),
            lines,
            nodes,
            root,
            first_line,
            last_line,
            tags: TagTable::new(),
            marks: HashMap::new(),
            start_marker,
            end_marker,
            peers: Vec::new(),
            epoch: 0,
            options,
            on_invalidate: None,
        };

        tree.link_segment(first_line, None, start_marker);
        tree.link_segment(first_line, Some(start_marker), end_marker);
        let newline = tree.alloc_chars("\n", TagSet::empty());
        tree.link_segment(first_line, Some(end_marker), newline);
        let sentinel = tree.alloc_chars("\n", TagSet::empty());
        tree.link_segment(last_line, None, sentinel);
        tree
    }

    /// Current options.
    #[must_use]
    pub const fn options(&self) -> &BTreeOptions {
        &self.options
    }

    /// Replace the options.
    pub fn set_options(&mut self, options: BTreeOptions) {
        self.options = options;
    }

    /// Install the display-layer callback for stale line metrics.
    pub fn set_invalidate_callback<F>(&mut self, callback: F)
    where
        F: FnMut(Invalidation) + 'static,
    {
        self.on_invalidate = Some(Box::new(callback));
    }

    /// Remove the metrics callback.
    pub fn clear_invalidate_callback(&mut self) {
        self.on_invalidate = None;
    }

    /// Modification epoch; bumped by every structural change.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Total number of lines, including the sentinel.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.nodes[self.root].num_lines
    }

    /// Number of logical lines (lines not merged into their predecessor by
    /// an elided newline), including the sentinel.
    #[must_use]
    pub fn logical_line_count(&self) -> usize {
        self.nodes[self.root].num_logical_lines
    }

    /// Total size in index units, including the sentinel newline.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.nodes[self.root].size
    }

    /// Number of branch (elision start) markers in the tree.
    #[must_use]
    pub fn num_branches(&self) -> usize {
        self.nodes[self.root].num_branches
    }

    /// Depth of the tree (1 for a single level-0 root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.nodes[self.root].level as usize + 1
    }

    /// The tag registry.
    #[must_use]
    pub const fn tag_table(&self) -> &TagTable {
        &self.tags
    }

    pub(crate) fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub(crate) fn notify(&mut self, event: Invalidation) {
        if let Some(callback) = self.on_invalidate.as_mut() {
            callback(event);
        }
    }

    /// Run the consistency check when the tree is configured for it.
    pub(crate) fn debug_check(&self, operation: &str) {
        if self.options.debug {
            if let Err(message) = self.verify() {
                emit_log(LogLevel::Error, &format!("btree: {operation}: {message}"));
                panic!("btree consistency check failed after {operation}: {message}");
            }
        }
    }

    pub(crate) fn alloc_chars(&mut self, text: &str, tags: TagSet) -> SegId {
        self.segs
            .alloc(Segment::new(SegmentKind::Chars(text.to_string()), tags))
    }

    /// Apply `f` to `node` and every ancestor.
    pub(crate) fn update_path(&mut self, node: NodeId, mut f: impl FnMut(&mut Node)) {
        let mut cur = Some(node);
        while let Some(id) = cur {
            let n = &mut self.nodes[id];
            f(n);
            cur = n.parent;
        }
    }

    /// Line holding `seg`.
    pub(crate) fn seg_line(&self, seg: SegId) -> LineId {
        self.sections[self.section_of(seg)].line
    }

    pub(crate) fn section_of(&self, seg: SegId) -> SectionId {
        self.segs[seg]
            .section
            .unwrap_or_else(|| panic!("segment {seg:?} is not linked"))
    }

    /// Iterate over the segments of `line` in order.
    pub(crate) fn line_segs(&self, line: LineId) -> impl Iterator<Item = SegId> + '_ {
        let mut cur = self.lines[line].first;
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.segs[id].next;
            Some(id)
        })
    }

    /// Iterate over the lines of the whole tree in order.
    pub(crate) fn all_lines(&self) -> impl Iterator<Item = LineId> + '_ {
        let mut cur = Some(self.first_line);
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.lines[id].next;
            Some(id)
        })
    }

    /// Reset the tree to its empty state, keeping options, tags, peers and
    /// the metrics callback.
    pub fn clear(&mut self) {
        let mut fresh = Self::with_options(self.options.clone());
        fresh.tags = std::mem::take(&mut self.tags);
        for tag in 0..fresh.tags.len() {
            fresh.tags.get_mut(crate::TagId(tag as u32)).root = None;
        }
        fresh.on_invalidate = self.on_invalidate.take();
        for _ in 0..self.peers.len() {
            fresh.add_client();
        }
        fresh.epoch = self.epoch + 1;
        let removed = self.line_count().saturating_sub(2);
        *self = fresh;
        self.notify(Invalidation::Deleted {
            line: 0,
            count: removed,
        });
        emit_log(LogLevel::Info, "btree: cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tree_shape() {
        let tree = BTree::new();
        assert_eq!(tree.line_count(), 2);
        assert_eq!(tree.logical_line_count(), 2);
        assert_eq!(tree.size_bytes(), 2);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.num_branches(), 0);
        tree.check();
    }

    #[test]
    fn test_debug_output_is_compact() {
        let tree = BTree::new();
        let text = format!("{tree:?}");
        assert!(text.contains("lines: 2"));
        assert!(text.contains("epoch: 0"));
    }

    #[test]
    fn test_clear_keeps_tags_and_peers() {
        let mut tree = BTree::new();
        let bold = tree.create_tag("bold");
        let peer = tree.add_client();
        tree.insert(TextIndex::START, "abc\ndef\n");
        tree.tag(TextIndex::new(0, 0), TextIndex::new(1, 2), bold, true);
        tree.clear();
        assert_eq!(tree.line_count(), 2);
        assert_eq!(tree.tag_id("bold").unwrap(), bold);
        assert_eq!(tree.tag_root(bold), None);
        assert_eq!(tree.num_peers(), 1);
        assert_eq!(tree.line_height(peer, 0).unwrap(), 0);
        tree.check();
    }

    #[test]
    fn test_invalidate_callback_fires() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut tree = BTree::new();
        tree.set_invalidate_callback(move |event| sink.borrow_mut().push(event));
        tree.insert(TextIndex::START, "a\nb\n");
        tree.delete(TextIndex::new(0, 0), TextIndex::new(2, 0));
        let events = seen.borrow();
        assert_eq!(events[0], Invalidation::Inserted { line: 0, count: 2 });
        assert_eq!(events[1], Invalidation::Deleted { line: 0, count: 2 });
    }
}
