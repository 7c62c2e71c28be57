//! Line records: the leaves of the tree.

use super::arena::{LineId, NodeId, SegId};
use super::{BTree, Segment};
use crate::tagset::TagSet;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct LineFlags: u8 {
        /// The previous line's newline is not elided.
        const LOGICAL = 0x01;
        /// Content or tags changed since the display layer last looked.
        const CHANGED = 0x02;
    }
}

/// Per-peer display metrics of one line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PixelInfo {
    /// Height in pixels.
    pub height: u32,
    /// Number of display lines the line wraps into.
    pub display_lines: u32,
    /// Byte offsets where each display line after the first starts.
    pub offsets: Vec<u32>,
    /// Tree epoch the offsets were computed for.
    pub epoch: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct Line {
    pub node: NodeId,
    pub prev: Option<LineId>,
    pub next: Option<LineId>,
    pub first: Option<SegId>,
    pub last: Option<SegId>,
    pub size: usize,
    /// Tags present on any content segment.
    pub tag_on: TagSet,
    /// Tags present on some but not all content segments.
    pub tag_off: TagSet,
    pub flags: LineFlags,
    pub num_branches: usize,
    pub pixels: Vec<PixelInfo>,
}

impl Line {
    pub(crate) fn new(node: NodeId, peers: usize) -> Self {
        Self {
            node,
            prev: None,
            next: None,
            first: None,
            last: None,
            size: 0,
            tag_on: TagSet::empty(),
            tag_off: TagSet::empty(),
            flags: LineFlags::LOGICAL | LineFlags::CHANGED,
            num_branches: 0,
            pixels: vec![PixelInfo::default(); peers],
        }
    }

    pub(crate) const fn is_logical(&self) -> bool {
        self.flags.contains(LineFlags::LOGICAL)
    }
}

impl BTree {
    /// Compute the on/off tag summaries of `line` from its content segments.
    pub(crate) fn compute_line_tags(&self, line: LineId) -> (TagSet, TagSet) {
        let mut on = TagSet::empty();
        let mut common: Option<TagSet> = None;
        for seg in self.line_segs(line) {
            let seg: &Segment = &self.segs[seg];
            if !seg.is_content() {
                continue;
            }
            on = on.union(&seg.tags);
            common = Some(match common {
                None => seg.tags.clone(),
                Some(c) => c.intersection(&seg.tags),
            });
        }
        let off = common.map_or_else(TagSet::empty, |c| on.difference(&c));
        (on, off)
    }

    pub(crate) fn content_segment_count(&self, number: usize) -> usize {
        let line = self.line_at(number);
        self.line_segs(line).filter(|&s| self.segs[s].is_content()).count()
    }

    /// The level-0 node holding line `number` (clamped).
    #[must_use]
    pub fn line_node(&self, number: usize) -> NodeId {
        self.lines[self.line_at(number)].node
    }

    /// Cached `(on, off)` tag summaries of line `number` (clamped).
    #[must_use]
    pub fn line_tags(&self, number: usize) -> (TagSet, TagSet) {
        let line = &self.lines[self.line_at(number)];
        (line.tag_on.clone(), line.tag_off.clone())
    }

    /// Text of line `number` (clamped), including its newline.
    #[must_use]
    pub fn line_text(&self, number: usize) -> String {
        let line = self.line_at(number);
        let mut out = String::with_capacity(self.lines[line].size);
        for seg in self.line_segs(line) {
            if let Some(text) = self.segs[seg].text() {
                out.push_str(text);
            }
        }
        out
    }

    /// Size of line `number` (clamped) in index units, including the newline.
    #[must_use]
    pub fn line_len(&self, number: usize) -> usize {
        self.lines[self.line_at(number)].size
    }

    /// Check whether line `number` starts a logical line.
    #[must_use]
    pub fn is_logical_line(&self, number: usize) -> bool {
        self.lines[self.line_at(number)].is_logical()
    }

    /// Check whether line `number` changed since the flag was last cleared.
    #[must_use]
    pub fn line_changed(&self, number: usize) -> bool {
        self.lines[self.line_at(number)]
            .flags
            .contains(LineFlags::CHANGED)
    }

    /// Clear the changed flag of every line.
    pub fn clear_changed(&mut self) {
        for (_, line) in self.lines.iter_mut() {
            line.flags.remove(LineFlags::CHANGED);
        }
    }

    pub(crate) fn mark_changed(&mut self, line: LineId) {
        self.lines[line].flags.insert(LineFlags::CHANGED);
    }

    /// Set the logical flag of `line`, keeping node counts in step.
    /// Returns whether the flag changed.
    pub(crate) fn set_logical(&mut self, line: LineId, logical: bool) -> bool {
        let record = &mut self.lines[line];
        if record.is_logical() == logical {
            return false;
        }
        record.flags.set(LineFlags::LOGICAL, logical);
        record.flags.insert(LineFlags::CHANGED);
        let node = record.node;
        self.update_path(node, |n| {
            if logical {
                n.num_logical_lines += 1;
            } else {
                n.num_logical_lines -= 1;
            }
        });
        true
    }

    /// Whole document text including the sentinel newline.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.size_bytes());
        for line in self.all_lines() {
            for seg in self.line_segs(line) {
                if let Some(text) = self.segs[seg].text() {
                    out.push_str(text);
                }
            }
        }
        out
    }

    /// Text between two indices; hyphens and embeds are skipped.
    #[must_use]
    pub fn text_range(&self, start: super::TextIndex, end: super::TextIndex) -> String {
        let start = self.normalize(start);
        let end = self.normalize(end);
        if start >= end {
            return String::new();
        }
        let mut out = String::new();
        for number in start.line..=end.line {
            let line = self.line_at(number);
            let lo = if number == start.line { start.byte } else { 0 };
            let hi = if number == end.line {
                end.byte
            } else {
                self.lines[line].size
            };
            let mut offset = 0;
            for seg in self.line_segs(line) {
                let seg = &self.segs[seg];
                let seg_end = offset + seg.size;
                if let Some(text) = seg.text() {
                    if seg_end > lo && offset < hi {
                        let a = lo.saturating_sub(offset);
                        let b = (hi - offset).min(seg.size);
                        out.push_str(&text[a..b]);
                    }
                }
                offset = seg_end;
                if offset >= hi {
                    break;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::{BTree, TextIndex};

    #[test]
    fn test_line_text_and_len() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "one\ntwo\n");
        assert_eq!(tree.line_text(0), "one\n");
        assert_eq!(tree.line_text(1), "two\n");
        assert_eq!(tree.line_text(2), "\n");
        assert_eq!(tree.line_len(1), 4);
        assert_eq!(tree.text(), "one\ntwo\n\n\n");
    }

    #[test]
    fn test_text_range_spans_lines() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "hello\nworld\n");
        let text = tree.text_range(TextIndex::new(0, 3), TextIndex::new(1, 2));
        assert_eq!(text, "lo\nwo");
        assert_eq!(tree.text_range(TextIndex::new(1, 2), TextIndex::new(0, 3)), "");
    }

    #[test]
    fn test_changed_flags() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "a\nb\n");
        assert!(tree.line_changed(1));
        tree.clear_changed();
        assert!(!tree.line_changed(1));
        tree.insert(TextIndex::new(1, 0), "x");
        assert!(tree.line_changed(1));
        assert!(!tree.line_changed(0));
    }
}
