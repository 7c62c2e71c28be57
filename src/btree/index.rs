//! Position translation: line numbers, byte offsets and segment lookup.

use super::arena::{LineId, NodeId, SegId};
use super::BTree;
use std::fmt;

/// A position in the document: zero-based line number and byte offset
/// within the line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextIndex {
    pub line: usize,
    pub byte: usize,
}

impl TextIndex {
    /// The start of the document.
    pub const START: Self = Self { line: 0, byte: 0 };

    #[must_use]
    pub const fn new(line: usize, byte: usize) -> Self {
        Self { line, byte }
    }
}

impl fmt::Display for TextIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.line, self.byte)
    }
}

impl BTree {
    /// Line record for line `number`, clamped to the sentinel.
    pub(crate) fn line_at(&self, number: usize) -> LineId {
        let mut remaining = number.min(self.line_count() - 1);
        let mut node = self.root;
        loop {
            let n = &self.nodes[node];
            if n.level == 0 {
                let mut line = n.first_line;
                for _ in 0..remaining {
                    line = self.lines[line]
                        .next
                        .unwrap_or_else(|| panic!("line {number} beyond node {node:?}"));
                }
                return line;
            }
            let mut next = None;
            for &child in &n.children {
                let count = self.nodes[child].num_lines;
                if remaining < count {
                    next = Some(child);
                    break;
                }
                remaining -= count;
            }
            node = next.unwrap_or_else(|| panic!("line {number} beyond node {node:?}"));
        }
    }

    /// Zero-based number of `line`.
    pub(crate) fn line_number(&self, line: LineId) -> usize {
        let mut node = self.lines[line].node;
        let mut number = 0;
        let mut cur = self.nodes[node].first_line;
        while cur != line {
            number += 1;
            cur = self.lines[cur]
                .next
                .unwrap_or_else(|| panic!("{line:?} not under its node"));
        }
        while let Some(parent) = self.nodes[node].parent {
            for &child in &self.nodes[parent].children {
                if child == node {
                    break;
                }
                number += self.nodes[child].num_lines;
            }
            node = parent;
        }
        number
    }

    /// Zero-based logical line containing line `number` (clamped).
    #[must_use]
    pub fn logical_line_number(&self, number: usize) -> usize {
        let line = self.line_at(number);
        let mut node = self.lines[line].node;
        let mut count = 0;
        let mut cur = self.nodes[node].first_line;
        loop {
            if self.lines[cur].is_logical() {
                count += 1;
            }
            if cur == line {
                break;
            }
            cur = self.next_line(cur);
        }
        while let Some(parent) = self.nodes[node].parent {
            for &child in &self.nodes[parent].children {
                if child == node {
                    break;
                }
                count += self.nodes[child].num_logical_lines;
            }
            node = parent;
        }
        count.saturating_sub(1)
    }

    /// Line number where logical line `logical` starts, clamped to the
    /// sentinel.
    #[must_use]
    pub fn line_of_logical(&self, logical: usize) -> usize {
        if logical >= self.logical_line_count() {
            return self.line_count() - 1;
        }
        let mut remaining = logical;
        let mut number = 0;
        let mut node = self.root;
        loop {
            let n = &self.nodes[node];
            if n.level == 0 {
                let mut line = n.first_line;
                loop {
                    if self.lines[line].is_logical() {
                        if remaining == 0 {
                            return number;
                        }
                        remaining -= 1;
                    }
                    number += 1;
                    line = self.next_line(line);
                }
            }
            let mut next = None;
            for &child in &n.children {
                let c = &self.nodes[child];
                if remaining < c.num_logical_lines {
                    next = Some(child);
                    break;
                }
                remaining -= c.num_logical_lines;
                number += c.num_lines;
            }
            node = next.unwrap_or_else(|| panic!("logical line {logical} beyond node {node:?}"));
        }
    }

    /// Byte offset of the start of line `line` from the document start.
    fn line_offset(&self, line: LineId) -> usize {
        let mut node: NodeId = self.lines[line].node;
        let mut offset = 0;
        let mut cur = self.nodes[node].first_line;
        while cur != line {
            offset += self.lines[cur].size;
            cur = self.lines[cur]
                .next
                .unwrap_or_else(|| panic!("{line:?} not under its node"));
        }
        while let Some(parent) = self.nodes[node].parent {
            for &child in &self.nodes[parent].children {
                if child == node {
                    break;
                }
                offset += self.nodes[child].size;
            }
            node = parent;
        }
        offset
    }

    /// Clamp `index` into the document and snap it to a character boundary.
    /// Offsets at or past the end of a line clamp to its newline.
    #[must_use]
    pub fn normalize(&self, index: TextIndex) -> TextIndex {
        let count = self.line_count();
        if index.line >= count {
            return TextIndex::new(count - 1, 0);
        }
        let line = self.line_at(index.line);
        let len = self.lines[line].size;
        let byte = index.byte.min(len - 1);
        TextIndex::new(index.line, self.snap_to_boundary(line, byte))
    }

    fn snap_to_boundary(&self, line: LineId, byte: usize) -> usize {
        match self.locate(line, byte) {
            Some((seg, offset)) => match self.segs[seg].text() {
                Some(text) => {
                    let mut at = offset;
                    while !text.is_char_boundary(at) {
                        at -= 1;
                    }
                    byte - (offset - at)
                }
                None => byte,
            },
            None => byte,
        }
    }

    /// Position of the document's final newline: the last position any
    /// edit may touch.
    #[must_use]
    pub fn end_index(&self) -> TextIndex {
        let count = self.line_count();
        let line = self.line_at(count - 2);
        TextIndex::new(count - 2, self.lines[line].size - 1)
    }

    /// Normalize and clamp `index` to at most [`end_index`](Self::end_index).
    pub(crate) fn clamp_to_end(&self, index: TextIndex) -> TextIndex {
        self.normalize(index).min(self.end_index())
    }

    pub(crate) fn resolve(&self, index: TextIndex) -> (LineId, usize) {
        let index = self.normalize(index);
        (self.line_at(index.line), index.byte)
    }

    /// Index of byte `byte` of `line`.
    pub(crate) fn index_of(&self, line: LineId, byte: usize) -> TextIndex {
        TextIndex::new(self.line_number(line), byte)
    }

    /// Position of the (zero-size or content) segment `seg`.
    pub(crate) fn seg_index(&self, seg: SegId) -> TextIndex {
        let line = self.seg_line(seg);
        self.index_of(line, self.seg_offset(seg))
    }

    /// Byte offset of `seg` within its line.
    pub(crate) fn seg_offset(&self, seg: SegId) -> usize {
        let section = self.section_of(seg);
        let sec = &self.sections[section];
        let mut offset = 0;
        let mut cur = sec.prev;
        while let Some(id) = cur {
            offset += self.sections[id].size;
            cur = self.sections[id].prev;
        }
        let mut s = sec.first;
        while s != seg {
            offset += self.segs[s].size;
            s = self.next_seg(s);
        }
        offset
    }

    /// Absolute byte offset of `index` from the document start.
    #[must_use]
    pub fn offset_of(&self, index: TextIndex) -> usize {
        let (line, byte) = self.resolve(index);
        self.line_offset(line) + byte
    }

    /// Index at absolute byte offset `offset` (clamped to the sentinel).
    #[must_use]
    pub fn index_at_offset(&self, offset: usize) -> TextIndex {
        let mut remaining = offset;
        let mut number = 0;
        let mut node = self.root;
        loop {
            let n = &self.nodes[node];
            if n.level == 0 {
                let mut line = n.first_line;
                for i in 0..n.num_children {
                    let size = self.lines[line].size;
                    if remaining < size || i + 1 == n.num_children {
                        return self.normalize(TextIndex::new(number, remaining));
                    }
                    remaining -= size;
                    number += 1;
                    line = self.next_line(line);
                }
                return TextIndex::new(number, 0);
            }
            let mut next = None;
            let last = n.children.len() - 1;
            for (i, &child) in n.children.iter().enumerate() {
                let child_node = &self.nodes[child];
                if remaining < child_node.size || i == last {
                    next = Some(child);
                    break;
                }
                remaining -= child_node.size;
                number += child_node.num_lines;
            }
            node = next.unwrap_or_else(|| panic!("offset {offset} beyond node {node:?}"));
        }
    }

    /// Move `index` forward by `count` bytes.
    #[must_use]
    pub fn forward(&self, index: TextIndex, count: usize) -> TextIndex {
        self.index_at_offset(self.offset_of(index) + count)
    }

    /// Move `index` backward by `count` bytes.
    #[must_use]
    pub fn backward(&self, index: TextIndex, count: usize) -> TextIndex {
        self.index_at_offset(self.offset_of(index).saturating_sub(count))
    }

    pub(crate) fn next_line(&self, line: LineId) -> LineId {
        self.lines[line]
            .next
            .unwrap_or_else(|| panic!("{line:?} is the last line"))
    }

    /// Content segment containing byte `byte` of `line`, with the offset
    /// into it. `None` past the end of the line.
    pub(crate) fn locate(&self, line: LineId, byte: usize) -> Option<(SegId, usize)> {
        let mut section = self.section_of(self.lines[line].first?);
        let mut base = 0;
        loop {
            let sec = &self.sections[section];
            if byte < base + sec.size {
                break;
            }
            base += sec.size;
            section = sec.next?;
        }
        let mut seg = self.sections[section].first;
        loop {
            let record = &self.segs[seg];
            if byte < base + record.size {
                return Some((seg, byte - base));
            }
            base += record.size;
            seg = record.next?;
        }
    }

    /// Content segment ending exactly at byte `byte` of `line`, splitting a
    /// character segment when `byte` falls inside it. `None` for byte 0.
    pub(crate) fn content_before(&mut self, line: LineId, byte: usize) -> Option<SegId> {
        if byte == 0 {
            return None;
        }
        let (seg, offset) = match self.locate(line, byte) {
            Some(found) => found,
            None => {
                // `byte` is the end of the line: the newline segment.
                let last = self.lines[line].last?;
                return self.prev_content_in_line(Some(last));
            }
        };
        if offset == 0 {
            return self.prev_content_in_line(self.segs[seg].prev);
        }
        Some(self.split_chars(seg, offset))
    }

    /// Nearest content segment at or before `from` within its line.
    fn prev_content_in_line(&self, from: Option<SegId>) -> Option<SegId> {
        let mut cur = from;
        while let Some(seg) = cur {
            if self.segs[seg].is_content() {
                return Some(seg);
            }
            cur = self.segs[seg].prev;
        }
        None
    }

    /// Split the character segment `seg` after `at` bytes. Returns `seg`,
    /// which now ends at the split point.
    pub(crate) fn split_chars(&mut self, seg: SegId, at: usize) -> SegId {
        let line = self.seg_line(seg);
        let tags = self.segs[seg].tags.clone();
        let tail = match &mut self.segs[seg].kind {
            super::SegmentKind::Chars(text) => {
                debug_assert!(text.is_char_boundary(at), "split inside a character");
                text.split_off(at)
            }
            _ => return seg,
        };
        self.set_segment_size(seg, at);
        let tail_seg = self.alloc_chars(&tail, tags);
        self.link_segment(line, Some(seg), tail_seg);
        seg
    }

    /// First content segment of `line`.
    pub(crate) fn first_content(&self, line: LineId) -> SegId {
        self.line_segs(line)
            .find(|&s| self.segs[s].is_content())
            .unwrap_or_else(|| panic!("{line:?} has no content"))
    }

    /// Next content segment in document order.
    pub(crate) fn next_content(&self, seg: SegId) -> Option<SegId> {
        let mut cur = self.segs[seg].next;
        let mut line = self.seg_line(seg);
        loop {
            while let Some(s) = cur {
                if self.segs[s].is_content() {
                    return Some(s);
                }
                cur = self.segs[s].next;
            }
            line = self.lines[line].next?;
            cur = self.lines[line].first;
        }
    }

    /// Previous content segment in document order.
    pub(crate) fn prev_content(&self, seg: SegId) -> Option<SegId> {
        let mut cur = self.segs[seg].prev;
        let mut line = self.seg_line(seg);
        loop {
            while let Some(s) = cur {
                if self.segs[s].is_content() {
                    return Some(s);
                }
                cur = self.segs[s].prev;
            }
            line = self.lines[line].prev?;
            cur = self.lines[line].last;
        }
    }

    /// Segment directly after `seg` in document order, crossing lines.
    pub(crate) fn global_next(&self, seg: SegId) -> Option<SegId> {
        if let Some(next) = self.segs[seg].next {
            return Some(next);
        }
        let line = self.lines[self.seg_line(seg)].next?;
        self.lines[line].first
    }

    /// Segment directly before `seg` in document order, crossing lines.
    pub(crate) fn global_prev(&self, seg: SegId) -> Option<SegId> {
        if let Some(prev) = self.segs[seg].prev {
            return Some(prev);
        }
        let line = self.lines[self.seg_line(seg)].prev?;
        self.lines[line].last
    }

    /// Content segment ending at `index` without splitting: the character
    /// before the position. `None` at the document start.
    pub(crate) fn content_ending_at(&self, line: LineId, byte: usize) -> Option<SegId> {
        if byte == 0 {
            let prev = self.lines[line].prev?;
            return self.prev_content_in_line(self.lines[prev].last);
        }
        self.locate(line, byte - 1).map(|(seg, _)| seg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTree {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "héllo\nworld\n");
        tree
    }

    #[test]
    fn test_normalize_clamps() {
        let tree = sample();
        assert_eq!(tree.normalize(TextIndex::new(0, 100)), TextIndex::new(0, 6));
        assert_eq!(tree.normalize(TextIndex::new(99, 3)), TextIndex::new(3, 0));
        // Inside the two-byte 'é'.
        assert_eq!(tree.normalize(TextIndex::new(0, 2)), TextIndex::new(0, 1));
    }

    #[test]
    fn test_end_index() {
        let tree = sample();
        assert_eq!(tree.end_index(), TextIndex::new(2, 0));
        let empty = BTree::new();
        assert_eq!(empty.end_index(), TextIndex::START);
    }

    #[test]
    fn test_offsets_round_trip() {
        let tree = sample();
        assert_eq!(tree.offset_of(TextIndex::new(1, 2)), 9);
        assert_eq!(tree.index_at_offset(9), TextIndex::new(1, 2));
        assert_eq!(tree.index_at_offset(7), TextIndex::new(1, 0));
        assert_eq!(tree.forward(TextIndex::new(0, 5), 3), TextIndex::new(1, 1));
        assert_eq!(tree.backward(TextIndex::new(1, 1), 2), TextIndex::new(0, 6));
    }

    #[test]
    fn test_line_numbers_in_deep_tree() {
        let mut tree = BTree::new();
        let text: String = (0..1000).map(|i| format!("{i}\n")).collect();
        tree.insert(TextIndex::START, &text);
        for number in [0, 1, 31, 32, 517, 999, 1000, 1001] {
            let line = tree.line_at(number);
            assert_eq!(tree.line_number(line), number);
        }
        assert_eq!(tree.line_text(517), "517\n");
        assert_eq!(tree.logical_line_number(517), 517);
        assert_eq!(tree.line_of_logical(517), 517);
        assert_eq!(tree.line_of_logical(5000), 1001);
        let offset = tree.offset_of(TextIndex::new(517, 1));
        assert_eq!(tree.index_at_offset(offset), TextIndex::new(517, 1));
    }

    #[test]
    fn test_display() {
        assert_eq!(TextIndex::new(3, 7).to_string(), "3.7");
    }
}
