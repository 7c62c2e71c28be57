//! Tag queries and line searches driven by node summaries.

use super::arena::{LineId, NodeId, SegId};
use super::{BTree, Line, Node, TextIndex};
use crate::TagId;

impl BTree {
    /// First line after `line` satisfying `line_pred`, skipping subtrees
    /// whose summary fails `node_pred`. `node_pred` must hold for every
    /// node containing a matching line.
    pub(crate) fn next_line_where(
        &self,
        line: LineId,
        node_pred: impl Fn(&Node) -> bool,
        line_pred: impl Fn(&Line) -> bool,
    ) -> Option<LineId> {
        self.next_line_within(None, line, node_pred, line_pred)
    }

    /// Like [`Self::next_line_where`], but never leaves the subtree of
    /// `within`, which must contain `line`.
    fn next_line_within(
        &self,
        within: Option<NodeId>,
        line: LineId,
        node_pred: impl Fn(&Node) -> bool,
        line_pred: impl Fn(&Line) -> bool,
    ) -> Option<LineId> {
        let mut node = self.lines[line].node;
        let last = self.nodes[node].last_line;
        let mut cur = line;
        while cur != last {
            cur = self.next_line(cur);
            if line_pred(&self.lines[cur]) {
                return Some(cur);
            }
        }
        while Some(node) != within {
            let Some(parent) = self.nodes[node].parent else {
                break;
            };
            let children = &self.nodes[parent].children;
            let pos = self.child_position(node);
            for &sibling in &children[pos + 1..] {
                if node_pred(&self.nodes[sibling]) {
                    if let Some(found) = self.first_line_where(sibling, &node_pred, &line_pred) {
                        return Some(found);
                    }
                }
            }
            node = parent;
        }
        None
    }

    /// Last line before `line` satisfying `line_pred`.
    pub(crate) fn prev_line_where(
        &self,
        line: LineId,
        node_pred: impl Fn(&Node) -> bool,
        line_pred: impl Fn(&Line) -> bool,
    ) -> Option<LineId> {
        self.prev_line_within(None, line, node_pred, line_pred)
    }

    fn prev_line_within(
        &self,
        within: Option<NodeId>,
        line: LineId,
        node_pred: impl Fn(&Node) -> bool,
        line_pred: impl Fn(&Line) -> bool,
    ) -> Option<LineId> {
        let mut node = self.lines[line].node;
        let first = self.nodes[node].first_line;
        let mut cur = line;
        while cur != first {
            cur = self.lines[cur]
                .prev
                .unwrap_or_else(|| panic!("{cur:?} runs before its node"));
            if line_pred(&self.lines[cur]) {
                return Some(cur);
            }
        }
        while Some(node) != within {
            let Some(parent) = self.nodes[node].parent else {
                break;
            };
            let children = &self.nodes[parent].children;
            let pos = self.child_position(node);
            for &sibling in children[..pos].iter().rev() {
                if node_pred(&self.nodes[sibling]) {
                    if let Some(found) = self.last_line_where(sibling, &node_pred, &line_pred) {
                        return Some(found);
                    }
                }
            }
            node = parent;
        }
        None
    }

    fn first_line_where(
        &self,
        node: NodeId,
        node_pred: &impl Fn(&Node) -> bool,
        line_pred: &impl Fn(&Line) -> bool,
    ) -> Option<LineId> {
        let n = &self.nodes[node];
        if n.level == 0 {
            return self
                .node_lines(node)
                .into_iter()
                .find(|&l| line_pred(&self.lines[l]));
        }
        n.children
            .iter()
            .filter(|&&c| node_pred(&self.nodes[c]))
            .find_map(|&c| self.first_line_where(c, node_pred, line_pred))
    }

    fn last_line_where(
        &self,
        node: NodeId,
        node_pred: &impl Fn(&Node) -> bool,
        line_pred: &impl Fn(&Line) -> bool,
    ) -> Option<LineId> {
        let n = &self.nodes[node];
        if n.level == 0 {
            return self
                .node_lines(node)
                .into_iter()
                .rev()
                .find(|&l| line_pred(&self.lines[l]));
        }
        n.children
            .iter()
            .rev()
            .filter(|&&c| node_pred(&self.nodes[c]))
            .find_map(|&c| self.last_line_where(c, node_pred, line_pred))
    }

    /// Content segments of `line` with their byte offsets.
    fn line_contents(&self, line: LineId) -> Vec<(SegId, usize)> {
        let mut out = Vec::new();
        let mut offset = 0;
        for seg in self.line_segs(line) {
            let size = self.segs[seg].size;
            if size > 0 {
                out.push((seg, offset));
                offset += size;
            }
        }
        out
    }

    fn seg_has(&self, seg: SegId, tag: TagId) -> bool {
        self.segs[seg].tags.test(tag.index())
    }

    /// Tags on the content at `index`, lowest priority first.
    #[must_use]
    pub fn tags_at(&self, index: TextIndex) -> Vec<TagId> {
        let (line, byte) = self.resolve(index);
        let Some((seg, _)) = self.locate(line, byte) else {
            return Vec::new();
        };
        let mut ids: Vec<TagId> = self.segs[seg]
            .tags
            .iter()
            .map(|i| TagId(i as u32))
            .collect();
        self.tags.sort_by_priority(&mut ids);
        ids
    }

    /// Check whether the content at `index` carries `tag`.
    #[must_use]
    pub fn has_tag(&self, index: TextIndex, tag: TagId) -> bool {
        let (line, byte) = self.resolve(index);
        self.locate(line, byte)
            .is_some_and(|(seg, _)| self.seg_has(seg, tag))
    }

    /// Cached root node of `tag`: the deepest node whose subtree holds every
    /// occurrence. `None` when the tag is on no content.
    #[must_use]
    pub fn tag_root(&self, tag: TagId) -> Option<NodeId> {
        self.tags.get(tag).root
    }

    /// Line numbers of the first and last line under `node`.
    fn node_line_span(&self, node: NodeId) -> (usize, usize) {
        let n = &self.nodes[node];
        (self.line_number(n.first_line), self.line_number(n.last_line))
    }

    /// First position `>= from` (or `> from` when `strict`) where `tag`
    /// starts or stops. Only the subtree of the tag root is searched.
    fn toggle_after(&self, tag: TagId, from: TextIndex, strict: bool) -> Option<TextIndex> {
        let root = self.tag_root(tag)?;
        let t = tag.index();
        let (lo, hi) = self.node_line_span(root);
        let mut from = self.normalize(from);
        let mut strict = strict;
        if from.line < lo {
            from = TextIndex::new(lo, 0);
            strict = false;
        }
        if from.line > hi + 1 {
            return None;
        }
        let mut line = self.line_at(from.line);
        let mut number = from.line;
        let mut state = self
            .content_ending_at(line, from.byte)
            .is_some_and(|s| self.seg_has(s, tag));
        for (seg, offset) in self.line_contents(line) {
            let size = self.segs[seg].size;
            if offset + size <= from.byte {
                continue;
            }
            let at_or_after = if strict {
                offset > from.byte
            } else {
                offset >= from.byte
            };
            let has = self.seg_has(seg, tag);
            if at_or_after && has != state {
                return Some(TextIndex::new(number, offset));
            }
            state = has;
        }
        if number > hi {
            return None;
        }
        loop {
            let next = if state {
                self.next_line_within(
                    Some(root),
                    line,
                    |n| !n.tag_on.test(t) || n.tag_off.test(t),
                    |l| !l.tag_on.test(t) || l.tag_off.test(t),
                )
            } else {
                self.next_line_within(Some(root), line, |n| n.tag_on.test(t), |l| l.tag_on.test(t))
            };
            let Some(next) = next else {
                return state.then_some(TextIndex::new(hi + 1, 0));
            };
            number = self.line_number(next);
            line = next;
            for (seg, offset) in self.line_contents(line) {
                let has = self.seg_has(seg, tag);
                if has != state {
                    return Some(TextIndex::new(number, offset));
                }
            }
        }
    }

    /// First position `>= from` where `tag` starts or stops.
    #[must_use]
    pub fn next_toggle(&self, tag: TagId, from: TextIndex) -> Option<TextIndex> {
        self.toggle_after(tag, from, false)
    }

    /// Last position `< from` where `tag` starts or stops.
    #[must_use]
    pub fn prev_toggle(&self, tag: TagId, from: TextIndex) -> Option<TextIndex> {
        let root = self.tag_root(tag)?;
        let t = tag.index();
        let (lo, hi) = self.node_line_span(root);
        let mut from = self.normalize(from);
        if from <= TextIndex::new(lo, 0) {
            return None;
        }
        let past = TextIndex::new(hi + 1, 0);
        if from > past {
            let tail = self.line_contents(self.nodes[root].last_line);
            if tail.last().is_some_and(|&(seg, _)| self.seg_has(seg, tag)) {
                return Some(past);
            }
            from = past;
        }
        let mut line = self.line_at(from.line);
        let mut contents = self.line_contents(line);
        let mut idx = if from.byte == 0 {
            line = self.lines[line].prev?;
            contents = self.line_contents(line);
            contents.len() - 1
        } else {
            contents
                .iter()
                .rposition(|&(_, offset)| offset < from.byte)
                .unwrap_or_else(|| panic!("no content before {from}"))
        };
        let state = self.seg_has(contents[idx].0, tag);
        loop {
            let number = self.line_number(line);
            for i in (0..idx).rev() {
                if self.seg_has(contents[i].0, tag) != state {
                    return Some(TextIndex::new(number, contents[i + 1].1));
                }
            }
            let prev = if state {
                self.prev_line_within(
                    Some(root),
                    line,
                    |n| !n.tag_on.test(t) || n.tag_off.test(t),
                    |l| !l.tag_on.test(t) || l.tag_off.test(t),
                )
            } else {
                self.prev_line_within(Some(root), line, |n| n.tag_on.test(t), |l| l.tag_on.test(t))
            };
            let Some(prev) = prev else {
                return state.then_some(TextIndex::new(lo, 0));
            };
            let number = self.line_number(prev);
            let prev_contents = self.line_contents(prev);
            if self.seg_has(prev_contents[prev_contents.len() - 1].0, tag) != state {
                return Some(TextIndex::new(number + 1, 0));
            }
            line = prev;
            idx = prev_contents.len() - 1;
            contents = prev_contents;
        }
    }

    /// First range of `tag` starting at or after `from`.
    #[must_use]
    pub fn next_range(&self, tag: TagId, from: TextIndex) -> Option<(TextIndex, TextIndex)> {
        let mut start = self.next_toggle(tag, from)?;
        if !self.has_tag(start, tag) {
            start = self.toggle_after(tag, start, true)?;
        }
        let end = self.toggle_after(tag, start, true)?;
        Some((start, end))
    }

    /// Last range of `tag` starting before `from`.
    #[must_use]
    pub fn prev_range(&self, tag: TagId, from: TextIndex) -> Option<(TextIndex, TextIndex)> {
        let mut start = self.prev_toggle(tag, from)?;
        if !self.has_tag(start, tag) {
            start = self.prev_toggle(tag, start)?;
        }
        let end = self.toggle_after(tag, start, true)?;
        Some((start, end))
    }

    /// Every range of `tag`, in document order.
    #[must_use]
    pub fn tag_ranges(&self, tag: TagId) -> Vec<(TextIndex, TextIndex)> {
        let mut out = Vec::new();
        let mut from = TextIndex::START;
        while let Some((start, end)) = self.next_range(tag, from) {
            out.push((start, end));
            from = end;
        }
        out
    }

    /// Start of the range of `tag` containing `index`.
    #[must_use]
    pub fn find_tag_start(&self, tag: TagId, index: TextIndex) -> Option<TextIndex> {
        let index = self.normalize(index);
        if !self.has_tag(index, tag) {
            return None;
        }
        let (line, byte) = self.resolve(index);
        let before = self
            .content_ending_at(line, byte)
            .is_some_and(|s| self.seg_has(s, tag));
        if before {
            self.prev_toggle(tag, index)
        } else {
            Some(index)
        }
    }

    /// End of the range of `tag` containing `index`.
    #[must_use]
    pub fn find_tag_end(&self, tag: TagId, index: TextIndex) -> Option<TextIndex> {
        if !self.has_tag(index, tag) {
            return None;
        }
        self.toggle_after(tag, index, true)
    }

    /// Skip whole lines (and subtrees starting at `line`) that lie inside
    /// the range ending on line `end_line` and already have `tag` in the
    /// wanted state. Returns (lines, bytes, last skipped line).
    pub(crate) fn uniform_skip(
        &self,
        line: LineId,
        number: usize,
        end_line: usize,
        tag: TagId,
        add: bool,
    ) -> Option<(usize, usize, LineId)> {
        let t = tag.index();
        let uniform = |on: &crate::TagSet, off: &crate::TagSet| {
            if add {
                on.test(t) && !off.test(t)
            } else {
                !on.test(t)
            }
        };
        let record = &self.lines[line];
        if !uniform(&record.tag_on, &record.tag_off) {
            return None;
        }
        let mut best = (1, record.size, line);
        let mut node = record.node;
        loop {
            let n = &self.nodes[node];
            if n.first_line != line || number + n.num_lines > end_line || !uniform(&n.tag_on, &n.tag_off) {
                break;
            }
            best = (n.num_lines, n.size, n.last_line);
            match n.parent {
                Some(p) => node = p,
                None => break,
            }
        }
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use crate::{BTree, TextIndex};

    fn tagged() -> (BTree, crate::TagId) {
        let mut tree = BTree::new();
        let t = tree.create_tag("t");
        tree.insert(TextIndex::START, "abcdef\nghijkl\nmnopqr\n");
        tree.tag(TextIndex::new(0, 1), TextIndex::new(0, 3), t, true);
        tree.tag(TextIndex::new(1, 4), TextIndex::new(2, 2), t, true);
        (tree, t)
    }

    #[test]
    fn test_next_and_prev_toggle() {
        let (tree, t) = tagged();
        assert_eq!(tree.next_toggle(t, TextIndex::START), Some(TextIndex::new(0, 1)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(0, 1)), Some(TextIndex::new(0, 1)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(0, 2)), Some(TextIndex::new(0, 3)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(0, 4)), Some(TextIndex::new(1, 4)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(2, 0)), Some(TextIndex::new(2, 2)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(2, 3)), None);

        assert_eq!(tree.prev_toggle(t, TextIndex::new(2, 5)), Some(TextIndex::new(2, 2)));
        assert_eq!(tree.prev_toggle(t, TextIndex::new(2, 1)), Some(TextIndex::new(1, 4)));
        assert_eq!(tree.prev_toggle(t, TextIndex::new(1, 4)), Some(TextIndex::new(0, 3)));
        assert_eq!(tree.prev_toggle(t, TextIndex::new(0, 1)), None);
    }

    #[test]
    fn test_toggles_outside_tag_root() {
        let mut tree = BTree::new();
        let text: String = (0..1200).map(|i| format!("row {i}\n")).collect();
        tree.insert(TextIndex::START, &text);
        let t = tree.create_tag("t");
        tree.tag(TextIndex::new(600, 0), TextIndex::new(601, 0), t, true);
        assert_ne!(tree.tag_root(t), Some(tree.root()));

        assert_eq!(tree.next_toggle(t, TextIndex::START), Some(TextIndex::new(600, 0)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(600, 1)), Some(TextIndex::new(601, 0)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(601, 0)), Some(TextIndex::new(601, 0)));
        assert_eq!(tree.next_toggle(t, TextIndex::new(601, 1)), None);

        assert_eq!(tree.prev_toggle(t, tree.end_index()), Some(TextIndex::new(601, 0)));
        assert_eq!(tree.prev_toggle(t, TextIndex::new(601, 0)), Some(TextIndex::new(600, 0)));
        assert_eq!(tree.prev_toggle(t, TextIndex::new(600, 0)), None);
        assert_eq!(tree.tag_ranges(t), vec![(TextIndex::new(600, 0), TextIndex::new(601, 0))]);
    }

    #[test]
    fn test_ranges() {
        let (tree, t) = tagged();
        assert_eq!(
            tree.tag_ranges(t),
            vec![
                (TextIndex::new(0, 1), TextIndex::new(0, 3)),
                (TextIndex::new(1, 4), TextIndex::new(2, 2)),
            ]
        );
        assert_eq!(
            tree.next_range(t, TextIndex::new(0, 2)),
            Some((TextIndex::new(1, 4), TextIndex::new(2, 2)))
        );
        assert_eq!(
            tree.prev_range(t, TextIndex::new(1, 5)),
            Some((TextIndex::new(1, 4), TextIndex::new(2, 2)))
        );
        assert_eq!(
            tree.prev_range(t, TextIndex::new(1, 4)),
            Some((TextIndex::new(0, 1), TextIndex::new(0, 3)))
        );
        assert_eq!(tree.find_tag_start(t, TextIndex::new(2, 1)), Some(TextIndex::new(1, 4)));
        assert_eq!(tree.find_tag_end(t, TextIndex::new(1, 5)), Some(TextIndex::new(2, 2)));
        assert_eq!(tree.find_tag_start(t, TextIndex::new(0, 0)), None);
    }

    #[test]
    fn test_range_from_document_start() {
        let mut tree = BTree::new();
        let t = tree.create_tag("t");
        tree.insert(TextIndex::START, "abc\n");
        tree.tag(TextIndex::START, TextIndex::new(0, 2), t, true);
        assert_eq!(tree.prev_toggle(t, TextIndex::new(0, 1)), Some(TextIndex::START));
        assert_eq!(tree.find_tag_start(t, TextIndex::new(0, 1)), Some(TextIndex::START));
        assert_eq!(tree.tag_ranges(t), vec![(TextIndex::START, TextIndex::new(0, 2))]);
    }

    #[test]
    fn test_search_in_deep_tree_skips_subtrees() {
        let mut tree = BTree::new();
        let t = tree.create_tag("t");
        let text: String = (0..2000).map(|i| format!("row {i}\n")).collect();
        tree.insert(TextIndex::START, &text);
        tree.tag(TextIndex::new(1500, 0), TextIndex::new(1500, 3), t, true);
        assert_eq!(tree.next_toggle(t, TextIndex::START), Some(TextIndex::new(1500, 0)));
        assert_eq!(tree.prev_toggle(t, TextIndex::new(1999, 0)), Some(TextIndex::new(1500, 3)));
        tree.tag(TextIndex::new(10, 0), TextIndex::new(1900, 0), t, true);
        assert_eq!(tree.tag_ranges(t), vec![(TextIndex::new(10, 0), TextIndex::new(1900, 0))]);
        tree.check();
    }
}
