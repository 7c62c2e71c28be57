//! Tag application and cached tag roots.

use super::arena::{LineId, NodeId, SegId};
use super::{BTree, TextIndex};
use crate::TagId;
use crate::error::Result;
use crate::tagset::TagSet;
use crate::undo::UndoToken;

/// Result of a tag operation.
#[derive(Debug, Default)]
pub struct TagChange {
    /// Whether any content changed its tag set.
    pub changed: bool,
    /// Token reverting the change, when something changed.
    pub undo: Option<UndoToken>,
}

/// Alternating skip/toggle byte counts, starting with a skip.
#[derive(Debug, Default)]
struct RunLengths {
    lengths: Vec<usize>,
}

impl RunLengths {
    fn push(&mut self, toggled: bool, bytes: usize) {
        if bytes == 0 {
            return;
        }
        if self.lengths.is_empty() {
            if toggled {
                self.lengths.push(0);
            }
            self.lengths.push(bytes);
            return;
        }
        let last_toggled = self.lengths.len() % 2 == 0;
        if last_toggled == toggled {
            if let Some(last) = self.lengths.last_mut() {
                *last += bytes;
            }
        } else {
            self.lengths.push(bytes);
        }
    }

    /// `None` when the whole range toggled.
    fn finish(mut self) -> Option<Vec<usize>> {
        if self.lengths.len() == 2 && self.lengths[0] == 0 {
            return None;
        }
        if self.lengths.len() % 2 == 1 {
            self.lengths.pop();
        }
        Some(self.lengths)
    }
}

#[derive(Debug, Default)]
struct Retagged {
    changed: bool,
    toggles: RunLengths,
    /// Previous runs; only complete when no lines were skipped.
    before: Vec<(usize, TagSet)>,
}

impl BTree {
    /// Return the tag named `name`, creating it when missing. New tags get
    /// the highest priority.
    pub fn create_tag(&mut self, name: &str) -> TagId {
        self.tags.intern(name)
    }

    /// Look up an existing tag.
    pub fn tag_id(&self, name: &str) -> Result<TagId> {
        self.tags.lookup(name)
    }

    #[must_use]
    pub fn tag_name(&self, tag: TagId) -> &str {
        self.tags.get(tag).name()
    }

    pub fn set_tag_priority(&mut self, tag: TagId, priority: u32) -> bool {
        self.configure_tag(tag, Some(priority), None)
    }

    pub fn set_tag_elide(&mut self, tag: TagId, elide: Option<bool>) -> bool {
        self.configure_tag(tag, None, Some(elide))
    }

    /// Change the priority and/or elide attribute of `tag`. Content already
    /// carrying the tag is re-evaluated for elision. Returns whether any
    /// attribute changed.
    pub fn configure_tag(&mut self, tag: TagId, priority: Option<u32>, elide: Option<Option<bool>>) -> bool {
        let mut changed = false;
        let mut rewalk = false;
        if let Some(priority) = priority {
            if self.tags.set_priority(tag, priority) {
                changed = true;
                rewalk |= self.tags.get(tag).elide().is_some();
            }
        }
        if let Some(elide) = elide {
            if self.tags.set_elide(tag, elide) {
                changed = true;
                rewalk = true;
            }
        }
        if rewalk && self.tag_root(tag).is_some() {
            self.rewalk_tags(&[tag]);
            self.bump_epoch();
            self.debug_check("configure_tag");
        }
        changed
    }

    /// Add (`add == true`) or remove `tag` on `[start, end)`. The range
    /// clamps to the final newline.
    pub fn tag(&mut self, start: TextIndex, end: TextIndex, tag: TagId, add: bool) -> TagChange {
        let Some((start, end)) = self.tag_span(start, end) else {
            return TagChange::default();
        };
        if !self.range_needs_toggle(start, end, tag, add) {
            return TagChange::default();
        }
        let t = tag.index();
        let outcome = self.retag(start, end, Some((tag, add)), |tags| {
            (tags.test(t) != add).then(|| tags.clone().with(t, add))
        });
        if !outcome.changed {
            return TagChange::default();
        }
        TagChange {
            changed: true,
            undo: Some(UndoToken::tag(tag, add, start, end, outcome.toggles.finish())),
        }
    }

    /// Remove every tag from `[start, end)`.
    pub fn clear_tags(&mut self, start: TextIndex, end: TextIndex) -> TagChange {
        let Some((start, end)) = self.tag_span(start, end) else {
            return TagChange::default();
        };
        let outcome = self.retag(start, end, None, |tags| {
            (!tags.is_empty()).then(TagSet::empty)
        });
        if !outcome.changed {
            return TagChange::default();
        }
        let length = self.offset_of(end) - self.offset_of(start);
        TagChange {
            changed: true,
            undo: Some(UndoToken::retag(
                start,
                end,
                outcome.before,
                vec![(length, TagSet::empty())],
            )),
        }
    }

    fn tag_span(&self, start: TextIndex, end: TextIndex) -> Option<(TextIndex, TextIndex)> {
        let start = self.clamp_to_end(start);
        let end = self.clamp_to_end(end);
        (start < end).then_some((start, end))
    }

    /// Set `tag` to `add` over the toggled stretches of `lengths` (or the
    /// whole range when `None`), starting at `start`.
    pub(crate) fn apply_toggles(
        &mut self,
        tag: TagId,
        add: bool,
        start: TextIndex,
        end: TextIndex,
        lengths: Option<&[usize]>,
    ) {
        let Some(lengths) = lengths else {
            self.tag(start, end, tag, add);
            return;
        };
        let mut offset = self.offset_of(start);
        for (i, &len) in lengths.iter().enumerate() {
            if i % 2 == 1 {
                let a = self.index_at_offset(offset);
                let b = self.index_at_offset(offset + len);
                self.tag(a, b, tag, add);
            }
            offset += len;
        }
    }

    /// Overwrite the tags of consecutive runs starting at `start`. Returns
    /// the runs that were replaced.
    pub(crate) fn apply_runs(&mut self, start: TextIndex, runs: &[(usize, TagSet)]) -> Vec<(usize, TagSet)> {
        let mut offset = self.offset_of(start);
        let mut before = Vec::new();
        for (len, tags) in runs {
            let a = self.index_at_offset(offset);
            let b = self.index_at_offset(offset + len);
            offset += len;
            if a >= b {
                continue;
            }
            let outcome = self.retag(a, b, None, |old| (old != tags).then(|| tags.clone()));
            if outcome.changed {
                before.extend(outcome.before);
            } else {
                before.push((*len, tags.clone()));
            }
        }
        merge_runs(before)
    }

    /// Current tag runs over `[start, end)`.
    pub(crate) fn tag_runs(&self, start: TextIndex, end: TextIndex) -> Vec<(usize, TagSet)> {
        let mut runs = Vec::new();
        let mut offset = self.offset_of(start);
        let stop = self.offset_of(end);
        while offset < stop {
            let index = self.index_at_offset(offset);
            let (line, byte) = self.resolve(index);
            let Some((seg, within)) = self.locate(line, byte) else {
                break;
            };
            let take = (self.segs[seg].size - within).min(stop - offset);
            runs.push((take, self.segs[seg].tags.clone()));
            offset += take;
        }
        merge_runs(runs)
    }

    fn range_needs_toggle(&self, start: TextIndex, end: TextIndex, tag: TagId, add: bool) -> bool {
        let t = tag.index();
        let (mut line, _) = self.resolve(start);
        let mut number = start.line;
        while number <= end.line {
            if number == end.line && end.byte == 0 {
                break;
            }
            let full = number < end.line && (number > start.line || start.byte == 0);
            if full {
                if let Some((count, _, last)) = self.uniform_skip(line, number, end.line, tag, add) {
                    number += count;
                    if number > end.line {
                        break;
                    }
                    line = self.next_line(last);
                    continue;
                }
            }
            let lo = if number == start.line { start.byte } else { 0 };
            let hi = if number == end.line { end.byte } else { usize::MAX };
            let mut offset = 0;
            for seg in self.line_segs(line) {
                let record = &self.segs[seg];
                if record.size == 0 {
                    continue;
                }
                if offset + record.size > lo && offset < hi && record.tags.test(t) != add {
                    return true;
                }
                offset += record.size;
            }
            number += 1;
            line = self.next_line(line);
        }
        false
    }

    /// Rewrite the tag set of every content segment in `[start, end)`
    /// (clamped, non-empty) through `f`, then restore summaries, tag roots,
    /// elision and joins.
    fn retag(
        &mut self,
        start: TextIndex,
        end: TextIndex,
        skip: Option<(TagId, bool)>,
        mut f: impl FnMut(&TagSet) -> Option<TagSet>,
    ) -> Retagged {
        let (ls, bs) = self.resolve(start);
        let (le, be) = self.resolve(end);
        let last_number = if be == 0 { end.line - 1 } else { end.line };
        let cs = self.content_before(ls, bs);
        let ce = self.content_before(le, be);
        let first = match cs {
            Some(c) => self.next_content(c),
            None => Some(self.first_content(ls)),
        }
        .unwrap_or_else(|| panic!("tag range {start} has no content"));
        let last = match ce {
            Some(c) => c,
            None => self
                .prev_content(self.first_content(le))
                .unwrap_or_else(|| panic!("tag range {end} has no preceding content")),
        };
        let guard: Vec<SegId> = cs.into_iter().chain(ce).collect();

        let out = self.with_protected(&guard, |tree| {
            let mut out = Retagged::default();
            let mut affected = TagSet::empty();
            let mut toggled = Vec::new();
            let mut touched: Vec<LineId> = Vec::new();
            let mut line = ls;
            let mut number = start.line;
            let mut cursor = Some(first);
            'lines: while number <= last_number {
                let full = number < end.line && (number > start.line || bs == 0);
                if full {
                    if let Some((tag, add)) = skip {
                        if let Some((count, bytes, last_skipped)) =
                            tree.uniform_skip(line, number, end.line, tag, add)
                        {
                            out.toggles.push(false, bytes);
                            number += count;
                            if number > last_number {
                                break;
                            }
                            line = tree.next_line(last_skipped);
                            cursor = None;
                            continue;
                        }
                    }
                }
                let mut seg = cursor.take().or(tree.lines[line].first);
                let mut line_touched = false;
                while let Some(id) = seg {
                    seg = tree.segs[id].next;
                    let record = &tree.segs[id];
                    if record.size == 0 {
                        continue;
                    }
                    let size = record.size;
                    out.before.push((size, record.tags.clone()));
                    match f(&record.tags) {
                        Some(new) => {
                            affected = affected.union(&record.tags.symmetric_difference(&new));
                            tree.segs[id].tags = new;
                            out.toggles.push(true, size);
                            toggled.push(id);
                            line_touched = true;
                        }
                        None => out.toggles.push(false, size),
                    }
                    if id == last {
                        if line_touched {
                            touched.push(line);
                        }
                        break 'lines;
                    }
                }
                if line_touched {
                    touched.push(line);
                }
                number += 1;
                line = tree.next_line(line);
            }

            out.changed = !toggled.is_empty();
            if !out.changed {
                return out;
            }
            for &line in &touched {
                tree.mark_changed(line);
                tree.refresh_line_tags(line);
            }
            let hides = affected
                .iter()
                .any(|i| tree.tags.get(TagId(i as u32)).elide().is_some());
            if hides {
                if let Some(boundary) = tree.next_content(last) {
                    toggled.extend(tree.update_elision(first, boundary, None));
                }
            }
            tree.join_all(&toggled);
            out.before = merge_runs(std::mem::take(&mut out.before));
            out
        });
        if out.changed {
            self.bump_epoch();
            self.debug_check("tag");
        }
        out
    }

    /// Recompute the summaries of `line`, propagate them upwards and
    /// adjust the roots of tags that appeared or vanished.
    pub(crate) fn refresh_line_tags(&mut self, line: LineId) {
        let (on, off) = self.compute_line_tags(line);
        let record = &mut self.lines[line];
        if record.tag_on == on && record.tag_off == off {
            return;
        }
        let old_on = std::mem::replace(&mut record.tag_on, on.clone());
        record.tag_off = off;
        let node = record.node;
        self.refresh_summaries_up(node);
        for index in on.difference(&old_on).iter() {
            self.push_up_tag_root(TagId(index as u32), node);
        }
        for index in old_on.difference(&on).iter() {
            self.pull_down_tag_root(TagId(index as u32));
        }
    }

    /// `tag` now also occurs under `node`.
    fn push_up_tag_root(&mut self, tag: TagId, node: NodeId) {
        let root = match self.tags.get(tag).root {
            None => node,
            Some(r) if self.nodes.contains(r) && self.nodes[r].tag_on.test(tag.index()) => {
                self.common_ancestor(r, node)
            }
            Some(_) => {
                self.recompute_tag_root(tag);
                return;
            }
        };
        self.tags.get_mut(tag).root = Some(root);
    }

    /// Some occurrences of `tag` vanished; descend from the current root.
    fn pull_down_tag_root(&mut self, tag: TagId) {
        let start = self
            .tags
            .get(tag)
            .root
            .filter(|&r| self.nodes.contains(r) && self.nodes[r].tag_on.test(tag.index()));
        match start {
            Some(node) => {
                let root = self.descend_tag_root(tag, node);
                self.tags.get_mut(tag).root = Some(root);
            }
            None => self.recompute_tag_root(tag),
        }
    }

    /// Recompute the root of `tag` from the tree root.
    pub(crate) fn recompute_tag_root(&mut self, tag: TagId) {
        let root = self.root;
        let found = self.nodes[root]
            .tag_on
            .test(tag.index())
            .then(|| self.descend_tag_root(tag, root));
        self.tags.get_mut(tag).root = found;
    }

    fn descend_tag_root(&self, tag: TagId, from: NodeId) -> NodeId {
        let t = tag.index();
        let mut node = from;
        loop {
            let n = &self.nodes[node];
            if n.level == 0 {
                return node;
            }
            let mut carrying = n.children.iter().filter(|&&c| self.nodes[c].tag_on.test(t));
            match (carrying.next(), carrying.next()) {
                (Some(&only), None) => node = only,
                _ => return node,
            }
        }
    }

    fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let mut ancestors = Vec::new();
        let mut cur = Some(a);
        while let Some(n) = cur {
            ancestors.push(n);
            cur = self.nodes[n].parent;
        }
        let mut cur = b;
        loop {
            if ancestors.contains(&cur) {
                return cur;
            }
            cur = self.nodes[cur].parent.unwrap_or(self.root);
        }
    }
}

fn merge_runs(runs: Vec<(usize, TagSet)>) -> Vec<(usize, TagSet)> {
    let mut out: Vec<(usize, TagSet)> = Vec::with_capacity(runs.len());
    for (len, tags) in runs {
        match out.last_mut() {
            Some((last_len, last_tags)) if *last_tags == tags => *last_len += len,
            _ => out.push((len, tags)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::RunLengths;
    use crate::{BTree, TextIndex};

    #[test]
    fn test_run_lengths_finish() {
        let mut all = RunLengths::default();
        all.push(true, 3);
        all.push(true, 2);
        assert_eq!(all.finish(), None);

        let mut mixed = RunLengths::default();
        mixed.push(false, 2);
        mixed.push(true, 3);
        mixed.push(false, 1);
        mixed.push(true, 1);
        mixed.push(false, 4);
        assert_eq!(mixed.finish(), Some(vec![2, 3, 1, 1]));
    }

    #[test]
    fn test_run_lengths_head_toggled_tail_skipped() {
        let mut head = RunLengths::default();
        head.push(true, 3);
        head.push(false, 3);
        assert_eq!(head.finish(), Some(vec![0, 3]));
    }

    #[test]
    fn test_run_lengths_head_skipped_tail_toggled() {
        let mut tail = RunLengths::default();
        tail.push(false, 3);
        tail.push(true, 3);
        assert_eq!(tail.finish(), Some(vec![3, 3]));
    }

    #[test]
    fn test_tag_head_only_undo_keeps_existing_tag() {
        let mut tree = BTree::new();
        let a = tree.create_tag("a");
        tree.insert(TextIndex::START, "abcdef\n");
        tree.tag(TextIndex::new(0, 3), TextIndex::new(0, 6), a, true);
        let change = tree.tag(TextIndex::new(0, 0), TextIndex::new(0, 6), a, true);
        let token = change.undo.unwrap();
        assert!(token.describe().ends_with("(partial)"));
        let redo = tree.perform_undo(token);
        assert_eq!(tree.tag_ranges(a), vec![(TextIndex::new(0, 3), TextIndex::new(0, 6))]);
        tree.perform_undo(redo);
        assert_eq!(tree.tag_ranges(a), vec![(TextIndex::new(0, 0), TextIndex::new(0, 6))]);
    }

    #[test]
    fn test_tag_and_untag() {
        let mut tree = BTree::new();
        let bold = tree.create_tag("bold");
        tree.insert(TextIndex::START, "hello world\n");
        let change = tree.tag(TextIndex::new(0, 0), TextIndex::new(0, 5), bold, true);
        assert!(change.changed);
        assert!(change.undo.is_some());
        assert!(tree.has_tag(TextIndex::new(0, 4), bold));
        assert!(!tree.has_tag(TextIndex::new(0, 5), bold));

        let again = tree.tag(TextIndex::new(0, 1), TextIndex::new(0, 3), bold, true);
        assert!(!again.changed);
        assert!(again.undo.is_none());

        tree.tag(TextIndex::new(0, 0), TextIndex::new(0, 5), bold, false);
        assert!(tree.tag_root(bold).is_none());
        // runs with equal tags rejoin
        assert_eq!(tree.content_segment_count(0), 1);
    }

    #[test]
    fn test_tag_clamps_to_final_newline() {
        let mut tree = BTree::new();
        let t = tree.create_tag("t");
        tree.insert(TextIndex::START, "ab\n");
        tree.tag(TextIndex::START, TextIndex::new(99, 0), t, true);
        assert_eq!(tree.tag_ranges(t), vec![(TextIndex::START, TextIndex::new(1, 0))]);
        let end = tree.end_index();
        assert!(!tree.has_tag(end, t));
    }

    #[test]
    fn test_tag_root_tracks_occurrences() {
        let mut tree = BTree::new();
        let t = tree.create_tag("t");
        let text: String = (0..3000).map(|i| format!("{i}\n")).collect();
        tree.insert(TextIndex::START, &text);
        tree.tag(TextIndex::new(5, 0), TextIndex::new(5, 1), t, true);
        let leaf = tree.tag_root(t).expect("root");
        assert_eq!(tree.node_info(leaf).expect("info").level, 0);

        tree.tag(TextIndex::new(2900, 0), TextIndex::new(2900, 1), t, true);
        let top = tree.tag_root(t).expect("root");
        assert!(tree.node_info(top).expect("info").level > 0);

        tree.tag(TextIndex::new(2900, 0), TextIndex::new(2900, 1), t, false);
        assert_eq!(tree.tag_root(t), Some(leaf));
        tree.check();
    }

    #[test]
    fn test_clear_tags_returns_previous_runs() {
        let mut tree = BTree::new();
        let a = tree.create_tag("a");
        let b = tree.create_tag("b");
        tree.insert(TextIndex::START, "abcdef\n");
        tree.tag(TextIndex::new(0, 0), TextIndex::new(0, 3), a, true);
        tree.tag(TextIndex::new(0, 2), TextIndex::new(0, 5), b, true);
        let change = tree.clear_tags(TextIndex::START, TextIndex::new(0, 6));
        assert!(change.changed);
        assert!(tree.tags_at(TextIndex::new(0, 2)).is_empty());
        assert!(tree.tag_root(a).is_none());
        assert!(tree.tag_root(b).is_none());
        assert!(!tree.clear_tags(TextIndex::START, TextIndex::new(0, 6)).changed);
    }

    #[test]
    fn test_configure_priority_reorders_tags_at() {
        let mut tree = BTree::new();
        let low = tree.create_tag("low");
        let high = tree.create_tag("high");
        tree.insert(TextIndex::START, "x\n");
        tree.tag(TextIndex::START, TextIndex::new(0, 1), low, true);
        tree.tag(TextIndex::START, TextIndex::new(0, 1), high, true);
        assert_eq!(tree.tags_at(TextIndex::START), vec![low, high]);
        assert!(tree.configure_tag(low, Some(1), None));
        assert_eq!(tree.tags_at(TextIndex::START), vec![high, low]);
        assert!(!tree.configure_tag(low, Some(1), None));
    }
}
