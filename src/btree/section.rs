//! Sections: runs of 20 to 60 consecutive segments of one line.
//!
//! Sections let offset lookups skip whole runs of segments by their cached
//! byte size. A branch always ends its section and a link always starts
//! one, so elision markers can be found from section boundaries. A section
//! may fall below [`MIN_SECTION`] only when neither neighbour can absorb it
//! across such a boundary.

use super::arena::{LineId, SectionId, SegId};
use super::BTree;

/// Preferred lower bound on segments per section.
pub const MIN_SECTION: usize = 20;
/// Upper bound on segments per section.
pub const MAX_SECTION: usize = 60;

#[derive(Clone, Debug)]
pub(crate) struct Section {
    pub line: LineId,
    pub first: SegId,
    pub prev: Option<SectionId>,
    pub next: Option<SectionId>,
    /// Number of segments.
    pub length: usize,
    /// Sum of segment sizes.
    pub size: usize,
}

impl BTree {
    pub(crate) fn next_seg(&self, seg: SegId) -> SegId {
        self.segs[seg]
            .next
            .unwrap_or_else(|| panic!("section runs past the end of its line at {seg:?}"))
    }

    /// Last segment of `section`.
    pub(crate) fn section_last(&self, section: SectionId) -> SegId {
        let sec = &self.sections[section];
        let mut seg = sec.first;
        for _ in 1..sec.length {
            seg = self.next_seg(seg);
        }
        seg
    }

    /// Link the detached segment `seg` into `line` after `pred` (`None` for
    /// the front of the line) and account for its size everywhere.
    pub(crate) fn link_segment(&mut self, line: LineId, pred: Option<SegId>, seg: SegId) {
        let next = match pred {
            Some(p) => self.segs[p].next,
            None => self.lines[line].first,
        };
        {
            let record = &mut self.segs[seg];
            record.prev = pred;
            record.next = next;
        }
        match pred {
            Some(p) => self.segs[p].next = Some(seg),
            None => self.lines[line].first = Some(seg),
        }
        match next {
            Some(n) => self.segs[n].prev = Some(seg),
            None => self.lines[line].last = Some(seg),
        }

        let section = match (pred, next) {
            (Some(p), _) => self.section_of(p),
            (None, Some(n)) => {
                let section = self.section_of(n);
                self.sections[section].first = seg;
                section
            }
            (None, None) => self.sections.alloc(Section {
                line,
                first: seg,
                prev: None,
                next: None,
                length: 0,
                size: 0,
            }),
        };
        let size = self.segs[seg].size;
        let is_branch = self.segs[seg].is_branch();
        self.segs[seg].section = Some(section);
        {
            let sec = &mut self.sections[section];
            sec.length += 1;
            sec.size += size;
        }

        let record = &mut self.lines[line];
        record.size += size;
        if is_branch {
            record.num_branches += 1;
        }
        let node = record.node;
        if size > 0 || is_branch {
            self.update_path(node, |n| {
                n.size += size;
                if is_branch {
                    n.num_branches += 1;
                }
            });
        }
        self.normalize_section(section);
    }

    /// Unlink `seg` from its line without freeing it. Returns its former
    /// predecessor.
    pub(crate) fn unlink_segment(&mut self, seg: SegId) -> Option<SegId> {
        let section = self.section_of(seg);
        let line = self.sections[section].line;
        let (prev, next, size, is_branch) = {
            let record = &mut self.segs[seg];
            let out = (record.prev, record.next, record.size, record.is_branch());
            record.prev = None;
            record.next = None;
            record.section = None;
            out
        };
        match prev {
            Some(p) => self.segs[p].next = next,
            None => self.lines[line].first = next,
        }
        match next {
            Some(n) => self.segs[n].prev = prev,
            None => self.lines[line].last = prev,
        }

        let (sec_prev, sec_next, empty) = {
            let sec = &mut self.sections[section];
            sec.length -= 1;
            sec.size -= size;
            if sec.first == seg && sec.length > 0 {
                sec.first = next.unwrap_or_else(|| panic!("section of {seg:?} lost its tail"));
            }
            (sec.prev, sec.next, sec.length == 0)
        };
        if empty {
            if let Some(p) = sec_prev {
                self.sections[p].next = sec_next;
            }
            if let Some(n) = sec_next {
                self.sections[n].prev = sec_prev;
            }
            self.sections.free(section);
        }

        let record = &mut self.lines[line];
        record.size -= size;
        if is_branch {
            record.num_branches -= 1;
        }
        let node = record.node;
        if size > 0 || is_branch {
            self.update_path(node, |n| {
                n.size -= size;
                if is_branch {
                    n.num_branches -= 1;
                }
            });
        }

        for candidate in [sec_prev, (!empty).then_some(section), sec_next]
            .into_iter()
            .flatten()
        {
            if self.sections.contains(candidate) {
                self.shrink_check(candidate);
            }
        }
        prev
    }

    /// Change the size of a linked content segment after its text grew or
    /// shrank in place.
    pub(crate) fn set_segment_size(&mut self, seg: SegId, size: usize) {
        let old = self.segs[seg].size;
        if old == size {
            return;
        }
        self.segs[seg].size = size;
        let section = self.section_of(seg);
        let sec = &mut self.sections[section];
        sec.size = sec.size - old + size;
        let line = sec.line;
        let record = &mut self.lines[line];
        record.size = record.size - old + size;
        let node = record.node;
        self.update_path(node, |n| n.size = n.size - old + size);
    }

    fn can_merge_sections(&self, a: SectionId, b: SectionId) -> bool {
        let first_b = self.sections[b].first;
        let last_a = self.segs[first_b].prev;
        !last_a.is_some_and(|s| self.segs[s].is_branch()) && !self.segs[first_b].is_link()
    }

    /// Split `section` after its first `keep` segments. Returns the new
    /// section holding the rest.
    fn split_section(&mut self, section: SectionId, keep: usize) -> SectionId {
        let (line, first, length, next_section) = {
            let sec = &self.sections[section];
            (sec.line, sec.first, sec.length, sec.next)
        };
        debug_assert!(keep > 0 && keep < length);
        let mut seg = first;
        for _ in 0..keep {
            seg = self.next_seg(seg);
        }
        let tail = self.sections.alloc(Section {
            line,
            first: seg,
            prev: Some(section),
            next: next_section,
            length: length - keep,
            size: 0,
        });
        let mut size = 0;
        let mut cur = Some(seg);
        for _ in keep..length {
            let id = cur.unwrap_or_else(|| panic!("section {section:?} shorter than its length"));
            let record = &mut self.segs[id];
            record.section = Some(tail);
            size += record.size;
            cur = record.next;
        }
        self.sections[tail].size = size;
        if let Some(n) = next_section {
            self.sections[n].prev = Some(tail);
        }
        let sec = &mut self.sections[section];
        sec.next = Some(tail);
        sec.length = keep;
        sec.size -= size;
        tail
    }

    /// Fold `b` into its predecessor `a`, splitting the result in half when
    /// it exceeds [`MAX_SECTION`]. Returns `a`.
    fn merge_sections(&mut self, a: SectionId, b: SectionId) -> SectionId {
        let removed = self.sections.free(b);
        let mut seg = Some(removed.first);
        for _ in 0..removed.length {
            let id = seg.unwrap_or_else(|| panic!("merged section shorter than its length"));
            self.segs[id].section = Some(a);
            seg = self.segs[id].next;
        }
        if let Some(n) = removed.next {
            self.sections[n].prev = Some(a);
        }
        let sec = &mut self.sections[a];
        sec.next = removed.next;
        sec.length += removed.length;
        sec.size += removed.size;
        let length = sec.length;
        if length > MAX_SECTION {
            self.split_section(a, length / 2);
        }
        a
    }

    /// Merge an undersized section into a neighbour where the marker
    /// boundaries allow it.
    fn shrink_check(&mut self, section: SectionId) {
        let mut cur = section;
        loop {
            let sec = &self.sections[cur];
            if sec.length >= MIN_SECTION {
                return;
            }
            let (prev, next) = (sec.prev, sec.next);
            if let Some(p) = prev {
                if self.can_merge_sections(p, cur) {
                    cur = self.merge_sections(p, cur);
                    continue;
                }
            }
            if let Some(n) = next {
                if self.can_merge_sections(cur, n) {
                    cur = self.merge_sections(cur, n);
                    continue;
                }
            }
            return;
        }
    }

    /// Enforce marker boundaries and the size cap on `section`.
    fn normalize_section(&mut self, section: SectionId) {
        let mut pending = vec![section];
        let mut pieces = Vec::new();
        while let Some(cur) = pending.pop() {
            pieces.push(cur);
            let (first, length) = {
                let sec = &self.sections[cur];
                (sec.first, sec.length)
            };
            let mut split_at = None;
            let mut seg = first;
            for i in 0..length {
                let record = &self.segs[seg];
                if record.is_link() && i > 0 {
                    split_at = Some(i);
                    break;
                }
                if record.is_branch() && i + 1 < length {
                    split_at = Some(i + 1);
                    break;
                }
                if i + 1 < length {
                    seg = self.next_seg(seg);
                }
            }
            if let Some(keep) = split_at {
                pending.push(self.split_section(cur, keep));
            } else if length > MAX_SECTION {
                pending.push(self.split_section(cur, length / 2));
            }
        }
        for piece in pieces {
            if self.sections.contains(piece) {
                self.shrink_check(piece);
            }
        }
    }

    /// Move every segment after `after` (all of them for `None`) from `line`
    /// to the front of the empty line `to`.
    pub(crate) fn move_tail(&mut self, line: LineId, after: Option<SegId>, to: LineId) {
        debug_assert!(self.lines[to].first.is_none());
        let first_moved = match after {
            Some(a) => self.segs[a].next,
            None => self.lines[line].first,
        };
        let Some(first_moved) = first_moved else {
            return;
        };
        let old_last = self.lines[line].last;

        let section = self.section_of(first_moved);
        let start = if self.sections[section].first == first_moved {
            section
        } else {
            let mut keep = 1;
            let mut seg = self.sections[section].first;
            while self.next_seg(seg) != first_moved {
                seg = self.next_seg(seg);
                keep += 1;
            }
            self.split_section(section, keep)
        };
        let kept_tail = self.sections[start].prev;
        if let Some(p) = kept_tail {
            self.sections[p].next = None;
        }
        self.sections[start].prev = None;

        match after {
            Some(a) => {
                self.segs[a].next = None;
                self.lines[line].last = Some(a);
            }
            None => {
                self.lines[line].first = None;
                self.lines[line].last = None;
            }
        }
        self.segs[first_moved].prev = None;
        self.lines[to].first = Some(first_moved);
        self.lines[to].last = old_last;

        self.transfer_sections(line, to, start);
        if let Some(p) = kept_tail {
            self.shrink_check(p);
        }
        if self.sections.contains(start) {
            self.shrink_check(start);
        }
    }

    /// Move every segment of `src` to the end of `dst`.
    pub(crate) fn append_line(&mut self, dst: LineId, src: LineId) {
        let Some(src_first) = self.lines[src].first else {
            return;
        };
        let src_last = self.lines[src].last;
        let start = self.section_of(src_first);
        let junction = match self.lines[dst].last {
            Some(dst_last) => {
                self.segs[dst_last].next = Some(src_first);
                self.segs[src_first].prev = Some(dst_last);
                let tail = self.section_of(dst_last);
                self.sections[tail].next = Some(start);
                self.sections[start].prev = Some(tail);
                Some(tail)
            }
            None => {
                self.lines[dst].first = Some(src_first);
                None
            }
        };
        self.lines[dst].last = src_last;
        self.lines[src].first = None;
        self.lines[src].last = None;

        self.transfer_sections(src, dst, start);
        if let Some(tail) = junction {
            self.shrink_check(tail);
        }
        if self.sections.contains(start) {
            self.shrink_check(start);
        }
    }

    /// Reassign the section list starting at `start` from `from` to `to`,
    /// moving sizes and branch counts along.
    fn transfer_sections(&mut self, from: LineId, to: LineId, start: SectionId) {
        let mut size = 0;
        let mut branches = 0;
        let mut cur = Some(start);
        while let Some(id) = cur {
            let sec = &mut self.sections[id];
            sec.line = to;
            size += sec.size;
            let (first, length) = (sec.first, sec.length);
            cur = sec.next;
            let mut seg = first;
            for i in 0..length {
                if self.segs[seg].is_branch() {
                    branches += 1;
                }
                if i + 1 < length {
                    seg = self.next_seg(seg);
                }
            }
        }

        let source = &mut self.lines[from];
        source.size -= size;
        source.num_branches -= branches;
        let source_node = source.node;
        let target = &mut self.lines[to];
        target.size += size;
        target.num_branches += branches;
        let target_node = target.node;
        if source_node != target_node {
            self.update_path(source_node, |n| {
                n.size -= size;
                n.num_branches -= branches;
            });
            self.update_path(target_node, |n| {
                n.size += size;
                n.num_branches += branches;
            });
        }
    }
}
