//! Elision overlay: branch/link marker pairs around hidden content.
//!
//! Elision of a content segment is decided by the highest-priority tag on
//! it that sets an elide attribute. Between two consecutive content
//! segments `a` and `b` the chain holds a link directly after `a` exactly
//! when `a` is elided and `b` is not, and a branch directly before `b`
//! exactly when `a` is not elided and `b` is. Every branch is paired with
//! the link that closes its run.
//!
//! [`BTree::update_elision`] re-establishes that rule over a window of
//! content after an edit. Markers removed inside the window may leave one
//! link whose branch is gone; the walk carries it as an orphan and pairs it
//! with the branch left open at the end of the window.

use super::arena::{LineId, SegId};
use super::{BTree, Invalidation, Segment, SegmentKind, TextIndex};
use crate::event::{LogLevel, emit_log};
use crate::tagset::TagSet;

#[derive(Debug, Default)]
struct ElideWalk {
    /// Branch of the run the walk is currently inside.
    open: Option<SegId>,
    /// Live link whose branch was removed or re-paired.
    orphan: Option<SegId>,
    /// Content segments that lost a neighbouring marker.
    joins: Vec<SegId>,
    first_changed: Option<LineId>,
    changed_lines: usize,
}

impl BTree {
    pub(crate) fn seg_elided(&self, seg: SegId) -> bool {
        self.tags.elided(&self.segs[seg].tags)
    }

    /// Check whether the content at `index` is elided.
    #[must_use]
    pub fn is_elided(&self, index: TextIndex) -> bool {
        let (line, byte) = self.resolve(index);
        self.locate(line, byte)
            .is_some_and(|(seg, _)| self.seg_elided(seg))
    }

    /// Every elided range as (branch position, link position), in order.
    #[must_use]
    pub fn elided_ranges(&self) -> Vec<(TextIndex, TextIndex)> {
        let mut out = Vec::new();
        let mut line = Some(self.first_line).filter(|&l| self.lines[l].num_branches > 0);
        if line.is_none() {
            line = self.next_line_where(self.first_line, |n| n.num_branches > 0, |l| l.num_branches > 0);
        }
        while let Some(id) = line {
            for seg in self.line_segs(id) {
                if let SegmentKind::Branch { link } = &self.segs[seg].kind {
                    let end = link.map_or_else(|| self.end_index(), |l| self.seg_index(l));
                    out.push((self.seg_index(seg), end));
                }
            }
            line = self.next_line_where(id, |n| n.num_branches > 0, |l| l.num_branches > 0);
        }
        out
    }

    /// Re-establish branch/link markers for every content pair from
    /// (predecessor of `first`, `first`) through (.., `last`). `orphan` is a
    /// live link whose branch an edit removed. Returns content segments that
    /// may now join with a neighbour.
    pub(crate) fn update_elision(&mut self, first: SegId, last: SegId, orphan: Option<SegId>) -> Vec<SegId> {
        let mut walk = ElideWalk {
            orphan,
            ..ElideWalk::default()
        };
        let mut prev = self.prev_content(first);
        let mut prev_elided = prev.is_some_and(|p| self.seg_elided(p));
        if let Some(p) = prev.filter(|_| prev_elided) {
            walk.open = self.find_branch_before(p);
        }

        let mut cur = first;
        let last_elided = loop {
            let elided = self.seg_elided(cur);
            self.fix_boundary(prev, cur, prev_elided, elided, &mut walk);
            if let Some(p) = prev {
                self.sync_logical(p, prev_elided, &mut walk);
            }
            if cur == last {
                self.sync_logical(cur, elided, &mut walk);
                break elided;
            }
            prev = Some(cur);
            prev_elided = elided;
            match self.next_content(cur) {
                Some(next) => cur = next,
                None => break elided,
            }
        };

        if last_elided {
            if let Some(branch) = walk.open {
                if self.link_of(branch).is_none() {
                    match walk.orphan.take() {
                        Some(link) => self.pair(branch, link, &mut walk),
                        None => emit_log(LogLevel::Warn, "btree: elided run left without a closing link"),
                    }
                }
            }
        }
        if let Some(link) = walk.orphan.take() {
            if self.segs.contains(link) && self.branch_of(link).is_none() {
                emit_log(LogLevel::Warn, "btree: dropping unpaired elision link");
                let mut none = None;
                self.note_join_neighbours(link, &mut walk.joins);
                self.remove_marker(link, &mut none);
            }
        }

        if let Some(line) = walk.first_changed {
            let number = self.line_number(line);
            self.notify(Invalidation::Elided {
                line: number,
                count: walk.changed_lines,
            });
        }
        walk.joins
    }

    fn fix_boundary(
        &mut self,
        prev: Option<SegId>,
        cur: SegId,
        prev_elided: bool,
        elided: bool,
        walk: &mut ElideWalk,
    ) {
        let link = prev
            .and_then(|p| self.global_next(p))
            .filter(|&s| self.segs[s].is_link());
        let branch = self
            .global_prev(cur)
            .filter(|&s| self.segs[s].is_branch());

        match (prev, link) {
            (Some(p), link) if prev_elided && !elided => {
                let link = link.unwrap_or_else(|| self.insert_link_after(p));
                match walk.open.take() {
                    Some(open) => self.pair(open, link, walk),
                    None => emit_log(LogLevel::Warn, "btree: elided run without a branch"),
                }
            }
            (_, Some(stale)) => {
                self.note_join_neighbours(stale, &mut walk.joins);
                self.remove_marker(stale, &mut walk.orphan);
            }
            _ => {}
        }

        if !prev_elided && elided {
            let branch = branch.unwrap_or_else(|| self.insert_branch_before(cur));
            walk.open = Some(branch);
        } else if let Some(stale) = branch {
            self.note_join_neighbours(stale, &mut walk.joins);
            self.remove_marker(stale, &mut walk.orphan);
        }
    }

    /// Keep the logical flag of the line after `seg` in step when `seg` is a
    /// newline.
    fn sync_logical(&mut self, seg: SegId, elided: bool, walk: &mut ElideWalk) {
        if !self.segs[seg].ends_line() {
            return;
        }
        let Some(next) = self.lines[self.seg_line(seg)].next else {
            return;
        };
        if self.set_logical(next, !elided) {
            walk.first_changed.get_or_insert(next);
            walk.changed_lines += 1;
        }
    }

    fn note_join_neighbours(&self, marker: SegId, joins: &mut Vec<SegId>) {
        joins.extend(self.segs[marker].prev);
    }

    /// Insert a link directly after the content segment `content`.
    fn insert_link_after(&mut self, content: SegId) -> SegId {
        let link = self
            .segs
            .alloc(Segment::new(SegmentKind::Link { branch: None }, TagSet::empty()));
        let line = self.seg_line(content);
        if self.segs[content].ends_line() {
            let next = self.next_line(line);
            self.link_segment(next, None, link);
        } else {
            self.link_segment(line, Some(content), link);
        }
        link
    }

    /// Insert a branch directly before the content segment `content`.
    fn insert_branch_before(&mut self, content: SegId) -> SegId {
        let branch = self
            .segs
            .alloc(Segment::new(SegmentKind::Branch { link: None }, TagSet::empty()));
        let line = self.seg_line(content);
        let pred = self.segs[content].prev;
        self.link_segment(line, pred, branch);
        branch
    }

    pub(crate) fn link_of(&self, branch: SegId) -> Option<SegId> {
        match &self.segs[branch].kind {
            SegmentKind::Branch { link } => *link,
            _ => None,
        }
    }

    pub(crate) fn branch_of(&self, link: SegId) -> Option<SegId> {
        match &self.segs[link].kind {
            SegmentKind::Link { branch } => *branch,
            _ => None,
        }
    }

    fn set_link_of(&mut self, branch: SegId, value: Option<SegId>) {
        if let SegmentKind::Branch { link } = &mut self.segs[branch].kind {
            *link = value;
        }
    }

    fn set_branch_of(&mut self, link: SegId, value: Option<SegId>) {
        if let SegmentKind::Link { branch } = &mut self.segs[link].kind {
            *branch = value;
        }
    }

    fn pair(&mut self, branch: SegId, link: SegId, walk: &mut ElideWalk) {
        if let Some(old) = self.link_of(branch).filter(|&old| old != link) {
            self.set_branch_of(old, None);
            if walk.orphan.is_some_and(|o| o != old) {
                emit_log(LogLevel::Debug, "btree: replacing pending elision orphan");
            }
            walk.orphan = Some(old);
        }
        if let Some(old) = self.branch_of(link).filter(|&old| old != branch) {
            self.set_link_of(old, None);
        }
        self.set_link_of(branch, Some(link));
        self.set_branch_of(link, Some(branch));
        if walk.orphan == Some(link) {
            walk.orphan = None;
        }
    }

    /// Unlink and free a branch or link, clearing its partner's pointer. A
    /// removed branch leaves its link in `orphan`.
    pub(crate) fn remove_marker(&mut self, seg: SegId, orphan: &mut Option<SegId>) {
        match self.segs[seg].kind {
            SegmentKind::Branch { link } => {
                if let Some(link) = link {
                    self.set_branch_of(link, None);
                    *orphan = Some(link);
                }
            }
            SegmentKind::Link { branch } => {
                if let Some(branch) = branch {
                    self.set_link_of(branch, None);
                }
                if *orphan == Some(seg) {
                    *orphan = None;
                }
            }
            _ => {}
        }
        self.unlink_segment(seg);
        self.segs.free(seg);
    }

    /// Nearest branch before `seg` in document order.
    fn find_branch_before(&self, seg: SegId) -> Option<SegId> {
        let mut cur = self.segs[seg].prev;
        let mut line = self.seg_line(seg);
        loop {
            while let Some(s) = cur {
                if self.segs[s].is_branch() {
                    return Some(s);
                }
                cur = self.segs[s].prev;
            }
            line = self.prev_line_where(line, |n| n.num_branches > 0, |l| l.num_branches > 0)?;
            cur = self.lines[line].last;
        }
    }

    /// Re-run the elision walk over every range carrying any of `tags`.
    pub(crate) fn rewalk_tags(&mut self, tags: &[crate::TagId]) {
        let mut joins = Vec::new();
        for &tag in tags {
            for (start, end) in self.tag_ranges(tag) {
                let (ls, bs) = self.resolve(start);
                let (le, be) = self.resolve(end);
                let first = self.locate(ls, bs).map(|(s, _)| s);
                let boundary = self.locate(le, be).map(|(s, _)| s);
                if let (Some(first), Some(boundary)) = (first, boundary) {
                    joins.extend(self.update_elision(first, boundary, None));
                }
            }
        }
        self.join_all(&joins);
    }

    pub(crate) fn join_all(&mut self, segs: &[SegId]) {
        for &seg in segs {
            if self.segs.get(seg).is_some_and(|s| s.section.is_some()) {
                self.join_chars_around(seg);
            }
        }
    }
}
