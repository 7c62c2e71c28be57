//! Text insertion and deletion.

use super::arena::{LineId, SegId};
use super::segment::SegFlags;
use super::{BTree, Gravity, Invalidation, SavedSegment, Segment, SegmentKind, Tagging, TextIndex};
use crate::TagId;
use crate::event::{LogLevel, emit_log};
use crate::tagset::TagSet;
use crate::undo::UndoToken;

impl BTree {
    /// Insert `text` at `at`, tagging it according to
    /// [`BTreeOptions::tagging`](super::BTreeOptions::tagging).
    ///
    /// Positions past the final newline clamp to it. Returns the undo token,
    /// or `None` when `text` is empty.
    pub fn insert(&mut self, at: TextIndex, text: &str) -> Option<UndoToken> {
        let mode = self.options.tagging;
        let at = self.clamp_to_end(at);
        let (line, byte) = self.resolve(at);
        let tags = self.inherited_tags(line, byte, mode);
        self.insert_text(at, text, tags)
    }

    /// Insert `text` at `at` carrying exactly `tags`.
    pub fn insert_tagged(&mut self, at: TextIndex, text: &str, tags: &[TagId]) -> Option<UndoToken> {
        let at = self.clamp_to_end(at);
        let set = TagSet::from_indices(tags.iter().map(|t| t.index()));
        self.insert_text(at, text, set)
    }

    /// Insert a soft hyphen (one index unit) at `at`.
    pub fn insert_hyphen(&mut self, at: TextIndex, tags: &[TagId]) -> UndoToken {
        let at = self.clamp_to_end(at);
        let set = TagSet::from_indices(tags.iter().map(|t| t.index()));
        self.insert_segments(
            at,
            vec![SavedSegment {
                kind: SegmentKind::Hyphen,
                tags: set,
            }],
        )
    }

    /// Insert an embedded image or window (one index unit) at `at`.
    pub fn insert_embed(
        &mut self,
        at: TextIndex,
        kind: super::EmbedKind,
        name: &str,
        tags: &[TagId],
    ) -> UndoToken {
        let at = self.clamp_to_end(at);
        let set = TagSet::from_indices(tags.iter().map(|t| t.index()));
        self.insert_segments(
            at,
            vec![SavedSegment {
                kind: SegmentKind::Embed {
                    kind,
                    name: name.to_string(),
                },
                tags: set,
            }],
        )
    }

    fn insert_text(&mut self, at: TextIndex, text: &str, tags: TagSet) -> Option<UndoToken> {
        if text.is_empty() {
            return None;
        }
        if !text.contains('\n') {
            if let Some(token) = self.try_grow_in_place(at, text, &tags) {
                return Some(token);
            }
        }
        let pieces = text
            .split_inclusive('\n')
            .map(|piece| SavedSegment {
                kind: SegmentKind::Chars(piece.to_string()),
                tags: tags.clone(),
            })
            .collect();
        Some(self.insert_segments(at, pieces))
    }

    /// Tags new text at (`line`, `byte`) picks up under `mode`.
    fn inherited_tags(&self, line: LineId, byte: usize, mode: Tagging) -> TagSet {
        let before = || self.content_ending_at(line, byte).map(|s| self.segs[s].tags.clone());
        let after = || self.locate(line, byte).map(|(s, _)| self.segs[s].tags.clone());
        match mode {
            Tagging::None => TagSet::empty(),
            Tagging::Gravity(Gravity::Left) => before().unwrap_or_default(),
            Tagging::Gravity(Gravity::Right) => after().unwrap_or_default(),
            Tagging::Within => match (before(), after()) {
                (Some(b), Some(a)) => b.intersection(&a),
                _ => TagSet::empty(),
            },
        }
    }

    /// Append `text` to an existing character segment when that leaves the
    /// segment structure otherwise untouched.
    fn try_grow_in_place(&mut self, at: TextIndex, text: &str, tags: &TagSet) -> Option<UndoToken> {
        let (line, byte) = self.resolve(at);
        let (seg, offset) = match self.locate(line, byte) {
            Some((seg, offset)) if offset > 0 => (seg, offset),
            _ => {
                let seg = self.content_ending_at(line, byte).filter(|_| byte > 0)?;
                let next = self.segs[seg].next;
                let blocked = next.is_some_and(|n| {
                    let n = &self.segs[n];
                    n.is_link() || n.gravity() == Some(Gravity::Left)
                });
                if blocked {
                    return None;
                }
                (seg, self.segs[seg].size)
            }
        };
        let record = &mut self.segs[seg];
        if record.tags != *tags || record.is_protected() {
            return None;
        }
        let SegmentKind::Chars(existing) = &mut record.kind else {
            return None;
        };
        if existing.ends_with('\n') && offset == existing.len() {
            return None;
        }
        existing.insert_str(offset, text);
        let size = existing.len();
        self.set_segment_size(seg, size);
        self.mark_changed(line);
        let end = TextIndex::new(at.line, at.byte + text.len());
        self.finish_edit(Invalidation::Inserted {
            line: at.line,
            count: 0,
        });
        self.debug_check("insert");
        Some(UndoToken::insert(at, end))
    }

    /// Insert detached segments at `at` (already clamped). Character pieces
    /// ending in a newline split the line.
    pub(crate) fn insert_segments(&mut self, at: TextIndex, pieces: Vec<SavedSegment>) -> UndoToken {
        let (first_line, byte) = self.resolve(at);
        let mut line = first_line;
        let mut pred = self.insertion_point(line, byte);
        let mut inserted: Vec<SegId> = Vec::with_capacity(pieces.len());
        let mut touched = vec![first_line];
        let mut new_lines = 0;

        for piece in pieces {
            let seg = self.segs.alloc(Segment::new(piece.kind, piece.tags));
            self.link_segment(line, pred, seg);
            inserted.push(seg);
            if self.segs[seg].ends_line() {
                let fresh = self.insert_line_after(line);
                self.move_tail(line, Some(seg), fresh);
                line = fresh;
                pred = None;
                touched.push(fresh);
                new_lines += 1;
            } else {
                pred = Some(seg);
            }
        }
        let end = TextIndex::new(
            at.line + new_lines,
            pred.map_or(0, |p| self.seg_offset(p) + self.segs[p].size),
        );

        if new_lines > 0 {
            let node = self.lines[first_line].node;
            self.rebalance(node);
        }
        for &id in &touched {
            self.mark_changed(id);
            self.refresh_line_tags(id);
        }
        let mut joins = Vec::new();
        if self.tags.any_elide() {
            if let (Some(&first), Some(&last)) = (inserted.first(), inserted.last()) {
                if let Some(boundary) = self.next_content(last) {
                    joins = self.update_elision(first, boundary, None);
                }
            }
        }
        joins.extend(inserted);
        self.join_all(&joins);
        self.finish_edit(Invalidation::Inserted {
            line: at.line,
            count: new_lines,
        });
        self.debug_check("insert");
        UndoToken::insert(at, end)
    }

    /// Split at (`line`, `byte`) and return the segment new content goes
    /// after: past links and left-gravity marks, before right-gravity marks
    /// and branches.
    fn insertion_point(&mut self, line: LineId, byte: usize) -> Option<SegId> {
        let mut pred = self.content_before(line, byte);
        loop {
            let next = match pred {
                Some(p) => self.segs[p].next,
                None => self.lines[line].first,
            };
            let Some(n) = next else {
                return pred;
            };
            let record = &self.segs[n];
            if record.is_link() || record.gravity() == Some(Gravity::Left) {
                pred = Some(n);
            } else {
                return pred;
            }
        }
    }

    /// Delete the range `[start, end)`. Both ends clamp to the final
    /// newline, which is never deleted. Marks inside the range collapse to
    /// `start`; the token remembers where they were. Returns `None` for an
    /// empty range.
    pub fn delete(&mut self, start: TextIndex, end: TextIndex) -> Option<UndoToken> {
        let start = self.clamp_to_end(start);
        let end = self.clamp_to_end(end);
        if start >= end {
            return None;
        }
        let marks = self.marks_between(start, end);
        let (ls, bs) = self.resolve(start);
        let (le, be) = self.resolve(end);
        let before = self.content_before(ls, bs);
        let last_deleted = self.content_before(le, be);
        let after = match last_deleted {
            Some(c) => self.next_content(c),
            None => Some(self.first_content(le)),
        }
        .unwrap_or_else(|| panic!("deletion end {end} has no following content"));
        let prev_content = match before {
            Some(c) => Some(c),
            None => self.lines[ls]
                .prev
                .and_then(|p| self.lines[p].last),
        };

        let guard: Vec<SegId> = prev_content.into_iter().chain([after]).collect();
        let (saved, removed_lines) = self.with_protected(&guard, |tree| {
            let (saved, removed, orphan) = tree.remove_range(ls, before, le, after);
            tree.sort_marks_after(ls, before);
            tree.mark_changed(ls);
            tree.refresh_line_tags(ls);
            if tree.tags.any_elide() || orphan.is_some() {
                let joins = tree.update_elision(after, after, orphan);
                tree.join_all(&joins);
            }
            (saved, removed)
        });
        self.finish_edit(Invalidation::Deleted {
            line: start.line,
            count: removed_lines,
        });
        self.debug_check("delete");
        Some(UndoToken::delete(start, saved, marks))
    }

    /// Unlink everything between `before` (exclusive, in `ls`) and `after`
    /// (exclusive, in `le`), keeping marks, then join `le` onto `ls`.
    fn remove_range(
        &mut self,
        ls: LineId,
        before: Option<SegId>,
        le: LineId,
        after: SegId,
    ) -> (Vec<SavedSegment>, usize, Option<SegId>) {
        let mut saved = Vec::new();
        let mut orphan = None;
        let mut emptied = Vec::new();
        let mut line = ls;
        let mut cur = match before {
            Some(b) => self.segs[b].next,
            None => self.lines[ls].first,
        };
        'lines: loop {
            while let Some(seg) = cur {
                if seg == after {
                    break 'lines;
                }
                cur = self.segs[seg].next;
                let record = &self.segs[seg];
                if record.is_mark() {
                    if line != ls {
                        self.unlink_segment(seg);
                        let tail = self.lines[ls].last;
                        self.link_segment(ls, tail, seg);
                    }
                } else if record.is_content() {
                    self.unlink_segment(seg);
                    let segment = self.segs.free(seg);
                    saved.push(SavedSegment {
                        kind: segment.kind,
                        tags: segment.tags,
                    });
                } else {
                    self.remove_marker(seg, &mut orphan);
                }
            }
            if line != ls {
                emptied.push(line);
            }
            if line == le {
                break;
            }
            line = self.next_line(line);
            cur = self.lines[line].first;
        }
        if le != ls {
            self.append_line(ls, le);
            if !emptied.contains(&le) {
                emptied.push(le);
            }
        }
        let removed = emptied.len();
        for id in emptied {
            self.remove_line(id);
        }
        (saved, removed, orphan)
    }

    /// Pin `segs` against merging and freeing while `f` runs, then release
    /// them and merge any newly adjacent character runs around them.
    pub(crate) fn with_protected<R>(&mut self, segs: &[SegId], f: impl FnOnce(&mut Self) -> R) -> R {
        for &seg in segs {
            self.segs[seg].flags.insert(SegFlags::PROTECTED);
        }
        let result = f(self);
        for &seg in segs {
            if let Some(record) = self.segs.get_mut(seg) {
                record.flags.remove(SegFlags::PROTECTED);
            }
        }
        for &seg in segs {
            if self.segs.contains(seg) && self.segs[seg].section.is_some() {
                self.join_chars_around(seg);
            }
        }
        result
    }

    fn joinable(&self, a: SegId, b: SegId) -> bool {
        let (a, b) = (&self.segs[a], &self.segs[b]);
        a.is_chars()
            && b.is_chars()
            && !a.ends_line()
            && a.tags == b.tags
            && !a.is_protected()
            && !b.is_protected()
    }

    /// Merge `seg` with adjacent character segments carrying the same tags.
    pub(crate) fn join_chars_around(&mut self, seg: SegId) {
        let mut cur = seg;
        if let Some(prev) = self.segs[cur].prev {
            if self.joinable(prev, cur) {
                self.join_into(prev, cur);
                cur = prev;
            }
        }
        while let Some(next) = self.segs[cur].next {
            if !self.joinable(cur, next) {
                break;
            }
            self.join_into(cur, next);
        }
    }

    /// Append the text of `b` to `a` and free `b`.
    fn join_into(&mut self, a: SegId, b: SegId) {
        self.unlink_segment(b);
        let removed = self.segs.free(b);
        if let (SegmentKind::Chars(tail), SegmentKind::Chars(head)) = (removed.kind, &mut self.segs[a].kind) {
            head.push_str(&tail);
            let size = head.len();
            self.set_segment_size(a, size);
        }
    }

    pub(crate) fn finish_edit(&mut self, event: Invalidation) {
        self.bump_epoch();
        self.notify(event);
        emit_log(LogLevel::Debug, &format!("btree: {event:?}"));
    }
}
