//! Named marks.
//!
//! A mark is a zero-size segment at a position. Text inserted exactly at a
//! left-gravity mark goes after it; text inserted at a right-gravity mark
//! goes before it. Within a run of marks at one position, left-gravity
//! marks always precede right-gravity ones, so a single insertion point
//! honours both. Marks never sit between a branch and its content nor
//! between content and its link.

use super::arena::{LineId, SegId};
use super::{BTree, Gravity, MarkInfo, Segment, SegmentKind, TextIndex};
use crate::error::{Error, Result};
use crate::tagset::TagSet;

/// A named mark's position relative to the start of a deleted range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SavedMark {
    pub(crate) name: String,
    pub(crate) offset: usize,
    pub(crate) gravity: Gravity,
}

pub(crate) fn validate_mark_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidMarkName(name.to_string()));
    }
    Ok(())
}

impl BTree {
    /// Place mark `name` at `index` (clamped to the final newline),
    /// moving it if it already exists.
    pub fn set_mark(&mut self, name: &str, index: TextIndex, gravity: Gravity) -> Result<()> {
        validate_mark_name(name)?;
        let index = self.clamp_to_end(self.normalize(index));
        let seg = match self.marks.get(name) {
            Some(&seg) => {
                self.detach_mark(seg);
                if let SegmentKind::Mark(info) = &mut self.segs[seg].kind {
                    info.gravity = gravity;
                }
                seg
            }
            None => {
                let seg = self.segs.alloc(Segment::new(
                    SegmentKind::Mark(MarkInfo {
                        name: Some(name.to_string()),
                        gravity,
                    }),
                    TagSet::empty(),
                ));
                self.marks.insert(name.to_string(), seg);
                seg
            }
        };
        self.place_mark(seg, index);
        self.bump_epoch();
        self.debug_check("set_mark");
        Ok(())
    }

    /// Remove mark `name`.
    pub fn unset_mark(&mut self, name: &str) -> Result<()> {
        let seg = self
            .marks
            .remove(name)
            .ok_or_else(|| Error::UnknownMark(name.to_string()))?;
        self.detach_mark(seg);
        self.segs.free(seg);
        self.bump_epoch();
        self.debug_check("unset_mark");
        Ok(())
    }

    /// Current position of mark `name`.
    pub fn mark_index(&self, name: &str) -> Result<TextIndex> {
        let seg = self.mark_seg(name)?;
        Ok(self.seg_index(seg))
    }

    pub fn mark_gravity(&self, name: &str) -> Result<Gravity> {
        let seg = self.mark_seg(name)?;
        self.segs[seg]
            .gravity()
            .ok_or_else(|| Error::UnknownMark(name.to_string()))
    }

    /// Change the gravity of mark `name` without moving it.
    pub fn set_mark_gravity(&mut self, name: &str, gravity: Gravity) -> Result<()> {
        let index = self.mark_index(name)?;
        self.set_mark(name, index, gravity)
    }

    /// Names of all marks, sorted.
    #[must_use]
    pub fn mark_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.marks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Positions of the shared start and end markers.
    #[must_use]
    pub fn marker_range(&self) -> (TextIndex, TextIndex) {
        (self.seg_index(self.start_marker), self.seg_index(self.end_marker))
    }

    /// Named marks in `[start, end]`, in placement order.
    pub(crate) fn marks_between(&self, start: TextIndex, end: TextIndex) -> Vec<SavedMark> {
        let base = self.offset_of(start);
        let stop = self.offset_of(end);
        let mut found: Vec<SavedMark> = self
            .marks
            .iter()
            .filter_map(|(name, &seg)| {
                let offset = self.offset_of(self.seg_index(seg));
                (base..=stop).contains(&offset).then(|| SavedMark {
                    name: name.clone(),
                    offset: offset - base,
                    gravity: self.segs[seg].gravity().unwrap_or_default(),
                })
            })
            .collect();
        found.sort_by(|a, b| {
            (a.offset, a.gravity == Gravity::Right, &a.name)
                .cmp(&(b.offset, b.gravity == Gravity::Right, &b.name))
        });
        found
    }

    /// Put saved marks back at `base + offset`. Later entries win; marks
    /// unset in the meantime stay gone.
    pub(crate) fn restore_marks(&mut self, base: usize, saved: &[SavedMark]) {
        if saved.is_empty() {
            return;
        }
        for mark in saved {
            let Some(&seg) = self.marks.get(&mark.name) else {
                continue;
            };
            self.detach_mark(seg);
            if let SegmentKind::Mark(info) = &mut self.segs[seg].kind {
                info.gravity = mark.gravity;
            }
            let index = self.clamp_to_end(self.index_at_offset(base + mark.offset));
            self.place_mark(seg, index);
        }
        self.bump_epoch();
        self.debug_check("restore_marks");
    }

    fn mark_seg(&self, name: &str) -> Result<SegId> {
        self.marks
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownMark(name.to_string()))
    }

    fn detach_mark(&mut self, seg: SegId) {
        if let Some(prev) = self.unlink_segment(seg) {
            if self.segs.contains(prev) {
                self.join_chars_around(prev);
            }
        }
    }

    /// Link the detached mark `seg` at `index`.
    pub(crate) fn place_mark(&mut self, seg: SegId, index: TextIndex) {
        let (line, byte) = self.resolve(index);
        let right = self.segs[seg].gravity() == Some(Gravity::Right);
        let mut pred = self.content_before(line, byte);
        loop {
            let next = match pred {
                Some(p) => self.segs[p].next,
                None => self.lines[line].first,
            };
            let Some(n) = next else {
                break;
            };
            let record = &self.segs[n];
            let skip = record.is_link()
                || record.gravity() == Some(Gravity::Left)
                || (right && record.gravity() == Some(Gravity::Right));
            if !skip {
                break;
            }
            pred = Some(n);
        }
        self.link_segment(line, pred, seg);
    }

    /// Restore the left-before-right order of the marks following `pred`
    /// (or the start of `line`).
    pub(crate) fn sort_marks_after(&mut self, line: LineId, pred: Option<SegId>) {
        let mut anchor = pred;
        let mut cur = match pred {
            Some(p) => self.segs[p].next,
            None => self.lines[line].first,
        };
        while let Some(s) = cur {
            if !self.segs[s].is_link() {
                break;
            }
            anchor = Some(s);
            cur = self.segs[s].next;
        }
        let mut marks = Vec::new();
        while let Some(s) = cur {
            if !self.segs[s].is_mark() {
                break;
            }
            marks.push(s);
            cur = self.segs[s].next;
        }
        let is_right = |tree: &Self, s: SegId| tree.segs[s].gravity() == Some(Gravity::Right);
        if marks.windows(2).all(|w| !(is_right(self, w[0]) && !is_right(self, w[1]))) {
            return;
        }
        for &m in &marks {
            self.unlink_segment(m);
        }
        marks.sort_by_key(|&m| is_right(self, m));
        let mut pred = anchor;
        for m in marks {
            self.link_segment(line, pred, m);
            pred = Some(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{BTree, Error, Gravity, TextIndex};

    #[test]
    fn test_gravity_decides_insert_side() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "ab\n");
        tree.set_mark("l", TextIndex::new(0, 1), Gravity::Left).unwrap();
        tree.set_mark("r", TextIndex::new(0, 1), Gravity::Right).unwrap();
        tree.insert(TextIndex::new(0, 1), "XYZ");
        assert_eq!(tree.line_text(0), "aXYZb\n");
        assert_eq!(tree.mark_index("l").unwrap(), TextIndex::new(0, 1));
        assert_eq!(tree.mark_index("r").unwrap(), TextIndex::new(0, 4));
        tree.check();
    }

    #[test]
    fn test_right_mark_set_before_left_mark_keeps_order() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "ab\n");
        tree.set_mark("r", TextIndex::new(0, 1), Gravity::Right).unwrap();
        tree.set_mark("l", TextIndex::new(0, 1), Gravity::Left).unwrap();
        tree.insert(TextIndex::new(0, 1), "_");
        assert_eq!(tree.mark_index("l").unwrap(), TextIndex::new(0, 1));
        assert_eq!(tree.mark_index("r").unwrap(), TextIndex::new(0, 2));
    }

    #[test]
    fn test_moving_mark_rejoins_text() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "abcdef\n");
        tree.set_mark("m", TextIndex::new(0, 3), Gravity::Right).unwrap();
        assert_eq!(tree.content_segment_count(0), 2);
        tree.set_mark("m", TextIndex::new(0, 0), Gravity::Right).unwrap();
        assert_eq!(tree.content_segment_count(0), 1);
        assert_eq!(tree.mark_gravity("m").unwrap(), Gravity::Right);
        tree.set_mark_gravity("m", Gravity::Left).unwrap();
        assert_eq!(tree.mark_gravity("m").unwrap(), Gravity::Left);
        assert_eq!(tree.mark_index("m").unwrap(), TextIndex::new(0, 0));
    }

    #[test]
    fn test_mark_errors() {
        let mut tree = BTree::new();
        assert_eq!(
            tree.set_mark("", TextIndex::START, Gravity::Left),
            Err(Error::InvalidMarkName(String::new()))
        );
        assert!(matches!(
            tree.set_mark("two words", TextIndex::START, Gravity::Left),
            Err(Error::InvalidMarkName(_))
        ));
        assert_eq!(tree.unset_mark("nope"), Err(Error::UnknownMark("nope".into())));
        assert!(tree.mark_index("nope").is_err());
    }

    #[test]
    fn test_mark_past_end_clamps() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "abc\n");
        tree.set_mark("m", TextIndex::new(50, 0), Gravity::Right).unwrap();
        assert_eq!(tree.mark_index("m").unwrap(), tree.end_index());
        assert_eq!(tree.mark_names(), vec!["m"]);
    }

    #[test]
    fn test_delete_collapses_marks_in_order() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "abc\ndef\n");
        tree.set_mark("r", TextIndex::new(0, 1), Gravity::Right).unwrap();
        tree.set_mark("l", TextIndex::new(1, 1), Gravity::Left).unwrap();
        tree.delete(TextIndex::new(0, 1), TextIndex::new(1, 2));
        assert_eq!(tree.line_text(0), "af\n");
        tree.insert(TextIndex::new(0, 1), "-");
        assert_eq!(tree.mark_index("l").unwrap(), TextIndex::new(0, 1));
        assert_eq!(tree.mark_index("r").unwrap(), TextIndex::new(0, 2));
        tree.check();
    }
}
