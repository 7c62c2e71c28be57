//! Undo tokens and grouped undo/redo history.
//!
//! Every mutating tree call returns a token that, when performed, inverts
//! it. [`BTree::perform_undo`] returns the token inverting *that*, so a
//! token pair is enough for undo and redo.
//!
//! ```
//! use textbtree::{BTree, History, TextIndex};
//!
//! let mut tree = BTree::new();
//! let mut history = History::new();
//! for (i, ch) in ["a", "b", "c"].into_iter().enumerate() {
//!     history.push(tree.insert(TextIndex::new(0, i), ch).unwrap());
//! }
//! history.commit();
//! assert!(history.undo(&mut tree));
//! assert_eq!(tree.text(), "\n\n");
//! assert!(history.redo(&mut tree));
//! assert_eq!(tree.text(), "abc\n\n");
//! ```

use crate::TagId;
use crate::btree::{BTree, SavedMark, SavedSegment, SegmentKind, TextIndex};
use crate::tagset::TagSet;

/// What an [`UndoToken`] undoes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoKind {
    /// Removes inserted content.
    Insert,
    /// Re-inserts deleted content.
    Delete,
    /// Re-applies or reverses one tag.
    Tag,
    /// Restores whole tag sets over a range.
    Retag,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Payload {
    Insert {
        end: TextIndex,
    },
    Delete {
        saved: Vec<SavedSegment>,
        /// Named marks that sat in the range, relative to its start.
        marks: Vec<SavedMark>,
    },
    Tag {
        tag: TagId,
        /// Whether the recorded edit added the tag.
        add: bool,
        end: TextIndex,
        /// Alternating skip/toggle byte counts starting with a skip;
        /// `None` when the edit toggled the whole range.
        lengths: Option<Vec<usize>>,
    },
    Retag {
        end: TextIndex,
        before: Vec<(usize, TagSet)>,
        after: Vec<(usize, TagSet)>,
    },
}

/// A record of one edit, sufficient to invert it.
///
/// Positions are plain indices, valid only while the tree is in the state
/// right after the edit (or after the matching redo).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoToken {
    start: TextIndex,
    payload: Payload,
}

impl UndoToken {
    pub(crate) fn insert(at: TextIndex, end: TextIndex) -> Self {
        Self {
            start: at,
            payload: Payload::Insert { end },
        }
    }

    pub(crate) fn delete(start: TextIndex, saved: Vec<SavedSegment>, marks: Vec<SavedMark>) -> Self {
        Self {
            start,
            payload: Payload::Delete { saved, marks },
        }
    }

    pub(crate) fn tag(
        tag: TagId,
        add: bool,
        start: TextIndex,
        end: TextIndex,
        lengths: Option<Vec<usize>>,
    ) -> Self {
        Self {
            start,
            payload: Payload::Tag {
                tag,
                add,
                end,
                lengths,
            },
        }
    }

    pub(crate) fn retag(
        start: TextIndex,
        end: TextIndex,
        before: Vec<(usize, TagSet)>,
        after: Vec<(usize, TagSet)>,
    ) -> Self {
        Self {
            start,
            payload: Payload::Retag { end, before, after },
        }
    }

    #[must_use]
    pub fn kind(&self) -> UndoKind {
        match self.payload {
            Payload::Insert { .. } => UndoKind::Insert,
            Payload::Delete { .. } => UndoKind::Delete,
            Payload::Tag { .. } => UndoKind::Tag,
            Payload::Retag { .. } => UndoKind::Retag,
        }
    }

    /// The range of the recorded edit, in post-edit coordinates. For a
    /// delete token both ends are the deletion point.
    #[must_use]
    pub fn affected_range(&self) -> (TextIndex, TextIndex) {
        match &self.payload {
            Payload::Insert { end } | Payload::Tag { end, .. } | Payload::Retag { end, .. } => {
                (self.start, *end)
            }
            Payload::Delete { .. } => (self.start, self.start),
        }
    }

    /// Bytes deleted by the recorded edit; zero for other kinds.
    #[must_use]
    pub fn deleted_bytes(&self) -> usize {
        match &self.payload {
            Payload::Delete { saved, .. } => saved.iter().map(SavedSegment::size).sum(),
            _ => 0,
        }
    }

    /// Short label for logs and debugging.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.payload {
            Payload::Insert { end } => format!("insert {}-{}", self.start, end),
            Payload::Delete { saved, .. } => format!(
                "delete {} ({} bytes, {} segments)",
                self.start,
                self.deleted_bytes(),
                saved.len()
            ),
            Payload::Tag {
                tag,
                add,
                end,
                lengths,
            } => format!(
                "{} tag {} {}-{}{}",
                if *add { "add" } else { "remove" },
                tag.index(),
                self.start,
                end,
                if lengths.is_some() { " (partial)" } else { "" }
            ),
            Payload::Retag { end, .. } => format!("retag {}-{}", self.start, end),
        }
    }

    /// Where the content removed by a delete token ran to, in pre-delete
    /// coordinates.
    fn deleted_end(start: TextIndex, saved: &[SavedSegment]) -> TextIndex {
        saved.iter().fold(start, |at, piece| {
            if matches!(&piece.kind, SegmentKind::Chars(text) if text.ends_with('\n')) {
                TextIndex::new(at.line + 1, 0)
            } else {
                TextIndex::new(at.line, at.byte + piece.size())
            }
        })
    }

    /// Fold `next` (recorded right after `self`) into `self`. Returns
    /// `Ok(true)` when the pair cancels out, `Ok(false)` when merged, and
    /// gives `next` back when the two cannot be combined.
    fn coalesce(&mut self, next: Self) -> Result<bool, Self> {
        match (&mut self.payload, next.payload) {
            (Payload::Insert { end }, Payload::Insert { end: next_end }) if next.start == *end => {
                *end = next_end;
                Ok(false)
            }
            (
                Payload::Delete { saved, marks },
                Payload::Delete {
                    saved: mut more,
                    marks: mut more_marks,
                },
            ) => {
                if next.start == self.start {
                    let shift: usize = saved.iter().map(SavedSegment::size).sum();
                    shift_marks(&mut more_marks, shift);
                    more_marks.append(marks);
                    *marks = more_marks;
                    saved.append(&mut more);
                    Ok(false)
                } else if Self::deleted_end(next.start, &more) == self.start {
                    let shift: usize = more.iter().map(SavedSegment::size).sum();
                    shift_marks(marks, shift);
                    more_marks.append(marks);
                    *marks = more_marks;
                    more.append(saved);
                    *saved = more;
                    self.start = next.start;
                    Ok(false)
                } else {
                    Err(Self {
                        start: next.start,
                        payload: Payload::Delete {
                            saved: more,
                            marks: more_marks,
                        },
                    })
                }
            }
            (
                Payload::Tag {
                    tag,
                    add,
                    end,
                    lengths,
                },
                Payload::Tag {
                    tag: next_tag,
                    add: next_add,
                    end: next_end,
                    lengths: next_lengths,
                },
            ) if *tag == next_tag => {
                if *add != next_add
                    && next.start == self.start
                    && next_end == *end
                    && *lengths == next_lengths
                {
                    Ok(true)
                } else if *add == next_add
                    && lengths.is_none()
                    && next_lengths.is_none()
                    && next.start == *end
                {
                    *end = next_end;
                    Ok(false)
                } else {
                    Err(Self {
                        start: next.start,
                        payload: Payload::Tag {
                            tag: next_tag,
                            add: next_add,
                            end: next_end,
                            lengths: next_lengths,
                        },
                    })
                }
            }
            (_, payload) => Err(Self {
                start: next.start,
                payload,
            }),
        }
    }
}

fn shift_marks(marks: &mut [SavedMark], by: usize) {
    for mark in marks {
        mark.offset += by;
    }
}

impl BTree {
    /// Invert the edit recorded by `token` and return the token inverting
    /// this call.
    pub fn perform_undo(&mut self, token: UndoToken) -> UndoToken {
        let start = token.start;
        match token.payload {
            Payload::Insert { end } => self
                .delete(start, end)
                .unwrap_or_else(|| UndoToken::delete(start, Vec::new(), Vec::new())),
            Payload::Delete { saved, marks } => {
                if saved.is_empty() {
                    UndoToken::insert(start, start)
                } else {
                    let at = self.clamp_to_end(start);
                    let base = self.offset_of(at);
                    let redo = self.insert_segments(at, saved);
                    self.restore_marks(base, &marks);
                    redo
                }
            }
            Payload::Tag {
                tag,
                add,
                end,
                lengths,
            } => {
                self.apply_toggles(tag, !add, start, end, lengths.as_deref());
                UndoToken::tag(tag, !add, start, end, lengths)
            }
            Payload::Retag { end, before, .. } => {
                let after = self.apply_runs(start, &before);
                UndoToken::retag(start, end, after, before)
            }
        }
    }
}

/// Default maximum number of undo groups to retain.
pub const DEFAULT_MAX_HISTORY_DEPTH: usize = 1000;

/// Grouped undo/redo stacks of [`UndoToken`]s.
#[derive(Clone, Debug)]
pub struct History {
    undo_stack: Vec<Vec<UndoToken>>,
    redo_stack: Vec<Vec<UndoToken>>,
    current_group: Vec<UndoToken>,
    /// Maximum number of undo groups to retain. Oldest entries are dropped when exceeded.
    max_depth: usize,
    coalesce: bool,
}

impl Default for History {
    fn default() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            current_group: Vec::new(),
            max_depth: DEFAULT_MAX_HISTORY_DEPTH,
            coalesce: true,
        }
    }
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history with a custom maximum depth.
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
        self.enforce_depth();
    }

    /// Merge adjacent compatible tokens within a group when `true` (the
    /// default).
    pub fn set_coalesce(&mut self, coalesce: bool) {
        self.coalesce = coalesce;
    }

    /// Record `token` in the open group and drop the redo stack.
    pub fn push(&mut self, token: UndoToken) {
        self.redo_stack.clear();
        if !self.coalesce {
            self.current_group.push(token);
            return;
        }
        let Some(last) = self.current_group.last_mut() else {
            self.current_group.push(token);
            return;
        };
        match last.coalesce(token) {
            Ok(true) => {
                self.current_group.pop();
            }
            Ok(false) => {}
            Err(token) => self.current_group.push(token),
        }
    }

    /// Close the open group.
    pub fn commit(&mut self) {
        if !self.current_group.is_empty() {
            self.undo_stack
                .push(std::mem::take(&mut self.current_group));
            self.enforce_depth();
        }
    }

    fn enforce_depth(&mut self) {
        if self.undo_stack.len() > self.max_depth {
            let excess = self.undo_stack.len() - self.max_depth;
            self.undo_stack.drain(..excess);
        }
    }

    /// Undo the last group on `tree`. Returns `false` when there is none.
    pub fn undo(&mut self, tree: &mut BTree) -> bool {
        self.commit();
        let Some(tokens) = self.undo_stack.pop() else {
            return false;
        };
        let mut redo: Vec<UndoToken> = tokens
            .into_iter()
            .rev()
            .map(|token| tree.perform_undo(token))
            .collect();
        redo.reverse();
        self.redo_stack.push(redo);
        true
    }

    /// Redo the last undone group on `tree`.
    pub fn redo(&mut self, tree: &mut BTree) -> bool {
        let Some(tokens) = self.redo_stack.pop() else {
            return false;
        };
        let undo: Vec<UndoToken> = tokens
            .into_iter()
            .map(|token| tree.perform_undo(token))
            .collect();
        self.undo_stack.push(undo);
        true
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty() || !self.current_group.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Number of committed undo groups.
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Tokens in the open group.
    #[must_use]
    pub fn pending(&self) -> &[UndoToken] {
        &self.current_group
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current_group.clear();
    }
}
