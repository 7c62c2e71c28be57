//! Segment records of a line's chain.

use super::arena::{SectionId, SegId};
use crate::tagset::TagSet;
use bitflags::bitflags;

/// Which side of an insertion a zero-width mark sticks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Gravity {
    /// The mark stays in front of text inserted at its position.
    Left,
    /// The mark moves past text inserted at its position.
    #[default]
    Right,
}

/// Kind of embedded object occupying one index position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EmbedKind {
    Image,
    Window,
}

bitflags! {
    /// Transient per-segment state.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct SegFlags: u8 {
        /// Pinned by an in-progress operation; never merged or freed.
        const PROTECTED = 0x01;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MarkInfo {
    /// `None` for the tree's own markers (start, end, peer ranges).
    pub name: Option<String>,
    pub gravity: Gravity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    /// A run of characters; a newline may only appear as the last byte.
    Chars(String),
    /// A soft hyphenation point.
    Hyphen,
    /// An embedded image or window.
    Embed { kind: EmbedKind, name: String },
    Mark(MarkInfo),
    /// Start of an elided range.
    Branch { link: Option<SegId> },
    /// End of an elided range.
    Link { branch: Option<SegId> },
}

#[derive(Clone, Debug)]
pub(crate) struct Segment {
    pub kind: SegmentKind,
    /// Size in index units (bytes for characters, 1 for hyphens and embeds).
    pub size: usize,
    pub prev: Option<SegId>,
    pub next: Option<SegId>,
    pub section: Option<SectionId>,
    /// Tags carried by content segments; always empty for zero-size ones.
    pub tags: TagSet,
    pub flags: SegFlags,
}

impl Segment {
    pub(crate) fn new(kind: SegmentKind, tags: TagSet) -> Self {
        let size = match &kind {
            SegmentKind::Chars(text) => text.len(),
            SegmentKind::Hyphen | SegmentKind::Embed { .. } => 1,
            SegmentKind::Mark(_) | SegmentKind::Branch { .. } | SegmentKind::Link { .. } => 0,
        };
        let tags = if size == 0 { TagSet::empty() } else { tags };
        Self {
            kind,
            size,
            prev: None,
            next: None,
            section: None,
            tags,
            flags: SegFlags::empty(),
        }
    }

    pub(crate) const fn is_content(&self) -> bool {
        self.size > 0
    }

    pub(crate) const fn is_chars(&self) -> bool {
        matches!(self.kind, SegmentKind::Chars(_))
    }

    pub(crate) const fn is_mark(&self) -> bool {
        matches!(self.kind, SegmentKind::Mark(_))
    }

    pub(crate) const fn is_branch(&self) -> bool {
        matches!(self.kind, SegmentKind::Branch { .. })
    }

    pub(crate) const fn is_link(&self) -> bool {
        matches!(self.kind, SegmentKind::Link { .. })
    }

    /// Check whether this segment ends its line.
    pub(crate) fn ends_line(&self) -> bool {
        matches!(&self.kind, SegmentKind::Chars(text) if text.ends_with('\n'))
    }

    pub(crate) fn text(&self) -> Option<&str> {
        match &self.kind {
            SegmentKind::Chars(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) const fn gravity(&self) -> Option<Gravity> {
        match &self.kind {
            SegmentKind::Mark(info) => Some(info.gravity),
            _ => None,
        }
    }

    pub(crate) const fn is_protected(&self) -> bool {
        self.flags.contains(SegFlags::PROTECTED)
    }
}

/// Detached copy of a content segment, kept by delete undo tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SavedSegment {
    pub kind: SegmentKind,
    pub tags: TagSet,
}

impl SavedSegment {
    pub(crate) fn size(&self) -> usize {
        match &self.kind {
            SegmentKind::Chars(text) => text.len(),
            SegmentKind::Hyphen | SegmentKind::Embed { .. } => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_by_kind() {
        let tags = TagSet::from_indices([1]);
        assert_eq!(Segment::new(SegmentKind::Chars("héllo".into()), tags.clone()).size, 6);
        assert_eq!(Segment::new(SegmentKind::Hyphen, tags.clone()).size, 1);
        let mark = Segment::new(
            SegmentKind::Mark(MarkInfo {
                name: Some("insert".into()),
                gravity: Gravity::Right,
            }),
            tags,
        );
        assert_eq!(mark.size, 0);
        assert!(mark.tags.is_empty());
        assert!(!mark.is_content());
    }

    #[test]
    fn test_ends_line() {
        let nl = Segment::new(SegmentKind::Chars("ab\n".into()), TagSet::empty());
        assert!(nl.ends_line());
        let plain = Segment::new(SegmentKind::Chars("ab".into()), TagSet::empty());
        assert!(!plain.ends_line());
    }
}
