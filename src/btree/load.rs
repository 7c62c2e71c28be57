//! Bulk load and inspection through flat record lists.

use super::marks::validate_mark_name;
use super::{BTree, EmbedKind, Gravity, SavedSegment, SegmentKind, TextIndex};
use crate::TagId;
use crate::error::{Error, LoadErrorKind, Result};
use crate::event::{LogLevel, emit_log};
use crate::tagset::TagSet;
use std::fmt;

/// One item of a serialized tree.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Record {
    /// Reset the tree before loading. Only valid as the first record.
    Setup,
    /// Create `tag` if needed and set its attributes.
    Configure {
        tag: String,
        priority: u32,
        elide: Option<bool>,
    },
    /// Characters of one line; never contains a newline.
    Text { text: String, tags: Vec<String> },
    Hyphen { tags: Vec<String> },
    /// A newline.
    Break { tags: Vec<String> },
    LeftMark(String),
    RightMark(String),
    /// Start (`true`) or end of an elided run. Informational: elision is
    /// derived from tags, so loading only checks that these balance.
    Elide(bool),
    Image { name: String, tags: Vec<String> },
    Window { name: String, tags: Vec<String> },
}

fn write_tags(f: &mut fmt::Formatter<'_>, tags: &[String]) -> fmt::Result {
    if tags.is_empty() {
        Ok(())
    } else {
        write!(f, " [{}]", tags.join(" "))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Configure { tag, priority, elide } => {
                let elide = match elide {
                    Some(true) => "on",
                    Some(false) => "off",
                    None => "none",
                };
                write!(f, "configure {tag} priority {priority} elide {elide}")
            }
            Self::Text { text, tags } => {
                write!(f, "text {text:?}")?;
                write_tags(f, tags)
            }
            Self::Hyphen { tags } => {
                write!(f, "hyphen")?;
                write_tags(f, tags)
            }
            Self::Break { tags } => {
                write!(f, "break")?;
                write_tags(f, tags)
            }
            Self::LeftMark(name) => write!(f, "left {name}"),
            Self::RightMark(name) => write!(f, "right {name}"),
            Self::Elide(on) => write!(f, "elide {}", if *on { "on" } else { "off" }),
            Self::Image { name, tags } => {
                write!(f, "image {name}")?;
                write_tags(f, tags)
            }
            Self::Window { name, tags } => {
                write!(f, "window {name}")?;
                write_tags(f, tags)
            }
        }
    }
}

#[derive(Debug, Default)]
struct LoadState {
    /// Offset of the load position from the document start.
    base: usize,
    pieces: Vec<SavedSegment>,
    /// Bytes collected in `pieces`.
    length: usize,
    marks: Vec<(String, usize, Gravity)>,
    elide_depth: usize,
}

impl LoadState {
    fn push(&mut self, kind: SegmentKind, tags: TagSet) {
        self.length += match &kind {
            SegmentKind::Chars(text) => text.len(),
            _ => 1,
        };
        if let (SegmentKind::Chars(text), Some(last)) = (&kind, self.pieces.last_mut()) {
            if let SegmentKind::Chars(prev) = &mut last.kind {
                if last.tags == tags && !prev.ends_with('\n') {
                    prev.push_str(text);
                    return;
                }
            }
        }
        self.pieces.push(SavedSegment { kind, tags });
    }
}

impl BTree {
    /// Append `records` in front of the final newline.
    ///
    /// Loading is not atomic: on error, everything before the failing
    /// record stays loaded.
    pub fn load(&mut self, records: &[Record]) -> Result<()> {
        let mut state = LoadState {
            base: self.offset_of(self.end_index()),
            ..LoadState::default()
        };
        let mut result = records
            .iter()
            .enumerate()
            .try_for_each(|(i, record)| self.load_record(i, record, &mut state));
        if result.is_ok() && state.elide_depth > 0 {
            result = Err(Error::Load {
                record: records.len(),
                kind: LoadErrorKind::UnterminatedElide,
            });
        }
        let bytes = state.length;
        let result = result.and(self.flush_load(state));
        match &result {
            Ok(()) => emit_log(
                LogLevel::Info,
                &format!("btree: loaded {} records, {bytes} bytes", records.len()),
            ),
            Err(err) => emit_log(LogLevel::Warn, &format!("btree: load failed: {err}")),
        }
        result
    }

    fn load_record(&mut self, index: usize, record: &Record, state: &mut LoadState) -> Result<()> {
        let fail = |kind| Error::Load { record: index, kind };
        match record {
            Record::Setup => {
                if index != 0 {
                    return Err(fail(LoadErrorKind::SetupNotFirst));
                }
                self.clear();
                state.base = 0;
            }
            Record::Configure { tag, priority, elide } => {
                let id = self.create_tag(tag);
                self.configure_tag(id, Some(*priority), Some(*elide));
            }
            Record::Text { text, tags } => {
                if text.contains('\n') {
                    return Err(fail(LoadErrorKind::NewlineInText));
                }
                let tags = self.load_tags(tags).map_err(fail)?;
                if !text.is_empty() {
                    state.push(SegmentKind::Chars(text.clone()), tags);
                }
            }
            Record::Break { tags } => {
                let tags = self.load_tags(tags).map_err(fail)?;
                state.push(SegmentKind::Chars("\n".to_string()), tags);
            }
            Record::Hyphen { tags } => {
                let tags = self.load_tags(tags).map_err(fail)?;
                state.push(SegmentKind::Hyphen, tags);
            }
            Record::Image { name, tags } | Record::Window { name, tags } => {
                if name.is_empty() {
                    return Err(fail(LoadErrorKind::EmptyEmbedName));
                }
                let tags = self.load_tags(tags).map_err(fail)?;
                let kind = if matches!(record, Record::Image { .. }) {
                    EmbedKind::Image
                } else {
                    EmbedKind::Window
                };
                state.push(
                    SegmentKind::Embed {
                        kind,
                        name: name.clone(),
                    },
                    tags,
                );
            }
            Record::LeftMark(name) | Record::RightMark(name) => {
                if validate_mark_name(name).is_err() {
                    return Err(fail(LoadErrorKind::InvalidMarkName(name.clone())));
                }
                let gravity = if matches!(record, Record::LeftMark(_)) {
                    Gravity::Left
                } else {
                    Gravity::Right
                };
                state.marks.push((name.clone(), state.length, gravity));
            }
            Record::Elide(true) => state.elide_depth += 1,
            Record::Elide(false) => {
                if state.elide_depth == 0 {
                    return Err(fail(LoadErrorKind::UnmatchedElideEnd));
                }
                state.elide_depth -= 1;
            }
        }
        Ok(())
    }

    fn load_tags(&self, names: &[String]) -> std::result::Result<TagSet, LoadErrorKind> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = self
                .tags
                .lookup(name)
                .map_err(|_| LoadErrorKind::UnknownTag(name.clone()))?;
            ids.push(id.index());
        }
        Ok(TagSet::from_indices(ids))
    }

    fn flush_load(&mut self, state: LoadState) -> Result<()> {
        if !state.pieces.is_empty() {
            let at = self.index_at_offset(state.base);
            self.insert_segments(at, state.pieces);
        }
        for (name, offset, gravity) in state.marks {
            let at = self.index_at_offset(state.base + offset);
            self.set_mark(&name, at, gravity)?;
        }
        Ok(())
    }

    fn tag_names(&self, tags: &TagSet) -> Vec<String> {
        let mut ids: Vec<TagId> = tags.iter().map(|i| TagId(i as u32)).collect();
        self.tags.sort_by_priority(&mut ids);
        ids.into_iter()
            .map(|id| self.tags.get(id).name().to_string())
            .collect()
    }

    /// Serialize `[start, end)` as records. Marks and elision markers at
    /// `end` are included; elide records always come out balanced.
    #[must_use]
    pub fn inspect(&self, start: TextIndex, end: TextIndex) -> Vec<Record> {
        let start = self.normalize(start);
        let end = self.normalize(end).max(start);
        let mut out = Vec::new();
        let mut open = false;
        let mut line = self.line_at(start.line);
        for number in start.line..=end.line {
            let lo = if number == start.line { start.byte } else { 0 };
            let hi = if number == end.line { end.byte } else { usize::MAX };
            let mut offset = 0;
            for seg in self.line_segs(line) {
                let s = &self.segs[seg];
                let (a, b) = (offset.max(lo), (offset + s.size).min(hi));
                offset += s.size;
                if s.size == 0 {
                    if a > b {
                        continue;
                    }
                    match &s.kind {
                        SegmentKind::Mark(info) => {
                            if let Some(name) = &info.name {
                                out.push(match info.gravity {
                                    Gravity::Left => Record::LeftMark(name.clone()),
                                    Gravity::Right => Record::RightMark(name.clone()),
                                });
                            }
                        }
                        SegmentKind::Branch { .. } => {
                            if b < hi {
                                out.push(Record::Elide(true));
                                open = true;
                            }
                        }
                        SegmentKind::Link { .. } => {
                            if open {
                                out.push(Record::Elide(false));
                                open = false;
                            }
                        }
                        _ => {}
                    }
                    continue;
                }
                if a >= b {
                    continue;
                }
                let tags = self.tag_names(&s.tags);
                match &s.kind {
                    SegmentKind::Chars(text) => {
                        let base = offset - s.size;
                        let piece = &text[a - base..b - base];
                        let body = piece.strip_suffix('\n');
                        let visible = body.unwrap_or(piece);
                        if !visible.is_empty() {
                            out.push(Record::Text {
                                text: visible.to_string(),
                                tags: tags.clone(),
                            });
                        }
                        if body.is_some() {
                            out.push(Record::Break { tags });
                        }
                    }
                    SegmentKind::Hyphen => out.push(Record::Hyphen { tags }),
                    SegmentKind::Embed { kind, name } => out.push(match kind {
                        EmbedKind::Image => Record::Image {
                            name: name.clone(),
                            tags,
                        },
                        EmbedKind::Window => Record::Window {
                            name: name.clone(),
                            tags,
                        },
                    }),
                    _ => {}
                }
            }
            if number < end.line {
                line = self.next_line(line);
            }
        }
        if open {
            out.push(Record::Elide(false));
        }
        out
    }

    /// Every record needed to rebuild this tree: setup, tag configuration
    /// in priority order, then the content.
    #[must_use]
    pub fn dump(&self) -> Vec<Record> {
        let mut out = vec![Record::Setup];
        let mut tags: Vec<_> = self.tags.iter().collect();
        tags.sort_by_key(|t| t.priority());
        out.extend(tags.into_iter().map(|t| Record::Configure {
            tag: t.name().to_string(),
            priority: t.priority(),
            elide: t.elide(),
        }));
        out.extend(self.inspect(TextIndex::START, self.end_index()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadState, Record};
    use crate::error::{Error, LoadErrorKind};
    use crate::{BTree, Gravity, TextIndex};

    fn text(s: &str, tags: &[&str]) -> Record {
        Record::Text {
            text: s.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_load_builds_lines_tags_and_marks() {
        let mut tree = BTree::new();
        let records = vec![
            Record::Setup,
            Record::Configure {
                tag: "bold".into(),
                priority: 0,
                elide: None,
            },
            text("hello ", &[]),
            Record::LeftMark("here".into()),
            text("world", &["bold"]),
            Record::Break { tags: vec![] },
            text("second", &[]),
            Record::Break { tags: vec![] },
        ];
        tree.load(&records).unwrap();
        assert_eq!(tree.line_text(0), "hello world\n");
        assert_eq!(tree.line_text(1), "second\n");
        assert_eq!(tree.line_count(), 4);
        let bold = tree.tag_id("bold").unwrap();
        assert_eq!(tree.tag_ranges(bold), vec![(TextIndex::new(0, 6), TextIndex::new(0, 11))]);
        assert_eq!(tree.mark_index("here").unwrap(), TextIndex::new(0, 6));
        assert_eq!(tree.mark_gravity("here").unwrap(), Gravity::Left);
        tree.check();
    }

    #[test]
    fn test_flush_reports_bad_mark() {
        let mut tree = BTree::new();
        let state = LoadState {
            marks: vec![("bad name".to_string(), 0, Gravity::Right)],
            ..LoadState::default()
        };
        assert!(matches!(tree.flush_load(state), Err(Error::InvalidMarkName(_))));
        assert!(tree.mark_names().is_empty());
    }

    #[test]
    fn test_load_errors_carry_record_position() {
        let mut tree = BTree::new();
        let err = tree
            .load(&[text("ok", &[]), Record::Setup])
            .unwrap_err();
        assert_eq!(
            err,
            Error::Load {
                record: 1,
                kind: LoadErrorKind::SetupNotFirst
            }
        );
        // Records before the failure stay loaded.
        assert_eq!(tree.line_text(0), "ok\n");

        let err = tree.load(&[text("a\nb", &[])]).unwrap_err();
        assert!(matches!(err, Error::Load { record: 0, kind: LoadErrorKind::NewlineInText }));

        let err = tree.load(&[text("x", &["missing"])]).unwrap_err();
        assert!(matches!(err, Error::Load { kind: LoadErrorKind::UnknownTag(_), .. }));

        let err = tree.load(&[Record::Elide(false)]).unwrap_err();
        assert!(matches!(err, Error::Load { kind: LoadErrorKind::UnmatchedElideEnd, .. }));

        let err = tree.load(&[Record::Elide(true), text("y", &[])]).unwrap_err();
        assert_eq!(
            err,
            Error::Load {
                record: 2,
                kind: LoadErrorKind::UnterminatedElide
            }
        );
        let err = tree
            .load(&[Record::Image {
                name: String::new(),
                tags: vec![],
            }])
            .unwrap_err();
        assert!(matches!(err, Error::Load { kind: LoadErrorKind::EmptyEmbedName, .. }));
        tree.check();
    }

    #[test]
    fn test_inspect_clips_to_range() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "abcdef\nghi\n");
        let records = tree.inspect(TextIndex::new(0, 2), TextIndex::new(1, 1));
        assert_eq!(
            records,
            vec![
                text("cdef", &[]),
                Record::Break { tags: vec![] },
                text("g", &[]),
            ]
        );
    }

    #[test]
    fn test_dump_round_trips() {
        let mut tree = BTree::new();
        let hide = tree.create_tag("hide");
        let em = tree.create_tag("em");
        tree.configure_tag(hide, None, Some(Some(true)));
        tree.insert(TextIndex::START, "one\ntwo\nthree\n");
        tree.insert_hyphen(TextIndex::new(1, 1), &[]);
        tree.insert_embed(TextIndex::new(2, 0), crate::EmbedKind::Image, "logo", &[em]);
        tree.tag(TextIndex::new(0, 1), TextIndex::new(1, 2), hide, true);
        tree.tag(TextIndex::new(2, 0), TextIndex::new(2, 4), em, true);
        tree.set_mark("a", TextIndex::new(1, 0), Gravity::Right).unwrap();
        tree.set_mark("b", TextIndex::new(2, 3), Gravity::Left).unwrap();

        let dump = tree.dump();
        assert!(dump.contains(&Record::Elide(true)));
        let mut copy = BTree::new();
        copy.load(&dump).unwrap();
        assert_eq!(copy.text(), tree.text());
        assert_eq!(copy.dump(), dump);
        assert_eq!(copy.elided_ranges(), tree.elided_ranges());
        copy.check();
    }

    #[test]
    fn test_record_display() {
        assert_eq!(text("hi", &["a", "b"]).to_string(), "text \"hi\" [a b]");
        assert_eq!(Record::Elide(false).to_string(), "elide off");
        assert_eq!(
            Record::Configure {
                tag: "sel".into(),
                priority: 2,
                elide: Some(true)
            }
            .to_string(),
            "configure sel priority 2 elide on"
        );
    }
}
