//! Whole-tree consistency checker.
//!
//! [`BTree::verify`] recomputes every cached quantity from scratch and
//! compares it with what the tree stores. It is a testing hook: normal
//! operations never call it unless [`BTreeOptions::debug`](super::BTreeOptions)
//! is set.

use super::arena::{LineId, NodeId, SegId};
use super::section::{MAX_SECTION, MIN_SECTION};
use super::{BTree, Gravity, NodePixels, SegmentKind};
use super::node::MAX_CHILDREN;
use crate::TagId;
use crate::tagset::TagSet;
use std::fmt::Write as _;

/// Aggregates recomputed for one subtree.
struct Totals {
    lines: usize,
    logical: usize,
    branches: usize,
    size: usize,
    pixels: Vec<NodePixels>,
    on: TagSet,
}

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(format!($($arg)+));
        }
    };
}

impl BTree {
    /// Run [`verify`](Self::verify) and panic with its message on failure.
    pub fn check(&self) {
        if let Err(message) = self.verify() {
            panic!("btree consistency check failed: {message}");
        }
    }

    /// Validate every structural invariant of the tree.
    pub fn verify(&self) -> Result<(), String> {
        let root = &self.nodes[self.root];
        ensure!(root.parent.is_none(), "root {:?} has a parent", self.root);
        ensure!(
            root.first_line == self.first_line && root.last_line == self.last_line,
            "root spans the wrong lines"
        );
        let totals = self.verify_node(self.root)?;
        let mut listed = 0;
        let mut prev: Option<LineId> = None;
        for line in self.all_lines() {
            ensure!(self.lines[line].prev == prev, "{line:?} has a broken back link");
            prev = Some(line);
            listed += 1;
        }
        ensure!(prev == Some(self.last_line), "line list does not end at the sentinel");
        ensure!(
            listed == totals.lines,
            "line list holds {listed} lines, nodes count {}",
            totals.lines
        );
        ensure!(listed >= 2, "tree holds fewer than two lines");

        self.verify_sentinel()?;
        for line in self.all_lines() {
            self.verify_line(line)?;
        }
        self.verify_elision()?;
        self.verify_tag_roots()?;
        self.verify_marks()?;
        Ok(())
    }

    fn verify_node(&self, node: NodeId) -> Result<Totals, String> {
        let n = &self.nodes[node];
        let peers = self.peers.len();
        ensure!(n.pixels.len() == peers, "{node:?} has {} pixel slots", n.pixels.len());
        let mut totals = Totals {
            lines: 0,
            logical: 0,
            branches: 0,
            size: 0,
            pixels: vec![NodePixels::default(); peers],
            on: TagSet::empty(),
        };
        let mut common: Option<TagSet> = None;
        let mut child_off = TagSet::empty();

        if n.level == 0 {
            ensure!(n.children.is_empty(), "level-0 {node:?} has child nodes");
            let mut line = n.first_line;
            let mut count = 0;
            loop {
                let record = &self.lines[line];
                ensure!(record.node == node, "{line:?} points at {:?}, not {node:?}", record.node);
                count += 1;
                totals.lines += 1;
                totals.logical += usize::from(record.is_logical());
                totals.branches += record.num_branches;
                totals.size += record.size;
                for (total, info) in totals.pixels.iter_mut().zip(&record.pixels) {
                    total.pixels += u64::from(info.height);
                    total.display_lines += u64::from(info.display_lines);
                }
                totals.on = totals.on.union(&record.tag_on);
                child_off = child_off.union(&record.tag_off);
                common = Some(match common {
                    None => record.tag_on.clone(),
                    Some(c) => c.intersection(&record.tag_on),
                });
                if line == n.last_line {
                    break;
                }
                line = record
                    .next
                    .ok_or_else(|| format!("{node:?} runs past the last line"))?;
            }
            ensure!(count == n.num_children, "{node:?} holds {count} lines, counts {}", n.num_children);
        } else {
            ensure!(
                n.children.len() == n.num_children,
                "{node:?} lists {} children, counts {}",
                n.children.len(),
                n.num_children
            );
            let first = n.children.first().ok_or_else(|| format!("{node:?} has no children"))?;
            let last = n.children.last().ok_or_else(|| format!("{node:?} has no children"))?;
            ensure!(self.nodes[*first].first_line == n.first_line, "{node:?} first line mismatch");
            ensure!(self.nodes[*last].last_line == n.last_line, "{node:?} last line mismatch");
            for pair in n.children.windows(2) {
                let next_first = self.nodes[pair[1]].first_line;
                ensure!(
                    self.lines[self.nodes[pair[0]].last_line].next == Some(next_first),
                    "children {:?} and {:?} are not adjacent",
                    pair[0],
                    pair[1]
                );
            }
            for &child in &n.children {
                let c = &self.nodes[child];
                ensure!(c.parent == Some(node), "{child:?} does not point at parent {node:?}");
                ensure!(c.level + 1 == n.level, "{child:?} sits at the wrong level");
                let sub = self.verify_node(child)?;
                totals.lines += sub.lines;
                totals.logical += sub.logical;
                totals.branches += sub.branches;
                totals.size += sub.size;
                for (total, info) in totals.pixels.iter_mut().zip(&sub.pixels) {
                    total.pixels += info.pixels;
                    total.display_lines += info.display_lines;
                }
                totals.on = totals.on.union(&c.tag_on);
                child_off = child_off.union(&c.tag_off);
                common = Some(match common {
                    None => c.tag_on.clone(),
                    Some(x) => x.intersection(&c.tag_on),
                });
            }
        }

        ensure!(n.num_children <= MAX_CHILDREN, "{node:?} has {} children", n.num_children);
        if n.parent.is_none() && n.level > 0 {
            ensure!(n.num_children >= 2, "root {node:?} has a single child");
        } else {
            ensure!(n.num_children >= 1, "{node:?} is empty");
        }
        ensure!(totals.lines == n.num_lines, "{node:?} counts {} lines, holds {}", n.num_lines, totals.lines);
        ensure!(
            totals.logical == n.num_logical_lines,
            "{node:?} counts {} logical lines, holds {}",
            n.num_logical_lines,
            totals.logical
        );
        ensure!(
            totals.branches == n.num_branches,
            "{node:?} counts {} branches, holds {}",
            n.num_branches,
            totals.branches
        );
        ensure!(totals.size == n.size, "{node:?} counts {} bytes, holds {}", n.size, totals.size);
        ensure!(totals.pixels == n.pixels, "{node:?} pixel totals are stale");
        ensure!(totals.on == n.tag_on, "{node:?} tag-on summary is stale");
        let off = common.map_or_else(TagSet::empty, |c| totals.on.difference(&c)).union(&child_off);
        ensure!(off == n.tag_off, "{node:?} tag-off summary is stale");
        ensure!(n.tag_off.is_subset(&n.tag_on), "{node:?} tag-off is not within tag-on");
        Ok(totals)
    }

    fn verify_sentinel(&self) -> Result<(), String> {
        let line = &self.lines[self.last_line];
        ensure!(line.next.is_none(), "sentinel has a successor");
        ensure!(line.first == line.last, "sentinel holds more than one segment");
        let seg = line.first.ok_or("sentinel is empty")?;
        ensure!(self.segs[seg].text() == Some("\n"), "sentinel does not hold a single newline");
        ensure!(self.segs[seg].tags.is_empty(), "sentinel newline is tagged");
        ensure!(
            line.pixels.iter().all(|p| p.height == 0),
            "sentinel has a non-zero height"
        );
        Ok(())
    }

    fn verify_line(&self, line: LineId) -> Result<(), String> {
        let record = &self.lines[line];
        ensure!(record.pixels.len() == self.peers.len(), "{line:?} has stale pixel slots");
        let first = record.first.ok_or_else(|| format!("{line:?} is empty"))?;
        ensure!(self.segs[first].prev.is_none(), "{line:?} first segment has a predecessor");

        let mut size = 0;
        let mut branches = 0;
        let mut prev: Option<SegId> = None;
        let mut last_content: Option<SegId> = None;
        let mut cur = Some(first);
        while let Some(seg) = cur {
            let s = &self.segs[seg];
            ensure!(s.prev == prev, "{seg:?} has a broken back link");
            ensure!(s.flags.is_empty(), "{seg:?} is still protected");
            let section = s.section.ok_or_else(|| format!("{seg:?} has no section"))?;
            ensure!(self.sections[section].line == line, "{seg:?} section belongs to another line");
            ensure!(
                s.tags.iter().all(|i| i < self.tags.len()),
                "{seg:?} carries an unknown tag"
            );
            match &s.kind {
                SegmentKind::Chars(text) => {
                    ensure!(!text.is_empty(), "{seg:?} is an empty character run");
                    ensure!(text.len() == s.size, "{seg:?} size {} != text length {}", s.size, text.len());
                    let newline = text.find('\n');
                    ensure!(
                        newline.is_none() || newline == Some(text.len() - 1),
                        "{seg:?} holds a newline before its end"
                    );
                }
                SegmentKind::Hyphen | SegmentKind::Embed { .. } => {
                    ensure!(s.size == 1, "{seg:?} embedded segment has size {}", s.size);
                }
                SegmentKind::Mark(_) | SegmentKind::Branch { .. } | SegmentKind::Link { .. } => {
                    ensure!(s.size == 0, "{seg:?} marker has size {}", s.size);
                    ensure!(s.tags.is_empty(), "{seg:?} marker carries tags");
                }
            }
            if s.is_branch() {
                branches += 1;
            }
            if s.ends_line() {
                ensure!(s.next.is_none(), "{seg:?} ends the line but has a successor");
            }
            if let Some(p) = prev {
                let a = &self.segs[p];
                ensure!(
                    !(a.is_chars() && s.is_chars() && !a.ends_line() && a.tags == s.tags),
                    "{p:?} and {seg:?} should have been joined"
                );
            }
            if s.is_content() {
                last_content = Some(seg);
            }
            size += s.size;
            prev = Some(seg);
            cur = s.next;
        }
        ensure!(record.last == prev, "{line:?} last pointer is stale");
        let last = last_content.ok_or_else(|| format!("{line:?} has no content"))?;
        ensure!(self.segs[last].ends_line(), "{line:?} does not end with a newline");
        ensure!(size == record.size, "{line:?} size {} != {size}", record.size);
        ensure!(branches == record.num_branches, "{line:?} branch count is stale");

        let (on, off) = self.compute_line_tags(line);
        ensure!(on == record.tag_on && off == record.tag_off, "{line:?} tag summaries are stale");

        let logical = match record.prev {
            None => true,
            Some(p) => {
                let newline = self.lines[p]
                    .last
                    .and_then(|s| {
                        if self.segs[s].is_content() {
                            Some(s)
                        } else {
                            self.prev_content(s)
                        }
                    })
                    .ok_or_else(|| format!("{p:?} has no newline"))?;
                !self.seg_elided(newline)
            }
        };
        ensure!(record.is_logical() == logical, "{line:?} logical flag is stale");

        self.verify_sections(line)
    }

    fn verify_sections(&self, line: LineId) -> Result<(), String> {
        let record = &self.lines[line];
        let first = record.first.ok_or_else(|| format!("{line:?} is empty"))?;
        let mut section = Some(self.section_of(first));
        let mut expected_first = Some(first);
        let mut back = None;
        while let Some(id) = section {
            let sec = &self.sections[id];
            ensure!(sec.prev == back, "{id:?} has a broken back link");
            ensure!(Some(sec.first) == expected_first, "{id:?} does not start where expected");
            ensure!(sec.length >= 1 && sec.length <= MAX_SECTION, "{id:?} has {} segments", sec.length);
            let mut seg = sec.first;
            let mut size = 0;
            for i in 0..sec.length {
                let s = &self.segs[seg];
                ensure!(s.section == Some(id), "{seg:?} is not in section {id:?}");
                ensure!(!s.is_link() || i == 0, "link {seg:?} does not start its section");
                ensure!(!s.is_branch() || i + 1 == sec.length, "branch {seg:?} does not end its section");
                size += s.size;
                if i + 1 < sec.length {
                    seg = s.next.ok_or_else(|| format!("{id:?} is shorter than its length"))?;
                }
            }
            ensure!(size == sec.size, "{id:?} size {} != {size}", sec.size);
            expected_first = self.segs[seg].next;
            if sec.length < MIN_SECTION {
                let blocked_before = sec.prev.is_none_or(|p| !self.sections_mergeable(p, id));
                let blocked_after = sec.next.is_none_or(|n| !self.sections_mergeable(id, n));
                ensure!(blocked_before && blocked_after, "{id:?} has {} segments and could merge", sec.length);
            }
            back = Some(id);
            section = sec.next;
        }
        ensure!(expected_first.is_none(), "{line:?} has segments outside its sections");
        Ok(())
    }

    fn sections_mergeable(&self, a: super::SectionId, b: super::SectionId) -> bool {
        let first_b = self.sections[b].first;
        let last_a = self.section_last(a);
        !self.segs[last_a].is_branch() && !self.segs[first_b].is_link()
    }

    /// Markers between consecutive content segments must match the change in
    /// elision, and every branch must pair with the link closing its run.
    fn verify_elision(&self) -> Result<(), String> {
        let mut prev_elided = false;
        let mut open: Option<SegId> = None;
        let mut between: Vec<SegId> = Vec::new();
        for line in self.all_lines() {
            for seg in self.line_segs(line) {
                let s = &self.segs[seg];
                if !s.is_content() {
                    if s.is_branch() || s.is_link() {
                        between.push(seg);
                    }
                    continue;
                }
                let elided = self.seg_elided(seg);
                let want_link = prev_elided && !elided;
                let want_branch = !prev_elided && elided;
                let expected = usize::from(want_link) + usize::from(want_branch);
                ensure!(
                    between.len() == expected,
                    "{} markers before {seg:?} at {}, expected {expected}",
                    between.len(),
                    self.seg_index(seg)
                );
                if want_link {
                    let link = between[0];
                    ensure!(self.segs[link].is_link(), "{link:?} should be a link");
                    let branch = self
                        .branch_of(link)
                        .ok_or_else(|| format!("link {link:?} has no branch"))?;
                    ensure!(open == Some(branch), "link {link:?} closes the wrong run");
                    ensure!(self.link_of(branch) == Some(link), "pairing of {branch:?} is not symmetric");
                    let previous = self.global_prev(link).ok_or("link at the document start")?;
                    ensure!(self.segs[previous].is_content(), "link {link:?} is not directly after content");
                    open = None;
                }
                if want_branch {
                    let branch = between[between.len() - 1];
                    ensure!(self.segs[branch].is_branch(), "{branch:?} should be a branch");
                    ensure!(s.prev == Some(branch), "branch {branch:?} is not directly before content");
                    let link = self.link_of(branch).ok_or_else(|| format!("branch {branch:?} has no link"))?;
                    ensure!(self.branch_of(link) == Some(branch), "pairing of {link:?} is not symmetric");
                    open = Some(branch);
                }
                between.clear();
                prev_elided = elided;
            }
        }
        ensure!(open.is_none(), "elided run is never closed");
        Ok(())
    }

    fn verify_tag_roots(&self) -> Result<(), String> {
        for index in 0..self.tags.len() {
            let tag = TagId(index as u32);
            let present = self.nodes[self.root].tag_on.test(index);
            let cached = self.tags.get(tag).root;
            match (present, cached) {
                (false, None) => {}
                (false, Some(node)) => return Err(format!("absent tag {index} has root {node:?}")),
                (true, None) => return Err(format!("tag {index} has no root")),
                (true, Some(node)) => {
                    ensure!(self.nodes.contains(node), "tag {index} root {node:?} is freed");
                    ensure!(self.nodes[node].tag_on.test(index), "tag {index} root {node:?} lacks it");
                    let mut expected = self.root;
                    loop {
                        let n = &self.nodes[expected];
                        if n.level == 0 {
                            break;
                        }
                        let carrying: Vec<NodeId> = n
                            .children
                            .iter()
                            .copied()
                            .filter(|&c| self.nodes[c].tag_on.test(index))
                            .collect();
                        if carrying.len() != 1 {
                            break;
                        }
                        expected = carrying[0];
                    }
                    ensure!(node == expected, "tag {index} root is {node:?}, expected {expected:?}");
                }
            }
        }
        Ok(())
    }

    fn verify_marks(&self) -> Result<(), String> {
        for (name, &seg) in &self.marks {
            let s = self.segs.get(seg).ok_or_else(|| format!("mark {name} is freed"))?;
            ensure!(s.section.is_some(), "mark {name} is not linked");
            match &s.kind {
                SegmentKind::Mark(info) => {
                    ensure!(info.name.as_deref() == Some(name.as_str()), "mark {name} has the wrong name");
                }
                _ => return Err(format!("mark {name} is not a mark segment")),
            }
        }
        let mut anchors = vec![self.start_marker, self.end_marker];
        for peer in &self.peers {
            if let Some((start, end)) = peer.range {
                anchors.extend([start, end]);
            }
        }
        for seg in anchors {
            let s = self.segs.get(seg).ok_or_else(|| format!("marker {seg:?} is freed"))?;
            ensure!(s.section.is_some() && s.is_mark(), "marker {seg:?} is not a linked mark");
        }
        for line in self.all_lines() {
            let mut seen_right = false;
            for seg in self.line_segs(line) {
                let s = &self.segs[seg];
                match s.gravity() {
                    Some(Gravity::Right) => seen_right = true,
                    Some(Gravity::Left) => {
                        ensure!(!seen_right, "left mark {seg:?} follows a right mark at one position");
                    }
                    None => {
                        if s.is_content() || s.is_branch() {
                            seen_right = false;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Human-readable outline of the node structure, for panic messages and
    /// debugging sessions.
    #[must_use]
    pub fn describe_structure(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            let n = &self.nodes[node];
            let _ = writeln!(
                out,
                "{:indent$}{node:?} level {} children {} lines {} bytes {} branches {}",
                "",
                n.level,
                n.num_children,
                n.num_lines,
                n.size,
                n.num_branches,
                indent = depth * 2
            );
            for &child in n.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::{BTree, BTreeOptions, TextIndex};

    #[test]
    fn test_fresh_tree_verifies() {
        assert_eq!(BTree::new().verify(), Ok(()));
    }

    #[test]
    fn test_debug_mode_checks_every_edit() {
        let mut tree = BTree::with_options(BTreeOptions {
            debug: true,
            ..BTreeOptions::default()
        });
        let t = tree.create_tag("t");
        for i in 0..300 {
            tree.insert(TextIndex::new(i, 0), &format!("{i}\n"));
        }
        tree.tag(TextIndex::new(3, 0), TextIndex::new(250, 1), t, true);
        tree.delete(TextIndex::new(10, 0), TextIndex::new(200, 0));
        assert_eq!(tree.verify(), Ok(()));
    }

    #[test]
    fn test_corruption_is_reported() {
        let mut tree = BTree::new();
        tree.insert(TextIndex::START, "abc\n");
        let root = tree.root;
        tree.nodes[root].size += 1;
        let err = tree.verify().unwrap_err();
        assert!(err.contains("bytes"), "{err}");
    }

    #[test]
    fn test_describe_structure_lists_root() {
        let tree = BTree::new();
        assert!(tree.describe_structure().contains("level 0"));
    }
}
