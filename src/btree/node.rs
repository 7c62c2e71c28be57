//! Interior structure: node summaries, line insertion/removal and
//! rebalancing.

use super::arena::{LineId, NodeId};
use super::{BTree, Line};
use crate::event::{LogLevel, emit_log};
use crate::tag::TagId;
use crate::tagset::TagSet;

/// Minimum number of children of a non-root node.
pub const MIN_CHILDREN: usize = 16;
/// Maximum number of children of any node.
pub const MAX_CHILDREN: usize = 32;

/// Per-peer pixel totals of a subtree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct NodePixels {
    pub pixels: u64,
    pub display_lines: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub parent: Option<NodeId>,
    /// 0 for nodes whose children are lines.
    pub level: u32,
    /// Child nodes; empty at level 0.
    pub children: Vec<NodeId>,
    pub first_line: LineId,
    pub last_line: LineId,
    /// Number of direct children (lines at level 0).
    pub num_children: usize,
    pub num_lines: usize,
    pub num_logical_lines: usize,
    pub num_branches: usize,
    pub size: usize,
    pub tag_on: TagSet,
    pub tag_off: TagSet,
    pub pixels: Vec<NodePixels>,
}

impl Node {
    /// A level-0 node whose spans are filled in by the caller.
    pub(crate) fn leaf_placeholder() -> Self {
        use super::arena::ArenaId;
        Self {
            parent: None,
            level: 0,
            children: Vec::new(),
            first_line: LineId::from_slot(0),
            last_line: LineId::from_slot(0),
            num_children: 0,
            num_lines: 0,
            num_logical_lines: 0,
            num_branches: 0,
            size: 0,
            tag_on: TagSet::empty(),
            tag_off: TagSet::empty(),
            pixels: Vec::new(),
        }
    }
}

/// Read-only view of a node's cached summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub level: u32,
    pub children: usize,
    pub lines: usize,
    pub logical_lines: usize,
    pub branches: usize,
    pub size: usize,
    pub parent: Option<NodeId>,
    /// Tags present anywhere in the subtree.
    pub tag_on: TagSet,
    /// Tags present in some but not all of the subtree's content.
    pub tag_off: TagSet,
}

impl BTree {
    /// The root node.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Summary of `node`, or `None` for a stale id.
    #[must_use]
    pub fn node_info(&self, node: NodeId) -> Option<NodeInfo> {
        self.nodes.get(node).map(|n| NodeInfo {
            level: n.level,
            children: n.num_children,
            lines: n.num_lines,
            logical_lines: n.num_logical_lines,
            branches: n.num_branches,
            size: n.size,
            parent: n.parent,
            tag_on: n.tag_on.clone(),
            tag_off: n.tag_off.clone(),
        })
    }

    /// Lines directly under a level-0 node.
    pub(crate) fn node_lines(&self, node: NodeId) -> Vec<LineId> {
        let n = &self.nodes[node];
        let mut out = Vec::with_capacity(n.num_children);
        let mut cur = n.first_line;
        for i in 0..n.num_children {
            out.push(cur);
            if i + 1 < n.num_children {
                cur = self.lines[cur]
                    .next
                    .unwrap_or_else(|| panic!("node {node:?} runs past the last line"));
            }
        }
        out
    }

    /// Recompute every cached field of `node` from its direct children and
    /// re-point the children at it.
    pub(crate) fn recompute_node(&mut self, node: NodeId) {
        let peers = self.peers.len();
        let mut lines = 0;
        let mut logical = 0;
        let mut branches = 0;
        let mut size = 0;
        let mut pixels = vec![NodePixels::default(); peers];
        let mut on = TagSet::empty();
        let mut common: Option<TagSet> = None;
        let mut off = TagSet::empty();

        let level = self.nodes[node].level;
        let (count, first, last) = if level == 0 {
            let members = self.node_lines(node);
            for &id in &members {
                let line: &mut Line = &mut self.lines[id];
                line.node = node;
                lines += 1;
                logical += usize::from(line.is_logical());
                branches += line.num_branches;
                size += line.size;
                for (total, info) in pixels.iter_mut().zip(&line.pixels) {
                    total.pixels += u64::from(info.height);
                    total.display_lines += u64::from(info.display_lines);
                }
                on = on.union(&line.tag_on);
                off = off.union(&line.tag_off);
                common = Some(common.map_or_else(|| line.tag_on.clone(), |c| c.intersection(&line.tag_on)));
            }
            let first = members.first().copied();
            let last = members.last().copied();
            (members.len(), first, last)
        } else {
            let children = self.nodes[node].children.clone();
            let mut first = None;
            let mut last = None;
            for &id in &children {
                let child = &mut self.nodes[id];
                child.parent = Some(node);
                lines += child.num_lines;
                logical += child.num_logical_lines;
                branches += child.num_branches;
                size += child.size;
                for (total, info) in pixels.iter_mut().zip(&child.pixels) {
                    total.pixels += info.pixels;
                    total.display_lines += info.display_lines;
                }
                on = on.union(&child.tag_on);
                off = off.union(&child.tag_off);
                common = Some(common.map_or_else(|| child.tag_on.clone(), |c| c.intersection(&child.tag_on)));
                if first.is_none() {
                    first = Some(child.first_line);
                }
                last = Some(child.last_line);
            }
            (children.len(), first, last)
        };
        let off = common.map_or_else(TagSet::empty, |c| on.difference(&c).union(&off));

        let n = &mut self.nodes[node];
        n.num_children = count;
        n.num_lines = lines;
        n.num_logical_lines = logical;
        n.num_branches = branches;
        n.size = size;
        n.pixels = pixels;
        n.tag_on = on;
        n.tag_off = off;
        if let Some(first) = first {
            n.first_line = first;
        }
        if let Some(last) = last {
            n.last_line = last;
        }
    }

    /// Recompute only the tag summaries of `node`. Returns whether they
    /// changed.
    pub(crate) fn recompute_summary(&mut self, node: NodeId) -> bool {
        let mut on = TagSet::empty();
        let mut off = TagSet::empty();
        let mut common: Option<TagSet> = None;
        let mut fold = |child_on: &TagSet, child_off: &TagSet| {
            on = on.union(child_on);
            off = off.union(child_off);
            common = Some(common.take().map_or_else(|| child_on.clone(), |c| c.intersection(child_on)));
        };
        if self.nodes[node].level == 0 {
            for id in self.node_lines(node) {
                let line = &self.lines[id];
                fold(&line.tag_on, &line.tag_off);
            }
        } else {
            for &id in &self.nodes[node].children {
                let child = &self.nodes[id];
                fold(&child.tag_on, &child.tag_off);
            }
        }
        let off = common.map_or_else(TagSet::empty, |c| on.difference(&c).union(&off));
        let n = &mut self.nodes[node];
        if n.tag_on == on && n.tag_off == off {
            return false;
        }
        n.tag_on = on;
        n.tag_off = off;
        true
    }

    /// Recompute tag summaries from `node` upward until nothing changes.
    pub(crate) fn refresh_summaries_up(&mut self, node: NodeId) {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if !self.recompute_summary(id) {
                break;
            }
            cur = self.nodes[id].parent;
        }
    }

    /// Position of `node` among its parent's children.
    pub(crate) fn child_position(&self, node: NodeId) -> usize {
        let parent = self.nodes[node]
            .parent
            .unwrap_or_else(|| panic!("{node:?} has no parent"));
        self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == node)
            .unwrap_or_else(|| panic!("{node:?} missing from its parent"))
    }

    /// Link a new empty line after `prev`, in the same level-0 node. The
    /// caller rebalances once all lines of an edit are in place.
    pub(crate) fn insert_line_after(&mut self, prev: LineId) -> LineId {
        let node = self.lines[prev].node;
        let next = self.lines[prev].next;
        let mut record = Line::new(node, self.peers.len());
        record.prev = Some(prev);
        record.next = next;
        let line = self.lines.alloc(record);
        self.lines[prev].next = Some(line);
        if let Some(next) = next {
            self.lines[next].prev = Some(line);
        }
        self.nodes[node].num_children += 1;
        self.update_path(node, |n| {
            n.num_lines += 1;
            n.num_logical_lines += 1;
            if n.last_line == prev {
                n.last_line = line;
            }
        });
        line
    }

    /// Unlink and free an empty line, then rebalance its node.
    pub(crate) fn remove_line(&mut self, line: LineId) {
        debug_assert!(self.lines[line].first.is_none(), "removing a non-empty line");
        debug_assert!(line != self.first_line && line != self.last_line);
        let record = self.lines.free(line);
        let node = record.node;
        let prev = record.prev.unwrap_or_else(|| panic!("{line:?} has no predecessor"));
        let next = record.next.unwrap_or_else(|| panic!("{line:?} has no successor"));
        self.lines[prev].next = Some(next);
        self.lines[next].prev = Some(prev);

        let logical = record.is_logical();
        self.nodes[node].num_children -= 1;
        self.update_path(node, |n| {
            n.num_lines -= 1;
            if logical {
                n.num_logical_lines -= 1;
            }
            for (total, info) in n.pixels.iter_mut().zip(&record.pixels) {
                total.pixels -= u64::from(info.height);
                total.display_lines -= u64::from(info.display_lines);
            }
            if n.first_line == line {
                n.first_line = next;
            }
            if n.last_line == line {
                n.last_line = prev;
            }
        });
        self.refresh_summaries_up(node);
        self.rebalance(node);
        for index in record.tag_on.iter() {
            self.recompute_tag_root(TagId(index as u32));
        }
    }

    /// Restore the fan-out bounds on `node` and its ancestors.
    pub(crate) fn rebalance(&mut self, node: NodeId) {
        let mut cur = node;
        loop {
            let n = &self.nodes[cur];
            let parent = n.parent;
            if n.num_children > MAX_CHILDREN {
                let parent = match parent {
                    Some(p) => p,
                    None => self.grow_root(cur),
                };
                self.split_node(cur, parent);
                cur = parent;
                continue;
            }
            if n.num_children < MIN_CHILDREN {
                match parent {
                    None => {
                        if n.level > 0 && n.num_children == 1 {
                            let child = n.children[0];
                            self.nodes.free(cur);
                            self.nodes[child].parent = None;
                            self.root = child;
                            emit_log(
                                LogLevel::Debug,
                                &format!("btree: root collapsed to level {}", self.nodes[child].level),
                            );
                            cur = child;
                            continue;
                        }
                        return;
                    }
                    Some(p) => {
                        if self.nodes[p].children.len() < 2 {
                            self.rebalance(p);
                            continue;
                        }
                        let pos = self.child_position(cur);
                        let siblings = &self.nodes[p].children;
                        let (a, b) = if pos + 1 < siblings.len() {
                            (cur, siblings[pos + 1])
                        } else {
                            (siblings[pos - 1], cur)
                        };
                        let total = self.nodes[a].num_children + self.nodes[b].num_children;
                        if total <= MAX_CHILDREN {
                            self.merge_nodes(a, b, p);
                        } else {
                            self.redistribute(a, b);
                        }
                        cur = p;
                        continue;
                    }
                }
            }
            match parent {
                Some(p) => cur = p,
                None => return,
            }
        }
    }

    fn grow_root(&mut self, old_root: NodeId) -> NodeId {
        let level = self.nodes[old_root].level + 1;
        let mut record = self.nodes[old_root].clone();
        record.parent = None;
        record.level = level;
        record.children = vec![old_root];
        let root = self.nodes.alloc(record);
        self.nodes[old_root].parent = Some(root);
        self.root = root;
        self.recompute_node(root);
        emit_log(LogLevel::Debug, &format!("btree: root grew to level {level}"));
        root
    }

    /// Split an overfull node into siblings of `MIN_CHILDREN` children,
    /// leaving the remainder (at most `MAX_CHILDREN`) in the last piece.
    fn split_node(&mut self, node: NodeId, parent: NodeId) {
        let count = self.nodes[node].num_children;
        let mut sizes = Vec::new();
        let mut rest = count;
        while rest > MAX_CHILDREN {
            sizes.push(MIN_CHILDREN);
            rest -= MIN_CHILDREN;
        }
        sizes.push(rest);
        let touched = self.nodes[node].tag_on.clone();
        let level = self.nodes[node].level;

        let mut created = Vec::with_capacity(sizes.len() - 1);
        if level == 0 {
            let members = self.node_lines(node);
            let mut offset = sizes[0];
            for &size in &sizes[1..] {
                let mut record = Node::leaf_placeholder();
                record.parent = Some(parent);
                record.first_line = members[offset];
                record.last_line = members[offset + size - 1];
                record.num_children = size;
                let id = self.nodes.alloc(record);
                self.recompute_node(id);
                created.push(id);
                offset += size;
            }
            self.nodes[node].num_children = sizes[0];
            self.nodes[node].last_line = members[sizes[0] - 1];
        } else {
            let children = std::mem::take(&mut self.nodes[node].children);
            let mut offset = sizes[0];
            for &size in &sizes[1..] {
                let mut record = Node::leaf_placeholder();
                record.parent = Some(parent);
                record.level = level;
                record.children = children[offset..offset + size].to_vec();
                let id = self.nodes.alloc(record);
                self.recompute_node(id);
                created.push(id);
                offset += size;
            }
            self.nodes[node].children = children[..sizes[0]].to_vec();
        }
        self.recompute_node(node);

        let pos = self.child_position(node);
        let siblings = &mut self.nodes[parent].children;
        siblings.splice(pos + 1..pos + 1, created.iter().copied());
        self.recompute_node(parent);
        emit_log(
            LogLevel::Debug,
            &format!("btree: split level {level} node of {count} into {} pieces", sizes.len()),
        );
        self.recompute_tag_roots(&touched);
    }

    /// Fold `b` (the right sibling) into `a` and free `b`.
    fn merge_nodes(&mut self, a: NodeId, b: NodeId, parent: NodeId) {
        let touched = self.nodes[a].tag_on.union(&self.nodes[b].tag_on);
        let level = self.nodes[a].level;
        if level == 0 {
            let b_count = self.nodes[b].num_children;
            if b_count > 0 {
                let (b_first, b_last) = (self.nodes[b].first_line, self.nodes[b].last_line);
                let record = &mut self.nodes[a];
                if record.num_children == 0 {
                    record.first_line = b_first;
                }
                record.last_line = b_last;
                record.num_children += b_count;
            }
        } else {
            let moved = std::mem::take(&mut self.nodes[b].children);
            self.nodes[a].children.extend(moved);
        }
        self.nodes[parent].children.retain(|&c| c != b);
        self.nodes.free(b);
        self.recompute_node(a);
        self.recompute_node(parent);
        if let Some(grandparent) = self.nodes[parent].parent {
            self.refresh_summaries_up(grandparent);
        }
        emit_log(LogLevel::Debug, &format!("btree: merged level {level} siblings"));
        self.recompute_tag_roots(&touched);
    }

    /// Share the children of two adjacent siblings evenly.
    fn redistribute(&mut self, a: NodeId, b: NodeId) {
        let touched = self.nodes[a].tag_on.union(&self.nodes[b].tag_on);
        let total = self.nodes[a].num_children + self.nodes[b].num_children;
        let keep = total / 2;
        if self.nodes[a].level == 0 {
            let mut members = self.node_lines(a);
            members.extend(self.node_lines(b));
            let ra = &mut self.nodes[a];
            ra.num_children = keep;
            ra.last_line = members[keep - 1];
            let rb = &mut self.nodes[b];
            rb.num_children = total - keep;
            rb.first_line = members[keep];
        } else {
            let mut all = std::mem::take(&mut self.nodes[a].children);
            all.append(&mut self.nodes[b].children);
            self.nodes[b].children = all.split_off(keep);
            self.nodes[a].children = all;
        }
        self.recompute_node(a);
        self.recompute_node(b);
        if let Some(parent) = self.nodes[a].parent {
            self.refresh_summaries_up(parent);
        }
        self.recompute_tag_roots(&touched);
    }

    fn recompute_tag_roots(&mut self, tags: &TagSet) {
        for index in tags.iter() {
            self.recompute_tag_root(TagId(index as u32));
        }
    }

    /// Rebuild every summary bottom-up. Used after bulk loads.
    pub(crate) fn recompute_all(&mut self) {
        let mut ids: Vec<(u32, NodeId)> =
            self.nodes.iter().map(|(id, n)| (n.level, id)).collect();
        ids.sort_unstable();
        for (_, id) in ids {
            self.recompute_node(id);
        }
        for index in 0..self.tags.len() {
            self.recompute_tag_root(TagId(index as u32));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextIndex;

    fn filled(lines: usize) -> BTree {
        let mut tree = BTree::new();
        let text: String = (0..lines).map(|i| format!("line {i}\n")).collect();
        tree.insert(TextIndex::START, &text);
        tree
    }

    #[test]
    fn test_split_grows_tree() {
        let tree = filled(100);
        assert_eq!(tree.line_count(), 102);
        assert!(tree.depth() >= 2);
        let root = tree.node_info(tree.root()).unwrap();
        assert!(root.children >= 2 && root.children <= MAX_CHILDREN);
        assert_eq!(root.lines, 102);
        tree.check();
    }

    #[test]
    fn test_large_insert_is_balanced() {
        let tree = filled(5000);
        assert_eq!(tree.line_count(), 5002);
        assert!(tree.depth() >= 3);
        tree.check();
    }

    #[test]
    fn test_delete_collapses_root() {
        let mut tree = filled(200);
        assert!(tree.depth() >= 2);
        tree.delete(TextIndex::new(0, 0), TextIndex::new(199, 0));
        assert_eq!(tree.line_count(), 3);
        assert_eq!(tree.node_info(tree.root()).unwrap().lines, 3);
        assert_eq!(tree.line_text(0), "line 199\n");
        tree.check();
    }

    #[test]
    fn test_delete_middle_merges_siblings() {
        let mut tree = filled(300);
        for _ in 0..10 {
            tree.delete(TextIndex::new(20, 0), TextIndex::new(40, 0));
            tree.check();
        }
        assert_eq!(tree.line_count(), 302 - 200);
        assert_eq!(tree.line_text(19), "line 19\n");
        assert_eq!(tree.line_text(20), "line 220\n");
    }

    #[test]
    fn test_insert_line_after_counts() {
        let mut tree = BTree::new();
        let first = tree.first_line;
        let added = tree.insert_line_after(first);
        let root = tree.root();
        assert_eq!(tree.nodes[root].num_lines, 3);
        assert_eq!(tree.lines[first].next, Some(added));
        // Give the line its newline back so the tree stays valid.
        let nl = tree.alloc_chars("\n", TagSet::empty());
        tree.link_segment(added, None, nl);
        tree.check();
    }
}
