//! Fuzz target for tree edits.
//!
//! Replays arbitrary insert/delete/tag/mark sequences and runs the
//! consistency checker after each one, then undoes everything.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use textbtree::{BTree, Gravity, TextIndex};

#[derive(Arbitrary, Debug)]
enum Op {
    Insert { at: u16, text: String },
    Delete { at: u16, len: u8 },
    Tag { at: u16, len: u8, tag: u8, add: bool },
    Clear { at: u16, len: u8 },
    Mark { at: u16, name: u8, left: bool },
    Elide { tag: u8, elide: Option<bool> },
    Priority { tag: u8, priority: u8 },
}

fn span(tree: &BTree, at: u16, len: u8) -> (TextIndex, TextIndex) {
    let start = usize::from(at) % tree.size_bytes();
    (
        tree.index_at_offset(start),
        tree.index_at_offset(start + usize::from(len)),
    )
}

fuzz_target!(|ops: Vec<Op>| {
    let mut tree = BTree::new();
    let tags: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| tree.create_tag(n)).collect();
    let mut undo = Vec::new();

    for op in ops.into_iter().take(200) {
        match op {
            Op::Insert { at, text } => {
                let text: String = text.chars().take(64).collect();
                let (start, _) = span(&tree, at, 0);
                undo.extend(tree.insert(start, &text));
            }
            Op::Delete { at, len } => {
                let (start, end) = span(&tree, at, len);
                undo.extend(tree.delete(start, end));
            }
            Op::Tag { at, len, tag, add } => {
                let (start, end) = span(&tree, at, len);
                let tag = tags[usize::from(tag) % tags.len()];
                undo.extend(tree.tag(start, end, tag, add).undo);
            }
            Op::Clear { at, len } => {
                let (start, end) = span(&tree, at, len);
                undo.extend(tree.clear_tags(start, end).undo);
            }
            Op::Mark { at, name, left } => {
                let (start, _) = span(&tree, at, 0);
                let gravity = if left { Gravity::Left } else { Gravity::Right };
                let _ = tree.set_mark(&format!("m{}", name % 8), start, gravity);
            }
            Op::Elide { tag, elide } => {
                tree.set_tag_elide(tags[usize::from(tag) % tags.len()], elide);
            }
            Op::Priority { tag, priority } => {
                tree.set_tag_priority(tags[usize::from(tag) % tags.len()], u32::from(priority));
            }
        }
        if let Err(problem) = tree.verify() {
            panic!("inconsistent tree: {problem}\n{}", tree.describe_structure());
        }
    }

    while let Some(token) = undo.pop() {
        tree.perform_undo(token);
    }
    tree.check();
});
