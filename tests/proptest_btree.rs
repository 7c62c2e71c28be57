//! Property-based tests for the text B-tree.
//!
//! Random edit sequences are replayed against a tree and the consistency
//! checker runs after every step.

use proptest::prelude::*;
use textbtree::{BTree, Gravity, Record, TagId, TextIndex, UndoToken};

// ============================================================================
// Strategies
// ============================================================================

const TAGS: [&str; 3] = ["bold", "hide", "show"];

#[derive(Clone, Debug)]
enum Op {
    Insert { at: usize, text: String },
    Delete { at: usize, len: usize },
    Tag { at: usize, len: usize, tag: usize, add: bool },
    Clear { at: usize, len: usize },
    Mark { at: usize, name: usize, left: bool },
}

fn text_piece() -> impl Strategy<Value = String> {
    "[a-c\n]{1,12}"
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<usize>(), text_piece()).prop_map(|(at, text)| Op::Insert { at, text }),
        2 => (any::<usize>(), 1usize..20).prop_map(|(at, len)| Op::Delete { at, len }),
        3 => (any::<usize>(), 1usize..30, 0..TAGS.len(), any::<bool>())
            .prop_map(|(at, len, tag, add)| Op::Tag { at, len, tag, add }),
        1 => (any::<usize>(), 1usize..30).prop_map(|(at, len)| Op::Clear { at, len }),
        1 => (any::<usize>(), 0usize..4, any::<bool>())
            .prop_map(|(at, name, left)| Op::Mark { at, name, left }),
    ]
}

fn fresh_tree() -> (BTree, Vec<TagId>) {
    let mut tree = BTree::new();
    let tags: Vec<TagId> = TAGS.iter().map(|name| tree.create_tag(name)).collect();
    tree.set_tag_elide(tags[1], Some(true));
    tree.set_tag_elide(tags[2], Some(false));
    (tree, tags)
}

/// Index range `[at, at + len)` mapped into the current document.
fn span(tree: &BTree, at: usize, len: usize) -> (TextIndex, TextIndex) {
    let size = tree.size_bytes();
    let start = at % size;
    (
        tree.index_at_offset(start),
        tree.index_at_offset(start + len),
    )
}

/// Apply `op`; returns its undo token, if it changed anything.
fn apply(tree: &mut BTree, tags: &[TagId], op: &Op) -> Option<UndoToken> {
    match op {
        Op::Insert { at, text } => {
            let (start, _) = span(tree, *at, 0);
            tree.insert(start, text)
        }
        Op::Delete { at, len } => {
            let (start, end) = span(tree, *at, *len);
            tree.delete(start, end)
        }
        Op::Tag { at, len, tag, add } => {
            let (start, end) = span(tree, *at, *len);
            tree.tag(start, end, tags[*tag], *add).undo
        }
        Op::Clear { at, len } => {
            let (start, end) = span(tree, *at, *len);
            tree.clear_tags(start, end).undo
        }
        Op::Mark { at, name, left } => {
            let (start, _) = span(tree, *at, 0);
            let gravity = if *left { Gravity::Left } else { Gravity::Right };
            let _ = tree.set_mark(&format!("m{name}"), start, gravity);
            None
        }
    }
}

type Snapshot = (
    String,
    Vec<Vec<(TextIndex, TextIndex)>>,
    Vec<(String, TextIndex, Gravity)>,
);

/// Content, tagging and named marks.
fn snapshot(tree: &BTree, tags: &[TagId]) -> Snapshot {
    let marks = tree
        .mark_names()
        .into_iter()
        .map(|name| {
            (
                name.to_string(),
                tree.mark_index(name).unwrap(),
                tree.mark_gravity(name).unwrap(),
            )
        })
        .collect();
    (
        tree.text(),
        tags.iter().map(|&t| tree.tag_ranges(t)).collect(),
        marks,
    )
}

// ============================================================================
// Structural invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Every public mutation leaves the tree consistent.
    #[test]
    fn random_edits_keep_tree_consistent(ops in prop::collection::vec(op(), 1..60)) {
        let (mut tree, tags) = fresh_tree();
        for (step, op) in ops.iter().enumerate() {
            apply(&mut tree, &tags, op);
            if let Err(problem) = tree.verify() {
                prop_assert!(false, "step {} ({:?}): {}", step, op, problem);
            }
            prop_assert_eq!(tree.line_text(tree.line_count() - 1), "\n");
        }
    }

    /// The size reported by the root equals the text length.
    #[test]
    fn size_matches_text(ops in prop::collection::vec(op(), 1..40)) {
        let (mut tree, tags) = fresh_tree();
        for op in &ops {
            apply(&mut tree, &tags, op);
        }
        let text = tree.text();
        prop_assert_eq!(tree.size_bytes(), text.len());
        prop_assert_eq!(tree.line_count(), text.matches('\n').count());
    }

    /// Tagging a range twice changes nothing the second time.
    #[test]
    fn tagging_is_idempotent(
        ops in prop::collection::vec(op(), 0..30),
        at in any::<usize>(),
        len in 1usize..40,
        tag in 0..TAGS.len(),
        add in any::<bool>(),
    ) {
        let (mut tree, tags) = fresh_tree();
        for op in &ops {
            apply(&mut tree, &tags, op);
        }
        let (start, end) = span(&tree, at, len);
        tree.tag(start, end, tags[tag], add);
        let dump = tree.dump();
        let epoch = tree.epoch();
        let again = tree.tag(start, end, tags[tag], add);
        prop_assert!(!again.changed);
        prop_assert!(again.undo.is_none());
        prop_assert_eq!(tree.epoch(), epoch);
        prop_assert_eq!(tree.dump(), dump);
    }

    /// Undo restores the state before an edit and redo the state after it.
    #[test]
    fn undo_redo_round_trip(
        ops in prop::collection::vec(op(), 0..30),
        last in op(),
    ) {
        let (mut tree, tags) = fresh_tree();
        for op in &ops {
            apply(&mut tree, &tags, op);
        }
        let before = snapshot(&tree, &tags);
        let Some(token) = apply(&mut tree, &tags, &last) else {
            return Ok(());
        };
        let after = snapshot(&tree, &tags);
        let redo = tree.perform_undo(token);
        tree.check();
        prop_assert_eq!(snapshot(&tree, &tags), before);
        tree.perform_undo(redo);
        tree.check();
        prop_assert_eq!(snapshot(&tree, &tags), after);
    }

    /// Loading a dump into a fresh tree reproduces the dump.
    #[test]
    fn dump_load_round_trip(ops in prop::collection::vec(op(), 0..40)) {
        let (mut tree, tags) = fresh_tree();
        for op in &ops {
            apply(&mut tree, &tags, op);
        }
        let dump = tree.dump();
        prop_assert_eq!(&dump[0], &Record::Setup);
        let mut copy = BTree::new();
        prop_assert!(copy.load(&dump).is_ok());
        copy.check();
        prop_assert_eq!(copy.text(), tree.text());
        prop_assert_eq!(copy.elided_ranges(), tree.elided_ranges());
        prop_assert_eq!(copy.dump(), dump);
    }
}
