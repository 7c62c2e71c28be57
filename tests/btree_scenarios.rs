//! End-to-end scenarios for the text B-tree.
//!
//! Run with:
//!   cargo test --test btree_scenarios -- --nocapture
//! With logging:
//!   `RUST_LOG=debug` cargo test --test btree_scenarios -- --nocapture

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use textbtree::{
    BTree, BTreeOptions, Gravity, History, Invalidation, LogLevel, MAX_CHILDREN, TextIndex,
    set_log_callback,
};
use tracing::{Level, debug, info, warn};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(true)
            .with_test_writer()
            .try_init();
        set_log_callback(|level, message| match level {
            LogLevel::Debug => debug!(target: "textbtree", "{message}"),
            LogLevel::Info => info!(target: "textbtree", "{message}"),
            LogLevel::Warn | LogLevel::Error => warn!(target: "textbtree", "{message}"),
        });
    });
}

fn debug_tree() -> BTree {
    BTree::with_options(BTreeOptions {
        debug: true,
        ..BTreeOptions::default()
    })
}

// ============================================================================
// Construction and insertion
// ============================================================================

#[test]
fn empty_tree_has_content_line_and_sentinel() {
    init_logging();
    let tree = BTree::new();
    assert_eq!(tree.line_count(), 2);
    assert_eq!(tree.logical_line_count(), 2);
    let root = tree.node_info(tree.root()).unwrap();
    assert_eq!(root.lines, 2);
    assert_eq!(root.logical_lines, 2);
    assert_eq!(tree.text(), "\n\n");
    tree.check();
}

#[test]
fn insert_two_lines_at_start() {
    init_logging();
    let mut tree = BTree::new();
    let before = tree.size_bytes();
    tree.insert(TextIndex::START, "hello\nworld\n");
    assert_eq!(tree.line_count(), 4);
    assert_eq!(tree.line_text(0), "hello\n");
    assert_eq!(tree.line_text(1), "world\n");
    assert_eq!(tree.size_bytes(), before + 12);
    tree.check();
}

#[test]
fn sequential_inserts_split_nodes_and_stay_consistent() {
    init_logging();
    let mut tree = BTree::new();
    for i in 0..500 {
        tree.insert(TextIndex::new(i, 0), &format!("line {i}\n"));
        if let Err(problem) = tree.verify() {
            panic!("after insert {i}: {problem}");
        }
    }
    assert_eq!(tree.line_count(), 502);
    assert!(tree.depth() > 1, "500 lines cannot fit one node of {MAX_CHILDREN}");
    assert_eq!(tree.line_text(250), "line 250\n");
    let root = tree.node_info(tree.root()).unwrap();
    assert_eq!(root.lines, 502);
}

#[test]
fn insert_reports_invalidation() {
    init_logging();
    let mut tree = BTree::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    tree.set_invalidate_callback(move |event| sink.borrow_mut().push(event));
    tree.insert(TextIndex::START, "a\nb");
    tree.delete(TextIndex::new(0, 1), TextIndex::new(1, 0));
    assert_eq!(
        *seen.borrow(),
        vec![
            Invalidation::Inserted { line: 0, count: 1 },
            Invalidation::Deleted { line: 0, count: 1 },
        ]
    );
}

// ============================================================================
// Tagging
// ============================================================================

#[test]
fn tag_hello_then_undo_it() {
    init_logging();
    let mut tree = debug_tree();
    tree.insert(TextIndex::START, "hello\nworld\n");
    let bold = tree.create_tag("bold");

    let change = tree.tag(TextIndex::new(0, 0), TextIndex::new(0, 5), bold, true);
    assert!(change.changed);
    let (on, off) = tree.line_tags(0);
    assert!(on.test(bold.index()));
    assert!(off.test(bold.index()), "the newline is untagged");
    let root = tree.node_info(tree.root()).unwrap();
    assert!(root.tag_on.test(bold.index()));
    assert_eq!(tree.tag_root(bold), Some(tree.line_node(0)));

    let token = change.undo.unwrap();
    tree.perform_undo(token);
    assert!(tree.tag_ranges(bold).is_empty());
    assert_eq!(tree.tag_root(bold), None);
    let again = tree.tag(TextIndex::new(0, 0), TextIndex::new(0, 5), bold, false);
    assert!(!again.changed);
    assert!(again.undo.is_none());
}

#[test]
fn tagging_twice_is_a_no_op() {
    init_logging();
    let mut tree = BTree::new();
    tree.insert(TextIndex::START, "abcdef\n");
    let t = tree.create_tag("t");
    assert!(tree.tag(TextIndex::new(0, 1), TextIndex::new(0, 4), t, true).changed);
    let epoch = tree.epoch();
    let again = tree.tag(TextIndex::new(0, 2), TextIndex::new(0, 3), t, true);
    assert!(!again.changed);
    assert_eq!(tree.epoch(), epoch);
}

#[test]
fn tag_search_across_many_lines() {
    init_logging();
    let mut tree = BTree::new();
    let text: String = (0..1200).map(|i| format!("row {i}\n")).collect();
    tree.insert(TextIndex::START, &text);
    let t = tree.create_tag("t");
    tree.tag(TextIndex::new(100, 0), TextIndex::new(100, 3), t, true);
    tree.tag(TextIndex::new(900, 4), TextIndex::new(902, 0), t, true);
    assert_eq!(
        tree.tag_ranges(t),
        vec![
            (TextIndex::new(100, 0), TextIndex::new(100, 3)),
            (TextIndex::new(900, 4), TextIndex::new(902, 0)),
        ]
    );
    assert_eq!(tree.next_toggle(t, TextIndex::new(101, 0)), Some(TextIndex::new(900, 4)));
    assert_eq!(tree.prev_toggle(t, TextIndex::new(500, 0)), Some(TextIndex::new(100, 3)));
    tree.check();
}

// ============================================================================
// Elision
// ============================================================================

#[test]
fn elide_tag_brackets_range_with_branch_and_link() {
    init_logging();
    let mut tree = debug_tree();
    tree.insert(TextIndex::START, "zero\none\ntwo\nthree\nfour\n");
    let hide = tree.create_tag("hide");
    tree.set_tag_elide(hide, Some(true));
    let lines = tree.logical_line_count();
    assert_eq!(tree.num_branches(), 0);

    tree.tag(TextIndex::new(1, 2), TextIndex::new(3, 1), hide, true);
    assert_eq!(tree.num_branches(), 1);
    assert_eq!(tree.node_info(tree.root()).unwrap().branches, 1);
    assert_eq!(
        tree.elided_ranges(),
        vec![(TextIndex::new(1, 2), TextIndex::new(3, 1))]
    );
    assert_eq!(tree.logical_line_count(), lines - 2);

    tree.tag(TextIndex::new(1, 2), TextIndex::new(3, 1), hide, false);
    assert_eq!(tree.num_branches(), 0);
    assert_eq!(tree.logical_line_count(), lines);
}

#[test]
fn separate_elided_runs_get_separate_branches() {
    init_logging();
    let mut tree = debug_tree();
    tree.insert(TextIndex::START, "aaa\nbbb\nccc\n");
    let hide = tree.create_tag("hide");
    tree.set_tag_elide(hide, Some(true));
    tree.tag(TextIndex::new(0, 1), TextIndex::new(0, 2), hide, true);
    tree.tag(TextIndex::new(2, 1), TextIndex::new(2, 2), hide, true);
    assert_eq!(tree.num_branches(), 2);
    // Joining the runs leaves one pair.
    tree.tag(TextIndex::new(0, 2), TextIndex::new(2, 1), hide, true);
    assert_eq!(tree.num_branches(), 1);
}

#[test]
fn higher_priority_tag_can_unhide() {
    init_logging();
    let mut tree = debug_tree();
    tree.insert(TextIndex::START, "abcdefgh\n");
    let hide = tree.create_tag("hide");
    let show = tree.create_tag("show");
    tree.set_tag_elide(hide, Some(true));
    tree.set_tag_elide(show, Some(false));
    tree.tag(TextIndex::new(0, 1), TextIndex::new(0, 7), hide, true);
    tree.tag(TextIndex::new(0, 3), TextIndex::new(0, 5), show, true);
    assert_eq!(
        tree.elided_ranges(),
        vec![
            (TextIndex::new(0, 1), TextIndex::new(0, 3)),
            (TextIndex::new(0, 5), TextIndex::new(0, 7)),
        ]
    );
    // Once `show` ranks below `hide`, everything is hidden again.
    tree.set_tag_priority(show, 0);
    assert_eq!(
        tree.elided_ranges(),
        vec![(TextIndex::new(0, 1), TextIndex::new(0, 7))]
    );
}

// ============================================================================
// Boundaries, marks and peers
// ============================================================================

#[test]
fn deleting_everything_keeps_the_sentinel() {
    init_logging();
    let mut tree = debug_tree();
    tree.insert(TextIndex::START, "one\ntwo\nthree\n");
    tree.delete(TextIndex::START, TextIndex::new(1000, 0));
    assert_eq!(tree.line_count(), 2);
    assert_eq!(tree.text(), "\n\n");
    assert!(tree.delete(TextIndex::START, TextIndex::new(5, 0)).is_none());
}

#[test]
fn sentinel_has_zero_height_for_every_peer() {
    init_logging();
    let mut tree = BTree::new();
    tree.insert(TextIndex::START, "a\nb\nc\n");
    let first = tree.add_client();
    let second = tree.add_client();
    tree.update_pixel_heights(first, 0, 100, 15).unwrap();
    tree.update_pixel_heights(second, 0, 100, 20).unwrap();
    let sentinel = tree.line_count() - 1;
    assert_eq!(tree.line_height(first, sentinel).unwrap(), 0);
    assert_eq!(tree.line_height(second, sentinel).unwrap(), 0);
    assert_eq!(tree.pixel_height_total(first).unwrap(), 4 * 15);
    assert_eq!(tree.pixel_height_total(second).unwrap(), 4 * 20);
    assert_eq!(tree.line_at_pixel(second, 45).unwrap(), (2, 5));
    tree.check();
}

#[test]
fn marks_follow_edits() {
    init_logging();
    let mut tree = debug_tree();
    tree.insert(TextIndex::START, "hello world\n");
    tree.set_mark("insert", TextIndex::new(0, 6), Gravity::Right).unwrap();
    tree.set_mark("anchor", TextIndex::new(0, 6), Gravity::Left).unwrap();
    tree.insert(TextIndex::new(0, 6), "big\n");
    assert_eq!(tree.mark_index("anchor").unwrap(), TextIndex::new(0, 6));
    assert_eq!(tree.mark_index("insert").unwrap(), TextIndex::new(1, 0));
    tree.delete(TextIndex::new(0, 0), TextIndex::new(1, 2));
    assert_eq!(tree.mark_index("anchor").unwrap(), TextIndex::START);
    assert_eq!(tree.mark_index("insert").unwrap(), TextIndex::START);
    assert_eq!(tree.mark_names(), vec!["anchor", "insert"]);
}

// ============================================================================
// Undo history
// ============================================================================

#[test]
fn widening_a_tag_undoes_only_the_new_part() {
    init_logging();
    let mut tree = debug_tree();
    let mut history = History::new();
    history.push(tree.insert(TextIndex::START, "abcdef\nghijkl\n").unwrap());
    history.commit();
    let a = tree.create_tag("a");
    let tail = tree.tag(TextIndex::new(0, 3), TextIndex::new(1, 3), a, true);
    history.push(tail.undo.unwrap());
    history.commit();

    let head = tree.tag(TextIndex::new(0, 0), TextIndex::new(1, 3), a, true);
    history.push(head.undo.unwrap());
    history.commit();
    assert_eq!(tree.tag_ranges(a), vec![(TextIndex::new(0, 0), TextIndex::new(1, 3))]);

    assert!(history.undo(&mut tree));
    assert_eq!(tree.tag_ranges(a), vec![(TextIndex::new(0, 3), TextIndex::new(1, 3))]);
    assert!(history.redo(&mut tree));
    assert_eq!(tree.tag_ranges(a), vec![(TextIndex::new(0, 0), TextIndex::new(1, 3))]);

    let head = tree.tag(TextIndex::new(1, 0), TextIndex::new(1, 6), a, false);
    history.push(head.undo.unwrap());
    history.commit();
    assert_eq!(tree.tag_ranges(a), vec![(TextIndex::new(0, 0), TextIndex::new(1, 0))]);
    assert!(history.undo(&mut tree));
    assert_eq!(tree.tag_ranges(a), vec![(TextIndex::new(0, 0), TextIndex::new(1, 3))]);

    while history.undo(&mut tree) {}
    assert_eq!(tree.text(), "\n\n");
    assert!(tree.tag_ranges(a).is_empty());
    tree.check();
}

#[test]
fn undoing_a_delete_puts_marks_back() {
    init_logging();
    let mut tree = debug_tree();
    let mut history = History::new();
    tree.insert(TextIndex::START, "abcdef\n");
    tree.set_mark("m", TextIndex::new(0, 3), Gravity::Right).unwrap();
    history.push(tree.delete(TextIndex::new(0, 1), TextIndex::new(0, 5)).unwrap());
    assert_eq!(tree.mark_index("m").unwrap(), TextIndex::new(0, 1));

    assert!(history.undo(&mut tree));
    assert_eq!(tree.line_text(0), "abcdef\n");
    assert_eq!(tree.mark_index("m").unwrap(), TextIndex::new(0, 3));
    assert!(history.redo(&mut tree));
    assert_eq!(tree.mark_index("m").unwrap(), TextIndex::new(0, 1));
    tree.check();
}
