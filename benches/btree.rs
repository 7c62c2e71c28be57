//! Text B-tree performance benchmarks.

#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use textbtree::{BTree, Gravity, TextIndex};

fn document(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("line {i} of the benchmark document\n"))
        .collect()
}

fn loaded_tree(lines: usize) -> BTree {
    let mut tree = BTree::new();
    tree.insert(TextIndex::START, &document(lines));
    tree
}

fn insertion(c: &mut Criterion) {
    let text = document(10_000);
    c.bench_function("btree_insert_10k_lines", |b| {
        b.iter(|| {
            let mut tree = BTree::new();
            tree.insert(TextIndex::START, black_box(&text));
            tree
        });
    });

    c.bench_function("btree_type_chars_mid_document", |b| {
        b.iter_batched(
            || loaded_tree(2_000),
            |mut tree| {
                for i in 0..200 {
                    tree.insert(TextIndex::new(1_000, 5 + i), "x");
                }
                tree
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("btree_delete_line_range", |b| {
        b.iter_batched(
            || loaded_tree(2_000),
            |mut tree| {
                tree.delete(TextIndex::new(500, 0), TextIndex::new(1_500, 0));
                tree
            },
            BatchSize::SmallInput,
        );
    });
}

fn lookup(c: &mut Criterion) {
    let tree = loaded_tree(10_000);
    let size = tree.size_bytes();

    c.bench_function("btree_index_at_offset", |b| {
        let mut offset = 0;
        b.iter(|| {
            offset = (offset + 7_919) % size;
            black_box(tree.index_at_offset(black_box(offset)))
        });
    });

    c.bench_function("btree_line_text", |b| {
        b.iter(|| black_box(tree.line_text(black_box(7_345))));
    });
}

fn tagging(c: &mut Criterion) {
    c.bench_function("btree_tag_scattered_ranges", |b| {
        b.iter_batched(
            || {
                let mut tree = loaded_tree(5_000);
                let tag = tree.create_tag("hl");
                (tree, tag)
            },
            |(mut tree, tag)| {
                for line in (0..5_000).step_by(50) {
                    tree.tag(TextIndex::new(line, 2), TextIndex::new(line, 9), tag, true);
                }
                tree
            },
            BatchSize::SmallInput,
        );
    });

    let mut tree = loaded_tree(5_000);
    let tag = tree.create_tag("hl");
    for line in (0..5_000).step_by(500) {
        tree.tag(TextIndex::new(line, 0), TextIndex::new(line, 4), tag, true);
    }
    c.bench_function("btree_next_toggle_sparse", |b| {
        b.iter(|| black_box(tree.next_toggle(tag, black_box(TextIndex::new(1, 0)))));
    });
    c.bench_function("btree_tag_ranges_sparse", |b| {
        b.iter(|| black_box(tree.tag_ranges(tag)));
    });
}

fn elision(c: &mut Criterion) {
    c.bench_function("btree_elide_and_reveal", |b| {
        b.iter_batched(
            || {
                let mut tree = loaded_tree(2_000);
                let hide = tree.create_tag("hide");
                tree.set_tag_elide(hide, Some(true));
                (tree, hide)
            },
            |(mut tree, hide)| {
                tree.tag(TextIndex::new(100, 0), TextIndex::new(1_900, 0), hide, true);
                tree.tag(TextIndex::new(100, 0), TextIndex::new(1_900, 0), hide, false);
                tree
            },
            BatchSize::SmallInput,
        );
    });
}

fn marks_and_pixels(c: &mut Criterion) {
    let mut tree = loaded_tree(10_000);
    let peer = tree.add_client();
    let _ = tree.update_pixel_heights(peer, 0, 10_000, 16);
    for i in 0..100 {
        let _ = tree.set_mark(&format!("m{i}"), TextIndex::new(i * 100, 3), Gravity::Right);
    }

    c.bench_function("btree_line_at_pixel", |b| {
        b.iter(|| black_box(tree.line_at_pixel(peer, black_box(80_000))));
    });
    c.bench_function("btree_mark_index", |b| {
        b.iter(|| black_box(tree.mark_index(black_box("m57"))));
    });
}

criterion_group!(
    benches,
    insertion,
    lookup,
    tagging,
    elision,
    marks_and_pixels
);
criterion_main!(benches);
