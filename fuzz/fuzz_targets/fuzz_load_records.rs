//! Fuzz target for bulk loading.
//!
//! Arbitrary record lists must either load or fail with a load error, and
//! never leave the tree inconsistent.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use textbtree::{BTree, Record};

#[derive(Arbitrary, Debug)]
enum Input {
    Setup,
    Configure { tag: u8, priority: u8, elide: Option<bool> },
    Text { text: String, tags: Vec<u8> },
    Hyphen,
    Break { tags: Vec<u8> },
    Mark { name: String, left: bool },
    Elide(bool),
    Image { name: String },
}

fn tag_names(tags: &[u8]) -> Vec<String> {
    tags.iter().take(3).map(|t| format!("t{}", t % 4)).collect()
}

fuzz_target!(|inputs: Vec<Input>| {
    let records: Vec<Record> = inputs
        .into_iter()
        .take(256)
        .map(|input| match input {
            Input::Setup => Record::Setup,
            Input::Configure { tag, priority, elide } => Record::Configure {
                tag: format!("t{}", tag % 4),
                priority: u32::from(priority),
                elide,
            },
            Input::Text { text, tags } => Record::Text {
                text,
                tags: tag_names(&tags),
            },
            Input::Hyphen => Record::Hyphen { tags: Vec::new() },
            Input::Break { tags } => Record::Break {
                tags: tag_names(&tags),
            },
            Input::Mark { name, left } => {
                if left {
                    Record::LeftMark(name)
                } else {
                    Record::RightMark(name)
                }
            }
            Input::Elide(on) => Record::Elide(on),
            Input::Image { name } => Record::Image {
                name,
                tags: Vec::new(),
            },
        })
        .collect();

    let mut tree = BTree::new();
    let _ = tree.load(&records);
    tree.check();

    let dump = tree.dump();
    let mut copy = BTree::new();
    if copy.load(&dump).is_ok() {
        assert_eq!(copy.dump(), dump);
    }
});
