//! `textbtree` - Augmented B-tree for tagged, elidable text documents
//!
//! The core storage engine of a rich text widget: a multiway balanced
//! tree of lines with typed segment chains, range tagging with per-node
//! tag summaries, branch/link elision markers, named marks, per-peer
//! pixel metrics and an invertible undo journal.

// Crate-level lint configuration
#![allow(clippy::cast_possible_truncation)] // Pixel heights and tag ids fit their widths
#![allow(clippy::module_name_repetitions)] // Allow btree::BTreeOptions etc
#![allow(clippy::missing_errors_doc)] // Docs WIP
#![allow(clippy::missing_panics_doc)] // Invariant panics come from the checker
#![allow(clippy::missing_const_for_fn)] // Many functions could be const, not critical
#![allow(clippy::doc_markdown)] // Allow technical names without backticks
#![allow(clippy::use_self)] // Allow explicit type names in impl blocks
#![allow(clippy::format_push_string)] // format! with push_str is fine
#![allow(clippy::needless_pass_by_value)] // Tokens and records are consumed by value
#![allow(clippy::collapsible_if)] // Sometimes nested ifs are clearer
#![allow(clippy::cast_lossless)] // as casts are fine for primitive widening
#![allow(clippy::items_after_statements)] // Common pattern in tests
#![allow(clippy::redundant_clone)] // Clones in tests for clarity are fine
#![allow(clippy::semicolon_if_nothing_returned)] // Style preference
#![allow(clippy::too_many_lines)] // Tree rebalancing reads best in one piece

pub mod btree;
pub mod error;
pub mod event;
pub mod tag;
pub mod tagset;
pub mod undo;

// Re-export core types at crate root
pub use btree::{
    BTree, BTreeOptions, EmbedKind, Gravity, Invalidation, MAX_CHILDREN, MAX_SECTION, MIN_CHILDREN,
    MIN_SECTION, NodeId, NodeInfo, PeerId, PixelInfo, Record, TagChange, Tagging, TextIndex,
};
pub use error::{Error, LoadErrorKind, Result};
pub use event::{LogLevel, clear_log_callback, emit_log, set_log_callback};
pub use tag::{Tag, TagId, TagTable};
pub use tagset::TagSet;
pub use undo::{DEFAULT_MAX_HISTORY_DEPTH, History, UndoKind, UndoToken};
