//! Copy-on-write tag membership sets.
//!
//! A [`TagSet`] is a set of small tag indices backed by a reference-counted
//! bit array. Cloning a set only bumps the reference count, so identical
//! memberships are shared between segments, lines and nodes.
//!
//! # Invariants
//!
//! - The empty set is the shared singleton `TagSet::default()` and never
//!   owns an allocation.
//! - Trailing zero words are trimmed, so two equal sets always compare equal
//!   word for word.
//! - Mutating operations take `self` by value and only write in place when
//!   the backing array is not shared ([`Rc::make_mut`]); a shared array is
//!   copied first.
//!
//! ```
//! use textbtree::TagSet;
//!
//! let a = TagSet::empty().add(3).add(70);
//! let b = a.clone(); // shares storage
//! let c = b.erase(3); // copies, `a` is untouched
//! assert!(a.test(3));
//! assert!(!c.test(3));
//! assert_eq!(a.iter().collect::<Vec<_>>(), vec![3, 70]);
//! ```

use std::fmt;
use std::rc::Rc;

const WORD_BITS: usize = u64::BITS as usize;

/// Immutable-by-convention set of tag indices.
#[derive(Clone, Default)]
pub struct TagSet {
    words: Option<Rc<Vec<u64>>>,
}

impl TagSet {
    /// The shared empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self { words: None }
    }

    /// Build a set from an iterator of indices.
    #[must_use]
    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        let mut words: Vec<u64> = Vec::new();
        for index in indices {
            let word = index / WORD_BITS;
            if words.len() <= word {
                words.resize(word + 1, 0);
            }
            words[word] |= 1 << (index % WORD_BITS);
        }
        Self::from_words(words)
    }

    fn from_words(mut words: Vec<u64>) -> Self {
        while words.last() == Some(&0) {
            words.pop();
        }
        if words.is_empty() {
            Self::empty()
        } else {
            Self {
                words: Some(Rc::new(words)),
            }
        }
    }

    fn words(&self) -> &[u64] {
        self.words.as_deref().map_or(&[], Vec::as_slice)
    }

    fn word(&self, i: usize) -> u64 {
        self.words().get(i).copied().unwrap_or(0)
    }

    /// Check whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_none()
    }

    /// Number of indices in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words().iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Size of the index universe currently allocated, in bits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words().len() * WORD_BITS
    }

    /// Test membership of `index`.
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        self.word(index / WORD_BITS) & (1 << (index % WORD_BITS)) != 0
    }

    /// Return the set with `index` added.
    #[must_use]
    pub fn add(mut self, index: usize) -> Self {
        if self.test(index) {
            return self;
        }
        let word = index / WORD_BITS;
        let bit = 1u64 << (index % WORD_BITS);
        match self.words.as_mut() {
            Some(rc) => {
                let words = Rc::make_mut(rc);
                if words.len() <= word {
                    words.resize(word + 1, 0);
                }
                words[word] |= bit;
                self
            }
            None => {
                let mut words = vec![0; word + 1];
                words[word] = bit;
                Self::from_words(words)
            }
        }
    }

    /// Return the set with `index` removed.
    #[must_use]
    pub fn erase(mut self, index: usize) -> Self {
        if !self.test(index) {
            return self;
        }
        let word = index / WORD_BITS;
        let bit = 1u64 << (index % WORD_BITS);
        let Some(rc) = self.words.as_mut() else {
            return self;
        };
        let words = Rc::make_mut(rc);
        words[word] &= !bit;
        if words.last() == Some(&0) {
            let owned = std::mem::take(words);
            return Self::from_words(owned);
        }
        self
    }

    /// Return the set with membership of `index` set to `present`.
    #[must_use]
    pub fn with(self, index: usize, present: bool) -> Self {
        if present { self.add(index) } else { self.erase(index) }
    }

    fn combine(&self, other: &Self, op: impl Fn(u64, u64) -> u64) -> Self {
        let len = self.words().len().max(other.words().len());
        Self::from_words((0..len).map(|i| op(self.word(i), other.word(i))).collect())
    }

    /// Set union.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if other.is_empty() || self.ptr_eq(other) {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        self.combine(other, |a, b| a | b)
    }

    /// Set intersection.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        if self.ptr_eq(other) {
            return self.clone();
        }
        if self.is_empty() || other.is_empty() {
            return Self::empty();
        }
        self.combine(other, |a, b| a & b)
    }

    /// Indices in `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        if self.is_empty() || self.ptr_eq(other) {
            return Self::empty();
        }
        if other.is_empty() {
            return self.clone();
        }
        self.combine(other, |a, b| a & !b)
    }

    /// Indices in exactly one of the two sets.
    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        if self.ptr_eq(other) {
            return Self::empty();
        }
        self.combine(other, |a, b| a ^ b)
    }

    /// Check whether every index of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        (0..self.words().len()).all(|i| self.word(i) & !other.word(i) == 0)
    }

    /// Check whether the two sets share an index.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        let len = self.words().len().min(other.words().len());
        (0..len).any(|i| self.word(i) & other.word(i) != 0)
    }

    /// Smallest index in the set.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.next_from(0)
    }

    /// Smallest index `>= from`.
    #[must_use]
    pub fn next_from(&self, from: usize) -> Option<usize> {
        let words = self.words();
        let mut i = from / WORD_BITS;
        if i >= words.len() {
            return None;
        }
        let mut word = words[i] & (!0u64 << (from % WORD_BITS));
        loop {
            if word != 0 {
                return Some(i * WORD_BITS + word.trailing_zeros() as usize);
            }
            i += 1;
            if i >= words.len() {
                return None;
            }
            word = words[i];
        }
    }

    /// Iterate over the indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.first();
        std::iter::from_fn(move || {
            let current = next?;
            next = self.next_from(current + 1);
            Some(current)
        })
    }

    /// Check whether both handles share the same storage (or are both empty).
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.words, &other.words) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Number of handles sharing this set's storage (0 for the empty set).
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.words.as_ref().map_or(0, Rc::strong_count)
    }
}

impl PartialEq for TagSet {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.words() == other.words()
    }
}

impl Eq for TagSet {}

impl std::hash::Hash for TagSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.words().hash(state);
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for TagSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_indices(iter)
    }
}
