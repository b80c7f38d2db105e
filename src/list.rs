use crate::directory::{bit_reverse, DirArray};
use crate::node::Node;

/// The result of a split-order search: `curr` is the first node whose
/// reversed hash is >= `rev(hash)` (possibly null, if the search ran off
/// the tail), and `prev` is its predecessor -- the bucket anchor itself if
/// no step was taken. Mirrors `hashtable_find_hash` in the C original.
pub(crate) struct Location<V> {
    pub(crate) prev: *mut Node<V>,
    pub(crate) curr: *mut Node<V>,
}

/// Walks the split-ordered list starting at `dir.get(hash & mask)` while
/// the current node's reversed hash is strictly less than `rev(hash)`.
///
/// # Safety
/// `dir.get(hash & mask)` must be non-null (invariant 2, for the width
/// that produced `mask`); every node reachable from it must remain valid
/// for the duration of the call (guaranteed by the table's retire-at-
/// destroy policy).
pub(crate) unsafe fn find_location<V>(dir: &DirArray<V>, mask: u32, hash: u32) -> Location<V> {
    let reversed = bit_reverse(hash);
    let anchor = dir.get((hash & mask) as usize);

    let mut prev = anchor;
    let mut curr = (*anchor).next_ptr();

    while !curr.is_null() && bit_reverse((*curr).hash()) < reversed {
        prev = curr;
        curr = (*curr).next_ptr();
    }

    Location { prev, curr }
}
