use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A single entry in a [`RetiredList`]: the retired pointer itself plus the
/// list's own atomic successor link.
struct Entry<T> {
    ptr: *mut T,
    next: AtomicPtr<Entry<T>>,
}

/// Append-only, multi-producer-safe list of pointers awaiting reclamation.
///
/// Nodes unlinked from the split-ordered list and directory arrays
/// superseded by a resize are pushed here instead of being freed
/// immediately, so a thread still mid-traversal never reads freed memory.
/// Everything retired is only actually freed when the list itself drops
/// (i.e. at table teardown) -- see `spec.md` §4.2 and §9.
///
/// `insert` walks from a head sentinel to the first node whose `next` is
/// null and performs a one-shot CAS; on failure it rewalks from where it
/// left off.
pub(crate) struct RetiredList<T> {
    head: Box<Entry<T>>,
}

impl<T> RetiredList<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: Box::new(Entry {
                ptr: ptr::null_mut(),
                next: AtomicPtr::new(ptr::null_mut()),
            }),
        }
    }

    pub(crate) fn insert(&self, ptr: *mut T) {
        let new_entry = Box::into_raw(Box::new(Entry {
            ptr,
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        let mut tail: *const Entry<T> = &*self.head;
        loop {
            /* SAFETY: tail always points at either the head sentinel
             * (owned by self) or a previously-CAS'd-in entry, both alive
             * for the list's whole lifetime. */
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if next.is_null() {
                /* SAFETY: same as above. */
                let result = unsafe {
                    (*tail).next.compare_exchange(
                        ptr::null_mut(),
                        new_entry,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                };
                if result.is_ok() {
                    return;
                }
                /* Someone else appended first; retry from the same tail,
                 * it will see a non-null next this time. */
                continue;
            }
            tail = next;
        }
    }
}

impl<T> Drop for RetiredList<T> {
    fn drop(&mut self) {
        let mut curr = *self.head.next.get_mut();
        while !curr.is_null() {
            /* SAFETY: single-threaded teardown; every entry on this list
             * was produced by Box::into_raw in insert() and is not aliased
             * anywhere else. */
            let entry = unsafe { Box::from_raw(curr) };
            curr = *entry.next.get_mut();
            if !entry.ptr.is_null() {
                drop(unsafe { Box::from_raw(entry.ptr) });
            }
        }
    }
}
