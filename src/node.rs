use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/* The reserved "no live value" marker. Unlike the C original (which steals
 * the all-ones bit pattern), we tag with a dangling pointer of V's own
 * alignment -- the allocator never hands that address back to Arc::new, so
 * it can never alias a real value. */
#[inline]
fn sentinel_ptr<V>() -> *mut V {
    NonNull::dangling().as_ptr()
}

#[inline]
unsafe fn arc_from_raw<V>(ptr: *mut V) -> Arc<V> {
    Arc::from_raw(ptr as *const V)
}

#[inline]
fn arc_into_raw<V>(arc: Arc<V>) -> *mut V {
    Arc::into_raw(arc) as *mut V
}

/// One cell of the split-ordered list.
///
/// `hash` is the node's split-order key and never changes after
/// construction. `value` holds either `Arc::into_raw` of a live value or
/// `SENTINEL`; `next` is the successor in the list, or null at the tail.
pub(crate) struct Node<V> {
    hash: u32,
    value: AtomicPtr<V>,
    next: AtomicPtr<Node<V>>,
}

impl<V> Node<V> {
    pub(crate) fn new(value: Option<Arc<V>>, hash: u32) -> Box<Self> {
        let value_ptr = match value {
            Some(arc) => arc_into_raw(arc),
            None => sentinel_ptr(),
        };
        Box::new(Self {
            hash,
            value: AtomicPtr::new(value_ptr),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    pub(crate) fn new_sentinel(hash: u32) -> Box<Self> {
        Self::new(None, hash)
    }

    pub(crate) fn hash(&self) -> u32 {
        self.hash
    }

    pub(crate) fn next_ptr(&self) -> *mut Node<V> {
        self.next.load(Ordering::Acquire)
    }

    /// Unconditional store, used only while threading a node into the list
    /// before it is published via `cas_next` on its predecessor.
    pub(crate) fn store_next(&self, next: *mut Node<V>) {
        self.next.store(next, Ordering::Release);
    }

    pub(crate) fn cas_next(&self, expected: *mut Node<V>, new: *mut Node<V>) -> bool {
        self.next
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_sentinel(&self) -> bool {
        self.value.load(Ordering::Acquire) == sentinel_ptr()
    }

    /// Loads the live value, cloning the `Arc`. Returns `None` for a
    /// sentinel.
    pub(crate) fn value(&self) -> Option<Arc<V>> {
        let ptr = self.value.load(Ordering::Acquire);
        if ptr == sentinel_ptr() {
            return None;
        }
        /* SAFETY: any non-sentinel value in this slot was published by
         * Arc::into_raw and is still owned by this node. */
        unsafe {
            let borrowed = arc_from_raw(ptr);
            let cloned = Arc::clone(&borrowed);
            std::mem::forget(borrowed);
            Some(cloned)
        }
    }

    /// `if_sentinel_set_value`: CAS the slot from SENTINEL to `new`. On
    /// failure, `new` is handed back untouched so the caller can retry
    /// without reallocating.
    pub(crate) fn cas_value_sentinel_to(&self, new: Arc<V>) -> Result<(), Arc<V>> {
        let new_ptr = arc_into_raw(new);
        match self.value.compare_exchange(
            sentinel_ptr(),
            new_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            /* SAFETY: new_ptr was just minted by arc_into_raw above and
             * never published, so reclaiming it is exclusive. */
            Err(_) => Err(unsafe { arc_from_raw(new_ptr) }),
        }
    }

    /// `if_value_set_sentinel`: CAS the slot from `expected` to SENTINEL,
    /// returning the `Arc` the caller gave up ownership of on success.
    pub(crate) fn cas_value_to_sentinel(&self, expected: *const V) -> Option<Arc<V>> {
        let expected = expected as *mut V;
        match self.value.compare_exchange(
            expected,
            sentinel_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            /* SAFETY: we uniquely won the CAS away from `expected`, so we
             * are the sole owner of the Arc it represented. */
            Ok(_) => Some(unsafe { arc_from_raw(expected) }),
            Err(_) => None,
        }
    }

    /// Unconditionally swaps the value slot to SENTINEL, reclaiming
    /// whatever `Arc` (if any) was there. Used to extract ownership from a
    /// node that has just been unlinked and is exclusively owned by the
    /// caller (no other thread can reach it through the list any more).
    pub(crate) fn take_value(&self) -> Option<Arc<V>> {
        let old = self.value.swap(sentinel_ptr(), Ordering::AcqRel);
        if old == sentinel_ptr() {
            return None;
        }
        /* SAFETY: see cas_value_to_sentinel -- the caller guarantees
         * exclusive ownership of this node's value at this point. */
        Some(unsafe { arc_from_raw(old) })
    }

    /// Consumes a just-allocated, never-published node, reclaiming its
    /// value (if any) and dropping the node's own storage. Used to recover
    /// the caller's value after a failed `cas_next` during `insert`,
    /// instead of the original C implementation's use-after-free of the
    /// *caller's* value on that path (see `spec.md` §4.4.2, §9).
    pub(crate) fn into_value(self: Box<Self>) -> Option<Arc<V>> {
        let ptr = self.value.load(Ordering::Relaxed);
        /* Prevent Drop from freeing the value we're about to hand back. */
        self.value.store(sentinel_ptr(), Ordering::Relaxed);
        if ptr == sentinel_ptr() {
            None
        } else {
            /* SAFETY: this node was never published, so we are its only
             * owner and the only owner of the value it holds. */
            Some(unsafe { arc_from_raw(ptr) })
        }
    }
}

impl<V> Drop for Node<V> {
    fn drop(&mut self) {
        let ptr = *self.value.get_mut();
        if ptr != sentinel_ptr() {
            /* SAFETY: this is the node's only remaining reference to its
             * value; dropping the node drops its Arc handle. */
            drop(unsafe { arc_from_raw(ptr) });
        }
    }
}

/* SAFETY: Node<V> is shared across threads purely through atomics; V's own
 * Send + Sync bounds (enforced on Table) make that sharing sound. */
unsafe impl<V: Send + Sync> Send for Node<V> {}
unsafe impl<V: Send + Sync> Sync for Node<V> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_sentinel_is_sentinel() {
        let node = Node::<u32>::new_sentinel(7);
        assert!(node.is_sentinel());
        assert!(node.value().is_none());
        assert_eq!(node.hash(), 7);
    }

    #[test]
    fn live_node_holds_value() {
        let node = Node::new(Some(Arc::new(42u32)), 3);
        assert!(!node.is_sentinel());
        assert_eq!(*node.value().unwrap(), 42);
    }

    #[test]
    fn sentinel_to_value_roundtrip() {
        let node = Node::<&'static str>::new_sentinel(1);
        node.cas_value_sentinel_to(Arc::new("hi")).unwrap();
        assert!(!node.is_sentinel());
        assert_eq!(*node.value().unwrap(), "hi");

        let back = node.cas_value_to_sentinel(Arc::as_ptr(&node.value().unwrap()));
        assert!(back.is_some());
        assert!(node.is_sentinel());
    }

    #[test]
    fn into_value_reclaims_ownership() {
        let node = Node::new(Some(Arc::new(5i32)), 9);
        let value = node.into_value().unwrap();
        assert_eq!(*value, 5);
    }
}
