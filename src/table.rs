use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::directory::DirArray;
use crate::list::find_location;
use crate::node::Node;
use crate::retired::RetiredList;

/// Width of the directory a freshly built table starts with, before any
/// doubling. Matches `HASH_WIDTH_INIT` in the C original.
pub(crate) const INITIAL_WIDTH: u32 = 2;

#[inline]
fn width_of<V>(dir: &DirArray<V>) -> u32 {
    dir.len().trailing_zeros()
}

#[inline]
fn mask_of<V>(dir: &DirArray<V>) -> u32 {
    (dir.len() - 1) as u32
}

/// Clears `resizing` on every exit path of the resize critical section,
/// including early returns, matching `spec.md` §9 ("the flag must be
/// cleared on every exit path").
struct ResizingGuard<'a>(&'a AtomicBool);

impl Drop for ResizingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A concurrent, lock-free hash table built on a split-ordered list
/// (Shalev & Shavit). See the crate root docs for the overall design.
///
/// Elements are identified purely by the 32-bit hash `H` produces for a
/// given key -- two distinct `K` values that hash identically are
/// indistinguishable to the table, exactly like the C implementation this
/// crate is modelled on (`spec.md` §9, "Key = hash"). If that is not the
/// behaviour you want, make `H` collision-resistant for your `K`, or embed
/// enough of the key into `V` to disambiguate yourself.
pub struct Table<K, V, H> {
    hash_fn: H,
    print_fn: Option<Box<dyn Fn(&V) + Send + Sync>>,
    release_fn: Option<Box<dyn Fn(Arc<V>) + Send + Sync>>,
    count: AtomicU32,
    directory: AtomicPtr<DirArray<V>>,
    resizing: AtomicBool,
    retired_nodes: RetiredList<Node<V>>,
    retired_dirs: RetiredList<DirArray<V>>,
    _key: PhantomData<fn(&K)>,
}

/* SAFETY: every mutable field is either an atomic or a lock-free list
 * designed for concurrent access; hash_fn/print_fn/release_fn are required
 * to be Send + Sync by their constructors. */
unsafe impl<K, V: Send + Sync, H: Send + Sync> Send for Table<K, V, H> {}
unsafe impl<K, V: Send + Sync, H: Send + Sync> Sync for Table<K, V, H> {}

impl<K, V, H> Table<K, V, H>
where
    H: Fn(&K) -> u32,
{
    pub(crate) fn new(
        hash_fn: H,
        print_fn: Option<Box<dyn Fn(&V) + Send + Sync>>,
        release_fn: Option<Box<dyn Fn(Arc<V>) + Send + Sync>>,
        initial_width: u32,
    ) -> Self {
        let dir = DirArray::with_width(initial_width);

        // Seed one sentinel per slot and thread them in split order. For
        // width 2 that's the fixed 0 -> 2 -> 1 -> 3 chain from
        // `hashtable_create`; for other widths we thread by ascending
        // reversed hash, which is the general form of the same rule.
        let mut order: Vec<u32> = (0..dir.len() as u32).collect();
        order.sort_by_key(|&i| crate::directory::bit_reverse(i));

        let mut ptrs = vec![ptr::null_mut(); dir.len()];
        for &i in &order {
            ptrs[i as usize] = Box::into_raw(Node::new_sentinel(i));
        }
        for (slot, window) in order.windows(2).enumerate() {
            let _ = slot;
            let this = ptrs[window[0] as usize];
            let next = ptrs[window[1] as usize];
            unsafe { (*this).store_next(next) };
        }
        for (i, &ptr) in ptrs.iter().enumerate() {
            dir.set(i, ptr);
        }

        Self {
            hash_fn,
            print_fn,
            release_fn,
            count: AtomicU32::new(0),
            directory: AtomicPtr::new(Box::into_raw(Box::new(dir))),
            resizing: AtomicBool::new(false),
            retired_nodes: RetiredList::new(),
            retired_dirs: RetiredList::new(),
            _key: PhantomData,
        }
    }

    #[inline]
    fn load_directory(&self) -> &DirArray<V> {
        /* SAFETY: the directory pointer is always either the one this
         * table was built with or one published by a resize winner after
         * being fully populated; it is only freed at Table::drop. */
        unsafe { &*self.directory.load(Ordering::Acquire) }
    }

    /// Number of live (non-sentinel) elements currently in the table.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `hashtable_contains`: `true` iff `get` would return `Some`.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// `hashtable_get`.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let hash = (self.hash_fn)(key);
        let dir = self.load_directory();
        let mask = mask_of(dir);

        /* SAFETY: dir.get(hash & mask) is non-null per invariant 2, and
         * every node reachable from it stays valid until Table::drop. */
        let loc = unsafe { find_location(dir, mask, hash) };
        if loc.curr.is_null() {
            return None;
        }
        /* SAFETY: see above. */
        let curr = unsafe { &*loc.curr };
        if curr.hash() != hash {
            return None;
        }
        curr.value()
    }

    /// `hashtable_insert`. Returns `false` if an element with this hash is
    /// already present (including hash collisions between distinct `K`
    /// values, see the type-level docs above).
    pub fn insert(&self, key: &K, value: V) -> bool {
        self.maybe_resize();

        let hash = (self.hash_fn)(key);
        let mut value = Arc::new(value);

        loop {
            let dir = self.load_directory();
            let mask = mask_of(dir);
            /* SAFETY: see `get`. */
            let loc = unsafe { find_location(dir, mask, hash) };

            if !loc.curr.is_null() && unsafe { (*loc.curr).hash() } == hash {
                /* SAFETY: loc.curr is non-null and valid. */
                let curr = unsafe { &*loc.curr };
                if !curr.is_sentinel() {
                    return false;
                }
                match curr.cas_value_sentinel_to(value) {
                    Ok(()) => {
                        self.count.fetch_add(1, Ordering::Relaxed);
                        log::trace!("insert: revived sentinel hash={:#010x}", hash);
                        return true;
                    }
                    Err(v) => {
                        value = v;
                        continue;
                    }
                }
            }

            let node = Node::new(Some(value), hash);
            node.store_next(loc.curr);
            let node_ptr = Box::into_raw(node);

            /* SAFETY: loc.prev is non-null (it is either a bucket anchor or
             * a node we just walked past). */
            if unsafe { (*loc.prev).cas_next(loc.curr, node_ptr) } {
                self.count.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            /* Lost the race: reclaim our value without freeing anyone
             * else's (spec.md §4.4.2 note / §9 -- the original frees the
             * caller's value here, which is the use-after-free this
             * reclaims from instead). */
            let node = unsafe { Box::from_raw(node_ptr) };
            value = node.into_value().expect("just-constructed node holds a value");
        }
    }

    /// `hashtable_remove`.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let hash = (self.hash_fn)(key);

        loop {
            let dir = self.load_directory();
            let mask = mask_of(dir);
            /* SAFETY: see `get`. */
            let loc = unsafe { find_location(dir, mask, hash) };

            if loc.curr.is_null() {
                return None;
            }
            /* SAFETY: loc.curr is valid. */
            let curr = unsafe { &*loc.curr };
            if curr.hash() != hash || curr.is_sentinel() {
                return None;
            }

            if hash == (hash & mask) {
                // curr anchors the current width's bucket for this hash;
                // it must survive removal as a sentinel (invariant 4).
                let current = match curr.value() {
                    Some(v) => v,
                    None => continue, // raced with a concurrent remove
                };
                let expected = Arc::as_ptr(&current);
                drop(current);
                match curr.cas_value_to_sentinel(expected) {
                    Some(v) => {
                        self.count.fetch_sub(1, Ordering::Relaxed);
                        return Some(v);
                    }
                    None => continue,
                }
            } else {
                let next = curr.next_ptr();
                /* SAFETY: loc.prev is non-null. */
                if unsafe { (*loc.prev).cas_next(loc.curr, next) } {
                    let value = curr.take_value();
                    self.retired_nodes.insert(loc.curr);
                    self.count.fetch_sub(1, Ordering::Relaxed);
                    return value;
                }
                // lost the unlink race, retry from the top
            }
        }
    }

    /// Walks the split-ordered list and prints the structure of every node,
    /// unconditionally. Live nodes are only passed to `print_fn` (if one was
    /// configured); a table built without one still prints the bucket
    /// anchors and a placeholder line for each live node.
    pub fn print(&self) {
        let dir = self.load_directory();
        let mut curr = dir.get(0);
        while !curr.is_null() {
            /* SAFETY: reachable nodes stay valid until Table::drop. */
            let node = unsafe { &*curr };
            let hash = node.hash();
            if node.is_sentinel() {
                println!(
                    "[ ...0x{:08x} (0x{:08x}) ]",
                    hash,
                    crate::directory::bit_reverse(hash)
                );
            } else if let Some(value) = node.value() {
                print!(
                    "[    0x{:08x} (0x{:08x}) ]: ",
                    hash,
                    crate::directory::bit_reverse(hash)
                );
                match &self.print_fn {
                    Some(print_fn) => print_fn(&value),
                    None => print!("<value>"),
                }
                println!();
            }
            curr = node.next_ptr();
        }
    }

    /// Opportunistic incremental doubling (`spec.md` §4.4.5). Only one
    /// thread ever wins the `resizing` flag at a time; everyone else skips
    /// straight to their own insert.
    fn maybe_resize(&self) {
        if self.resizing.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = ResizingGuard(&self.resizing);

        let old_dir_ptr = self.directory.load(Ordering::Acquire);
        /* SAFETY: valid until Table::drop. */
        let old_dir = unsafe { &*old_dir_ptr };
        let old_len = old_dir.len();

        let count = self.count.load(Ordering::Relaxed) as u64;
        if count + 1 <= (old_len as u64) * 2 {
            return;
        }

        let new_width = width_of(old_dir) + 1;
        let new_dir = DirArray::with_width(new_width);
        for i in 0..old_len {
            new_dir.set(i, old_dir.get(i));
        }

        // Fully populate the upper half -- including materialising any
        // missing sentinel anchors into the *shared* split-ordered list --
        // before this array is ever published. Since width/mask are
        // derived from the directory's own length (see Open Question 6 in
        // DESIGN.md), a reader that observes the bigger directory must
        // never see a null slot in it; unlike the C original (which keeps
        // width/mask gated separately from the directory pointer and can
        // therefore publish the array before finishing this loop), we
        // cannot publish until every slot is filled in.
        let old_mask = mask_of(old_dir);
        for i in old_len..new_dir.len() {
            let target_hash = i as u32;
            loop {
                /* SAFETY: see `get`; find with the pre-expansion mask per
                 * spec.md §4.4.5. new_dir's lower half already mirrors
                 * old_dir, so searching through it is equivalent. */
                let loc = unsafe { find_location(&new_dir, old_mask, target_hash) };

                if !loc.curr.is_null() && unsafe { (*loc.curr).hash() } == target_hash {
                    new_dir.set(i, loc.curr);
                    break;
                }

                let sentinel = Node::new_sentinel(target_hash);
                sentinel.store_next(loc.curr);
                let sentinel_ptr = Box::into_raw(sentinel);

                /* SAFETY: loc.prev is non-null. */
                if unsafe { (*loc.prev).cas_next(loc.curr, sentinel_ptr) } {
                    new_dir.set(i, sentinel_ptr);
                    break;
                }
                drop(unsafe { Box::from_raw(sentinel_ptr) });
            }
        }

        let new_dir_ptr = Box::into_raw(Box::new(new_dir));
        self.directory.store(new_dir_ptr, Ordering::Release);
        self.retired_dirs.insert(old_dir_ptr);
        log::debug!(
            "resize: width {} -> {} (count={})",
            width_of(old_dir),
            new_width,
            count
        );
    }
}

impl<K, V, H> Drop for Table<K, V, H> {
    fn drop(&mut self) {
        let dir_ptr = *self.directory.get_mut();
        /* SAFETY: exclusive access during drop. */
        let mut curr = unsafe { (*dir_ptr).get(0) };

        while !curr.is_null() {
            /* SAFETY: every node reachable from directory[0] is owned
             * exclusively by the list at teardown time. */
            let boxed = unsafe { Box::from_raw(curr) };
            let next = boxed.next_ptr();
            if let Some(value) = boxed.take_value() {
                if let Some(release) = &self.release_fn {
                    release(value);
                }
            }
            drop(boxed);
            curr = next;
        }

        /* SAFETY: dir_ptr was allocated by Table::new/maybe_resize and is
         * not retired (only superseded directories are). */
        drop(unsafe { Box::from_raw(dir_ptr) });
        // retired_nodes / retired_dirs free themselves as struct fields.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TableBuilder;
    use std::sync::Mutex;
    use std::thread;

    fn identity_table() -> Table<u32, &'static str, impl Fn(&u32) -> u32> {
        TableBuilder::new(|k: &u32| *k).build()
    }

    #[test]
    fn empty_get_and_contains() {
        let t = identity_table();
        assert_eq!(t.get(&5), None);
        assert!(!t.contains(&5));
    }

    #[test]
    fn insert_then_contains_and_get() {
        let t = identity_table();
        assert!(t.insert(&5, "v5"));
        assert!(t.contains(&5));
        assert_eq!(t.get(&5).map(|v| *v), Some("v5"));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let t = identity_table();
        assert!(t.insert(&5, "v5"));
        assert!(!t.insert(&5, "v5-prime"));
        assert_eq!(t.get(&5).map(|v| *v), Some("v5"));
    }

    #[test]
    fn remove_then_absent() {
        let t = identity_table();
        assert!(t.insert(&5, "v5"));
        assert_eq!(t.remove(&5).map(|v| *v), Some("v5"));
        assert!(!t.contains(&5));
        assert_eq!(t.remove(&5), None);
    }

    #[test]
    fn remove_of_absent_key_is_noop() {
        let t = identity_table();
        assert_eq!(t.remove(&123), None);
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn edge_hashes() {
        let t = identity_table();
        assert!(t.insert(&0, "a"));
        assert!(t.insert(&0xFFFF_FFFF, "b"));
        assert_eq!(t.get(&0).map(|v| *v), Some("a"));
        assert_eq!(t.get(&0xFFFF_FFFF).map(|v| *v), Some("b"));
    }

    #[test]
    fn reinsert_after_bucket_anchor_removal() {
        // Hash 0/1/2/3 are bucket anchors at the initial width; removing
        // and reinserting must revive the sentinel, not duplicate it.
        let t = identity_table();
        assert!(t.insert(&2, "first"));
        assert_eq!(t.remove(&2).map(|v| *v), Some("first"));
        assert!(!t.contains(&2));
        assert!(t.insert(&2, "second"));
        assert_eq!(t.get(&2).map(|v| *v), Some("second"));
    }

    #[test]
    fn stress_non_power_of_two_single_threaded() {
        let t: Table<u32, u32, _> = TableBuilder::new(|k: &u32| *k).build();
        const N: u32 = 5200;

        let mut order: Vec<u32> = (0..N).collect();
        // Deterministic shuffle (LCG) -- no external RNG dependency needed.
        let mut state: u64 = 0x2545F4914F6CDD1D;
        for i in (1..order.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let j = (state >> 33) as usize % (i + 1);
            order.swap(i, j);
        }

        for &k in &order {
            assert!(t.insert(&k, k), "insert {} should succeed", k);
        }
        assert_eq!(t.len(), N as usize);

        for k in 0..N {
            assert_eq!(t.get(&k).map(|v| *v), Some(k));
        }

        for &k in &order {
            assert_eq!(t.remove(&k).map(|v| *v), Some(k));
        }
        for k in 0..N {
            assert_eq!(t.get(&k), None);
        }
    }

    #[test]
    fn concurrent_partitioned_keyspace() {
        let t: Arc<Table<u32, u32, _>> = Arc::new(TableBuilder::new(|k: &u32| *k).build());
        const THREADS: u32 = 4;
        const PER_THREAD: u32 = 2000;

        thread::scope(|scope| {
            for id in 0..THREADS {
                let t = Arc::clone(&t);
                scope.spawn(move || {
                    let from = id * PER_THREAD;
                    let to = from + PER_THREAD;
                    for k in from..to {
                        assert!(t.insert(&k, k));
                    }
                });
            }
        });

        assert_eq!(t.len(), (THREADS * PER_THREAD) as usize);

        thread::scope(|scope| {
            for id in 0..THREADS {
                let t = Arc::clone(&t);
                scope.spawn(move || {
                    let from = id * PER_THREAD;
                    let to = from + PER_THREAD;
                    for k in from..to {
                        assert_eq!(t.get(&k).map(|v| *v), Some(k));
                    }
                });
            }
        });

        thread::scope(|scope| {
            for id in 0..THREADS {
                let t = Arc::clone(&t);
                scope.spawn(move || {
                    let from = id * PER_THREAD;
                    let to = from + PER_THREAD;
                    for k in from..to {
                        assert_eq!(t.remove(&k).map(|v| *v), Some(k));
                    }
                });
            }
        });

        assert_eq!(t.len(), 0);
    }

    #[test]
    fn release_fn_runs_once_per_surviving_value_at_drop() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let released_for_cb = Arc::clone(&released);
        let t: Table<u32, u32, _> = TableBuilder::new(|k: &u32| *k)
            .release_fn(move |v: Arc<u32>| released_for_cb.lock().unwrap().push(*v))
            .build();

        t.insert(&1, 10);
        t.insert(&2, 20);
        t.remove(&1);

        drop(t);
        let mut seen = released.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![20]);
    }
}
