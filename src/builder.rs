use std::sync::Arc;

use crate::table::{Table, INITIAL_WIDTH};

/// Configures and constructs a [`Table`]. Mirrors the optional `print_f` /
/// `free_f` callback slots in the external interface (`spec.md` §6); the
/// hash function is mandatory since the table has no way to derive it
/// itself.
///
/// ```
/// use splitlist::TableBuilder;
///
/// let table = TableBuilder::new(|k: &u32| *k).build();
/// table.insert(&1, "one");
/// assert_eq!(table.get(&1).map(|v| *v), Some("one"));
/// ```
pub struct TableBuilder<K, V, H> {
    hash_fn: H,
    print_fn: Option<Box<dyn Fn(&V) + Send + Sync>>,
    release_fn: Option<Box<dyn Fn(Arc<V>) + Send + Sync>>,
    initial_width: u32,
    _key: std::marker::PhantomData<fn(&K)>,
}

impl<K, V, H> TableBuilder<K, V, H>
where
    H: Fn(&K) -> u32,
{
    /// Starts a builder with the given hash function. `hash_fn` must be
    /// stable for a given `K` value across the table's lifetime -- it is
    /// called on every operation, never cached per-key.
    pub fn new(hash_fn: H) -> Self {
        Self {
            hash_fn,
            print_fn: None,
            release_fn: None,
            initial_width: INITIAL_WIDTH,
            _key: std::marker::PhantomData,
        }
    }

    /// `print_f`: invoked by [`Table::print`] once per live element, in
    /// split-order.
    pub fn print_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        self.print_fn = Some(Box::new(f));
        self
    }

    /// `free_f`: invoked exactly once per value still live at
    /// [`Table`]'s `Drop`, after it has been unlinked from the list. Not
    /// called for values already removed by [`Table::remove`] -- the caller
    /// owns those via the returned `Arc`.
    pub fn release_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(Arc<V>) + Send + Sync + 'static,
    {
        self.release_fn = Some(Box::new(f));
        self
    }

    /// Overrides the directory width the table starts with (as a power of
    /// two exponent, i.e. `initial_width(3)` starts with 8 slots). Mostly
    /// useful in tests that want to force resize behaviour without
    /// inserting thousands of elements first.
    pub fn initial_width(mut self, width: u32) -> Self {
        self.initial_width = width;
        self
    }

    pub fn build(self) -> Table<K, V, H> {
        Table::new(self.hash_fn, self.print_fn, self.release_fn, self.initial_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_width_matches_initial_width_constant() {
        let t: Table<u32, u32, _> = TableBuilder::new(|k: &u32| *k).build();
        assert!(t.is_empty());
    }

    #[test]
    fn custom_initial_width_is_honoured() {
        let t: Table<u32, u32, _> = TableBuilder::new(|k: &u32| *k).initial_width(4).build();
        for k in 0..5 {
            assert!(t.insert(&k, k));
        }
        assert_eq!(t.len(), 5);
    }

    #[test]
    fn print_fn_does_not_panic_when_unset() {
        let t: Table<u32, u32, _> = TableBuilder::new(|k: &u32| *k).build();
        t.insert(&1, 10);
        t.print();
    }
}
