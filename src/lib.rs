//! A concurrent, lock-free hash table built on a split-ordered list
//! (Shalev & Shavit, "Split-Ordered Lists: Lock-Free Extensible Hash
//! Tables"). Lookups, insertions and removals never take a mutual-exclusion
//! lock on their fast path; the only point of contention is a single
//! test-and-set flag guarding the (rare) incremental directory resize.
//!
//! ```
//! use splitlist::TableBuilder;
//!
//! let table = TableBuilder::new(|k: &u32| *k).build();
//! assert!(table.insert(&1, "one"));
//! assert_eq!(table.get(&1).map(|v| *v), Some("one"));
//! assert_eq!(table.remove(&1).map(|v| *v), Some("one"));
//! ```
//!
//! Elements are identified by the 32-bit hash the caller's function
//! produces for a key, not by the key itself -- see [`Table`]'s docs.

mod builder;
mod directory;
mod list;
mod node;
mod retired;
mod table;

pub use builder::TableBuilder;
pub use table::Table;
