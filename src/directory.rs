use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::node::Node;

/// The bucket directory for a given width: `2^width` slots, each either
/// null (bucket not yet materialised) or a pointer to the unique sentinel
/// whose hash equals the slot index (`spec.md` §3, invariant 2).
///
/// A `DirArray` is never mutated in place once built by the resize winner:
/// a resize builds a brand new, fully populated array and publishes it with
/// one pointer swap (`Table::directory`), retiring the old one.
pub(crate) struct DirArray<V> {
    slots: Box<[AtomicPtr<Node<V>>]>,
}

impl<V> DirArray<V> {
    pub(crate) fn with_width(width: u32) -> Self {
        let len = 1usize << width;
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || AtomicPtr::new(ptr::null_mut()));
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn get(&self, index: usize) -> *mut Node<V> {
        self.slots[index].load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, index: usize, node: *mut Node<V>) {
        self.slots[index].store(node, Ordering::Release);
    }
}

/* SAFETY: slots are non-owning atomic pointers into nodes the table's own
 * list/retired-list own; sharing a DirArray across threads is sound exactly
 * like sharing the node pointers it holds. */
unsafe impl<V: Send + Sync> Send for DirArray<V> {}
unsafe impl<V: Send + Sync> Sync for DirArray<V> {}

/// Bit-reverses a 32-bit value using the same byte-wise lookup table as the
/// original C `hashtable_uint32_bit_reverse` (ported verbatim; it is a pure
/// function with nothing concurrency-related to redesign).
#[inline]
pub(crate) fn bit_reverse(val: u32) -> u32 {
    const fn r2(n: u8) -> [u8; 4] {
        [n, n | (2 << 6), n | (1 << 6), n | (3 << 6)]
    }
    const fn r4(n: u8) -> [u8; 16] {
        let a = r2(n);
        let b = r2(n | (2 << 4));
        let c = r2(n | (1 << 4));
        let d = r2(n | (3 << 4));
        [
            a[0], a[1], a[2], a[3], b[0], b[1], b[2], b[3], c[0], c[1], c[2], c[3], d[0], d[1],
            d[2], d[3],
        ]
    }
    const fn r6(n: u8) -> [u8; 64] {
        let a = r4(n);
        let b = r4(n | (2 << 2));
        let c = r4(n | (1 << 2));
        let d = r4(n | (3 << 2));
        let mut out = [0u8; 64];
        let mut i = 0;
        while i < 16 {
            out[i] = a[i];
            out[i + 16] = b[i];
            out[i + 32] = c[i];
            out[i + 48] = d[i];
            i += 1;
        }
        out
    }
    const fn reversed_table() -> [u8; 256] {
        let a = r6(0);
        let b = r6(2);
        let c = r6(1);
        let d = r6(3);
        let mut out = [0u8; 256];
        let mut i = 0;
        while i < 64 {
            out[i] = a[i];
            out[i + 64] = b[i];
            out[i + 128] = c[i];
            out[i + 192] = d[i];
            i += 1;
        }
        out
    }
    static REVERSED: [u8; 256] = reversed_table();

    let bytes = val.to_le_bytes();
    let reversed = [
        REVERSED[bytes[3] as usize],
        REVERSED[bytes[2] as usize],
        REVERSED[bytes[1] as usize],
        REVERSED[bytes[0] as usize],
    ];
    u32::from_le_bytes(reversed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_reverse_known_values() {
        assert_eq!(bit_reverse(0), 0);
        assert_eq!(bit_reverse(1), 0x8000_0000);
        assert_eq!(bit_reverse(0x8000_0000), 1);
        assert_eq!(bit_reverse(0xFFFF_FFFF), 0xFFFF_FFFF);
    }

    #[test]
    fn bit_reverse_is_involution() {
        for v in [0u32, 1, 2, 3, 12345, 0xDEAD_BEEF, u32::MAX] {
            assert_eq!(bit_reverse(bit_reverse(v)), v);
        }
    }

    #[test]
    fn fresh_directory_is_all_null() {
        let dir = DirArray::<u32>::with_width(2);
        assert_eq!(dir.len(), 4);
        for i in 0..4 {
            assert!(dir.get(i).is_null());
        }
    }
}
