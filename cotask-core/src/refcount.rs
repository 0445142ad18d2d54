//! Two-bit-encoded reference counting, ported from `libtask/refcount.h`.
//!
//! The low bit of the word records whether the object's storage is
//! heap-allocated (and therefore needs `free`-ing once the count drops to
//! zero) or not. The remaining bits are the actual reference count, so
//! every increment/decrement moves the word by 2 rather than 1. A stack
//! object starts at 2 (one reference, heap bit clear); a heap object
//! starts at 3 (one reference, heap bit set).
//!
//! `Task` and `TaskPool` are the two users: both are heap-allocated and
//! managed through raw pointers rather than `Arc`, so this type is what
//! actually decides when their destructors run, not an incidental
//! decoration around `Arc`.

use crate::atomic::Atomic32;

const HEAP_BIT: u32 = 1;

pub(crate) struct RefCount(Atomic32);

/// What the caller must do after a decrement reaches zero.
pub(crate) enum Decremented {
    /// References remain; `.0` is the count observed after decrementing.
    Alive(u32),
    /// This was the last reference. The destructor must run; `free_storage`
    /// tells the caller whether the backing allocation must also be freed
    /// (it will always be `true` for this crate's heap-only users, but the
    /// field is kept to mirror the source's stack-vs-heap distinction and
    /// to keep the type usable for a hypothetical stack-allocated object).
    Finalize { free_storage: bool },
}

impl RefCount {
    /// A heap-allocated object starting at one reference.
    pub(crate) fn new_heap() -> Self {
        RefCount(Atomic32::new(3))
    }

    /// A stack-allocated object starting at one reference. Unused by the
    /// current Task/TaskPool (both are heap objects) but kept so the
    /// primitive matches the source's documented contract in full.
    #[cfg(test)]
    pub(crate) fn new_stack() -> Self {
        RefCount(Atomic32::new(2))
    }

    pub(crate) fn count(&self) -> u32 {
        self.0.load() >> 1
    }

    pub(crate) fn inc(&self) {
        self.0.add_fetch(2);
    }

    /// Decrement by one reference. Panics if the pre-decrement count was
    /// already zero -- a well-formed caller's decrements always observe
    /// a pre-decrement value >= 1.
    pub(crate) fn dec(&self) -> Decremented {
        let word = self.0.sub_fetch(2);
        // sub_fetch wraps on underflow; a well-formed caller never sees
        // this, so treat it as the structural-invariant violation it is.
        assert!(
            (word as i32) >= -1,
            "refcount underflow: decremented below zero"
        );
        match word {
            0 => Decremented::Finalize {
                free_storage: false,
            },
            1 => Decremented::Finalize { free_storage: true },
            count => Decremented::Alive(count >> 1),
        }
    }
}
