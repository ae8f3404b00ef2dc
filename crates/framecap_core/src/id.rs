//! Identifiers for captured objects.
//!
//! Resource IDs are plain integers handed out by an [`IdAllocator`]. An
//! allocator never hands out the same value twice, and zero is reserved as
//! the null ID.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Resource identifier - identifies one captured object for a whole session
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ResourceId(u64);

impl ResourceId {
    /// The null ID, returned when a lookup has no mapping
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Create from a raw value read from a stream
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Allocate a fresh ID from the process-wide allocator
    #[must_use]
    pub fn allocate() -> Self {
        IdAllocator::global().allocate()
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the null ID
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "ResID::NULL")
        } else {
            write!(f, "ResID::{}", self.0)
        }
    }
}

static GLOBAL_ALLOCATOR: IdAllocator = IdAllocator::starting_at(1);

/// Monotonic resource ID allocator.
///
/// The process-wide instance backs [`ResourceId::allocate`]. Private
/// allocators exist so that a capture can be made reproducible byte for
/// byte; IDs from a private allocator are unique only within the manager
/// that owns it.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first ID is `first` (clamped to 1)
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        let first = if first == 0 { 1 } else { first };
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// The process-wide allocator
    #[must_use]
    pub fn global() -> &'static IdAllocator {
        &GLOBAL_ALLOCATOR
    }

    /// Hand out the next ID
    pub fn allocate(&self) -> ResourceId {
        ResourceId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The ID the next call to `allocate` would return
    #[must_use]
    pub fn peek(&self) -> ResourceId {
        ResourceId(self.next.load(Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// Opaque handle to an object owned by the native backend.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NativeHandle(u64);

impl NativeHandle {
    /// The null handle
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Wrap a raw backend handle value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the null handle
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "native_{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_allocation_unique() {
        let a = ResourceId::allocate();
        let b = ResourceId::allocate();
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert!(!b.is_null());
    }

    #[test]
    fn test_private_allocator_sequence() {
        let alloc = IdAllocator::starting_at(10);
        assert_eq!(alloc.peek(), ResourceId::from_raw(10));
        assert_eq!(alloc.allocate(), ResourceId::from_raw(10));
        assert_eq!(alloc.allocate(), ResourceId::from_raw(11));
    }

    #[test]
    fn test_zero_start_is_clamped() {
        let alloc = IdAllocator::starting_at(0);
        assert!(!alloc.allocate().is_null());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(ResourceId::null().to_string(), "ResID::NULL");
        assert_eq!(ResourceId::from_raw(7).to_string(), "ResID::7");
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let alloc = std::sync::Arc::new(IdAllocator::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || (0..250).map(|_| alloc.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_native_handle_null() {
        assert!(NativeHandle::null().is_null());
        assert!(!NativeHandle::from_raw(3).is_null());
    }
}
