//! Identifier allocators.
//!
//! Both counters start at 0, increase by one per allocation and wrap to 0
//! right after the maximum value of their wire width. Atomic `fetch_add`
//! already wraps on overflow, so the wire width is encoded in the atomic type.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

/// Allocates 32-bit transaction ids stamped into request envelopes.
#[derive(Debug, Default)]
pub struct TransactionIds {
    next: AtomicU32,
}

impl TransactionIds {
    /// Allocator starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Allocator whose first id is `first`.
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Next transaction id; wraps from `u32::MAX` to 0.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Allocates 16-bit correlation ids carried in every frame header.
#[derive(Debug, Default)]
pub struct CorrelationIds {
    next: AtomicU16,
}

impl CorrelationIds {
    /// Allocator starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Allocator whose first id is `first`.
    pub fn starting_at(first: u16) -> Self {
        Self {
            next: AtomicU16::new(first),
        }
    }

    /// Next correlation id; wraps from `u16::MAX` to 0.
    pub fn next(&self) -> u16 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
