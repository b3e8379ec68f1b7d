//! Log sheet number allocation
//!
//! Each approved occasion in a compiled portfolio carries a log sheet
//! number. Numbers come from one increasing sequence and are bound to their
//! `(unit, criterion, occasion)` key on first use; asking again for the same
//! key returns the same number for the lifetime of the allocator, across
//! cache invalidations and re-scans.

use crate::utils::codes::normalize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
struct AllocatorState {
    next: u64,
    assigned: HashMap<(String, String, u32), u64>,
}

/// Append-only allocator for log sheet numbers
#[derive(Debug)]
pub struct LogSheetAllocator {
    state: Mutex<AllocatorState>,
}

impl LogSheetAllocator {
    /// Allocator whose first number is 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next: first,
                assigned: HashMap::new(),
            }),
        }
    }

    /// Number for an occasion, allocating it on first request.
    ///
    /// The lookup and the allocation happen under one lock, so concurrent
    /// callers for the same key always observe the same number.
    pub fn number_for(&self, unit_code: &str, criterion_code: &str, occasion: u32) -> u64 {
        let key = (normalize(unit_code), normalize(criterion_code), occasion);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(number) = state.assigned.get(&key) {
            return *number;
        }
        let number = state.next;
        state.next += 1;
        state.assigned.insert(key, number);
        number
    }

    /// Previously allocated number, without allocating
    pub fn lookup(&self, unit_code: &str, criterion_code: &str, occasion: u32) -> Option<u64> {
        let key = (normalize(unit_code), normalize(criterion_code), occasion);
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.assigned.get(&key).copied()
    }

    /// Count of numbers issued so far
    pub fn issued(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.assigned.len()
    }

    /// Next number the sequence will hand out
    pub fn next_number(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next
    }
}

impl Default for LogSheetAllocator {
    fn default() -> Self {
        Self::new()
    }
}
