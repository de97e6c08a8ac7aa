//! Per-buffer bookkeeping

use std::collections::VecDeque;

use super::HostPtr;
use crate::backend::CompletionEvent;

/// Lifecycle position of a tracked block
///
/// A block that has been returned to the device is no longer tracked, so
/// the terminal state shows up as `None` from the allocator's queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Held by a caller
    Allocated,
    /// Released, but device work recorded against it has not finished
    FreePending,
    /// Released, event-free and listed in the available index
    FreeAvailable,
}

/// One pinned host buffer
#[derive(Debug)]
pub(crate) struct Block<E> {
    ptr: HostPtr,
    size: usize,
    allocated: bool,
    /// FIFO of completion handles, oldest first
    events: VecDeque<E>,
}

impl<E: CompletionEvent> Block<E> {
    /// Track a freshly allocated buffer
    pub(crate) fn new(ptr: HostPtr, size: usize) -> Self {
        Self {
            ptr,
            size,
            allocated: true,
            events: VecDeque::new(),
        }
    }

    pub(crate) fn ptr(&self) -> HostPtr {
        self.ptr
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub(crate) fn set_allocated(&mut self, allocated: bool) {
        self.allocated = allocated;
    }

    pub(crate) fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub(crate) fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn push_event(&mut self, event: E) {
        self.events.push_back(event);
    }

    /// Free and event-free: belongs in the available index
    pub(crate) fn is_reusable(&self) -> bool {
        !self.allocated && self.events.is_empty()
    }

    /// Index key; sizes collide, addresses do not
    pub(crate) fn key(&self) -> (usize, usize) {
        (self.size, self.ptr.addr())
    }

    /// Pop completed events from the front, stopping at the first one
    /// still in flight
    ///
    /// Events in one queue are assumed to complete in submission order, so
    /// an incomplete head hides whatever finished behind it until the next
    /// sweep. Returns the number of events retired.
    pub(crate) fn process_events(&mut self) -> usize {
        let mut retired = 0;
        while let Some(event) = self.events.front() {
            if !event.is_complete() {
                break;
            }
            self.events.pop_front();
            retired += 1;
        }
        retired
    }

    pub(crate) fn state(&self) -> BlockState {
        if self.allocated {
            BlockState::Allocated
        } else if self.has_events() {
            BlockState::FreePending
        } else {
            BlockState::FreeAvailable
        }
    }
}
