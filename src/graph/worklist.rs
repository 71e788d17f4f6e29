//! Worklist of bytecode offsets.
//!
//! Each offset of an instruction stream moves through three states exactly once:
//!
//! ```text
//! Unvisited --queue()--> Queued --next()--> Visited
//! ```
//!
//! Queuing an offset that is already queued or visited does nothing, which guarantees that the
//! handler for an offset runs at most once and that no offset receives two builder nodes. The
//! two state bits per offset live in compact word-sized bitfields.

use std::collections::VecDeque;

use crate::{Error, Result};

/// State of a single offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetState {
    /// Never referenced
    Unvisited,
    /// Waiting in the queue
    Queued,
    /// Pulled from the queue and handled
    Visited,
}

/// Fixed-size bitfield over offsets.
#[derive(Debug, Clone)]
struct OffsetBits {
    data: Vec<usize>,
}

impl OffsetBits {
    const BITS: usize = usize::BITS as usize;

    fn new(elements: usize) -> Self {
        Self {
            data: vec![0; elements.div_ceil(Self::BITS)],
        }
    }

    fn get(&self, element: usize) -> bool {
        let shift = u32::try_from(element % Self::BITS).unwrap_or(0);
        self.data
            .get(element / Self::BITS)
            .is_some_and(|word| word.wrapping_shr(shift) & 1 != 0)
    }

    fn set(&mut self, element: usize) {
        let shift = u32::try_from(element % Self::BITS).unwrap_or(0);
        if let Some(word) = self.data.get_mut(element / Self::BITS) {
            *word |= 1_usize.wrapping_shl(shift);
        }
    }

    fn count(&self) -> usize {
        self.data.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// FIFO worklist over the offsets `0..len` of one instruction stream.
#[derive(Debug, Clone)]
pub struct OffsetWorklist {
    queue: VecDeque<u32>,
    queued: OffsetBits,
    visited: OffsetBits,
    len: usize,
}

impl OffsetWorklist {
    /// Creates a worklist over a stream of `len` bytes with nothing queued.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: OffsetBits::new(len),
            visited: OffsetBits::new(len),
            len,
        }
    }

    /// Number of offsets covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current state of `offset`.
    #[must_use]
    pub fn state(&self, offset: u32) -> OffsetState {
        let offset = offset as usize;
        if self.visited.get(offset) {
            OffsetState::Visited
        } else if self.queued.get(offset) {
            OffsetState::Queued
        } else {
            OffsetState::Unvisited
        }
    }

    /// Queues `offset` unless it was queued or visited before.
    ///
    /// Returns `true` if the offset was newly queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OffsetOutOfBounds`] for offsets outside the stream.
    pub fn queue(&mut self, offset: u32) -> Result<bool> {
        if offset as usize >= self.len {
            return Err(Error::OffsetOutOfBounds {
                offset: i64::from(offset),
                len: self.len,
            });
        }
        if self.state(offset) != OffsetState::Unvisited {
            return Ok(false);
        }
        self.queued.set(offset as usize);
        self.queue.push_back(offset);
        Ok(true)
    }

    /// Pulls the next queued offset and marks it visited.
    pub fn next(&mut self) -> Option<u32> {
        let offset = self.queue.pop_front()?;
        self.visited.set(offset as usize);
        Some(offset)
    }

    /// Number of offsets visited so far.
    #[must_use]
    pub fn visited_count(&self) -> usize {
        self.visited.count()
    }

    /// Returns `true` once no offset is waiting.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.queue.is_empty()
    }
}
