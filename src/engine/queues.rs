//! Buffer collections shared between the API threads and the worker

use crate::buffer::{BufferHandle, BufferRequestConfig, BufferWrapper};
use crate::surface::Surface;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Input-queue domain
#[derive(Default)]
pub(crate) struct InputQueue {
    /// Consumer end the engine acquires from
    pub surface: Option<Arc<dyn Surface>>,
    /// Producer end handed to upstream
    pub producer: Option<Arc<dyn Surface>>,
    /// Acquired input buffers not yet paired (FIFO)
    pub available: VecDeque<BufferWrapper>,
}

impl InputQueue {
    /// Empty the queue, returning the real buffers (the EOS sentinel is dropped)
    pub fn take_queued(&mut self) -> Vec<BufferWrapper> {
        self.available.drain(..).filter(|w| !w.is_eos()).collect()
    }
}

/// Output/render-queue domain.
///
/// Every output buffer the pipeline holds sits in exactly one of
/// `available`, `delivered` and `in_flight`.
#[derive(Default)]
pub(crate) struct OutputQueue {
    /// Ready to receive a transform result (FIFO)
    pub available: VecDeque<BufferWrapper>,
    /// Handed to the client, awaiting `release_output_buffer`
    pub delivered: HashMap<u32, BufferWrapper>,
    /// Flushed to the output surface, oldest first
    pub in_flight: VecDeque<BufferWrapper>,
    /// Buffers requested from (or attached to) the current output surface
    pub attached: HashMap<u32, BufferHandle>,
    /// Downstream releases not yet reclaimed by the worker
    pub pending_releases: usize,
}

impl OutputQueue {
    /// Return every delivered buffer to `available`
    pub fn reclaim_delivered(&mut self) -> usize {
        let mut reclaimed: Vec<_> = self.delivered.drain().map(|(_, w)| w).collect();
        reclaimed.sort_by_key(|w| w.seq());
        let count = reclaimed.len();
        for mut wrapper in reclaimed {
            wrapper.flag = Default::default();
            self.available.push_back(wrapper);
        }
        count
    }

    /// Position of the in-flight entry to replace with a buffer `seq` that
    /// came back from the surface: the same buffer if tracked, else the oldest
    pub fn in_flight_slot(&self, seq: u32) -> Option<usize> {
        if self.in_flight.is_empty() {
            return None;
        }
        Some(
            self.in_flight
                .iter()
                .position(|w| w.seq() == Some(seq))
                .unwrap_or(0),
        )
    }

    /// Count one downstream release; false if nothing is in flight to reclaim
    pub fn note_release(&mut self) -> bool {
        if self.pending_releases >= self.in_flight.len() {
            return false;
        }
        self.pending_releases += 1;
        true
    }

    /// Take one pending release, dropping the count if nothing is in flight
    pub fn take_release(&mut self) -> bool {
        if self.in_flight.is_empty() {
            self.pending_releases = 0;
        }
        if self.pending_releases == 0 {
            return false;
        }
        self.pending_releases -= 1;
        true
    }

    pub fn clear(&mut self) {
        self.pending_releases = 0;
        self.available.clear();
        self.delivered.clear();
        self.in_flight.clear();
        self.attached.clear();
    }
}

/// Output-surface-swap domain
#[derive(Default)]
pub(crate) struct SurfaceSlot {
    /// Current output surface (producer role)
    pub surface: Option<Arc<dyn Surface>>,
    /// Request template derived from the first input buffer
    pub template: Option<BufferRequestConfig>,
}

/// Sizes of the engine's buffer collections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub input_available: usize,
    pub output_available: usize,
    pub delivered: usize,
    pub in_flight: usize,
    pub attached: usize,
}

impl QueueCounts {
    /// Output buffers the pipeline currently holds
    pub fn output_total(&self) -> usize {
        self.output_available + self.delivered + self.in_flight
    }
}
