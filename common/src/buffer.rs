use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::frame::{Frame, FramePatch, FrameStatus};

pub const DEFAULT_CAPACITY: usize = 50;

/// Buffer handle shared between the capture pipeline, the upload coordinator
/// and the control surface. The lock is never held across an await point.
pub type SharedBuffer = Arc<Mutex<FrameBuffer>>;

/// Newest-first, capacity-bounded list of captured frames.
///
/// Index 0 is always the most recent capture. Inserting past capacity drops
/// the oldest frame silently.
#[derive(Debug)]
pub struct FrameBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
    next_id: u64,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    pub fn shared(capacity: usize) -> SharedBuffer {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Prepend `frame` as `idle` and return its assigned id.
    pub fn add(&mut self, mut frame: Frame) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        frame.id = id;
        frame.status = FrameStatus::Idle;
        self.frames.push_front(frame);

        while self.frames.len() > self.capacity {
            if let Some(evicted) = self.frames.pop_back() {
                debug!(frame_id = evicted.id, "buffer full, dropped oldest frame");
            }
        }
        id
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Apply `patch` to the frame at `index`. Returns false if out of bounds.
    pub fn update(&mut self, index: usize, patch: FramePatch) -> bool {
        match self.frames.get_mut(index) {
            Some(frame) => {
                frame.apply(patch);
                true
            }
            None => false,
        }
    }

    /// Apply `patch` to the frame with `id`, wherever it sits now.
    /// Returns false if the frame has been evicted or cleared.
    pub fn update_by_id(&mut self, id: u64, patch: FramePatch) -> bool {
        match self.frames.iter_mut().find(|f| f.id == id) {
            Some(frame) => {
                frame.apply(patch);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn find(&self, id: u64) -> Option<&Frame> {
        self.frames.iter().find(|f| f.id == id)
    }

    pub fn position(&self, id: u64) -> Option<usize> {
        self.frames.iter().position(|f| f.id == id)
    }

    /// Ids of idle/failed frames, in buffer order.
    pub fn eligible_ids(&self) -> Vec<u64> {
        self.frames
            .iter()
            .filter(|f| f.status.is_eligible())
            .map(|f| f.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
