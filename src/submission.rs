//! External task injection: a per-worker queue a caller (or another worker) can push
//! a root frame onto, independent of the work-stealing deque that only the owning
//! worker touches.
//!
//! Grounded on the teacher's `BlockingStack` pattern (`examples/ha1tch-ual/rual/src/sync.rs`):
//! a `parking_lot::Mutex`-guarded collection, rather than a hand-rolled lock-free
//! intrusive list. Unlike `BlockingStack`, this queue has no condvar of its own —
//! waiting for new submissions is the pool's shared [`crate::event_count::EventCount`]'s
//! job, not this queue's.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::frame::FramePtr;

pub struct SubmissionQueue {
    queue: Mutex<VecDeque<FramePtr>>,
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, frame: FramePtr) {
        self.queue.lock().push_back(frame);
    }

    pub fn pop(&self) -> Option<FramePtr> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
