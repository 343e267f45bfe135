//! Per-worker state and the trampoline that drives task frames to completion.
//!
//! Frames are driven by an explicit loop rather than recursive `Future::poll` calls
//! so that long fork/call chains (the boundary scenario calls for 10^6) do not grow
//! the OS thread's native call stack, and so a frame mid-steal-race is never polled
//! concurrently from two threads.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::config::Config;
use crate::deque::Deque;
use crate::error::Error;
use crate::event_count::EventCount;
use crate::frame::{Frame, FrameKind, FramePtr};
use crate::rng::Xoshiro256StarStar;
use crate::stack::AsyncStack;
use crate::submission::SubmissionQueue;

/// How many released stacks a worker keeps around for reuse before letting the
/// system allocator reclaim them outright.
const STACK_CACHE_CAPACITY: usize = 4;

thread_local! {
    static CURRENT_WORKER: Cell<*const Worker> = Cell::new(std::ptr::null());
    static CURRENT_FRAME: Cell<Option<FramePtr>> = Cell::new(None);
    static NEXT_FRAME: Cell<Option<FramePtr>> = Cell::new(None);
}

/// # Panics
/// Panics if called outside a running worker thread (i.e. outside `fork`/`call`/`join`).
pub(crate) fn current_worker() -> &'static Worker {
    CURRENT_WORKER.with(|c| {
        let ptr = c.get();
        assert!(!ptr.is_null(), "called outside a worker thread");
        unsafe { &*ptr }
    })
}

pub(crate) fn current_frame() -> Option<FramePtr> {
    CURRENT_FRAME.with(|c| c.get())
}

pub(crate) fn set_next_frame(frame: FramePtr) {
    NEXT_FRAME.with(|c| c.set(Some(frame)));
}

fn take_next_frame() -> Option<FramePtr> {
    NEXT_FRAME.with(|c| c.take())
}

fn noop_raw_waker() -> RawWaker {
    fn clone(_: *const ()) -> RawWaker {
        noop_raw_waker()
    }
    fn no_op(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
    RawWaker::new(std::ptr::null(), &VTABLE)
}

/// A waker that does nothing: this runtime never relies on `Waker::wake`, since
/// resumption is driven explicitly by the fork/call/join and steal protocol rather
/// than by a generic async reactor.
pub(crate) fn noop_waker() -> Waker {
    unsafe { Waker::from_raw(noop_raw_waker()) }
}

/// Per-worker context: one deque, one submission queue, one RNG stream, one active
/// async stack plus a small cache of spares, and the set of peers it may steal from.
pub struct Worker {
    pub(crate) id: usize,
    pub(crate) deque: Deque<FramePtr>,
    pub(crate) submissions: SubmissionQueue,
    pub(crate) peers: Vec<Arc<Worker>>,
    pub(crate) event_count: Arc<EventCount>,
    pub(crate) stop: Arc<std::sync::atomic::AtomicBool>,
    pub(crate) config: Config,
    stack: RefCell<AsyncStack>,
    stack_cache: RefCell<Vec<AsyncStack>>,
    rng: RefCell<Xoshiro256StarStar>,
}

// SAFETY: the `RefCell` fields above are only ever read or written by the single
// worker thread that owns this `Worker` (via `current_worker()`/`self` inside
// `run()`'s own call chain). Other threads only ever reach a peer's `Worker`
// through `deque`/`submissions`/`event_count`/`stop`, all of which are already
// safe for concurrent access in their own right, so no peer thread ever touches
// these cells.
unsafe impl Sync for Worker {}

impl Worker {
    pub fn new(
        id: usize,
        rng: Xoshiro256StarStar,
        event_count: Arc<EventCount>,
        stop: Arc<std::sync::atomic::AtomicBool>,
        config: Config,
    ) -> Self {
        let stack = AsyncStack::new(config.fibre_init_size).expect("initial worker stack allocation");
        Self {
            id,
            deque: Deque::new(),
            submissions: SubmissionQueue::new(),
            peers: Vec::new(),
            event_count,
            stop,
            stack: RefCell::new(stack),
            stack_cache: RefCell::new(Vec::with_capacity(STACK_CACHE_CAPACITY)),
            config,
            rng: RefCell::new(rng),
        }
    }

    /// Swaps out the active stack for a cached or freshly-allocated one, returning
    /// the stack that had been active. Called when a task suspends at `join()` and
    /// must give up ownership of its lineage's stacklet chain.
    pub(crate) fn take_stack(&self) -> AsyncStack {
        let replacement = match self.stack_cache.borrow_mut().pop() {
            Some(cached) => cached,
            None => AsyncStack::new(self.config.fibre_init_size).expect("stack allocation for cache replacement"),
        };
        self.stack.replace(replacement)
    }

    /// Installs `stack` as the active stack, retiring the previous one to the cache
    /// (or dropping it, freeing its stacklets, once the cache is full). Called when
    /// resuming a frame that released its stack at a prior `join()` suspension.
    ///
    /// Per distilled spec §4.5: the stack being displaced must already be empty —
    /// this worker gave up ownership of any lineage it still had live work on before
    /// it was ever eligible to acquire someone else's. A non-empty stack here means
    /// the release/acquire handshake let two lineages share a worker's stack at once.
    pub(crate) fn install_stack(&self, stack: AsyncStack) {
        let previous = self.stack.replace(stack);
        if !previous.is_empty() {
            let err = Error::InvariantViolation(
                "acquired a stolen frame's stacklet while the active stack was not empty",
            );
            panic!("{err}");
        }
        let mut cache = self.stack_cache.borrow_mut();
        if cache.len() < STACK_CACHE_CAPACITY {
            cache.push(previous);
        }
    }

    fn random_peer(&self) -> Option<&Arc<Worker>> {
        if self.peers.is_empty() {
            return None;
        }
        let idx = self.rng.borrow_mut().gen_below(self.peers.len());
        Some(&self.peers[idx])
    }

    fn has_work(&self) -> bool {
        !self.deque.is_empty()
            || !self.submissions.is_empty()
            || self.peers.iter().any(|p| !p.deque.is_empty())
    }

    /// The main worker loop (`busy_pool` variant): run local work, steal when idle,
    /// sleep on the event-count only once repeated steal attempts fail.
    pub fn run(self: &Arc<Self>) {
        CURRENT_WORKER.with(|c| c.set(Arc::as_ptr(self)));

        loop {
            if let Some(frame) = self.deque.pop() {
                tracing::trace!(worker = self.id, "running local frame");
                drive(frame);
                continue;
            }

            if let Some(frame) = self.submissions.pop() {
                tracing::trace!(worker = self.id, "running submitted frame");
                drive(frame);
                continue;
            }

            // Local deque and submissions are both drained; only now is it safe to
            // honor a shutdown request without abandoning queued work.
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            if let Some(frame) = self.try_steal() {
                drive(frame);
                continue;
            }

            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            self.event_count
                .await_condition(|| self.stop.load(Ordering::Relaxed) || self.has_work());
        }

        CURRENT_WORKER.with(|c| c.set(std::ptr::null()));
    }

    fn try_steal(&self) -> Option<FramePtr> {
        for _ in 0..self.config.steal_attempts {
            if self.stop.load(Ordering::Relaxed) {
                return None;
            }
            let Some(peer) = self.random_peer() else {
                return None;
            };
            match peer.deque.steal() {
                crate::deque::Steal::Success(frame) => {
                    tracing::trace!(worker = self.id, victim = peer.id, "stole frame");
                    unsafe { frame.as_ref() }.record_steal();
                    return Some(frame);
                }
                crate::deque::Steal::Empty => {}
                crate::deque::Steal::LostRace => {}
            }
            std::hint::spin_loop();
        }
        None
    }
}

/// Runs `frame` to completion on the calling thread without any peer workers,
/// draining anything left on the local deque afterward. Used by [`crate::pool::InlineScheduler`].
pub(crate) fn drive_inline(worker: &Arc<Worker>, frame: FramePtr) {
    CURRENT_WORKER.with(|c| c.set(Arc::as_ptr(worker)));
    drive(frame);
    while let Some(next) = worker.deque.pop() {
        drive(next);
    }
    CURRENT_WORKER.with(|c| c.set(std::ptr::null()));
}

/// Drives `frame`'s future, and whatever frames it chains into via fork/call/join,
/// until there is nothing left to run on this thread for this lineage.
pub(crate) fn drive(start: FramePtr) {
    let mut frame = start;
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    loop {
        CURRENT_FRAME.with(|c| c.set(Some(frame)));

        let f = unsafe { frame.as_ref() };
        let poll_result = {
            let mut slot = f.future.borrow_mut();
            let fut: &mut Pin<Box<dyn Future<Output = ()> + Send>> =
                slot.as_mut().expect("frame polled after completion");
            match panic::catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx))) {
                Ok(poll) => poll,
                Err(payload) => {
                    if current_worker().config.eager_error_logging {
                        tracing::error!("task frame panicked");
                    }
                    f.set_error_if_first(Error::Task(payload));
                    Poll::Ready(())
                }
            }
        };

        match poll_result {
            Poll::Pending => match take_next_frame() {
                Some(next) => {
                    frame = next;
                    continue;
                }
                None => return,
            },
            Poll::Ready(()) => {
                f.future.borrow_mut().take();
                match finalize(frame) {
                    Some(next) => {
                        frame = next;
                        continue;
                    }
                    None => return,
                }
            }
        }
    }
}

fn finalize(frame: FramePtr) -> Option<FramePtr> {
    let f = unsafe { frame.as_ref() };

    match f.kind {
        FrameKind::Root => {
            let err = f.take_error();
            if let Some(callback) = f.on_root_complete.borrow_mut().take() {
                callback(err);
            }
            unsafe { Frame::drop_ptr(frame) };
            None
        }
        FrameKind::Call => {
            let parent_ptr = f
                .parent
                .get()
                .expect("a Call frame always has a parent; it is never the root");
            let child_err = f.take_error();
            unsafe { Frame::drop_ptr(frame) };
            if let Some(err) = child_err {
                unsafe { parent_ptr.as_ref() }.set_error_if_first(err);
            }
            Some(parent_ptr)
        }
        FrameKind::Fork => {
            let parent_ptr = f
                .parent
                .get()
                .expect("a Fork frame always has a parent; it is never the root");
            let child_err = f.take_error();
            unsafe { Frame::drop_ptr(frame) };

            let parent = unsafe { parent_ptr.as_ref() };
            if let Some(err) = child_err {
                parent.set_error_if_first(err);
            }
            let woke_joiner = parent.complete_child();

            // Fast path: nobody stole the parent's continuation off this worker's
            // own deque, so this thread can just keep running it directly.
            if let Some(popped) = current_worker().deque.pop() {
                if popped == parent_ptr {
                    return Some(parent_ptr);
                }
                current_worker().deque.push(popped);
            }

            if woke_joiner {
                parent.join_waiting.store(false, Ordering::Release);
                if let Some(handle) = parent.stacklet.take() {
                    current_worker().install_stack(AsyncStack::acquire(handle));
                }
                Some(parent_ptr)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_waker_can_be_cloned_and_dropped() {
        let waker = noop_waker();
        let cloned = waker.clone();
        cloned.wake();
        waker.wake_by_ref();
    }
}
