//! Task frame bookkeeping: parent linkage, the join protocol, and the stacklet this
//! frame's allocation lives on.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use crate::error::Error;
use crate::stack::StackletHandle;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The outermost frame of a `sync_wait` call; has no parent.
    Root,
    /// A sequential child: the caller's continuation is never pushed to the deque,
    /// so a `Call` frame can never be stolen.
    Call,
    /// A parallel child: the caller's continuation was pushed to the deque and may
    /// be stolen by another worker before this frame completes.
    Fork,
}

/// A thin, `Copy`-able handle to a heap-allocated [`Frame`]. Frames outlive any
/// single worker's stack frame, so ownership is tracked through the join/steal
/// protocol rather than through Rust's borrow checker — see `DESIGN.md` for why a
/// lifetime-checked design was rejected.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FramePtr(pub NonNull<Frame>);

unsafe impl Send for FramePtr {}

impl FramePtr {
    /// # Safety
    /// The pointee must remain valid for the lifetime of the returned reference.
    pub unsafe fn as_ref(&self) -> &Frame {
        self.0.as_ref()
    }
}

pub struct Frame {
    pub kind: FrameKind,
    pub parent: Cell<Option<FramePtr>>,
    /// Number of this frame's forked children not yet completed.
    pub joins: AtomicU16,
    /// Set once this frame is suspended at a `join()` call, waiting to be woken by
    /// the straggling child whose completion brings `joins` to zero.
    pub join_waiting: AtomicBool,
    /// Count of this frame's forked children that were stolen off the deque rather
    /// than popped back locally. Only ever touched by this frame's current owner,
    /// so a plain `Cell` (not an atomic) suffices, matching distilled spec §3.1.
    pub steals: Cell<u16>,
    /// Set when this frame suspends at `join()` with `steals > 0`: the stacklet
    /// chain its owning worker released on suspend, reacquired by whichever worker
    /// resumes it once the outstanding count reaches zero.
    pub stacklet: Cell<Option<StackletHandle>>,
    pub error: RefCell<Option<Error>>,
    /// The future driving this task's body. Taken by the trampoline while polling
    /// and put back (or dropped, on completion) afterwards.
    pub future: RefCell<Option<BoxFuture>>,
    /// Invoked exactly once, when a `Root` frame completes, to release the waiting
    /// `sync_wait` caller with this task's first observed error, if any.
    pub on_root_complete: RefCell<Option<Box<dyn FnOnce(Option<Error>) + Send>>>,
}

impl Frame {
    pub fn new(kind: FrameKind, parent: Option<FramePtr>, future: BoxFuture) -> Box<Frame> {
        Box::new(Frame {
            kind,
            parent: Cell::new(parent),
            joins: AtomicU16::new(0),
            join_waiting: AtomicBool::new(false),
            steals: Cell::new(0),
            stacklet: Cell::new(None),
            error: RefCell::new(None),
            future: RefCell::new(Some(future)),
            on_root_complete: RefCell::new(None),
        })
    }

    pub fn into_ptr(self: Box<Self>) -> FramePtr {
        FramePtr(NonNull::from(Box::leak(self)))
    }

    /// # Safety
    /// Must be called at most once, after no other reference to this frame remains.
    pub unsafe fn drop_ptr(ptr: FramePtr) {
        drop(Box::from_raw(ptr.0.as_ptr()));
    }

    /// Called by the owner immediately before pushing a forked child's continuation
    /// onto the deque.
    pub fn register_fork(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    /// Called by a child frame reaching completion. Returns `true` if this call
    /// brought the outstanding count to zero *and* the parent is currently blocked
    /// in `join()` — in which case the caller is responsible for resuming it.
    pub fn complete_child(&self) -> bool {
        let prev = self.joins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "joins underflow: child completed without a matching fork");
        prev == 1 && self.join_waiting.load(Ordering::Acquire)
    }

    /// Outstanding forked children right now (owner-only read, used by `join()`'s
    /// fast path).
    pub fn outstanding(&self) -> u16 {
        self.joins.load(Ordering::Acquire)
    }

    /// Called by a thief immediately after stealing this frame's continuation off
    /// a peer's deque, before resuming it.
    pub fn record_steal(&self) {
        self.steals.set(self.steals.get() + 1);
    }

    /// Retains the first error observed for this task; later ones are logged and
    /// dropped, matching distilled spec §7's "first exception wins" policy.
    pub fn set_error_if_first(&self, err: Error) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::warn!("dropping secondary task error; first error already retained");
        }
    }

    pub fn take_error(&self) -> Option<Error> {
        self.error.borrow_mut().take()
    }
}
