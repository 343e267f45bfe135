//! The fork/call/join surface authors of tasks actually write against.
//!
//! A task is just an `async fn`; the compiler's own suspendable state machine is
//! this runtime's stand-in for a hand-written coroutine frame. `fork`, `call`, and
//! `join` are ordinary `.await`-able values backed by custom `Future` impls whose
//! `poll` is driven by the worker trampoline (see [`crate::worker::drive`]) instead
//! of a generic reactor.

use std::cell::UnsafeCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::frame::{BoxFuture, Frame, FrameKind};
use crate::worker::{current_frame, current_worker, set_next_frame};

/// A boxed, type-erased, thread-mobile task body.
pub type Task<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A write-once cell a forked/called task's return value can be deposited into when
/// the caller does not have a local to borrow (e.g. the value is only needed if the
/// task happens to still be running when some later, unrelated check occurs).
pub struct Eventually<T> {
    slot: UnsafeCell<Option<T>>,
}

impl<T> Default for Eventually<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Eventually<T> {
    pub fn new() -> Self {
        Self {
            slot: UnsafeCell::new(None),
        }
    }

    fn set(&self, value: T) {
        unsafe { *self.slot.get() = Some(value) };
    }

    pub fn into_inner(self) -> Option<T> {
        self.slot.into_inner()
    }

    pub fn get(&self) -> &Option<T> {
        unsafe { &*self.slot.get() }
    }
}

/// Where a forked or called task's return value should be written.
///
/// Four shapes, matching the external interface this runtime exposes to task
/// authors: a plain reference, an `Option` reference (for tasks that might not
/// complete before being abandoned — not currently reachable since this runtime has
/// no cancellation, but kept for interface completeness), an [`Eventually`] slot, or
/// `Discard` for tasks whose result nobody wants.
pub enum ResultSlot<T> {
    Ref(*mut T),
    OptionRef(*mut Option<T>),
    Eventually(*const Eventually<T>),
    Discard,
}

// SAFETY: the pointers inside are only ever dereferenced by the single thread that
// currently owns the frame chain they live on; ownership transfer is serialized by
// the join/steal protocol in `frame`/`worker`, never by concurrent access.
unsafe impl<T> Send for ResultSlot<T> {}

impl<T> ResultSlot<T> {
    fn write(self, value: T) {
        match self {
            ResultSlot::Ref(ptr) => unsafe { *ptr = value },
            ResultSlot::OptionRef(ptr) => unsafe { *ptr = Some(value) },
            ResultSlot::Eventually(ptr) => unsafe { (*ptr).set(value) },
            ResultSlot::Discard => {}
        }
    }
}

fn wrap_child<T, Fut>(slot: ResultSlot<T>, body: Fut) -> BoxFuture
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    Box::pin(async move {
        let value = body.await;
        slot.write(value);
    })
}

/// Forks a child task: it runs immediately on the current thread (work-first), while
/// the calling task's own continuation becomes eligible for another worker to steal.
pub struct Fork<T, Fut> {
    inner: Option<(ResultSlot<T>, Fut)>,
}

pub fn fork<T, Fut>(slot: ResultSlot<T>, body: Fut) -> Fork<T, Fut>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    Fork {
        inner: Some((slot, body)),
    }
}

impl<T, Fut> Future for Fork<T, Fut>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        // SAFETY: `inner`'s future is never polled in place here; it is moved out
        // whole (still unpolled) and re-pinned via `Box::pin` inside `wrap_child`,
        // so no pinning guarantee made to a previously-pinned `Fut` is violated.
        let this = unsafe { self.get_unchecked_mut() };
        match this.inner.take() {
            Some((slot, body)) => {
                let parent = current_frame().expect("fork() called outside a running task");
                let child_future = wrap_child(slot, body);
                let child = Frame::new(FrameKind::Fork, Some(parent), child_future).into_ptr();

                unsafe { parent.as_ref() }.register_fork();
                current_worker().deque.push(parent);
                set_next_frame(child);

                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Calls a child task sequentially: the caller's continuation is never pushed to the
/// deque, so it can never be stolen, and no join bookkeeping is needed for it.
pub struct Call<T, Fut> {
    inner: Option<(ResultSlot<T>, Fut)>,
}

pub fn call<T, Fut>(slot: ResultSlot<T>, body: Fut) -> Call<T, Fut>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    Call {
        inner: Some((slot, body)),
    }
}

impl<T, Fut> Future for Call<T, Fut>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        // SAFETY: see the matching comment in `Fork::poll` above.
        let this = unsafe { self.get_unchecked_mut() };
        match this.inner.take() {
            Some((slot, body)) => {
                let parent = current_frame().expect("call() called outside a running task");
                let child_future = wrap_child(slot, body);
                let child = Frame::new(FrameKind::Call, Some(parent), child_future).into_ptr();
                set_next_frame(child);
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Waits for every fork started by the current task since it began, or since its
/// last `join()`, to complete.
pub struct Join {
    suspended: bool,
}

pub fn join() -> Join {
    Join { suspended: false }
}

impl Future for Join {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.suspended {
            // We were woken by the straggling child that brought outstanding to
            // zero; by construction it is zero now.
            return Poll::Ready(());
        }

        let frame = current_frame().expect("join() called outside a running task");
        let f = unsafe { frame.as_ref() };

        if f.outstanding() == 0 {
            return Poll::Ready(());
        }

        f.join_waiting.store(true, std::sync::atomic::Ordering::Release);

        // Close the race: a child may have completed and decremented to zero
        // between our check above and setting the flag.
        if f.outstanding() == 0 {
            f.join_waiting.store(false, std::sync::atomic::Ordering::Release);
            return Poll::Ready(());
        }

        // At least one outstanding fork was stolen, so some other worker may bring
        // this join home; give up this worker's claim on the stacklet chain until
        // that happens, matching distilled spec §4.3.3's slow path.
        if f.steals.get() > 0 {
            let released = current_worker().take_stack().release();
            f.stacklet.set(Some(released));
        }

        this.suspended = true;
        Poll::Pending
    }
}
