//! The scheduler: a fixed pool of worker threads, external submission, and the
//! blocking `sync_wait` entry point external callers use to run a root task.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::config::Config;
use crate::error::Error;
use crate::event_count::EventCount;
use crate::frame::{Frame, FrameKind, FramePtr};
use crate::rng::Xoshiro256StarStar;
use crate::worker::Worker;

/// What any scheduler must provide so fork/call/join-based tasks can run on it
/// (distilled spec §6.2).
pub trait Scheduler {
    /// The number of worker threads this scheduler can run tasks on concurrently.
    fn max_threads(&self) -> usize;
    /// Enqueues an externally-submitted root frame for execution.
    fn schedule(&self, root: FramePtr);
}

/// A fixed pool of OS worker threads running the `busy_pool` loop described in
/// `DESIGN.md` (open question OQ-3): workers exhaust local work, then repeatedly
/// attempt random steals, then park on the shared event-count.
pub struct Pool {
    workers: Vec<Arc<Worker>>,
    stop: Arc<AtomicBool>,
    event_count: Arc<EventCount>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

impl Pool {
    /// Spawns `n` worker threads using configuration read from the environment
    /// (`config::Config::from_env`).
    pub fn new(n: usize) -> Self {
        Self::with_config(n, Config::from_env())
    }

    /// Spawns `n` worker threads using an explicit configuration, bypassing the
    /// environment (useful for tests that want deterministic stack sizes).
    pub fn with_config(n: usize, config: Config) -> Self {
        assert!(n > 0, "a pool needs at least one worker thread");

        let stop = Arc::new(AtomicBool::new(false));
        let event_count = Arc::new(EventCount::new());
        let root_rng = Xoshiro256StarStar::seed_from_u64(0x5EED_1234);

        let mut workers: Vec<Arc<Worker>> = (0..n)
            .map(|id| {
                let mut rng = root_rng.clone();
                for _ in 0..id {
                    rng.long_jump();
                }
                Arc::new(Worker::new(
                    id,
                    rng,
                    event_count.clone(),
                    stop.clone(),
                    config.clone(),
                ))
            })
            .collect();

        for i in 0..n {
            let peers: Vec<Arc<Worker>> = workers
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, w)| w.clone())
                .collect();
            Arc::get_mut(&mut workers[i])
                .expect("no other references to a freshly constructed worker exist yet")
                .peers = peers;
        }

        let handles = workers
            .iter()
            .cloned()
            .map(|w| {
                let id = w.id;
                std::thread::Builder::new()
                    .name(format!("forkpool-worker-{id}"))
                    .spawn(move || w.run())
                    .expect("failed to spawn worker thread")
            })
            .collect();

        tracing::debug!(workers = n, "pool started");

        Self {
            workers,
            stop,
            event_count,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
        }
    }
}

impl Scheduler for Pool {
    fn max_threads(&self) -> usize {
        self.workers.len()
    }

    fn schedule(&self, root: FramePtr) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[idx].submissions.push(root);
        self.event_count.notify_one();
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        tracing::debug!("pool shutting down");
        self.stop.store(true, Ordering::Relaxed);
        self.event_count.notify_all();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

/// A single-thread, immediate-resume scheduler with no real parallelism: every
/// submission runs to completion on the calling thread before `schedule` returns.
/// Matches distilled spec §6.2's "minimal inline scheduler" requirement for tests
/// that want deterministic execution without paying for OS threads.
pub struct InlineScheduler {
    worker: Arc<Worker>,
}

impl InlineScheduler {
    pub fn new() -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let event_count = Arc::new(EventCount::new());
        let worker = Arc::new(Worker::new(
            0,
            Xoshiro256StarStar::seed_from_u64(0x1DEA),
            event_count,
            stop,
            Config::default(),
        ));
        Self { worker }
    }
}

impl Default for InlineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for InlineScheduler {
    fn max_threads(&self) -> usize {
        1
    }

    fn schedule(&self, root: FramePtr) {
        crate::worker::drive_inline(&self.worker, root);
    }
}

/// Blocks the calling thread until `fut` completes on `scheduler`, returning its
/// value or the first task error observed anywhere in its fork tree (distilled
/// spec §4.6 / §6.1).
pub fn sync_wait<S, T, Fut>(scheduler: &S, fut: Fut) -> Result<T, Error>
where
    S: Scheduler,
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let result: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    let err_slot: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    let done = Arc::new((Mutex::new(false), Condvar::new()));

    let result_writer = result.clone();
    let body = async move {
        let value = fut.await;
        *result_writer.lock() = Some(value);
    };

    let frame = Frame::new(FrameKind::Root, None, Box::pin(body)).into_ptr();

    let err_slot_cb = err_slot.clone();
    let done_cb = done.clone();
    unsafe { frame.as_ref() }
        .on_root_complete
        .borrow_mut()
        .replace(Box::new(move |err| {
            *err_slot_cb.lock() = err;
            let (lock, cvar) = &*done_cb;
            *lock.lock() = true;
            cvar.notify_all();
        }));

    scheduler.schedule(frame);

    let (lock, cvar) = &*done;
    let mut guard = lock.lock();
    while !*guard {
        cvar.wait(&mut guard);
    }
    drop(guard);

    let maybe_err = err_slot.lock().take();
    match maybe_err {
        Some(err) => Err(err),
        None => {
            let value = result
                .lock()
                .take()
                .expect("root task completed without writing a value or an error");
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{call, fork, join, ResultSlot};

    // Boxed rather than a plain `async fn` because the recursive call creates a
    // cyclic opaque type whose `Send`-ness the compiler cannot verify (a known
    // rustc limitation with recursive `async fn`s); boxing breaks the cycle
    // without changing behavior.
    fn fib(n: u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = u64> + Send>> {
        Box::pin(async move {
            if n < 2 {
                return n;
            }
            let mut a = 0u64;
            let mut b = 0u64;
            fork(ResultSlot::Ref(&mut a), fib(n - 1)).await;
            call(ResultSlot::Ref(&mut b), fib(n - 2)).await;
            join().await;
            a + b
        })
    }

    #[test]
    fn inline_scheduler_computes_fib_10() {
        let scheduler = InlineScheduler::new();
        let value = sync_wait(&scheduler, fib(10)).unwrap();
        assert_eq!(value, 55);
    }

    #[test]
    fn inline_scheduler_computes_fib_20() {
        let scheduler = InlineScheduler::new();
        let value = sync_wait(&scheduler, fib(20)).unwrap();
        assert_eq!(value, 6765);
    }

    #[test]
    fn single_worker_pool_computes_fib_10() {
        let pool = Pool::new(1);
        let value = sync_wait(&pool, fib(10)).unwrap();
        assert_eq!(value, 55);
    }

    #[test]
    fn eight_worker_pool_computes_fib_20() {
        let pool = Pool::new(8);
        let value = sync_wait(&pool, fib(20)).unwrap();
        assert_eq!(value, 6765);
    }

    #[test]
    fn a_panicking_task_surfaces_as_an_error() {
        let scheduler = InlineScheduler::new();
        let result: Result<u64, Error> = sync_wait(&scheduler, async {
            panic!("boom");
        });
        assert!(matches!(result, Err(Error::Task(_))));
    }
}
