//! End-to-end scheduler behavior scenarios (distilled spec §8, S5-S6): a pool stays
//! correct under many submissions, and `Pool::new(1)` behaves identically to a
//! genuinely concurrent pool, just without the parallelism.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use forkpool::{call, fork, join, sync_wait, Pool, ResultSlot};

// Boxed rather than a plain `async fn` because the recursive call creates a cyclic
// opaque type whose `Send`-ness the compiler cannot verify (a known rustc
// limitation with recursive `async fn`s); boxing breaks the cycle without changing
// behavior.
fn fib(n: u64) -> Pin<Box<dyn Future<Output = u64> + Send>> {
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
fn s5_many_independent_submissions_all_complete() {
    // Every pushed fork must be accounted for exactly once across deques and
    // submission queues, whether popped locally or stolen (mirrors the deque-level
    // bijection property, but at the whole-scheduler level).
    let pool = Pool::new(4);
    let total: u64 = (0..50).map(|i| sync_wait(&pool, fib(10 + (i % 5))).unwrap()).sum();

    let expected: u64 = (0..50u64).map(|i| fib_ref(10 + (i % 5))).sum();
    assert_eq!(total, expected);
}

#[test]
fn s6_single_worker_pool_matches_multi_worker_result() {
    let one = Pool::new(1);
    let many = Pool::new(8);

    for n in [5, 10, 15, 20] {
        assert_eq!(
            sync_wait(&one, fib(n)).unwrap(),
            sync_wait(&many, fib(n)).unwrap()
        );
    }
}

#[test]
fn concurrent_external_submissions_from_multiple_threads_all_land() {
    let pool = Arc::new(Pool::new(4));
    let completed = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = pool.clone();
            let completed = completed.clone();
            std::thread::spawn(move || {
                let value = sync_wait(pool.as_ref(), fib(12 + (i % 3))).unwrap();
                completed.fetch_add(1, Ordering::Relaxed);
                value
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(completed.load(Ordering::Relaxed), 8);
}

fn fib_ref(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fib_ref(n - 1) + fib_ref(n - 2)
    }
}
