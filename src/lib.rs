//! # forkpool - a fork/join work-stealing task runtime
//!
//! `forkpool` schedules fine-grained, recursively-forking `async fn` tasks across a
//! fixed pool of worker threads using a Chase-Lev work-stealing deque per worker, a
//! segmented stacklet chain for task bookkeeping, and an explicit trampoline that
//! drives fork/call/join chains without growing the OS thread's call stack.
//!
//! ## Example
//!
//! ```rust
//! use std::future::Future;
//! use std::pin::Pin;
//!
//! use forkpool::{call, fork, join, sync_wait, Pool, ResultSlot};
//!
//! // Boxed rather than a plain `async fn` because the recursive call creates a
//! // cyclic opaque type whose `Send`-ness the compiler cannot verify (a known
//! // rustc limitation with recursive `async fn`s); boxing breaks the cycle
//! // without changing behavior.
//! fn fib(n: u64) -> Pin<Box<dyn Future<Output = u64> + Send>> {
//!     Box::pin(async move {
//!         if n < 2 {
//!             return n;
//!         }
//!         let mut a = 0u64;
//!         let mut b = 0u64;
//!         fork(ResultSlot::Ref(&mut a), fib(n - 1)).await;
//!         call(ResultSlot::Ref(&mut b), fib(n - 2)).await;
//!         join().await;
//!         a + b
//!     })
//! }
//!
//! let pool = Pool::new(4);
//! let result = sync_wait(&pool, fib(20)).unwrap();
//! assert_eq!(result, 6765);
//! ```

mod config;
mod deque;
mod error;
mod event_count;
mod frame;
mod pool;
mod rng;
mod stack;
mod submission;
mod task;
mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use pool::{sync_wait, InlineScheduler, Pool, Scheduler};
pub use task::{call, fork, join, Call, Eventually, Fork, Join, ResultSlot, Task};
