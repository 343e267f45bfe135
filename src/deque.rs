//! A single-producer, multi-consumer work-stealing deque (Chase-Lev).
//!
//! The owning worker pushes and pops from the bottom, LIFO; every other worker may
//! only steal from the top, FIFO. This is a mutex-per-slot generalization of the
//! classic lock-free algorithm: the index protocol (the `top`/`bottom` atomics and
//! their fence discipline) is unchanged from the reference algorithm, but the actual
//! data move for a contended slot happens under a short-held per-slot lock instead of
//! a raw atomic load/store. That trades a small amount of throughput for an algorithm
//! whose soundness doesn't depend on `unsafe` we can't compiler-check in this
//! exercise.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{fence, AtomicI64, Ordering};

const DEFAULT_CAPACITY: usize = 1024;

struct Buffer<T> {
    slots: Vec<Mutex<Option<T>>>,
    mask: i64,
}

impl<T> Buffer<T> {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Mutex::new(None));
        Self {
            slots,
            mask: capacity as i64 - 1,
        }
    }

    fn capacity(&self) -> i64 {
        self.mask + 1
    }

    fn slot(&self, idx: i64) -> &Mutex<Option<T>> {
        &self.slots[(idx & self.mask) as usize]
    }
}

/// The result of a [`Deque::steal`] attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Steal<T> {
    /// The deque was observably empty.
    Empty,
    /// A concurrent pop or steal won the race for the last visible item; retry.
    LostRace,
    /// An item was stolen.
    Success(T),
}

pub struct Deque<T> {
    top: AtomicI64,
    bottom: AtomicI64,
    buffer: RwLock<Buffer<T>>,
}

impl<T: Copy> Deque<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            top: AtomicI64::new(0),
            bottom: AtomicI64::new(0),
            buffer: RwLock::new(Buffer::new(capacity.next_power_of_two())),
        }
    }

    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        if b >= t {
            (b - t) as usize
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `item`. Only ever called by the owning worker.
    pub fn push(&self, item: T) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);

        {
            let buf = self.buffer.read();
            if buf.capacity() < (b - t) + 1 {
                drop(buf);
                self.grow(b, t);
            }
        }

        let buf = self.buffer.read();
        *buf.slot(b).lock() = Some(item);
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
    }

    fn grow(&self, b: i64, t: i64) {
        let mut buf = self.buffer.write();
        if buf.capacity() >= (b - t) + 1 {
            return; // another push already grew it
        }
        let new_capacity = (buf.capacity() as usize) * 2;
        let mut new_buf = Buffer::new(new_capacity);
        let mut i = t;
        while i != b {
            *new_buf.slot(i).lock() = buf.slot(i).lock().take();
            i += 1;
        }
        *buf = new_buf;
    }

    /// Pops from the bottom (LIFO). Only ever called by the owning worker.
    pub fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);

        fence(Ordering::SeqCst);

        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Deque was already empty; restore bottom.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let buf = self.buffer.read();

        if t == b {
            // Exactly one item left; a thief might win the race for it.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b + 1, Ordering::Relaxed);
            if !won {
                return None;
            }
        }

        let item = buf.slot(b).lock().take();
        item
    }

    /// Steals from the top (FIFO). Callable by any worker other than the owner.
    pub fn steal(&self) -> Steal<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return Steal::Empty;
        }

        let buf = self.buffer.read();
        let value = *buf.slot(t).lock();

        match self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => match value {
                Some(v) => Steal::Success(v),
                None => Steal::LostRace,
            },
            Err(_) => Steal::LostRace,
        }
    }
}

impl<T: Copy> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_lifo_single_thread() {
        let d: Deque<i64> = Deque::new();
        d.push(1);
        d.push(2);
        d.push(3);
        assert_eq!(d.pop(), Some(3));
        assert_eq!(d.pop(), Some(2));
        assert_eq!(d.pop(), Some(1));
        assert_eq!(d.pop(), None);
    }

    #[test]
    fn steal_empty_is_never_lost_race() {
        let d: Deque<i64> = Deque::new();
        assert_eq!(d.steal(), Steal::Empty);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let d: Deque<i64> = Deque::with_capacity(2);
        for i in 0..10_000 {
            d.push(i);
        }
        let mut popped = Vec::new();
        while let Some(v) = d.pop() {
            popped.push(v);
        }
        assert_eq!(popped.len(), 10_000);
    }

    /// Every pushed item is consumed exactly once across owner pops and thief steals
    /// (scenario: 10,000 pushes with `H` concurrent stealing threads).
    #[test]
    fn push_pop_steal_bijection() {
        const N: i64 = 10_000;
        const STEALERS: usize = 4;

        let d = Arc::new(Deque::<i64>::new());
        for i in 0..N {
            d.push(i);
        }

        let mut handles = Vec::new();
        for _ in 0..STEALERS {
            let d = d.clone();
            handles.push(thread::spawn(move || {
                let mut stolen = Vec::new();
                loop {
                    match d.steal() {
                        Steal::Success(v) => stolen.push(v),
                        Steal::Empty => break,
                        Steal::LostRace => continue,
                    }
                }
                stolen
            }));
        }

        let mut owner_popped = Vec::new();
        while let Some(v) = d.pop() {
            owner_popped.push(v);
        }

        let mut all: Vec<i64> = owner_popped;
        for h in handles {
            all.extend(h.join().unwrap());
        }

        let set: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(all.len(), N as usize);
        assert_eq!(set.len(), N as usize);
    }

    proptest::proptest! {
        /// For any sequence of pushed values, the items the owner pops back out
        /// (with no concurrent stealers) are exactly the pushed values in reverse.
        #[test]
        fn owner_only_pop_is_reverse_of_push(values in proptest::collection::vec(0i64..10_000, 0..500)) {
            let d: Deque<i64> = Deque::new();
            for &v in &values {
                d.push(v);
            }
            let mut popped = Vec::new();
            while let Some(v) = d.pop() {
                popped.push(v);
            }
            let mut expected = values;
            expected.reverse();
            proptest::prop_assert_eq!(popped, expected);
        }
    }
}
