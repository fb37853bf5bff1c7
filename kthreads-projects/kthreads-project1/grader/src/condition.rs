use grading::kernel_test;
use kthreads::{
    InterruptGuard, SystemConfigurationBuilder,
    sync::{Lock, SpinLock},
    thread::{
        Current, JoinHandle, ThreadBuilder, ThreadState, get_state_by_tid, scheduler::Fifo,
    },
    timer,
};
use kthreads_project1::{Alarm, Condition2};
use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Yields until `n` threads sleep on `cond`.
fn yield_until_waiters(cond: &Condition2, n: usize) {
    loop {
        cond.lock().acquire();
        let waiters = cond.waiters();
        cond.lock().release();
        if waiters == n {
            break;
        }
        Current::yield_now();
    }
}

fn len(v: &SpinLock<Vec<usize>>) -> usize {
    let v = v.lock();
    let len = v.len();
    v.unlock();
    len
}

/// `wake` and `wake_all` without any sleeper do nothing.
#[kernel_test]
pub fn wake_without_waiter() {
    let lock = Arc::new(Lock::new());
    let cond = Condition2::new(lock.clone());
    lock.acquire();
    cond.wake();
    cond.wake_all();
    assert_eq!(cond.waiters(), 0);
    assert!(lock.is_held_by_current_thread());
    lock.release();
}

/// `wake` releases the sleepers one at a time, in the order they slept.
#[kernel_test]
pub fn wake_fifo() {
    const THREADS: usize = 4;
    let lock = Arc::new(Lock::new());
    let cond = Arc::new(Condition2::new(lock.clone()));
    let queued = Arc::new(SpinLock::new(Vec::new()));
    let woken = Arc::new(SpinLock::new(Vec::new()));

    let handles = (0..THREADS)
        .map(|i| {
            let (lock, cond) = (lock.clone(), cond.clone());
            let (queued, woken) = (queued.clone(), woken.clone());
            ThreadBuilder::new(format!("sleeper {i}")).spawn(move || {
                lock.acquire();
                let mut queued = queued.lock();
                queued.push(i);
                queued.unlock();
                cond.sleep();
                assert!(lock.is_held_by_current_thread());
                let mut woken = woken.lock();
                woken.push(i);
                woken.unlock();
                lock.release();
            })
        })
        .collect::<Vec<_>>();
    yield_until_waiters(&cond, THREADS);

    for n in 1..=THREADS {
        lock.acquire();
        cond.wake();
        lock.release();
        while len(&woken) < n {
            Current::yield_now();
        }
    }
    handles.iter().for_each(JoinHandle::join);

    let (queued, woken) = (queued.lock(), woken.lock());
    assert_eq!(*queued, *woken);
    woken.unlock();
    queued.unlock();
}

/// `wake_all` empties the queue at once.
#[kernel_test]
pub fn wake_all() {
    const THREADS: usize = 5;
    let lock = Arc::new(Lock::new());
    let cond = Arc::new(Condition2::new(lock.clone()));
    let woken = Arc::new(AtomicUsize::new(0));

    let handles = (0..THREADS)
        .map(|i| {
            let (lock, cond, woken) = (lock.clone(), cond.clone(), woken.clone());
            ThreadBuilder::new(format!("sleeper {i}")).spawn(move || {
                lock.acquire();
                cond.sleep();
                woken.fetch_add(1, Ordering::SeqCst);
                lock.release();
            })
        })
        .collect::<Vec<_>>();
    yield_until_waiters(&cond, THREADS);

    lock.acquire();
    cond.wake_all();
    assert_eq!(cond.waiters(), 0);
    // Nobody left for a second wake.
    cond.wake();
    lock.release();
    handles.iter().for_each(JoinHandle::join);
    assert_eq!(woken.load(Ordering::SeqCst), THREADS);
}

/// A bounded buffer shared by producers and consumers.
#[kernel_test]
pub fn producer_consumer() {
    const CAPACITY: usize = 2;
    const ITEMS: usize = 30;

    struct Buffer {
        lock: Arc<Lock>,
        not_empty: Condition2,
        not_full: Condition2,
        items: SpinLock<VecDeque<usize>>,
    }
    impl Buffer {
        fn len(&self) -> usize {
            let items = self.items.lock();
            let len = items.len();
            items.unlock();
            len
        }
        fn put(&self, item: usize) {
            self.lock.acquire();
            while self.len() == CAPACITY {
                self.not_full.sleep();
            }
            let mut items = self.items.lock();
            items.push_back(item);
            items.unlock();
            self.not_empty.wake();
            self.lock.release();
        }
        fn take(&self) -> usize {
            self.lock.acquire();
            while self.len() == 0 {
                self.not_empty.sleep();
            }
            let mut items = self.items.lock();
            let item = items.pop_front();
            items.unlock();
            self.not_full.wake();
            self.lock.release();
            item.expect("The buffer is not empty.")
        }
    }

    let lock = Arc::new(Lock::new());
    let buffer = Arc::new(Buffer {
        not_empty: Condition2::new(lock.clone()),
        not_full: Condition2::new(lock.clone()),
        lock,
        items: SpinLock::new(VecDeque::new()),
    });
    let sum = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..2 {
        let buffer = buffer.clone();
        handles.push(ThreadBuilder::new(format!("producer {i}")).spawn(move || {
            for item in (i * ITEMS)..((i + 1) * ITEMS) {
                buffer.put(item);
            }
        }));
    }
    for i in 0..3 {
        let (buffer, sum) = (buffer.clone(), sum.clone());
        handles.push(ThreadBuilder::new(format!("consumer {i}")).spawn(move || {
            for _ in 0..(2 * ITEMS / 3) {
                sum.fetch_add(buffer.take(), Ordering::SeqCst);
            }
        }));
    }
    handles.iter().for_each(JoinHandle::join);
    assert_eq!(sum.load(Ordering::SeqCst), (0..2 * ITEMS).sum::<usize>());
    assert_eq!(buffer.len(), 0);
}

/// A bounded wait with nobody to signal ends with the timeout.
#[kernel_test]
pub fn sleep_for_timeout() {
    let alarm = Alarm::new();
    let lock = Arc::new(Lock::new());
    let cond = Condition2::new(lock.clone());

    lock.acquire();
    let start = timer::now();
    assert!(!cond.sleep_for(&alarm, 2_000));
    assert!(timer::now() >= start + 2_000);
    assert!(lock.is_held_by_current_thread());
    assert_eq!(cond.waiters(), 0);
    assert_eq!(alarm.pending(), 0);
    // The stale entry is gone: a wake finds nobody.
    cond.wake();
    lock.release();
}

/// A bounded wait signalled before the timeout ends early.
#[kernel_test]
pub fn sleep_for_signal() {
    const TIMEOUT: i64 = 1_000_000;
    let alarm = Alarm::new();
    let lock = Arc::new(Lock::new());
    let cond = Arc::new(Condition2::new(lock.clone()));
    let signalled = Arc::new(AtomicBool::new(false));

    let (alarm_, lock_, cond_, signalled_) =
        (alarm.clone(), lock.clone(), cond.clone(), signalled.clone());
    let handle = ThreadBuilder::new("patient").spawn(move || {
        lock_.acquire();
        let start = timer::now();
        let woken = cond_.sleep_for(&alarm_, TIMEOUT);
        assert!(timer::now() < start + TIMEOUT as u64);
        assert!(lock_.is_held_by_current_thread());
        signalled_.store(woken, Ordering::SeqCst);
        lock_.release();
    });
    yield_until_waiters(&cond, 1);
    assert_eq!(alarm.pending(), 1);

    lock.acquire();
    cond.wake();
    lock.release();
    handle.join();
    assert!(signalled.load(Ordering::SeqCst));
    assert_eq!(alarm.pending(), 0);
    assert_eq!(cond.waiters(), 0);
}

/// A non-positive timeout returns at once, without releasing the lock.
#[kernel_test]
pub fn sleep_for_nonpositive() {
    let alarm = Alarm::new();
    let lock = Arc::new(Lock::new());
    let cond = Condition2::new(lock.clone());

    lock.acquire();
    assert!(!cond.sleep_for(&alarm, 0));
    assert!(!cond.sleep_for(&alarm, -10));
    assert!(lock.is_held_by_current_thread());
    assert_eq!(cond.waiters(), 0);
    assert_eq!(alarm.pending(), 0);
    lock.release();
}

/// A `wake` that finds a timed-out waiter at the head of the queue skips it
/// and wakes the next sleeper.
///
/// The timed-out waiter is made ready but not yet run when `wake` comes, so
/// its queue entry is still there.
#[kernel_test]
pub fn wake_skips_timed_out() {
    let result = SystemConfigurationBuilder::new()
        .quiet(true)
        .set_scheduler(Fifo::new())
        .boot(|| {
            let alarm = Alarm::new();
            let lock = Arc::new(Lock::new());
            let cond = Arc::new(Condition2::new(lock.clone()));
            let signalled = Arc::new(AtomicBool::new(true));
            let slept = Arc::new(AtomicBool::new(false));

            let (alarm_, lock_, cond_, signalled_) =
                (alarm.clone(), lock.clone(), cond.clone(), signalled.clone());
            let timed = ThreadBuilder::new("timed").spawn(move || {
                lock_.acquire();
                signalled_.store(cond_.sleep_for(&alarm_, 1_000), Ordering::SeqCst);
                lock_.release();
            });
            let (lock_, cond_, slept_) = (lock.clone(), cond.clone(), slept.clone());
            let plain = ThreadBuilder::new("plain").spawn(move || {
                lock_.acquire();
                cond_.sleep();
                slept_.store(true, Ordering::SeqCst);
                lock_.release();
            });
            yield_until_waiters(&cond, 2);
            assert_eq!(alarm.pending(), 1);

            // Without time slicing, the timer interrupt readies the timed-out
            // waiter but this thread keeps the processor.
            while get_state_by_tid(timed.tid) != Ok(ThreadState::Ready) {
                drop(InterruptGuard::new());
            }
            assert_eq!(alarm.pending(), 0);

            lock.acquire();
            assert_eq!(cond.waiters(), 2);
            cond.wake();
            assert_eq!(cond.waiters(), 0);
            lock.release();
            timed.join();
            plain.join();

            assert!(!signalled.load(Ordering::SeqCst));
            assert!(slept.load(Ordering::SeqCst));
            assert_eq!(cond.waiters(), 0);
            assert_eq!(alarm.pending(), 0);
        });
    assert!(result.is_ok(), "{result:?}");
}

/// Timed and plain waiters mixed under randomized preemption.
#[kernel_test]
pub fn sleep_for_seeded() {
    const THREADS: usize = 6;
    for seed in 0..6 {
        let result = SystemConfigurationBuilder::new()
            .quiet(true)
            .timer_interval(20)
            .timer_seed(seed)
            .boot(|| {
                let alarm = Alarm::new();
                let lock = Arc::new(Lock::new());
                let cond = Arc::new(Condition2::new(lock.clone()));
                let done = Arc::new(AtomicUsize::new(0));

                let handles = (0..THREADS)
                    .map(|i| {
                        let (alarm, lock, cond, done) =
                            (alarm.clone(), lock.clone(), cond.clone(), done.clone());
                        ThreadBuilder::new(format!("waiter {i}")).spawn(move || {
                            lock.acquire();
                            if i % 2 == 0 {
                                cond.sleep_for(&alarm, 50 * (i as i64 + 1));
                            } else {
                                cond.sleep();
                            }
                            done.fetch_add(1, Ordering::SeqCst);
                            lock.release();
                        })
                    })
                    .collect::<Vec<_>>();
                while done.load(Ordering::SeqCst) < THREADS {
                    lock.acquire();
                    cond.wake();
                    lock.release();
                    Current::yield_now();
                }
                handles.iter().for_each(JoinHandle::join);

                lock.acquire();
                assert_eq!(cond.waiters(), 0);
                lock.release();
                assert_eq!(alarm.pending(), 0);
            });
        assert!(result.is_ok(), "Seed {seed} failed: {result:?}.");
    }
}

/// Using a condition variable without holding its lock is a programming
/// error.
#[kernel_test]
pub fn sleep_without_lock() {
    let lock = Arc::new(Lock::new());
    let cond = Condition2::new(lock.clone());
    for op in [Condition2::sleep, Condition2::wake, Condition2::wake_all] {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| op(&cond)));
        assert!(result.is_err(), "The lock is not held.");
    }
    assert_eq!(cond.waiters(), 0);
    assert!(!lock.is_held_by_current_thread());
}
