use grading::kernel_test;
use kthreads::{
    InterruptState, interrupt,
    sync::{Lock, Semaphore, SpinLock, WouldBlock},
    thread::{Current, JoinHandle, ThreadBuilder, ThreadState, get_state_by_tid},
    timer,
};
use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Yields until the thread `tid` is blocked.
fn yield_until_blocked(tid: u64) {
    while get_state_by_tid(tid) != Ok(ThreadState::Blocked) {
        Current::yield_now();
    }
}

/// `disable` and `restore` nest, and only the outermost restore enables
/// interrupts.
#[kernel_test]
pub fn interrupt_nesting() {
    assert_eq!(InterruptState::current(), InterruptState::On);
    let before = timer::now();

    let outer = interrupt::disable();
    assert_eq!(outer, InterruptState::On);
    let inner = interrupt::disable();
    assert_eq!(inner, InterruptState::Off);
    interrupt::restore(inner);
    assert_eq!(InterruptState::current(), InterruptState::Off);
    assert_eq!(timer::now(), before);
    interrupt::restore(outer);

    assert_eq!(InterruptState::current(), InterruptState::On);
    assert!(timer::now() > before);
}

/// Holding a spinlock keeps interrupts disabled.
#[kernel_test]
pub fn spinlock_disables_interrupts() {
    let lock = SpinLock::new(0);
    let mut guard = lock.lock();
    assert_eq!(InterruptState::current(), InterruptState::Off);
    assert!(lock.try_lock().is_err());
    *guard += 1;
    guard.unlock();
    assert_eq!(InterruptState::current(), InterruptState::On);

    let guard = lock.try_lock().expect("The lock is free.");
    assert_eq!(*guard, 1);
    guard.unlock();
}

/// Read-yield-write increments do not lose updates under a lock.
#[kernel_test]
pub fn lock_mutual_exclusion() {
    const THREADS: usize = 5;
    const ROUNDS: usize = 20;

    let lock = Arc::new(Lock::new());
    let value = Arc::new(AtomicUsize::new(0));
    let handles = (0..THREADS)
        .map(|i| {
            let (lock, value) = (lock.clone(), value.clone());
            ThreadBuilder::new(format!("incrementer {i}")).spawn(move || {
                for _ in 0..ROUNDS {
                    lock.acquire();
                    let read = value.load(Ordering::SeqCst);
                    Current::yield_now();
                    value.store(read + 1, Ordering::SeqCst);
                    lock.release();
                }
            })
        })
        .collect::<Vec<_>>();
    handles.iter().for_each(JoinHandle::join);
    assert_eq!(value.load(Ordering::SeqCst), THREADS * ROUNDS);
}

/// A released lock goes to the longest waiting thread.
#[kernel_test]
pub fn lock_fifo_handoff() {
    let lock = Arc::new(Lock::new());
    let order = Arc::new(SpinLock::new(Vec::new()));

    lock.acquire();
    let handles = (0..4)
        .map(|i| {
            let (lock, order) = (lock.clone(), order.clone());
            let handle = ThreadBuilder::new(format!("waiter {i}")).spawn(move || {
                lock.acquire();
                let mut order = order.lock();
                order.push(i);
                order.unlock();
                lock.release();
            });
            yield_until_blocked(handle.tid);
            handle
        })
        .collect::<Vec<_>>();
    lock.release();
    assert!(!lock.is_held_by_current_thread());
    handles.iter().for_each(JoinHandle::join);

    let order = order.lock();
    assert_eq!(*order, [0, 1, 2, 3]);
    order.unlock();
}

/// `try_acquire` never blocks.
#[kernel_test]
pub fn lock_try_acquire() {
    let lock = Arc::new(Lock::new());
    assert_eq!(lock.try_acquire(), Ok(()));
    assert!(lock.is_held_by_current_thread());

    let lock_ = lock.clone();
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_ = attempts.clone();
    ThreadBuilder::new("impatient")
        .spawn(move || {
            assert_eq!(lock_.try_acquire(), Err(WouldBlock));
            assert!(!lock_.is_held_by_current_thread());
            attempts_.fetch_add(1, Ordering::SeqCst);
        })
        .join();
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    lock.release();

    let lock_ = lock.clone();
    ThreadBuilder::new("lucky")
        .spawn(move || {
            assert_eq!(lock_.try_acquire(), Ok(()));
            lock_.release();
        })
        .join();
}

/// Releasing a lock one does not hold is a programming error.
#[kernel_test]
pub fn lock_release_not_held() {
    let lock = Lock::new();
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| lock.release()));
    assert!(result.is_err(), "Releasing a free lock must panic.");
    assert!(!lock.is_held_by_current_thread());
}

/// A semaphore initialized to zero waits for every signal.
#[kernel_test]
pub fn semaphore_barrier() {
    const THREADS: usize = 6;
    let done = Arc::new(Semaphore::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    for i in 0..THREADS {
        let (done, finished) = (done.clone(), finished.clone());
        ThreadBuilder::new(format!("worker {i}")).spawn(move || {
            Current::yield_now();
            finished.fetch_add(1, Ordering::SeqCst);
            done.signal();
        });
    }
    for _ in 0..THREADS {
        done.wait();
    }
    assert_eq!(finished.load(Ordering::SeqCst), THREADS);
    assert_eq!(done.permits(), 0);
}

/// `try_wait` takes a permit only when one is left.
#[kernel_test]
pub fn semaphore_try_wait() {
    let semaphore = Semaphore::new(1);
    assert_eq!(semaphore.try_wait(), Ok(()));
    assert_eq!(semaphore.try_wait(), Err(WouldBlock));
    semaphore.signal();
    semaphore.signal();
    assert_eq!(semaphore.permits(), 2);
    semaphore.wait();
    assert_eq!(semaphore.permits(), 1);
}
