use grading::kernel_test;
use kthreads::{
    KernelError, SystemConfigurationBuilder,
    sync::{Semaphore, SpinLock},
    thread::{
        Current, JoinHandle, ThreadBuilder, ThreadState, get_state_by_tid,
        scheduler::Fifo,
    },
};
use kthreads_project1::Alarm;
use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Spawn a thread and wait for it.
#[kernel_test]
pub fn spawn_and_join() {
    let counter = Arc::new(AtomicUsize::new(0));
    let handles = (0..4)
        .map(|i| {
            let counter = counter.clone();
            ThreadBuilder::new(format!("worker {i}")).spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect::<Vec<_>>();
    for handle in handles.iter() {
        handle.join();
        assert!(handle.is_finished());
    }
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

/// Joining a finished thread returns immediately.
#[kernel_test]
pub fn join_twice() {
    let ran = Arc::new(AtomicBool::new(false));
    let ran_ = ran.clone();
    let handle = ThreadBuilder::new("once").spawn(move || ran_.store(true, Ordering::SeqCst));
    handle.join();
    assert!(ran.load(Ordering::SeqCst));
    handle.join();
    handle.clone().join();
    assert!(handle.is_finished());
    assert_eq!(
        get_state_by_tid(handle.tid),
        Err(KernelError::InvalidArgument)
    );
}

/// A thread joining itself is a programming error.
#[kernel_test]
pub fn join_self() {
    let slot = Arc::new(SpinLock::new(None::<JoinHandle>));
    let slot_ = slot.clone();
    let handle = ThreadBuilder::new("narcissus").spawn(move || {
        let me = loop {
            let slot = slot_.lock();
            let me = slot.clone();
            slot.unlock();
            match me {
                Some(me) => break me,
                None => Current::yield_now(),
            }
        };
        assert_eq!(me.tid, Current::get_tid());
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| me.join()));
        assert!(result.is_err(), "Joining oneself must panic.");
    });
    let mut slot = slot.lock();
    *slot = Some(handle.clone());
    slot.unlock();
    handle.join();
}

/// A thread spawned as parked only runs once unparked.
#[kernel_test]
pub fn park_and_unpark() {
    let ran = Arc::new(AtomicBool::new(false));
    let ran_ = ran.clone();
    let handle =
        ThreadBuilder::new("sleeper").spawn_as_parked(move || ran_.store(true, Ordering::SeqCst));
    let tid = handle.tid();

    for _ in 0..10 {
        Current::yield_now();
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(get_state_by_tid(tid), Ok(ThreadState::Blocked));

    handle.unpark();
    assert_eq!(get_state_by_tid(tid), Ok(ThreadState::Ready));
    while !ran.load(Ordering::SeqCst) {
        Current::yield_now();
    }
}

/// Unknown thread ids are reported as invalid arguments.
#[kernel_test]
pub fn state_of_unknown_tid() {
    assert_eq!(get_state_by_tid(u64::MAX), Err(KernelError::InvalidArgument));
    assert_eq!(
        get_state_by_tid(Current::get_tid()),
        Ok(ThreadState::Running)
    );
}

/// Without time slicing, yielding threads strictly alternate.
#[kernel_test]
pub fn fifo_yield_order() {
    let result = SystemConfigurationBuilder::new()
        .quiet(true)
        .set_scheduler(Fifo::new())
        .boot(|| {
            let trace = Arc::new(SpinLock::new(Vec::new()));
            let handles = ["a", "b"]
                .into_iter()
                .map(|name| {
                    let trace = trace.clone();
                    ThreadBuilder::new(name).spawn(move || {
                        for _ in 0..3 {
                            let mut trace = trace.lock();
                            trace.push(Current::name());
                            trace.unlock();
                            Current::yield_now();
                        }
                    })
                })
                .collect::<Vec<_>>();
            handles.iter().for_each(JoinHandle::join);
            let trace = trace.lock();
            assert_eq!(*trace, ["a", "b", "a", "b", "a", "b"]);
            trace.unlock();
        });
    assert!(result.is_ok());
}

/// The round robin scheduler interrupts a thread that never yields.
#[kernel_test]
pub fn round_robin_preempts() {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_ = flag.clone();
    let spinner = ThreadBuilder::new("spinner").spawn(move || {
        while !flag_.load(Ordering::SeqCst) {
            // Every enabled interrupt advances the clock.
            drop(kthreads::InterruptGuard::new());
        }
    });
    let setter = ThreadBuilder::new("setter").spawn(move || flag.store(true, Ordering::SeqCst));
    spinner.join();
    setter.join();
}

/// A panic in any thread halts the kernel and reaches the caller of `boot`.
#[kernel_test]
pub fn panic_propagates() {
    let result = std::panic::catch_unwind(|| {
        SystemConfigurationBuilder::new().quiet(true).boot(|| {
            ThreadBuilder::new("faulty")
                .spawn(|| panic!("boom"))
                .join();
            unreachable!("The kernel halts before the join returns.");
        })
    });
    let payload = result.expect_err("The panic must reach the caller.");
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
}

/// The kernel gives up once every thread is blocked for good.
#[kernel_test]
pub fn detects_deadlock() {
    let result = SystemConfigurationBuilder::new()
        .quiet(true)
        .idle_limit(100)
        .boot(|| {
            let semaphore = Arc::new(Semaphore::new(0));
            let semaphore_ = semaphore.clone();
            ThreadBuilder::new("waiter").spawn(move || semaphore_.wait());
            semaphore.wait();
        });
    assert_eq!(result, Err(KernelError::Deadlock));
}

/// A main thread waiting for a signal nobody sends.
#[kernel_test(deadlock)]
pub fn forgotten_signal() {
    Semaphore::new(0).wait();
}

/// The kernel reports how time was spent.
#[kernel_test]
pub fn statistics() {
    let statistics = SystemConfigurationBuilder::new()
        .quiet(true)
        .boot(|| {
            let alarm = Alarm::new();
            ThreadBuilder::new("sleeper")
                .spawn(move || alarm.wait_until(10_000))
                .join();
        })
        .expect("The kernel halts normally.");
    assert!(statistics.total_ticks >= 10_000);
    assert!(statistics.idle_ticks > 0);
    assert!(statistics.idle_ticks < statistics.total_ticks);
    assert!(statistics.context_switches >= 2);
}
