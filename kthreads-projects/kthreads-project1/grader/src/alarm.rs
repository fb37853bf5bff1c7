use grading::kernel_test;
use kthreads::{
    sync::SpinLock,
    thread::{JoinHandle, ThreadBuilder},
    timer,
};
use kthreads_project1::Alarm;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Ticks a woken thread may take to get the processor back.
const SCHEDULING_SLACK: u64 = 100;

/// Latest tick at which a thread sleeping until `deadline` may resume.
///
/// The timer may be randomized, with periods of up to twice the interval.
fn latest_wake_up(deadline: u64) -> u64 {
    deadline + 2 * timer::interval() + SCHEDULING_SLACK
}

fn check_wait(x: i64) {
    let alarm = Alarm::new();
    let start = timer::now();
    alarm.wait_until(x);
    let end = timer::now();
    let deadline = start + x as u64;
    assert!(end >= deadline, "Woken at {end}, before the deadline {deadline}.");
    assert!(
        end <= latest_wake_up(deadline),
        "Woken at {end}, long after the deadline {deadline}."
    );
    assert_eq!(alarm.pending(), 0);
}

/// Sleep for 1000 ticks.
#[kernel_test]
pub fn wait_short() {
    check_wait(1_000);
}

/// Sleep for 10000 ticks.
#[kernel_test]
pub fn wait_medium() {
    check_wait(10_000);
}

/// Sleep for 100000 ticks.
#[kernel_test]
pub fn wait_long() {
    check_wait(100_000);
}

/// Non-positive durations return immediately.
#[kernel_test]
pub fn wait_nonpositive() {
    let alarm = Alarm::new();
    let before = timer::now();
    alarm.wait_until(0);
    alarm.wait_until(-1);
    alarm.wait_until(i64::MIN);
    assert_eq!(timer::now(), before);
    assert_eq!(alarm.pending(), 0);
}

/// Threads sharing a deadline are all woken by the same timer interrupt.
#[kernel_test]
pub fn wait_same_tick() {
    const THREADS: usize = 8;
    let alarm = Alarm::new();
    let deadline = timer::now() + 5_000;
    let wake_ups = Arc::new(SpinLock::new(Vec::new()));

    let handles = (0..THREADS)
        .map(|i| {
            let (alarm, wake_ups) = (alarm.clone(), wake_ups.clone());
            ThreadBuilder::new(format!("sleeper {i}")).spawn(move || {
                alarm.wait_until(deadline as i64 - timer::now() as i64);
                let mut wake_ups = wake_ups.lock();
                wake_ups.push(timer::now());
                wake_ups.unlock();
            })
        })
        .collect::<Vec<_>>();
    handles.iter().for_each(JoinHandle::join);

    let wake_ups = wake_ups.lock();
    let (first, last) = (wake_ups[0], wake_ups[THREADS - 1]);
    wake_ups.unlock();
    assert!(first >= deadline);
    assert!(last <= latest_wake_up(deadline));
    assert!(
        last - first < timer::interval(),
        "Sleepers were woken from {first} to {last}."
    );
}

/// Sleepers wake up in deadline order, whatever the order they went to sleep.
#[kernel_test]
pub fn wait_order() {
    let alarm = Alarm::new();
    let order = Arc::new(SpinLock::new(Vec::new()));
    let durations = [5_000, 1_000, 4_000, 2_000, 3_000];

    let handles = durations
        .into_iter()
        .map(|duration| {
            let (alarm, order) = (alarm.clone(), order.clone());
            ThreadBuilder::new(format!("sleep {duration}")).spawn(move || {
                alarm.wait_until(duration);
                let mut order = order.lock();
                order.push(duration);
                order.unlock();
            })
        })
        .collect::<Vec<_>>();
    handles.iter().for_each(JoinHandle::join);

    let order = order.lock();
    assert_eq!(*order, [1_000, 2_000, 3_000, 4_000, 5_000]);
    order.unlock();
}

/// Once the alarm is gone, timer interrupts go back to the scheduler.
#[kernel_test]
pub fn drop_restores_scheduler() {
    let alarm = Alarm::new();
    alarm.wait_until(1_000);
    drop(alarm);

    let flag = Arc::new(AtomicBool::new(false));
    let flag_ = flag.clone();
    let spinner = ThreadBuilder::new("spinner").spawn(move || {
        while !flag_.load(Ordering::SeqCst) {
            drop(kthreads::InterruptGuard::new());
        }
    });
    let setter = ThreadBuilder::new("setter").spawn(move || flag.store(true, Ordering::SeqCst));
    spinner.join();
    setter.join();
}

/// Sleepers of an older alarm still wake up while a newer alarm is alive.
#[kernel_test]
pub fn two_alarms() {
    let first = Alarm::new();
    let second = Alarm::new();

    let (first_, second_) = (first.clone(), second.clone());
    let handles = [
        ThreadBuilder::new("first").spawn(move || first_.wait_until(1_000)),
        ThreadBuilder::new("second").spawn(move || second_.wait_until(2_000)),
    ];
    handles.iter().for_each(JoinHandle::join);
    assert_eq!((first.pending(), second.pending()), (0, 0));

    // The older alarm keeps working once the newer one is gone.
    drop(second);
    let start = timer::now();
    first.wait_until(1_000);
    assert!(timer::now() >= start + 1_000);
    assert_eq!(first.pending(), 0);
}
