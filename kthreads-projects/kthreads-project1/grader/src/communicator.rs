use grading::kernel_test;
use kthreads::{
    InterruptGuard, SystemConfigurationBuilder,
    sync::SpinLock,
    thread::{Current, JoinHandle, ThreadBuilder, ThreadState, get_state_by_tid},
};
use kthreads_project1::Communicator;
use std::sync::Arc;

fn yield_until_blocked(handle: &JoinHandle) {
    while get_state_by_tid(handle.tid) != Ok(ThreadState::Blocked) {
        Current::yield_now();
    }
}

/// Runs `n` speakers and `n` listeners at once, and checks that every word
/// is heard exactly once.
fn exchange(n: i32) {
    let communicator = Arc::new(Communicator::new());
    let heard = Arc::new(SpinLock::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..n {
        let (communicator_, heard) = (communicator.clone(), heard.clone());
        handles.push(ThreadBuilder::new(format!("listener {i}")).spawn(move || {
            let word = communicator_.listen();
            let mut heard = heard.lock();
            heard.push(word);
            heard.unlock();
        }));
        let communicator_ = communicator.clone();
        handles.push(
            ThreadBuilder::new(format!("speaker {i}"))
                .spawn(move || communicator_.speak(i * 7 - 3)),
        );
    }
    handles.iter().for_each(JoinHandle::join);

    let mut heard = heard.lock();
    heard.sort_unstable();
    let expected = (0..n).map(|i| i * 7 - 3).collect::<Vec<_>>();
    assert_eq!(*heard, expected);
    heard.unlock();
}

/// A listener waits for the speaker.
#[kernel_test]
pub fn listener_first() {
    let communicator = Arc::new(Communicator::new());
    let heard = Arc::new(SpinLock::new(None));
    let (communicator_, heard_) = (communicator.clone(), heard.clone());
    let listener = ThreadBuilder::new("listener").spawn(move || {
        let word = communicator_.listen();
        let mut heard = heard_.lock();
        *heard = Some(word);
        heard.unlock();
    });
    yield_until_blocked(&listener);

    communicator.speak(42);
    listener.join();
    let heard = heard.lock();
    assert_eq!(*heard, Some(42));
    heard.unlock();
}

/// A speaker waits for the listener, and returns only once heard.
#[kernel_test]
pub fn speaker_first() {
    let communicator = Arc::new(Communicator::new());
    let communicator_ = communicator.clone();
    let speaker = ThreadBuilder::new("speaker").spawn(move || communicator_.speak(-1));
    yield_until_blocked(&speaker);
    for _ in 0..10 {
        Current::yield_now();
    }
    assert!(!speaker.is_finished());

    assert_eq!(communicator.listen(), -1);
    speaker.join();
}

/// The i-th word spoken goes to the i-th listener.
#[kernel_test]
pub fn ordered_pairing() {
    let communicator = Arc::new(Communicator::new());
    let heard = Arc::new(SpinLock::new(Vec::new()));

    let mut handles = Vec::new();
    for word in [10, 20, 30] {
        let communicator = communicator.clone();
        let speaker =
            ThreadBuilder::new(format!("speaker {word}")).spawn(move || communicator.speak(word));
        // Fixes the order of the speak calls.
        yield_until_blocked(&speaker);
        handles.push(speaker);
    }
    for i in 0..3 {
        let (communicator, heard) = (communicator.clone(), heard.clone());
        handles.push(ThreadBuilder::new(format!("listener {i}")).spawn(move || {
            // No preemption between hearing a word and writing it down.
            let _guard = InterruptGuard::new();
            let word = communicator.listen();
            let mut heard = heard.lock();
            heard.push(word);
            heard.unlock();
        }));
    }
    handles.iter().for_each(JoinHandle::join);

    let heard = heard.lock();
    assert_eq!(*heard, [10, 20, 30]);
    heard.unlock();
}

/// Five speakers and five listeners.
#[kernel_test]
pub fn many_to_many() {
    exchange(5);
}

/// A hundred speakers and a hundred listeners.
#[kernel_test]
pub fn stress() {
    exchange(100);
}

/// Many exchanges under randomized preemption.
#[kernel_test]
pub fn seeded() {
    for seed in 0..8 {
        let result = SystemConfigurationBuilder::new()
            .quiet(true)
            .timer_interval(20)
            .timer_seed(seed)
            .boot(|| exchange(20));
        assert!(result.is_ok(), "Seed {seed} failed: {result:?}.");
    }
}
