//! # Communicator
//!
//! A [`Communicator`] allows threads to synchronously exchange 32-bit
//! messages. Multiple threads can be waiting to [`speak`], and multiple
//! threads can be waiting to [`listen`]. But there should never be a time
//! when both a speaker and a listener are waiting, because the two threads
//! can be paired off at this point.
//!
//! Two properties must hold:
//!
//! - every call to [`speak`] returns only after exactly one call to
//!   [`listen`] received that very word, and
//! - no word is ever delivered twice or lost.
//!
//! ## Pairing
//!
//! With several speakers and listeners waiting at once, pairing them in
//! whatever order the scheduler wakes them up could let a later speaker's
//! word reach an earlier listener while the earlier speaker is still
//! waiting. The communicator pairs them by arrival instead: each call takes a
//! ticket, and the `i`-th speaker's word goes to the `i`-th listener.
//!
//! ```text
//!   speak(10) ─ ticket 0 ──┐         ┌── ticket 0 ─ listen() -> 10
//!   speak(20) ─ ticket 1 ──┼─ words ─┼── ticket 1 ─ listen() -> 20
//!   speak(30) ─ ticket 2 ──┘         └── ticket 2 ─ listen() -> 30
//! ```
//!
//! [`speak`]: Communicator::speak
//! [`listen`]: Communicator::listen
use crate::condition::Condition2;
use kthreads::{
    DebugFlags,
    sync::{Lock, SpinLock},
    thread::Current,
};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Default)]
struct Channel {
    next_speaker: u64,
    next_listener: u64,
    /// Words spoken but not heard yet, by speaker ticket.
    words: BTreeMap<u64, i32>,
}

/// A rendezvous point for exchanging words between threads.
pub struct Communicator {
    lock: Arc<Lock>,
    speakers: Condition2,
    listeners: Condition2,
    // Protected by `lock`. The spinlock is only the cell that lends it out
    // mutably without unsafe code, and is never contended.
    channel: SpinLock<Channel>,
}

impl Default for Communicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator {
    /// Allocates a new communicator.
    pub fn new() -> Self {
        let lock = Arc::new(Lock::new());
        Self {
            speakers: Condition2::new(lock.clone()),
            listeners: Condition2::new(lock.clone()),
            lock,
            channel: SpinLock::new(Channel::default()),
        }
    }

    fn with_channel<R>(&self, f: impl FnOnce(&mut Channel) -> R) -> R {
        let mut channel = self.channel.lock();
        let r = f(&mut channel);
        channel.unlock();
        r
    }

    /// Waits for a thread to listen through this communicator, and then
    /// transfers `word` to the listener.
    ///
    /// Does not return until this thread is paired up with a listening
    /// thread, and the listener received `word`.
    pub fn speak(&self, word: i32) {
        self.lock.acquire();
        let ticket = self.with_channel(|channel| {
            let ticket = channel.next_speaker;
            channel.next_speaker += 1;
            channel.words.insert(ticket, word);
            ticket
        });
        kthreads::debug!(
            DebugFlags::COMMUNICATOR,
            "{} speaks {} with ticket {}",
            Current::name(),
            word,
            ticket
        );
        self.listeners.wake_all();
        while self.with_channel(|channel| channel.words.contains_key(&ticket)) {
            self.speakers.sleep();
        }
        self.lock.release();
    }

    /// Waits for a thread to speak through this communicator, and then
    /// returns the word that thread passed to [`Self::speak`].
    pub fn listen(&self) -> i32 {
        self.lock.acquire();
        let ticket = self.with_channel(|channel| {
            let ticket = channel.next_listener;
            channel.next_listener += 1;
            ticket
        });
        let word = loop {
            if let Some(word) = self.with_channel(|channel| channel.words.remove(&ticket)) {
                break word;
            }
            self.listeners.sleep();
        };
        kthreads::debug!(
            DebugFlags::COMMUNICATOR,
            "{} hears {} with ticket {}",
            Current::name(),
            word,
            ticket
        );
        self.speakers.wake_all();
        self.lock.release();
        word
    }
}
