// This is test & bootstrap implementation.
// This file will be overwritten when grading.
extern crate grading;
extern crate kthreads;
extern crate kthreads_project1;

mod alarm;
mod boat;
mod communicator;
mod condition;
mod sync;
mod thread;

use kthreads::Deadlocking;

fn main() {
    let passed = kthreads::TestDriver::start([
        // Thread substrate.
        &thread::spawn_and_join,
        &thread::join_twice,
        &thread::join_self,
        &thread::park_and_unpark,
        &thread::state_of_unknown_tid,
        &thread::fifo_yield_order,
        &thread::round_robin_preempts,
        &thread::panic_propagates,
        &thread::detects_deadlock,
        &Deadlocking(&thread::forgotten_signal),
        &thread::statistics,
        // Interrupts, locks and semaphores.
        &sync::interrupt_nesting,
        &sync::spinlock_disables_interrupts,
        &sync::lock_mutual_exclusion,
        &sync::lock_fifo_handoff,
        &sync::lock_try_acquire,
        &sync::lock_release_not_held,
        &sync::semaphore_barrier,
        &sync::semaphore_try_wait,
        // Alarm.
        &alarm::wait_short,
        &alarm::wait_medium,
        &alarm::wait_long,
        &alarm::wait_nonpositive,
        &alarm::wait_same_tick,
        &alarm::wait_order,
        &alarm::drop_restores_scheduler,
        &alarm::two_alarms,
        // Condition variable.
        &condition::wake_without_waiter,
        &condition::wake_fifo,
        &condition::wake_all,
        &condition::producer_consumer,
        &condition::sleep_for_timeout,
        &condition::sleep_for_signal,
        &condition::sleep_for_nonpositive,
        &condition::sleep_without_lock,
        &condition::wake_skips_timed_out,
        &condition::sleep_for_seeded,
        // Communicator.
        &communicator::listener_first,
        &communicator::speaker_first,
        &communicator::ordered_pairing,
        &communicator::many_to_many,
        &communicator::stress,
        &communicator::seeded,
        // Boat.
        &boat::nobody,
        &boat::one_child,
        &boat::two_children,
        &boat::one_adult_two_children,
        &boat::three_adults_three_children,
        &boat::many_adults,
        &boat::seeded,
        &boat::adults_without_children,
    ]);
    std::process::exit(if passed { 0 } else { 1 });
}
