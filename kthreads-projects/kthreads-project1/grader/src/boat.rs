use grading::kernel_test;
use kthreads::SystemConfigurationBuilder;
use kthreads_project1::boat::{Boat, Location, Person, Trip, TripLog};
use std::{panic::AssertUnwindSafe, sync::Arc};

/// Runs the crossing of `adults` and `children`, checks every rule, and
/// returns the trips.
fn cross(adults: usize, children: usize) -> Vec<Trip> {
    let log = Arc::new(TripLog::new());
    Boat::begin(adults, children, log.clone());
    let trips = log.verify(adults, children).unwrap_or_else(|e| {
        panic!("Invalid crossing of {adults} adults and {children} children: {e}.")
    });
    if adults + children > 0 {
        assert_eq!(trips.len(), 2 * (adults + children - 1) + 1);
    }
    trips
}

/// Nobody to carry over.
#[kernel_test]
pub fn nobody() {
    assert!(cross(0, 0).is_empty());
}

/// A lone child rows over.
#[kernel_test]
pub fn one_child() {
    assert_eq!(
        cross(0, 1),
        [Trip {
            to: Location::Destination,
            passenger: None
        }]
    );
}

/// Two children: over together, one back, over alone.
#[kernel_test]
pub fn two_children() {
    let trips = cross(0, 2);
    assert_eq!(
        trips,
        [
            Trip {
                to: Location::Destination,
                passenger: Some(Person::Child)
            },
            Trip {
                to: Location::Origin,
                passenger: None
            },
            Trip {
                to: Location::Destination,
                passenger: None
            },
        ]
    );
}

/// An adult needs a child to row it over.
#[kernel_test]
pub fn one_adult_two_children() {
    let trips = cross(1, 2);
    let riders = trips
        .iter()
        .filter_map(|trip| trip.passenger)
        .collect::<Vec<_>>();
    assert_eq!(riders, [Person::Child, Person::Adult]);
}

/// Three adults and three children.
#[kernel_test]
pub fn three_adults_three_children() {
    let trips = cross(3, 3);
    let adults = trips
        .iter()
        .filter(|trip| trip.passenger == Some(Person::Adult))
        .count();
    assert_eq!(adults, 3);
}

/// Adults outnumber children.
#[kernel_test]
pub fn many_adults() {
    cross(6, 2);
    cross(2, 6);
}

/// Crossings under randomized preemption.
#[kernel_test]
pub fn seeded() {
    for seed in 0..6 {
        for (adults, children) in [(0, 3), (2, 2), (4, 3)] {
            let result = SystemConfigurationBuilder::new()
                .quiet(true)
                .timer_interval(15)
                .timer_seed(seed)
                .boot(move || {
                    cross(adults, children);
                });
            assert!(
                result.is_ok(),
                "Seed {seed}, {adults} adults, {children} children: {result:?}."
            );
        }
    }
}

/// Adults cannot cross without a child.
#[kernel_test]
pub fn adults_without_children() {
    let log = Arc::new(TripLog::new());
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| Boat::begin(2, 0, log.clone())));
    assert!(result.is_err(), "Nobody can row the adults over.");
    assert_eq!(log.trips(), Ok(Vec::new()));
}
