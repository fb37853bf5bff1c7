//! # Boat
//!
//! A group of adults and children stand on the origin shore of a river, with
//! a single two-seat boat. Everybody has to reach the destination shore.
//!
//! - Only a child can row. An adult can only ride as a passenger.
//! - The boat carries one or two people per trip, and always a child at the
//!   oars. It cannot cross empty.
//! - The crossing ends when everybody is on the destination shore. The last
//!   trip is a child rowing alone.
//!
//! Every person is a thread, and no thread knows more than what can be seen
//! from its shore: how many adults and children stand there, and where the
//! boat is.
//!
//! ## Strategy
//!
//! Whoever boards the boat at the origin first and is a child becomes the
//! pilot, and decides who may take the other seat:
//!
//! 1. While two or more children stand at the origin, the pilot takes another
//!    child over and rows back alone.
//! 2. Once a single child is left at the origin, it ferries the adults over
//!    one at a time, rowing back after each of them.
//! 3. When the child is alone at the origin, it rows over for the last time.
//!
//! Every round trip brings one more person over for good, so the crossing
//! takes `2 * (adults + children - 1) + 1` trips.
//!
//! ## Narration
//!
//! Each person reports their own crossings to a [`BoatObserver`], and updates
//! the head count of the shores only once the report returned. The boat
//! leaves a shore only after everybody aboard got off at the other side, so it
//! is always at one of the two shores, and never carries more than two
//! people. [`TripLog`] records the reports and replays them to check these
//! rules.
use crate::condition::Condition2;
use kthreads::{
    DebugFlags,
    sync::{Lock, Semaphore, SpinLock},
    thread::ThreadBuilder,
};
use std::sync::Arc;

/// Category of a person.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Person {
    /// Can only ride as a passenger.
    Adult,
    /// Can row, or ride.
    Child,
}

/// A shore of the river.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// Where everybody starts, and the boat too.
    Origin,
    /// Where everybody ends.
    Destination,
}

/// Head count of one shore.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Census {
    /// Number of adults.
    pub adults: usize,
    /// Number of children.
    pub children: usize,
}

impl Census {
    fn get_mut(&mut self, who: Person) -> &mut usize {
        match who {
            Person::Adult => &mut self.adults,
            Person::Child => &mut self.children,
        }
    }

    /// Total number of people.
    pub fn total(&self) -> usize {
        self.adults + self.children
    }
}

/// Receives the report of every crossing, one call per person aboard.
///
/// Calls are made while the crossing person holds the boat's lock. They must
/// not block.
pub trait BoatObserver: Send + Sync {
    /// A child rows the boat from the origin to the destination.
    fn child_row_to_destination(&self);
    /// A child rides as a passenger from the origin to the destination.
    fn child_ride_to_destination(&self);
    /// An adult rides as a passenger from the origin to the destination.
    fn adult_ride_to_destination(&self);
    /// A child rows the boat back from the destination to the origin.
    fn child_row_to_origin(&self);
}

/// Prints every crossing.
pub struct Narrator;

impl BoatObserver for Narrator {
    fn child_row_to_destination(&self) {
        kthreads::println!("Child rowing to destination.");
    }
    fn child_ride_to_destination(&self) {
        kthreads::println!("Child riding to destination.");
    }
    fn adult_ride_to_destination(&self) {
        kthreads::println!("Adult riding to destination.");
    }
    fn child_row_to_origin(&self) {
        kthreads::println!("Child rowing to origin.");
    }
}

enum Role {
    Pilot,
    Passenger,
}

struct World {
    origin: Census,
    destination: Census,
    boat: Location,
    /// A pilot boarded at the origin.
    pilot: bool,
    /// Who may take the passenger seat, if the pilot offers it.
    wanted: Option<Person>,
    /// Who took the passenger seat.
    passenger: Option<Person>,
    /// The pilot reached the destination; the passenger may get off.
    arrived: bool,
}

impl World {
    /// Whom a pilot departing from the origin takes along.
    fn seat_for_passenger(&self) -> Option<Person> {
        if self.origin.children >= 2 {
            Some(Person::Child)
        } else if self.origin.adults > 0 {
            Some(Person::Adult)
        } else {
            None
        }
    }

    fn cross(&mut self, who: Person, to: Location) {
        let (from, to) = match to {
            Location::Destination => (&mut self.origin, &mut self.destination),
            Location::Origin => (&mut self.destination, &mut self.origin),
        };
        *from.get_mut(who) -= 1;
        *to.get_mut(who) += 1;
    }
}

/// The boat, the two shores, and the people on them.
pub struct Boat {
    lock: Arc<Lock>,
    /// People at the origin waiting for the boat or a seat.
    at_origin: Condition2,
    /// Pilot and passenger waiting for each other.
    aboard: Condition2,
    // Protected by `lock`. The spinlock is only the cell that lends it out
    // mutably without unsafe code, and is never contended.
    world: SpinLock<World>,
    observer: Arc<dyn BoatObserver>,
    done: Semaphore,
}

impl Boat {
    /// Spawns a thread for every adult and child at the origin, and returns
    /// once all of them reached the destination.
    ///
    /// # Panics
    /// Panics when there are adults but no child: nobody could row them.
    pub fn begin(adults: usize, children: usize, observer: Arc<dyn BoatObserver>) {
        assert!(
            children > 0 || adults == 0,
            "{adults} adults cannot cross without a child to row them."
        );
        let lock = Arc::new(Lock::new());
        let boat = Arc::new(Boat {
            at_origin: Condition2::new(lock.clone()),
            aboard: Condition2::new(lock.clone()),
            lock,
            world: SpinLock::new(World {
                origin: Census { adults, children },
                destination: Census::default(),
                boat: Location::Origin,
                pilot: false,
                wanted: None,
                passenger: None,
                arrived: false,
            }),
            observer,
            done: Semaphore::new(0),
        });

        for i in 0..adults {
            let boat = boat.clone();
            ThreadBuilder::new(format!("adult {i}")).spawn(move || boat.adult_itinerary());
        }
        for i in 0..children {
            let boat = boat.clone();
            ThreadBuilder::new(format!("child {i}")).spawn(move || boat.child_itinerary());
        }
        for _ in 0..adults + children {
            boat.done.wait();
        }
        kthreads::debug!(
            DebugFlags::BOAT,
            "{adults} adults and {children} children crossed"
        );
    }

    fn with_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let mut world = self.world.lock();
        let r = f(&mut world);
        world.unlock();
        r
    }

    /// Head count of both shores, as `(origin, destination)`.
    fn census(&self) -> (Census, Census) {
        self.with_world(|world| (world.origin, world.destination))
    }

    fn adult_itinerary(&self) {
        self.lock.acquire();
        self.ride_as_passenger(Person::Adult);
        self.lock.release();
        self.done.signal();
    }

    fn child_itinerary(&self) {
        self.lock.acquire();
        loop {
            let role = self.with_world(|world| {
                if world.boat != Location::Origin {
                    None
                } else if !world.pilot {
                    world.pilot = true;
                    world.wanted = world.seat_for_passenger();
                    Some(Role::Pilot)
                } else if world.wanted == Some(Person::Child) && world.passenger.is_none() {
                    Some(Role::Passenger)
                } else {
                    None
                }
            });
            match role {
                Some(Role::Pilot) => {
                    if self.pilot() {
                        break;
                    }
                }
                Some(Role::Passenger) => {
                    self.ride_as_passenger(Person::Child);
                    break;
                }
                None => self.at_origin.sleep(),
            }
        }
        self.lock.release();
        self.done.signal();
    }

    /// Rows a trip from the origin as the pilot, and back if anybody is left.
    ///
    /// Returns whether the pilot stays at the destination for good.
    fn pilot(&self) -> bool {
        let wanted = self.with_world(|world| world.wanted);
        if wanted.is_some() {
            self.at_origin.wake_all();
            while self.with_world(|world| world.passenger.is_none()) {
                self.aboard.sleep();
            }
        }

        self.observer.child_row_to_destination();
        self.with_world(|world| {
            world.cross(Person::Child, Location::Destination);
            world.arrived = true;
        });
        if wanted.is_some() {
            self.aboard.wake_all();
            while self.with_world(|world| world.passenger.is_some()) {
                self.aboard.sleep();
            }
        }
        self.with_world(|world| world.boat = Location::Destination);
        let (origin, destination) = self.census();
        kthreads::debug!(
            DebugFlags::BOAT,
            "boat at destination, origin {:?}, destination {:?}",
            origin,
            destination
        );
        if wanted.is_none() {
            debug_assert_eq!(origin.total(), 0);
            return true;
        }

        self.observer.child_row_to_origin();
        self.with_world(|world| {
            world.cross(Person::Child, Location::Origin);
            world.boat = Location::Origin;
            world.pilot = false;
            world.wanted = None;
            world.arrived = false;
        });
        self.at_origin.wake_all();
        false
    }

    /// Waits at the origin for a seat offered to `who`, then rides over.
    fn ride_as_passenger(&self, who: Person) {
        loop {
            let seated = self.with_world(|world| {
                let offered = world.boat == Location::Origin
                    && world.pilot
                    && world.wanted == Some(who)
                    && world.passenger.is_none();
                if offered {
                    world.passenger = Some(who);
                }
                offered
            });
            if seated {
                break;
            }
            self.at_origin.sleep();
        }
        self.aboard.wake_all();
        while !self.with_world(|world| world.arrived) {
            self.aboard.sleep();
        }

        match who {
            Person::Adult => self.observer.adult_ride_to_destination(),
            Person::Child => self.observer.child_ride_to_destination(),
        }
        self.with_world(|world| {
            world.cross(who, Location::Destination);
            world.passenger = None;
        });
        self.aboard.wake_all();
    }
}

/// One crossing of the boat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trip {
    /// The shore the boat rowed to.
    pub to: Location,
    /// Who rode along with the rowing child.
    pub passenger: Option<Person>,
}

/// A violation of the crossing rules found by [`TripLog::verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TripError {
    /// A passenger reported a ride with no child rowing to the destination.
    RideWithoutPilot(usize),
    /// More than one passenger rode along in the same trip.
    Overloaded(usize),
    /// The boat left a shore it was not at.
    BoatNotHere(usize),
    /// Somebody crossed from a shore where nobody of their kind stood.
    NobodyToCross(usize, Person),
    /// The crossing ended with people left at the origin.
    Stranded(Census),
    /// The last trip was not a child rowing alone to the destination.
    LastTrip(Option<Trip>),
}

impl std::fmt::Display for TripError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripError::RideWithoutPilot(i) => write!(f, "trip {i}: a ride without a pilot"),
            TripError::Overloaded(i) => write!(f, "trip {i}: more than two aboard"),
            TripError::BoatNotHere(i) => write!(f, "trip {i}: the boat is on the other shore"),
            TripError::NobodyToCross(i, who) => {
                write!(f, "trip {i}: no {who:?} left on the departure shore")
            }
            TripError::Stranded(census) => write!(f, "{census:?} left at the origin"),
            TripError::LastTrip(trip) => write!(f, "unexpected last trip {trip:?}"),
        }
    }
}

impl std::error::Error for TripError {}

#[derive(Clone, Copy, Debug)]
enum Report {
    ChildRowToDestination,
    ChildRideToDestination,
    AdultRideToDestination,
    ChildRowToOrigin,
}

/// An observer recording every crossing.
#[derive(Default)]
pub struct TripLog {
    reports: SpinLock<Vec<Report>>,
}

impl TripLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, report: Report) {
        kthreads::debug!(DebugFlags::BOAT, "{:?}", report);
        let mut reports = self.reports.lock();
        reports.push(report);
        reports.unlock();
    }

    /// Rebuilds the trips from the recorded reports.
    ///
    /// # Errors
    /// Returns an error when the reports do not form a sequence of trips of
    /// one or two people, each rowed by a child.
    pub fn trips(&self) -> Result<Vec<Trip>, TripError> {
        let reports = self.reports.lock();
        let reports_ = reports.clone();
        reports.unlock();

        let mut trips: Vec<Trip> = Vec::new();
        for report in reports_ {
            let passenger = match report {
                Report::ChildRowToDestination => {
                    trips.push(Trip {
                        to: Location::Destination,
                        passenger: None,
                    });
                    continue;
                }
                Report::ChildRowToOrigin => {
                    trips.push(Trip {
                        to: Location::Origin,
                        passenger: None,
                    });
                    continue;
                }
                Report::ChildRideToDestination => Person::Child,
                Report::AdultRideToDestination => Person::Adult,
            };
            let index = trips.len().saturating_sub(1);
            match trips.last_mut() {
                Some(Trip {
                    to: Location::Destination,
                    passenger: seat,
                }) => {
                    if seat.replace(passenger).is_some() {
                        return Err(TripError::Overloaded(index));
                    }
                }
                _ => return Err(TripError::RideWithoutPilot(index)),
            }
        }
        Ok(trips)
    }

    /// Replays the recorded trips from `adults` and `children` at the
    /// origin, checking every rule of the crossing.
    ///
    /// Returns the trips on success.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn verify(&self, adults: usize, children: usize) -> Result<Vec<Trip>, TripError> {
        let trips = self.trips()?;
        let mut world = World {
            origin: Census { adults, children },
            destination: Census::default(),
            boat: Location::Origin,
            pilot: false,
            wanted: None,
            passenger: None,
            arrived: false,
        };
        for (i, trip) in trips.iter().enumerate() {
            let from = match trip.to {
                Location::Destination => Location::Origin,
                Location::Origin => Location::Destination,
            };
            if world.boat != from {
                return Err(TripError::BoatNotHere(i));
            }
            for who in std::iter::once(Person::Child).chain(trip.passenger) {
                let shore = match from {
                    Location::Origin => &world.origin,
                    Location::Destination => &world.destination,
                };
                let present = match who {
                    Person::Adult => shore.adults,
                    Person::Child => shore.children,
                };
                if present == 0 {
                    return Err(TripError::NobodyToCross(i, who));
                }
                world.cross(who, trip.to);
            }
            world.boat = trip.to;
        }

        if world.origin.total() != 0 {
            return Err(TripError::Stranded(world.origin));
        }
        match trips.last() {
            None if adults + children == 0 => Ok(trips),
            Some(Trip {
                to: Location::Destination,
                passenger: None,
            }) => Ok(trips),
            last => Err(TripError::LastTrip(last.copied())),
        }
    }
}

impl BoatObserver for TripLog {
    fn child_row_to_destination(&self) {
        self.record(Report::ChildRowToDestination);
    }
    fn child_ride_to_destination(&self) {
        self.record(Report::ChildRideToDestination);
    }
    fn adult_ride_to_destination(&self) {
        self.record(Report::AdultRideToDestination);
    }
    fn child_row_to_origin(&self) {
        self.record(Report::ChildRowToOrigin);
    }
}
