//! Monotonic entry name generation.
//!
//! Entry names are wall-clock timestamps formatted to a fixed length so that lexicographic order
//! equals creation order, which is what lets the catalog use a plain sorted map as its ordering
//! structure (see [`crate::entry::Catalog`]).

use std::time::{SystemTime, UNIX_EPOCH};

/// Width, in decimal digits, of a generated entry name. Microsecond-resolution Unix timestamps
/// fit comfortably within this for roughly the next few centuries.
const NAME_WIDTH: usize = 20;

/// A clock abstraction so tests can control the passage of time without sleeping.
pub trait Clock: Send + Sync {
    /// Current time, in microseconds since the Unix epoch.
    fn now_micros(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_micros() as u64
    }
}

/// Generates strictly increasing entry names.
///
/// If the clock does not advance between two calls (or goes backwards), the namer bumps the
/// previous name by one tick rather than emitting a duplicate, which is what guarantees
/// Invariant: entry names compare as strings and sort in creation order.
pub struct FileNamer<C: Clock = SystemClock> {
    clock: C,
    last: u64,
}

impl FileNamer<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for FileNamer<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> FileNamer<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock, last: 0 }
    }

    /// Restores the monotonic floor from a previously recovered entry name, so that a fresh
    /// engine instance never reallocates a name at or below the highest name found on disk.
    pub fn set_floor_from_name(&mut self, name: &str) {
        if let Ok(value) = name.parse::<u64>() {
            self.last = self.last.max(value);
        }
    }

    /// Allocates the next monotonic name.
    pub fn next_name(&mut self) -> String {
        let candidate = self.clock.now_micros();
        let allocated = if candidate > self.last {
            candidate
        } else {
            self.last + 1
        };
        self.last = allocated;
        format!("{allocated:0width$}", width = NAME_WIDTH)
    }

    /// Validates that `name` is a well-formed entry name: fixed length, all-decimal.
    pub fn is_valid_name(name: &str) -> bool {
        name.len() == NAME_WIDTH && name.bytes().all(|b| b.is_ascii_digit())
    }
}
