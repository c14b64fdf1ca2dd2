/*
 * Copyright (C) 2021 Evtech Solutions, Ltd., dba 3D-P
 * Copyright (C) 2021 Neil Tallim <neiltallim@3d-p.com>
 *
 * This file is part of rpacer.
 *
 * rpacer is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * rpacer is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with rpacer.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Fixed-point time arithmetic shared by both pacing policies.

use std::cell::Cell;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// a point on a monotonic timeline, as whole seconds plus nanoseconds
///
/// The nanosecond part is kept in `[0, 1e9)`, so the derived ordering
/// (seconds first, then nanoseconds) is the chronological one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    sec: u64,
    nsec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    pub fn new(sec: u64, nsec: u64) -> Timestamp {
        Timestamp {
            sec: sec + nsec / NANOS_PER_SEC as u64,
            nsec: (nsec % NANOS_PER_SEC as u64) as u32,
        }
    }

    pub fn from_nanos(nanos: u64) -> Timestamp {
        Timestamp::new(0, nanos)
    }

    pub fn sec(&self) -> u64 {
        self.sec
    }

    pub fn nsec(&self) -> u32 {
        self.nsec
    }

    pub fn as_nanos(&self) -> u128 {
        self.sec as u128 * NANOS_PER_SEC as u128 + self.nsec as u128
    }

    /// the time from `earlier` to `self`, or zero when `earlier` is not earlier
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        if *self <= earlier {
            return Duration::ZERO;
        }
        if self.nsec >= earlier.nsec {
            Duration::new(self.sec - earlier.sec, self.nsec - earlier.nsec)
        } else {
            Duration::new(self.sec - earlier.sec - 1, self.nsec + NANOS_PER_SEC - earlier.nsec)
        }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let mut sec = self.sec + rhs.as_secs();
        let mut nsec = self.nsec + rhs.subsec_nanos();
        if nsec >= NANOS_PER_SEC {
            nsec -= NANOS_PER_SEC;
            sec += 1;
        }
        Timestamp { sec, nsec }
    }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// the length of one pacing cycle
///
/// Held as whole nanoseconds plus a binary fraction of a nanosecond (units of
/// 2^-32 ns). The fraction is carried from cycle to cycle by a [`Cadence`], so a
/// schedule advanced by the same period never drifts from the exact rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Period {
    nanos: u64,
    frac: u32,
}

impl Period {
    pub fn from_secs_f64(secs: f64) -> Period {
        Period::from_nanos_f64(secs * NANOS_PER_SEC as f64)
    }

    /// the period for moving `bits` at `bits_per_sec`
    pub fn for_bits(bits: u64, bits_per_sec: f64) -> Period {
        Period::from_nanos_f64(bits as f64 * NANOS_PER_SEC as f64 / bits_per_sec)
    }

    fn from_nanos_f64(nanos: f64) -> Period {
        let nanos = nanos.max(0.0);
        Period {
            nanos: nanos.trunc() as u64,
            frac: (nanos.fract() * (1u64 << 32) as f64) as u32,
        }
    }

    pub fn nanos(&self) -> u64 {
        self.nanos
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos)
    }

    /// the offset of step `index` out of `steps` equal steps within one period
    pub fn fraction(&self, index: usize, steps: usize) -> Duration {
        if steps == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.nanos as u128 * index as u128 / steps as u128) as u64)
    }
}

/// a periodic schedule: the next point in time plus the carried sub-nanosecond remainder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadence {
    next: Timestamp,
    carry: u32,
}

impl Cadence {
    pub fn starting_at(next: Timestamp) -> Cadence {
        Cadence { next, carry: 0 }
    }

    pub fn next(&self) -> Timestamp {
        self.next
    }

    /// moves the schedule one period forward from its previous point and returns the new point
    pub fn advance(&mut self, period: Period) -> Timestamp {
        let (carry, overflow) = self.carry.overflowing_add(period.frac);
        self.carry = carry;
        self.next += Duration::from_nanos(period.nanos + overflow as u64);
        self.next
    }
}

/// a source of monotonic time that can also block the calling thread
pub trait Clock {
    fn now(&self) -> Timestamp;
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// the system's monotonic clock plus a real sleep; time is measured from construction
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> MonotonicClock {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed();
        Timestamp::new(elapsed.as_secs(), elapsed.subsec_nanos() as u64)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// a clock that only moves when told to; sleeping advances it instantly
///
/// Used to drive the schedulers through simulated time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Timestamp>,
    slept: Cell<Duration>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> ManualClock {
        ManualClock {
            now: Cell::new(start),
            slept: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// total time spent in `sleep`
    pub fn slept(&self) -> Duration {
        self.slept.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.set(self.slept.get() + duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_normalizes_nanoseconds() {
        let ts = Timestamp::new(1, 2_500_000_000);
        assert_eq!(ts.sec(), 3);
        assert_eq!(ts.nsec(), 500_000_000);

        let ts = Timestamp::new(0, 999_999_999) + Duration::from_nanos(1);
        assert_eq!((ts.sec(), ts.nsec()), (1, 0));
    }

    #[test]
    fn test_duration_since_borrows_across_seconds() {
        let later = Timestamp::new(5, 100);
        let earlier = Timestamp::new(3, 900_000_000);
        assert_eq!(later.saturating_duration_since(earlier), Duration::new(1, 100_000_100));
        assert_eq!(earlier.saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn test_cadence_carries_fractional_nanoseconds() {
        // a third of a microsecond cannot be represented in whole nanoseconds
        let period = Period::for_bits(1, 3_000_000.0);
        assert_eq!(period.nanos(), 333);

        let mut cadence = Cadence::starting_at(Timestamp::ZERO);
        for _ in 0..3_000_000 {
            cadence.advance(period);
        }
        let drift = cadence.next().as_nanos() as i128 - 1_000_000_000;
        assert!(drift.abs() <= 1, "drifted by {} ns", drift);
    }

    #[test]
    fn test_cadence_is_monotonic() {
        let period = Period::for_bits(256, 8_000_000.0);
        assert_eq!(period.nanos(), 32_000);
        let mut cadence = Cadence::starting_at(Timestamp::new(10, 999_990_000));
        let mut previous = cadence.next();
        for _ in 0..1000 {
            let next = cadence.advance(period);
            assert!(next > previous);
            assert!(next.nsec() < 1_000_000_000);
            previous = next;
        }
    }

    #[test]
    fn test_monotonic_clock_counts_from_its_origin() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        assert!(first < Timestamp::new(1, 0));
        clock.sleep(Duration::from_millis(2));
        let second = clock.now();
        assert!(second.saturating_duration_since(first) >= Duration::from_millis(2));
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(Timestamp::new(1, 0));
        clock.sleep(Duration::from_millis(1500));
        assert_eq!(clock.now(), Timestamp::new(2, 500_000_000));
        assert_eq!(clock.slept(), Duration::from_millis(1500));
    }

    #[test]
    fn test_period_fraction_staggers_evenly() {
        let period = Period::from_secs_f64(0.001);
        assert_eq!(period.fraction(0, 4), Duration::ZERO);
        assert_eq!(period.fraction(2, 4), Duration::from_micros(500));
        assert_eq!(period.fraction(3, 0), Duration::ZERO);
    }
}
