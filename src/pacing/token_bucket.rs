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

use std::time::Duration;

use crate::{
    net::{readiness::Readiness, transmit::Transmit},
    pacing::{
        time::{Clock, Timestamp},
        Pacer, Tally, MAX_WAIT,
    },
    stream::Stream,
    Error, Result,
};

/// how much traffic, in time at the configured rate, a full bucket holds
pub const BUCKET_DEPTH: Duration = Duration::from_millis(5);

// tokens are counted in bit-nanoseconds per second: rate (bits/s) times elapsed (ns)
const UNITS_PER_BYTE: u128 = 8 * 1_000_000_000;

/// a byte budget refilled at a constant rate and capped at a capacity
///
/// Token arithmetic is integral, so refilling in many small steps adds up to
/// exactly the same budget as refilling once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBucket {
    capacity: u128,
    rate: u128,
    tokens: u128,
}

impl TokenBucket {
    /// a full bucket of `capacity` bytes refilled at `rate_bits_per_sec` (wire bits)
    pub fn new(rate_bits_per_sec: f64, capacity: u64) -> TokenBucket {
        let capacity = capacity as u128 * UNITS_PER_BYTE;
        TokenBucket {
            capacity,
            rate: rate_bits_per_sec.max(0.0).round() as u128,
            tokens: capacity,
        }
    }

    /// a bucket deep enough for [`BUCKET_DEPTH`] of traffic and never shallower than two batches
    ///
    /// Debits are in wire bytes, so the bucket refills at the wire rate that
    /// carries the stream's payload rate; goodput then matches the deadline policy.
    pub fn for_stream(stream: &Stream) -> TokenBucket {
        let wire_rate = stream.wire_rate_bits_per_sec();
        let depth = (wire_rate / 8.0 * BUCKET_DEPTH.as_secs_f64()) as u64;
        let capacity = depth.max(2 * stream.batch_wire_bytes() as u64);
        TokenBucket::new(wire_rate, capacity)
    }

    pub fn capacity(&self) -> u64 {
        (self.capacity / UNITS_PER_BYTE) as u64
    }

    /// whole bytes currently available
    pub fn available(&self) -> u64 {
        (self.tokens / UNITS_PER_BYTE) as u64
    }

    pub fn has(&self, bytes: u64) -> bool {
        self.tokens >= bytes as u128 * UNITS_PER_BYTE
    }

    pub fn replenish(&mut self, elapsed: Duration) {
        let added = self.rate.saturating_mul(elapsed.as_nanos());
        self.tokens = self.tokens.saturating_add(added).min(self.capacity);
    }

    /// takes `bytes` out of the bucket, or nothing if there are not that many
    pub fn try_debit(&mut self, bytes: u64) -> bool {
        match self.tokens.checked_sub(bytes as u128 * UNITS_PER_BYTE) {
            Some(remaining) => {
                self.tokens = remaining;
                true
            }
            None => false,
        }
    }

    /// how long until the bucket holds `bytes`, rounded up to the nanosecond
    ///
    /// `Duration::MAX` if the bucket cannot ever hold that many.
    pub fn time_until(&self, bytes: u64) -> Duration {
        let wanted = bytes as u128 * UNITS_PER_BYTE;
        if self.tokens >= wanted {
            return Duration::ZERO;
        }
        if wanted > self.capacity || self.rate == 0 {
            return Duration::MAX;
        }
        let deficit = wanted - self.tokens;
        let nanos = (deficit + self.rate - 1) / self.rate;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

struct Slot {
    id: usize,
    bucket: TokenBucket,
    /// wire bytes of one full batch; the registration threshold
    threshold: u64,
    overhead: usize,
    batch_size: usize,
    registered: bool,
}

/// paces streams by subscribing them to write readiness only while they can afford a batch
///
/// Buckets are refilled right before every wait. A readiness report sends
/// exactly one batch and debits its wire size (payload plus headers).
pub struct TokenBucketPacer<T, R, C> {
    slots: Vec<Slot>,
    transmitter: T,
    readiness: R,
    clock: C,
    refilled_at: Timestamp,
    ready: Vec<usize>,
}

impl<T: Transmit, R: Readiness, C: Clock> TokenBucketPacer<T, R, C> {
    /// every bucket starts full
    pub fn new(streams: &[Stream], transmitter: T, readiness: R, clock: C) -> TokenBucketPacer<T, R, C> {
        let slots = streams
            .iter()
            .map(|stream| {
                let bucket = TokenBucket::for_stream(stream);
                log::trace!(
                    "stream {} bucket: {} bytes deep, {} wire bits/s",
                    stream.id,
                    bucket.capacity(),
                    stream.wire_rate_bits_per_sec()
                );
                Slot {
                    id: stream.id,
                    bucket,
                    threshold: stream.batch_wire_bytes() as u64,
                    overhead: stream.overhead(),
                    batch_size: stream.batch_size,
                    registered: false,
                }
            })
            .collect::<Vec<_>>();

        TokenBucketPacer {
            ready: Vec::with_capacity(slots.len()),
            slots,
            transmitter,
            readiness,
            refilled_at: clock.now(),
            clock,
        }
    }

    pub fn bucket(&self, slot: usize) -> &TokenBucket {
        &self.slots[slot].bucket
    }

    pub fn is_registered(&self, slot: usize) -> bool {
        self.slots[slot].registered
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    pub fn readiness(&self) -> &R {
        &self.readiness
    }

    /// refills every bucket, subscribes streams that can now afford a batch and
    /// returns how long the next wait may last
    fn replenish(&mut self) -> Result<Duration> {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.refilled_at);
        self.refilled_at = now;

        let mut timeout = MAX_WAIT;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            slot.bucket.replenish(elapsed);
            if slot.bucket.has(slot.threshold) {
                if !slot.registered {
                    self.readiness.register(idx)?;
                    slot.registered = true;
                }
            } else {
                if slot.registered {
                    self.readiness.deregister(idx)?;
                    slot.registered = false;
                }
                timeout = timeout.min(slot.bucket.time_until(slot.threshold));
            }
        }
        Ok(timeout)
    }
}

impl<T: Transmit, R: Readiness, C: Clock> Pacer for TokenBucketPacer<T, R, C> {
    fn step(&mut self) -> Result<Tally> {
        let mut tally = Tally::default();
        let timeout = self.replenish()?;

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        self.readiness.wait(&mut ready, timeout)?;

        for &idx in &ready {
            let slot = &mut self.slots[idx];
            if !slot.registered {
                log::trace!("ignoring stale readiness for stream {}", slot.id);
                continue;
            }
            if !slot.bucket.has(slot.threshold) {
                return Err(Error::Invariant(format!(
                    "stream {} reported writable with {} of {} bytes",
                    slot.id,
                    slot.bucket.available(),
                    slot.threshold
                )));
            }

            let sent = self.transmitter.transmit(idx, slot.batch_size)?;
            tally.record(sent);
            if sent.is_empty() {
                // still registered; the next edge comes when the send-buffer drains
                continue;
            }

            let wire_bytes = sent.wire_bytes(slot.overhead);
            if !slot.bucket.try_debit(wire_bytes) {
                return Err(Error::Invariant(format!(
                    "stream {} sent {} wire bytes with {} available",
                    slot.id,
                    wire_bytes,
                    slot.bucket.available()
                )));
            }
            if slot.bucket.has(slot.threshold) {
                self.readiness.rearm(idx)?;
            } else {
                self.readiness.deregister(idx)?;
                slot.registered = false;
            }
        }

        self.ready = ready;
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::readiness::SimulatedReadiness;
    use crate::net::transmit::Sent;
    use crate::pacing::time::ManualClock;

    struct Accepting {
        payload: u64,
        accepted: u64,
        sends: usize,
    }

    impl Transmit for Accepting {
        fn transmit(&mut self, _slot: usize, batch: usize) -> Result<Sent> {
            self.sends += 1;
            let packets = self.accepted.min(batch as u64);
            Ok(Sent {
                packets,
                bytes: packets * self.payload,
            })
        }
    }

    fn stream(rate: f64, batch: usize) -> Stream {
        Stream {
            id: 0,
            destination: "127.0.0.1:5201".parse().unwrap(),
            rate_bits_per_sec: rate,
            payload_size: 58,
            batch_size: batch,
        }
    }

    #[test]
    fn test_bucket_clamps_to_capacity() {
        let mut bucket = TokenBucket::new(8000.0, 100);
        assert_eq!(bucket.available(), 100);
        assert!(bucket.try_debit(100));
        assert_eq!(bucket.available(), 0);
        assert!(!bucket.try_debit(1));

        bucket.replenish(Duration::from_millis(50));
        assert_eq!(bucket.available(), 50);
        bucket.replenish(Duration::from_secs(3600));
        assert_eq!(bucket.available(), 100);
    }

    #[test]
    fn test_small_refills_add_up_exactly() {
        let mut bucket = TokenBucket::new(8_000_000.0, 1_000_000);
        assert!(bucket.try_debit(1_000_000));
        for _ in 0..1_000 {
            bucket.replenish(Duration::from_nanos(333));
        }
        let mut once = TokenBucket::new(8_000_000.0, 1_000_000);
        assert!(once.try_debit(1_000_000));
        once.replenish(Duration::from_nanos(333_000));
        assert_eq!(bucket, once);
        assert_eq!(bucket.available(), 333);
    }

    #[test]
    fn test_time_until_rounds_up() {
        let mut bucket = TokenBucket::new(3.0 * 8.0, 10);
        assert!(bucket.try_debit(10));
        // one byte at three bytes per second
        assert_eq!(bucket.time_until(1), Duration::from_nanos(333_333_334));
        assert_eq!(bucket.time_until(11), Duration::MAX);
        assert_eq!(TokenBucket::new(8.0, 10).time_until(10), Duration::ZERO);
    }

    #[test]
    fn test_capacity_covers_two_batches() {
        let slow = TokenBucket::for_stream(&stream(1000.0, 10));
        assert_eq!(slow.capacity(), 2 * 10 * 100);
        // 100 wire bytes carry 58 payload bytes: 5 ms at 8e9 * 100 / 58 wire bits/s
        let fast = TokenBucket::for_stream(&stream(8e9, 1));
        assert!((8_620_600..=8_620_700).contains(&fast.capacity()), "{}", fast.capacity());
    }

    #[test]
    fn test_refill_rate_carries_the_payload_rate() {
        // 580 payload bits per second ride on 1000 wire bits per second
        let mut bucket = TokenBucket::for_stream(&stream(580.0, 10));
        assert!(bucket.try_debit(bucket.capacity()));
        bucket.replenish(Duration::from_secs(8));
        assert_eq!(bucket.available(), 1000);
    }

    #[test]
    fn test_debits_wire_bytes_and_deregisters() {
        // 58 + 42 = 100 wire bytes per packet, 10 packets per batch, 2000-byte bucket
        let clock = ManualClock::new(Timestamp::ZERO);
        let transmitter = Accepting {
            payload: 58,
            accepted: 10,
            sends: 0,
        };
        let mut pacer = TokenBucketPacer::new(&[stream(1000.0, 10)], transmitter, SimulatedReadiness::new(&clock), &clock);

        let tally = pacer.step().unwrap();
        assert_eq!(tally.packets, 10);
        assert_eq!(tally.bytes, 580);
        assert_eq!(pacer.bucket(0).available(), 1000);
        assert!(pacer.is_registered(0));

        pacer.step().unwrap();
        assert_eq!(pacer.bucket(0).available(), 0);
        assert!(!pacer.is_registered(0));
        assert!(!pacer.readiness().is_registered(0));
        assert_eq!(clock.now(), Timestamp::ZERO);

        // nothing to send: the wait is bounded and the stream stays unsubscribed
        let tally = pacer.step().unwrap();
        assert_eq!(tally, Tally::default());
        assert_eq!(clock.slept(), MAX_WAIT);
        assert!(!pacer.is_registered(0));
    }

    #[test]
    fn test_partial_batches_debit_only_what_was_sent() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let transmitter = Accepting {
            payload: 58,
            accepted: 3,
            sends: 0,
        };
        let mut pacer = TokenBucketPacer::new(&[stream(1000.0, 10)], transmitter, SimulatedReadiness::new(&clock), &clock);
        pacer.step().unwrap();
        assert_eq!(pacer.bucket(0).available(), 2000 - 300);
        assert!(pacer.is_registered(0));
    }

    #[test]
    fn test_blocked_send_keeps_tokens_and_registration() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let transmitter = Accepting {
            payload: 58,
            accepted: 0,
            sends: 0,
        };
        let mut pacer = TokenBucketPacer::new(&[stream(1000.0, 10)], transmitter, SimulatedReadiness::new(&clock), &clock);
        let tally = pacer.step().unwrap();
        assert_eq!(tally.blocked, 1);
        assert_eq!(pacer.bucket(0).available(), 2000);
        assert!(pacer.is_registered(0));

        // no rearm after a blocked send, so no second report
        let tally = pacer.step().unwrap();
        assert_eq!(tally, Tally::default());
        assert_eq!(pacer.transmitter().sends, 1);
    }

    #[test]
    fn test_stale_readiness_and_overspending() {
        struct Liar;
        impl Readiness for Liar {
            fn register(&mut self, _slot: usize) -> Result<()> {
                Ok(())
            }
            fn rearm(&mut self, _slot: usize) -> Result<()> {
                Ok(())
            }
            fn deregister(&mut self, _slot: usize) -> Result<()> {
                Ok(())
            }
            fn wait(&mut self, ready: &mut Vec<usize>, _timeout: Duration) -> Result<()> {
                ready.push(0);
                Ok(())
            }
        }

        let clock = ManualClock::new(Timestamp::ZERO);
        let transmitter = Accepting {
            payload: 58,
            accepted: 10,
            sends: 0,
        };
        let mut pacer = TokenBucketPacer::new(&[stream(1000.0, 10)], transmitter, Liar, &clock);
        pacer.step().unwrap();
        pacer.step().unwrap();
        // the slot is deregistered now; a report for it is stale and ignored
        assert_eq!(pacer.step().unwrap(), Tally::default());

        // a transmitter claiming more than the bucket could pay for
        let clock = ManualClock::new(Timestamp::ZERO);
        let transmitter = Accepting {
            payload: 58,
            accepted: 70,
            sends: 0,
        };
        // a 6000-byte bucket asked to send 70 packets of 100 wire bytes
        let mut pacer = TokenBucketPacer::new(&[stream(1000.0, 30)], transmitter, Liar, &clock);
        pacer.slots[0].batch_size = 70;
        match pacer.step() {
            Err(Error::Invariant(msg)) => assert!(msg.contains("stream 0 sent 7000 wire bytes")),
            other => panic!("expected an invariant violation, got {:?}", other),
        }
    }
}
