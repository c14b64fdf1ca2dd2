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
    net::transmit::Transmit,
    pacing::{
        send_queue::SendQueue,
        time::{Cadence, Clock, Period, Timestamp},
        Pacer, Tally, MAX_WAIT,
    },
    stream::Stream,
    Error, Result,
};

/// waits shorter than this are not worth a sleep; the send goes out immediately
pub const SLACK: Duration = Duration::from_micros(5);

/// a pending send: ordered by deadline, then by slot so equal deadlines resolve deterministically
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    pub deadline: Timestamp,
    /// the stream's index within its worker; slots follow stream-id order
    pub slot: usize,
}

struct Schedule {
    cadence: Cadence,
    period: Period,
    batch_size: usize,
}

/// paces streams by popping the earliest deadline, sleeping until it, and sending one batch
///
/// Each stream's next deadline is its previous deadline plus its cycle, never
/// "now" plus its cycle, so lateness is recovered instead of compounded. A late
/// stream still only gets one batch per pop.
pub struct DeadlinePacer<T, C> {
    queue: SendQueue<Entry>,
    schedules: Vec<Schedule>,
    transmitter: T,
    clock: C,
}

impl<T: Transmit, C: Clock> DeadlinePacer<T, C> {
    /// schedules every stream's first send within one cycle of now, staggered by slot
    pub fn new(streams: &[Stream], transmitter: T, clock: C) -> DeadlinePacer<T, C> {
        let start = clock.now();
        let mut schedules = Vec::with_capacity(streams.len());
        let mut entries = Vec::with_capacity(streams.len());
        for (slot, stream) in streams.iter().enumerate() {
            let period = stream.cycle();
            let first = start + period.fraction(slot, streams.len());
            log::trace!(
                "stream {} paced every {} ns, first send at {}",
                stream.id,
                period.nanos(),
                first
            );
            schedules.push(Schedule {
                cadence: Cadence::starting_at(first),
                period,
                batch_size: stream.batch_size,
            });
            entries.push(Entry { deadline: first, slot });
        }

        DeadlinePacer {
            queue: SendQueue::new(entries),
            schedules,
            transmitter,
            clock,
        }
    }

    pub fn queue(&self) -> &SendQueue<Entry> {
        &self.queue
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    /// the deadline of the stream that will send next
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.queue.peek().map(|entry| entry.deadline)
    }
}

impl<T: Transmit, C: Clock> Pacer for DeadlinePacer<T, C> {
    fn step(&mut self) -> Result<Tally> {
        let mut tally = Tally::default();
        let head = *self
            .queue
            .peek()
            .ok_or_else(|| Error::Invariant("deadline queue is empty".to_string()))?;

        let wait = head.deadline.saturating_duration_since(self.clock.now());
        if wait > MAX_WAIT {
            // too far off to commit to; come back after a bounded nap
            self.clock.sleep(MAX_WAIT);
            return Ok(tally);
        }

        let schedule = &mut self.schedules[head.slot];
        let next = schedule.cadence.advance(schedule.period);
        let batch_size = schedule.batch_size;
        self.queue.replace_min(Entry {
            deadline: next,
            slot: head.slot,
        });

        if wait > SLACK {
            self.clock.sleep(wait);
        }
        tally.record(self.transmitter.transmit(head.slot, batch_size)?);
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transmit::{Sent, Transmit};
    use crate::pacing::time::ManualClock;

    #[derive(Default)]
    struct Recorder {
        sends: Vec<(usize, usize)>,
    }

    impl Transmit for Recorder {
        fn transmit(&mut self, slot: usize, batch: usize) -> Result<Sent> {
            self.sends.push((slot, batch));
            Ok(Sent {
                packets: batch as u64,
                bytes: batch as u64 * 32,
            })
        }
    }

    fn streams(rates: &[f64]) -> Vec<Stream> {
        rates
            .iter()
            .enumerate()
            .map(|(id, &rate)| Stream {
                id,
                destination: "127.0.0.1:5201".parse().unwrap(),
                rate_bits_per_sec: rate,
                payload_size: 32,
                batch_size: 1,
            })
            .collect()
    }

    #[test]
    fn test_heap_holds_one_entry_per_stream() {
        let clock = ManualClock::new(Timestamp::new(100, 0));
        let mut pacer = DeadlinePacer::new(&streams(&[1e6, 2e6, 3e6, 4e6]), Recorder::default(), &clock);
        for _ in 0..1000 {
            pacer.step().unwrap();
            assert_eq!(pacer.queue().len(), 4);
            assert!(pacer.queue().is_heap());
        }
        let mut slots: Vec<usize> = pacer.queue().iter().map(|e| e.slot).collect();
        slots.sort();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_equal_deadlines_break_ties_by_slot() {
        let at = Timestamp::new(5, 0);
        let mut queue = SendQueue::new(vec![
            Entry { deadline: at, slot: 2 },
            Entry { deadline: at, slot: 0 },
            Entry {
                deadline: Timestamp::new(4, 999_999_999),
                slot: 3,
            },
            Entry { deadline: at, slot: 1 },
        ]);
        let order: Vec<usize> = std::iter::from_fn(|| queue.pop()).map(|e| e.slot).collect();
        assert_eq!(order, vec![3, 0, 1, 2]);
    }

    #[test]
    fn test_late_streams_send_in_deadline_order() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut pacer = DeadlinePacer::new(&streams(&[8e6, 8e6]), Recorder::default(), &clock);
        // stream 1 starts half a cycle after stream 0
        clock.advance(Duration::from_secs(1));
        for _ in 0..4 {
            pacer.step().unwrap();
        }
        assert_eq!(pacer.transmitter().sends, vec![(0, 1), (1, 1), (0, 1), (1, 1)]);
    }

    #[test]
    fn test_deadline_anchors_to_previous_deadline() {
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut pacer = DeadlinePacer::new(&streams(&[8e6]), Recorder::default(), &clock);
        assert_eq!(pacer.next_deadline(), Some(Timestamp::ZERO));

        // arriving late must not push the schedule back
        clock.advance(Duration::from_micros(10));
        pacer.step().unwrap();
        assert_eq!(pacer.next_deadline(), Some(Timestamp::from_nanos(32_000)));
        assert_eq!(clock.slept(), Duration::ZERO);

        pacer.step().unwrap();
        assert_eq!(clock.now(), Timestamp::from_nanos(32_000));
        assert_eq!(pacer.next_deadline(), Some(Timestamp::from_nanos(64_000)));
    }

    #[test]
    fn test_far_deadline_sleeps_bounded_without_sending() {
        // one 32-byte packet per second
        let clock = ManualClock::new(Timestamp::ZERO);
        let mut pacer = DeadlinePacer::new(&streams(&[256.0, 256.0]), Recorder::default(), &clock);
        pacer.step().unwrap();
        assert_eq!(pacer.transmitter().sends.len(), 1);

        // the second stream is staggered half a second out
        let tally = pacer.step().unwrap();
        assert_eq!(tally, Tally::default());
        assert_eq!(clock.slept(), MAX_WAIT);
        assert_eq!(pacer.transmitter().sends.len(), 1);
    }

    #[test]
    fn test_transient_deferral_keeps_cadence() {
        struct AlwaysFull;
        impl Transmit for AlwaysFull {
            fn transmit(&mut self, _slot: usize, _batch: usize) -> Result<Sent> {
                Ok(Sent::default())
            }
        }

        let clock = ManualClock::new(Timestamp::ZERO);
        let mut pacer = DeadlinePacer::new(&streams(&[8e6]), AlwaysFull, &clock);
        let mut blocked = 0;
        for _ in 0..10 {
            blocked += pacer.step().unwrap().blocked;
        }
        assert_eq!(blocked, 10);
        assert_eq!(pacer.next_deadline(), Some(Timestamp::from_nanos(320_000)));
    }
}
