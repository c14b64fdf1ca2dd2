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

use std::ops::{Add, AddAssign, Range};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    config::{Configuration, Role},
    engine::StopFlag,
    net::{readiness::MioReadiness, transmit::BatchTransmitter},
    pacing::{deadline::DeadlinePacer, time::MonotonicClock, token_bucket::TokenBucketPacer, Pacer, Policy, Tally},
    sink::Sink,
    stream::{self, udp},
    Result,
};

/// traffic counted by one worker since the aggregator last looked
///
/// Only the owning worker adds; only the aggregator resets. Counts are
/// approximate across the two, which is fine for rate reporting.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    blocked: AtomicU64,
}

impl WorkerCounters {
    pub fn record(&self, tally: &Tally) {
        if tally.packets != 0 {
            self.packets.fetch_add(tally.packets, Ordering::Relaxed);
            self.bytes.fetch_add(tally.bytes, Ordering::Relaxed);
        }
        if tally.blocked != 0 {
            self.blocked.fetch_add(tally.blocked, Ordering::Relaxed);
        }
    }

    /// reads and resets every counter
    pub fn take(&self) -> CounterSnapshot {
        CounterSnapshot {
            packets: self.packets.swap(0, Ordering::Relaxed),
            bytes: self.bytes.swap(0, Ordering::Relaxed),
            blocked: self.blocked.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub blocked: u64,
}

impl Add for CounterSnapshot {
    type Output = CounterSnapshot;

    fn add(self, other: CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            packets: self.packets + other.packets,
            bytes: self.bytes + other.bytes,
            blocked: self.blocked + other.blocked,
        }
    }
}

impl AddAssign for CounterSnapshot {
    fn add_assign(&mut self, other: CounterSnapshot) {
        *self = *self + other;
    }
}

/// one thread's share of the streams: owns their sockets and runs their scheduler
pub struct Worker {
    index: usize,
    cfg: Configuration,
    stream_ids: Range<usize>,
    counters: Arc<WorkerCounters>,
    stop: StopFlag,
    core: Option<core_affinity::CoreId>,
}

impl Worker {
    pub fn new(
        index: usize,
        cfg: &Configuration,
        stream_ids: Range<usize>,
        counters: Arc<WorkerCounters>,
        stop: StopFlag,
    ) -> Worker {
        Worker {
            index,
            cfg: cfg.clone(),
            stream_ids,
            counters,
            stop,
            core: None,
        }
    }

    /// pins the worker's thread to `core` once it starts running
    pub fn pinned_to(mut self, core: Option<core_affinity::CoreId>) -> Worker {
        self.core = core;
        self
    }

    /// runs until the stop flag is lowered or a stream fails
    ///
    /// Sockets are opened here, on the worker's own thread, and closed when it returns.
    pub fn run(self) -> Result<()> {
        if let Some(core) = self.core {
            if core_affinity::set_for_current(core) {
                log::debug!("worker {} pinned to core {}", self.index, core.id);
            } else {
                log::warn!("worker {} could not be pinned to core {}", self.index, core.id);
            }
        }

        match self.cfg.role {
            Role::Send => self.run_sender(),
            Role::Receive => {
                let streams = stream::build_streams(&self.cfg, self.stream_ids.clone());
                log::info!(
                    "worker {} receiving streams {}..{}",
                    self.index,
                    self.stream_ids.start,
                    self.stream_ids.end
                );
                Sink::open(&streams, self.cfg.receive_buffer_bytes())?.run(&self.counters, &self.stop)
            }
        }
    }

    fn run_sender(&self) -> Result<()> {
        let streams = stream::build_streams(&self.cfg, self.stream_ids.clone());
        let mut sockets = Vec::with_capacity(streams.len());
        for stream in &streams {
            let (socket, granted) = udp::connect(stream, self.cfg.send_buffer_bytes())?;
            if sockets.is_empty() {
                log::debug!(
                    "worker {}: send-buffer of stream {} is {} bytes (requested {})",
                    self.index,
                    stream.id,
                    granted,
                    self.cfg.send_buffer_bytes()
                );
            }
            sockets.push(socket);
        }

        let payload = stream::build_payload(self.cfg.payload_size, &self.cfg.run_id);
        let ids = streams.iter().map(|s| s.id).collect();
        let transmitter = BatchTransmitter::new(sockets, ids, payload, self.cfg.batch_size);

        log::info!(
            "worker {} pacing streams {}..{} with the {:?} policy",
            self.index,
            self.stream_ids.start,
            self.stream_ids.end,
            self.cfg.policy
        );
        match self.cfg.policy {
            Policy::Deadline => drive(
                DeadlinePacer::new(&streams, transmitter, MonotonicClock::new()),
                &self.counters,
                &self.stop,
            ),
            Policy::TokenBucket => {
                let readiness = MioReadiness::new(transmitter.raw_fds())?;
                drive(
                    TokenBucketPacer::new(&streams, transmitter, readiness, MonotonicClock::new()),
                    &self.counters,
                    &self.stop,
                )
            }
        }
    }
}

/// steps `pacer` until `stop` is lowered, publishing every step's tally
pub fn drive<P: Pacer>(mut pacer: P, counters: &WorkerCounters, stop: &StopFlag) -> Result<()> {
    while stop.is_alive() {
        let tally = pacer.step()?;
        counters.record(&tally);
    }
    Ok(())
}
