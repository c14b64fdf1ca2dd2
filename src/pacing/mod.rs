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

//! Pacing schedulers: given the streams owned by one worker, decide which one
//! sends next and when.

pub mod deadline;
pub mod send_queue;
pub mod time;
pub mod token_bucket;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::transmit::Sent;
use crate::Result;

/// the longest a scheduler blocks in one step, so stop requests are noticed promptly
pub const MAX_WAIT: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// a min-heap of per-stream send deadlines
    Deadline,
    /// per-stream byte budgets gating write-readiness subscriptions
    TokenBucket,
}

/// what a scheduler step put on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub packets: u64,
    pub bytes: u64,
    /// transmissions deferred because the socket would have blocked
    pub blocked: u64,
}

impl Tally {
    pub fn record(&mut self, sent: Sent) {
        if sent.is_empty() {
            self.blocked += 1;
        } else {
            self.packets += sent.packets;
            self.bytes += sent.bytes;
        }
    }
}

/// a scheduling policy driving one worker's streams
pub trait Pacer {
    /// makes one round of scheduling decisions
    ///
    /// Blocks for at most [`MAX_WAIT`] and returns what was sent, which may be
    /// nothing. An error ends the worker.
    fn step(&mut self) -> Result<Tally>;
}
