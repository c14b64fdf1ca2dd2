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

use std::collections::BTreeSet;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::pacing::time::Clock;
use crate::Result;

/// edge-triggered write-readiness notification for a worker's streams
///
/// A registered stream is reported once when it becomes writable; `rearm` asks
/// for a fresh report if it is (still) writable.
pub trait Readiness {
    fn register(&mut self, slot: usize) -> Result<()>;
    fn rearm(&mut self, slot: usize) -> Result<()>;
    fn deregister(&mut self, slot: usize) -> Result<()>;

    /// blocks for at most `timeout`, appending the slots that became writable to `ready`
    fn wait(&mut self, ready: &mut Vec<usize>, timeout: Duration) -> Result<()>;
}

/// [`Readiness`] over the platform poller (epoll on Linux, edge-triggered)
pub struct MioReadiness {
    poll: Poll,
    events: Events,
    fds: Vec<RawFd>,
}

impl MioReadiness {
    /// `fds[slot]` is the socket of the stream in `slot`; the caller keeps them open
    pub fn new(fds: Vec<RawFd>) -> Result<MioReadiness> {
        Ok(MioReadiness {
            poll: Poll::new()?,
            events: Events::with_capacity(fds.len().max(1)),
            fds,
        })
    }
}

impl Readiness for MioReadiness {
    fn register(&mut self, slot: usize) -> Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&self.fds[slot]), Token(slot), Interest::WRITABLE)?;
        Ok(())
    }

    fn rearm(&mut self, slot: usize) -> Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&self.fds[slot]), Token(slot), Interest::WRITABLE)?;
        Ok(())
    }

    fn deregister(&mut self, slot: usize) -> Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&self.fds[slot]))?;
        Ok(())
    }

    fn wait(&mut self, ready: &mut Vec<usize>, timeout: Duration) -> Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // errored sockets are reported too, so the next send surfaces the failure
        ready.extend(
            self.events
                .iter()
                .filter(|event| event.is_writable() || event.is_error())
                .map(|event| event.token().0),
        );
        Ok(())
    }
}

/// [`Readiness`] for sockets that always have room, driven by a clock
///
/// Every armed stream is reported on the next wait; with nothing armed the wait
/// sleeps the full timeout. Used for deterministic scheduling runs.
pub struct SimulatedReadiness<C> {
    clock: C,
    registered: BTreeSet<usize>,
    armed: BTreeSet<usize>,
}

impl<C: Clock> SimulatedReadiness<C> {
    pub fn new(clock: C) -> SimulatedReadiness<C> {
        SimulatedReadiness {
            clock,
            registered: BTreeSet::new(),
            armed: BTreeSet::new(),
        }
    }

    pub fn is_registered(&self, slot: usize) -> bool {
        self.registered.contains(&slot)
    }
}

impl<C: Clock> Readiness for SimulatedReadiness<C> {
    fn register(&mut self, slot: usize) -> Result<()> {
        if !self.registered.insert(slot) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists).into());
        }
        self.armed.insert(slot);
        Ok(())
    }

    fn rearm(&mut self, slot: usize) -> Result<()> {
        if !self.registered.contains(&slot) {
            return Err(io::Error::from(io::ErrorKind::NotFound).into());
        }
        self.armed.insert(slot);
        Ok(())
    }

    fn deregister(&mut self, slot: usize) -> Result<()> {
        if !self.registered.remove(&slot) {
            return Err(io::Error::from(io::ErrorKind::NotFound).into());
        }
        self.armed.remove(&slot);
        Ok(())
    }

    fn wait(&mut self, ready: &mut Vec<usize>, timeout: Duration) -> Result<()> {
        if self.armed.is_empty() {
            self.clock.sleep(timeout);
        } else {
            ready.extend(std::mem::take(&mut self.armed));
        }
        Ok(())
    }
}
