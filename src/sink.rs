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

//! The receiving side: counts whatever arrives on a worker's ports.

use std::io;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};

use crate::{
    engine::StopFlag,
    pacing::{Tally, MAX_WAIT},
    stream::{udp, Stream, MAX_PAYLOAD_SIZE},
    worker::WorkerCounters,
    Result,
};

/// bound sockets for a range of streams, drained on read readiness
pub struct Sink {
    poll: Poll,
    events: Events,
    sockets: Vec<UdpSocket>,
    buf: Vec<u8>,
}

impl Sink {
    /// binds each stream's port on the stream's address
    pub fn open(streams: &[Stream], receive_buffer: usize) -> Result<Sink> {
        let poll = Poll::new()?;
        let mut sockets = Vec::with_capacity(streams.len());
        for (slot, stream) in streams.iter().enumerate() {
            let (socket, granted) = udp::bind(stream.destination, receive_buffer)?;
            if slot == 0 {
                log::debug!(
                    "receive-buffer of stream {} is {} bytes (requested {})",
                    stream.id,
                    granted,
                    receive_buffer
                );
            }
            let mut socket = UdpSocket::from_std(socket);
            poll.registry().register(&mut socket, Token(slot), Interest::READABLE)?;
            sockets.push(socket);
        }

        Ok(Sink {
            poll,
            events: Events::with_capacity(streams.len().max(1)),
            sockets,
            buf: vec![0_u8; MAX_PAYLOAD_SIZE],
        })
    }

    pub fn local_addrs(&self) -> Result<Vec<std::net::SocketAddr>> {
        Ok(self.sockets.iter().map(|s| s.local_addr()).collect::<io::Result<_>>()?)
    }

    /// waits at most [`MAX_WAIT`] for traffic and drains every socket that has some
    pub fn step(&mut self) -> Result<Tally> {
        let mut tally = Tally::default();
        match self.poll.poll(&mut self.events, Some(MAX_WAIT)) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(tally),
            Err(e) => return Err(e.into()),
        }

        for event in self.events.iter() {
            let socket = &self.sockets[event.token().0];
            // edge-triggered: read until the socket is empty or the edge is lost
            loop {
                match socket.recv(&mut self.buf) {
                    Ok(len) => {
                        tally.packets += 1;
                        tally.bytes += len as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(tally)
    }

    pub fn run(mut self, counters: &WorkerCounters, stop: &StopFlag) -> Result<()> {
        while stop.is_alive() {
            let tally = self.step()?;
            counters.record(&tally);
        }
        Ok(())
    }
}
