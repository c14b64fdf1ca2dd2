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

use std::io;
use std::net::UdpSocket;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::{stream::stamp_stream_id, Error, Result};

/// the largest batch a single vectorized send accepts (UIO_MAXIOV)
pub const MAX_BATCH_SIZE: usize = 1024;

/// what the kernel accepted from one batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sent {
    pub packets: u64,
    /// payload bytes of the accepted packets only
    pub bytes: u64,
}

impl Sent {
    pub fn is_empty(&self) -> bool {
        self.packets == 0
    }

    /// payload plus `overhead` header bytes for every accepted packet
    pub fn wire_bytes(&self, overhead: usize) -> u64 {
        self.bytes + self.packets * overhead as u64
    }
}

/// sends batches of identical datagrams on a worker's streams
pub trait Transmit {
    /// sends up to `batch` packets on the stream in `slot`
    ///
    /// A full send-buffer yields an empty [`Sent`]; every other failure is an error.
    fn transmit(&mut self, slot: usize, batch: usize) -> Result<Sent>;
}

/// sorts a send failure into a deferral or a fatal error for `stream`
pub fn classify(stream: usize, err: io::Error) -> Result<Sent> {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
            log::trace!("send-buffer of stream {} is full; deferring", stream);
            Ok(Sent::default())
        }
        _ => Err(Error::Send { stream, source: err }),
    }
}

/// one `sendmmsg` per call, every message pointing at the same payload buffer
pub struct BatchTransmitter {
    sockets: Vec<UdpSocket>,
    stream_ids: Vec<usize>,
    payload: Vec<u8>,
    #[cfg(target_os = "linux")]
    headers: Vec<libc::mmsghdr>,
}

impl BatchTransmitter {
    /// `sockets[slot]` must be connected and non-blocking and belong to `stream_ids[slot]`
    pub fn new(sockets: Vec<UdpSocket>, stream_ids: Vec<usize>, payload: Vec<u8>, max_batch: usize) -> BatchTransmitter {
        let max_batch = max_batch.clamp(1, MAX_BATCH_SIZE);
        BatchTransmitter {
            sockets,
            stream_ids,
            payload,
            #[cfg(target_os = "linux")]
            // SAFETY: mmsghdr is a C struct where all-zeros is a valid initial state.
            headers: vec![unsafe { std::mem::zeroed() }; max_batch],
        }
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.sockets.iter().map(|s| s.as_raw_fd()).collect()
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    #[cfg(target_os = "linux")]
    fn send_batch(&mut self, slot: usize, batch: usize) -> io::Result<Sent> {
        let batch = batch.min(self.headers.len());
        let mut iov = libc::iovec {
            iov_base: self.payload.as_mut_ptr() as *mut libc::c_void,
            iov_len: self.payload.len(),
        };
        for header in self.headers.iter_mut().take(batch) {
            header.msg_hdr.msg_iov = &mut iov;
            header.msg_hdr.msg_iovlen = 1;
            header.msg_len = 0;
        }

        // SAFETY: the socket is open for the transmitter's lifetime; every header
        // points at `iov`, which outlives the call and covers the payload buffer.
        let accepted = unsafe {
            libc::sendmmsg(self.sockets[slot].as_raw_fd(), self.headers.as_mut_ptr(), batch as _, 0)
        };
        if accepted < 0 {
            return Err(io::Error::last_os_error());
        }

        let accepted = accepted as usize;
        Ok(Sent {
            packets: accepted as u64,
            bytes: self.headers[..accepted].iter().map(|h| h.msg_len as u64).sum(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn send_batch(&mut self, slot: usize, batch: usize) -> io::Result<Sent> {
        let mut sent = Sent::default();
        for _ in 0..batch {
            match self.sockets[slot].send(&self.payload) {
                Ok(len) => {
                    sent.packets += 1;
                    sent.bytes += len as u64;
                }
                Err(e) if sent.is_empty() => return Err(e),
                Err(_) => break,
            }
        }
        Ok(sent)
    }
}

impl Transmit for BatchTransmitter {
    fn transmit(&mut self, slot: usize, batch: usize) -> Result<Sent> {
        let stream = self.stream_ids[slot];
        stamp_stream_id(&mut self.payload, stream);
        match self.send_batch(slot, batch) {
            Ok(sent) => {
                log::trace!("stream {} accepted {} of {} packets", stream, sent.packets, batch);
                Ok(sent)
            }
            Err(e) => classify(stream, e),
        }
    }
}
