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

pub mod udp;

use std::net::{IpAddr, SocketAddr};
use std::ops::Range;

use crate::config::Configuration;
use crate::pacing::time::Period;

/// Ethernet + IPv4 + UDP headers, in bytes
pub const IPV4_WIRE_OVERHEAD: usize = 14 + 20 + 8;
/// Ethernet + IPv6 + UDP headers, in bytes
pub const IPV6_WIRE_OVERHEAD: usize = 14 + 40 + 8;

/// the largest payload a single UDP datagram can carry
pub const MAX_PAYLOAD_SIZE: usize = 65507;

/// payload bytes taken by the run identifier and stream id
pub const PAYLOAD_HEADER_SIZE: usize = 16 + 4;

pub fn wire_overhead(ip: &IpAddr) -> usize {
    match ip {
        IpAddr::V4(_) => IPV4_WIRE_OVERHEAD,
        IpAddr::V6(_) => IPV6_WIRE_OVERHEAD,
    }
}

/// one rate-paced flow of identical datagrams to a fixed destination
#[derive(Clone, Debug, PartialEq)]
pub struct Stream {
    pub id: usize,
    pub destination: SocketAddr,
    pub rate_bits_per_sec: f64,
    pub payload_size: usize,
    pub batch_size: usize,
}

impl Stream {
    /// per-packet header bytes on the wire
    pub fn overhead(&self) -> usize {
        wire_overhead(&self.destination.ip())
    }

    pub fn wire_size(&self) -> usize {
        self.payload_size + self.overhead()
    }

    pub fn batch_payload_bytes(&self) -> usize {
        self.batch_size * self.payload_size
    }

    pub fn batch_wire_bytes(&self) -> usize {
        self.batch_size * self.wire_size()
    }

    /// the wire rate, headers included, that carries `rate_bits_per_sec` of payload
    pub fn wire_rate_bits_per_sec(&self) -> f64 {
        self.rate_bits_per_sec * self.wire_size() as f64 / self.payload_size as f64
    }

    /// the time one batch's payload takes at the configured rate
    pub fn cycle(&self) -> Period {
        Period::for_bits(self.batch_payload_bytes() as u64 * 8, self.rate_bits_per_sec)
    }
}

/// splits `stream_count` ids into `worker_count` contiguous, equally sized ranges
///
/// Callers validate divisibility first; any remainder is left unassigned.
pub fn partition(stream_count: usize, worker_count: usize) -> Vec<Range<usize>> {
    if worker_count == 0 {
        return Vec::new();
    }
    let per_worker = stream_count / worker_count;
    (0..worker_count)
        .map(|worker| worker * per_worker..(worker + 1) * per_worker)
        .collect()
}

/// the registry slice for one worker: stream definitions for `ids`
pub fn build_streams(cfg: &Configuration, ids: Range<usize>) -> Vec<Stream> {
    ids.map(|id| Stream {
        id,
        destination: cfg.stream_address(id),
        rate_bits_per_sec: cfg.rate_bits_per_sec,
        payload_size: cfg.payload_size,
        batch_size: cfg.batch_size,
    })
    .collect()
}

/// builds the datagram body shared by every packet a worker sends
///
/// The run id takes the first sixteen bytes and the stream id the next four, when
/// there is room; the remainder is a fixed byte sequence.
pub fn build_payload(size: usize, run_id: &uuid::Uuid) -> Vec<u8> {
    let mut payload: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
    if size >= PAYLOAD_HEADER_SIZE {
        payload[0..16].copy_from_slice(run_id.as_bytes());
    }
    payload
}

/// writes `stream_id` into a payload produced by [`build_payload`]
pub fn stamp_stream_id(payload: &mut [u8], stream_id: usize) {
    if payload.len() >= PAYLOAD_HEADER_SIZE {
        payload[16..20].copy_from_slice(&(stream_id as u32).to_be_bytes());
    }
}
