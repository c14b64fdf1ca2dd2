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

use std::net::IpAddr;

use crate::pacing::Policy;
use crate::stats::Format;

/// paces synthetic UDP traffic across many independently rate-limited streams
#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// the receiver to send to; in receive mode, the local address to bind
    #[arg(value_name = "address")]
    pub address: IpAddr,

    /// the first destination port; stream N uses this plus N
    #[arg(short, long, value_name = "number", default_value_t = 5201)]
    pub port: u16,

    /// the number of streams
    #[arg(short = 'P', long, value_name = "number", default_value_t = 1)]
    pub streams: usize,

    /// the number of worker threads; must divide the stream count
    #[arg(short, long, value_name = "number", default_value_t = 1)]
    pub workers: usize,

    /// target rate of each stream; a bare number is Mbit/s,
    /// k/m/g suffixes are bits, K/M/G suffixes are bytes
    #[arg(short = 'b', long, value_name = "rate", default_value = "1")]
    pub rate: String,

    /// payload bytes per datagram, excluding headers
    #[arg(short = 'l', long, value_name = "bytes", default_value_t = 32)]
    pub payload: usize,

    /// datagrams per vectorized send
    #[arg(long, value_name = "number", default_value_t = 20)]
    pub batch: usize,

    /// send-buffer size to request per socket, in KiB; 0 keeps the system default
    #[arg(long, value_name = "kib", default_value_t = 0)]
    pub send_buffer: usize,

    /// receive-buffer size to request per socket in receive mode, in KiB; 0 keeps the system default
    #[arg(long, value_name = "kib", default_value_t = 0)]
    pub recv_buffer: usize,

    /// the pacing policy
    #[arg(long, value_enum, default_value_t = Policy::Deadline)]
    pub policy: Policy,

    /// seconds between throughput reports
    #[arg(long, value_name = "seconds", default_value_t = 10.0)]
    pub interval: f64,

    /// run for this many seconds; 0 runs until interrupted
    #[arg(short = 't', long, value_name = "seconds", default_value_t = 0.0)]
    pub time: f64,

    /// comma-separated CPU cores to pin worker threads to, round-robin
    #[arg(short = 'A', long, value_name = "cores", default_value = "")]
    pub affinity: String,

    /// count incoming traffic on the port range instead of sending it
    #[arg(short, long)]
    pub receive: bool,

    /// how reports are printed
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// emit debug-level logging
    #[arg(short, long)]
    pub debug: bool,
}
