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

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    args::Args,
    error_gen,
    net::transmit::MAX_BATCH_SIZE,
    pacing::Policy,
    stats::Format,
    stream::{self, MAX_PAYLOAD_SIZE},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Send,
    Receive,
}

/// everything a run needs, validated once before any worker starts
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Configuration {
    pub run_id: uuid::Uuid,
    pub role: Role,
    /// destination host when sending, local bind address when receiving
    pub address: IpAddr,
    pub start_port: u16,
    pub stream_count: usize,
    pub worker_count: usize,
    /// per stream, not aggregate
    pub rate_bits_per_sec: f64,
    pub payload_size: usize,
    pub batch_size: usize,
    pub send_buffer_kb: usize,
    pub receive_buffer_kb: usize,
    pub policy: Policy,
    pub stats_interval: Duration,
    pub duration: Option<Duration>,
    pub affinity: String,
    pub format: Format,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            run_id: uuid::Uuid::new_v4(),
            role: Role::Send,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            start_port: 5201,
            stream_count: 1,
            worker_count: 1,
            rate_bits_per_sec: 1_000_000.0,
            payload_size: 32,
            batch_size: 20,
            send_buffer_kb: 0,
            receive_buffer_kb: 0,
            policy: Policy::Deadline,
            stats_interval: Duration::from_secs(10),
            duration: None,
            affinity: String::new(),
            format: Format::Text,
        }
    }
}

impl Configuration {
    pub fn from_args(args: &Args) -> Result<Configuration> {
        if !(args.interval.is_finite() && args.interval > 0.0) {
            return Err(error_gen!("report interval must be positive, not {}", args.interval));
        }
        if !(args.time.is_finite() && args.time >= 0.0) {
            return Err(error_gen!("run time must not be negative, not {}", args.time));
        }

        let cfg = Configuration {
            role: if args.receive { Role::Receive } else { Role::Send },
            address: args.address,
            start_port: args.port,
            stream_count: args.streams,
            worker_count: args.workers,
            rate_bits_per_sec: parse_rate(&args.rate)?,
            payload_size: args.payload,
            batch_size: args.batch,
            send_buffer_kb: args.send_buffer,
            receive_buffer_kb: args.recv_buffer,
            policy: args.policy,
            stats_interval: Duration::from_secs_f64(args.interval),
            duration: if args.time > 0.0 {
                Some(Duration::from_secs_f64(args.time))
            } else {
                None
            },
            affinity: args.affinity.clone(),
            format: args.format,
            ..Configuration::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_count == 0 {
            return Err(error_gen!("at least one stream is required"));
        }
        if self.worker_count == 0 {
            return Err(error_gen!("at least one worker is required"));
        }
        if self.stream_count % self.worker_count != 0 {
            return Err(error_gen!(
                "{} streams cannot be divided evenly across {} workers",
                self.stream_count,
                self.worker_count
            ));
        }
        let last_port = self.start_port as usize + self.stream_count - 1;
        if last_port > u16::MAX as usize {
            return Err(error_gen!(
                "{} streams starting at port {} run past port {}",
                self.stream_count,
                self.start_port,
                u16::MAX
            ));
        }
        if !(self.rate_bits_per_sec.is_finite() && self.rate_bits_per_sec > 0.0) {
            return Err(error_gen!("stream rate must be positive, not {}", self.rate_bits_per_sec));
        }
        if self.payload_size == 0 || self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(error_gen!(
                "payload size must be between 1 and {} bytes, not {}",
                MAX_PAYLOAD_SIZE,
                self.payload_size
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(error_gen!(
                "batch size must be between 1 and {}, not {}",
                MAX_BATCH_SIZE,
                self.batch_size
            ));
        }
        if self.stats_interval.is_zero() {
            return Err(error_gen!("report interval must be positive"));
        }
        Ok(())
    }

    pub fn streams_per_worker(&self) -> usize {
        self.stream_count / self.worker_count
    }

    /// the contiguous stream-id range of every worker, in worker order
    pub fn partition(&self) -> Vec<Range<usize>> {
        stream::partition(self.stream_count, self.worker_count)
    }

    pub fn stream_address(&self, stream_id: usize) -> SocketAddr {
        SocketAddr::new(self.address, self.start_port + stream_id as u16)
    }

    pub fn send_buffer_bytes(&self) -> usize {
        self.send_buffer_kb * 1024
    }

    pub fn receive_buffer_bytes(&self) -> usize {
        self.receive_buffer_kb * 1024
    }

    /// the aggregate target across all streams, in bits per second
    pub fn aggregate_rate(&self) -> f64 {
        self.rate_bits_per_sec * self.stream_count as f64
    }
}

/// parses a per-stream rate into bits per second
///
/// A bare number is in Mbit/s. `k`, `m` and `g` suffixes denote kilo-, mega- and
/// gigabits; `K`, `M` and `G` the same multiples of bytes.
pub fn parse_rate(rate: &str) -> Result<f64> {
    let rate = rate.trim();
    let (number, multiplier) = match rate.chars().last() {
        Some('k') => (&rate[..rate.len() - 1], 1e3),
        Some('K') => (&rate[..rate.len() - 1], 1e3 * 8.0),
        Some('m') => (&rate[..rate.len() - 1], 1e6),
        Some('M') => (&rate[..rate.len() - 1], 1e6 * 8.0),
        Some('g') => (&rate[..rate.len() - 1], 1e9),
        Some('G') => (&rate[..rate.len() - 1], 1e9 * 8.0),
        Some(_) => (rate, 1e6),
        None => return Err(error_gen!("no rate given")),
    };
    match number.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value * multiplier),
        _ => Err(error_gen!("invalid rate: {}", rate)),
    }
}
