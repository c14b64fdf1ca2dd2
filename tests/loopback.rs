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

//! End-to-end runs over real UDP sockets on the loopback interface.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rpacer::{
    config::{Configuration, Role},
    engine::{self, StopFlag},
    pacing::Policy,
    sink::Sink,
    stream::Stream,
    worker::WorkerCounters,
    Error,
};

/// a port on 127.0.0.1 that nothing is bound to, as far as anyone can tell
fn unused_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn sender(port: u16, policy: Policy) -> Configuration {
    Configuration {
        role: Role::Send,
        start_port: port,
        stream_count: 1,
        worker_count: 1,
        rate_bits_per_sec: 1_000_000.0,
        payload_size: 64,
        batch_size: 4,
        policy,
        stats_interval: Duration::from_millis(100),
        duration: Some(Duration::from_millis(400)),
        ..Configuration::default()
    }
}

#[test]
fn test_paced_traffic_reaches_the_sink() {
    for policy in [Policy::Deadline, Policy::TokenBucket] {
        let listener = Stream {
            id: 0,
            destination: "127.0.0.1:0".parse().unwrap(),
            rate_bits_per_sec: 1.0,
            payload_size: 64,
            batch_size: 1,
        };
        let sink = Sink::open(&[listener], 1024 * 1024).unwrap();
        let port = sink.local_addrs().unwrap()[0].port();

        let counters = Arc::new(WorkerCounters::default());
        let sink_stop = StopFlag::new();
        let receiving = {
            let counters = counters.clone();
            let stop = sink_stop.clone();
            thread::spawn(move || sink.run(&counters, &stop))
        };

        let summary = engine::run(&sender(port, policy), &StopFlag::new()).unwrap();
        thread::sleep(Duration::from_millis(100));
        sink_stop.stop();
        receiving.join().unwrap().unwrap();

        assert!(summary.packets > 0, "{:?}: nothing sent", policy);
        assert_eq!(summary.bytes, summary.packets * 64);
        let received = counters.take();
        assert!(received.packets > 0, "{:?}: nothing received", policy);
        assert!(received.packets <= summary.packets);
        assert_eq!(received.bytes, received.packets * 64);

        // roughly 1 Mbit/s of goodput; generous bounds for a loaded machine
        assert!(summary.goodput_bits_per_second < 2_000_000.0, "{}", summary);
    }
}

#[test]
fn test_refused_destination_ends_the_run() {
    for policy in [Policy::Deadline, Policy::TokenBucket] {
        let mut cfg = sender(unused_port(), policy);
        cfg.duration = Some(Duration::from_secs(10));

        let started = Instant::now();
        match engine::run(&cfg, &StopFlag::new()) {
            Err(Error::Send { stream, source }) => {
                assert_eq!(stream, 0);
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused);
            }
            other => panic!("{:?}: expected a fatal send error, got {:?}", policy, other.map(|r| r.packets)),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
