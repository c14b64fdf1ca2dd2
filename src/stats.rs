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

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    config::{Configuration, Role},
    stream::wire_overhead,
    worker::{CounterSnapshot, WorkerCounters},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// human-readable lines through the logger
    Text,
    /// one JSON object per line on stdout
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Interval,
    Summary,
}

/// aggregate throughput over some span of the run
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Report {
    pub kind: ReportKind,
    pub run_id: uuid::Uuid,
    pub timestamp: String,
    pub role: Role,
    /// seconds covered by this report
    pub duration: f64,
    pub packets: u64,
    /// payload bytes
    pub bytes: u64,
    /// payload plus link, network and transport headers
    pub wire_bytes: u64,
    pub sends_blocked: u64,
    pub packets_per_second: f64,
    pub goodput_bits_per_second: f64,
    pub wire_bits_per_second: f64,
}

impl Report {
    pub fn new(kind: ReportKind, cfg: &Configuration, counts: CounterSnapshot, elapsed: Duration) -> Report {
        let wire_bytes = counts.bytes + counts.packets * wire_overhead(&cfg.address) as u64;
        let seconds = elapsed.as_secs_f64();
        let per_second = |value: f64| if seconds > 0.0 { value / seconds } else { 0.0 };
        Report {
            kind,
            run_id: cfg.run_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            role: cfg.role,
            duration: seconds,
            packets: counts.packets,
            bytes: counts.bytes,
            wire_bytes,
            sends_blocked: counts.blocked,
            packets_per_second: per_second(counts.packets as f64),
            goodput_bits_per_second: per_second(counts.bytes as f64 * 8.0),
            wire_bits_per_second: per_second(wire_bytes as f64 * 8.0),
        }
    }

    /// writes the report in the requested format
    pub fn emit(&self, format: Format) {
        match format {
            Format::Text => log::info!("{}", self),
            Format::Json => match serde_json::to_string(self) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("unable to serialise report: {}", e),
            },
        }
    }
}

fn format_bits(bits_per_second: f64) -> String {
    if bits_per_second >= 1e9 {
        format!("{:.3} Gbit/s", bits_per_second / 1e9)
    } else if bits_per_second >= 1e6 {
        format!("{:.3} Mbit/s", bits_per_second / 1e6)
    } else if bits_per_second >= 1e3 {
        format!("{:.3} kbit/s", bits_per_second / 1e3)
    } else {
        format!("{:.0} bit/s", bits_per_second)
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (label, verb) = match (self.kind, self.role) {
            (ReportKind::Interval, Role::Send) => ("interval", "sent"),
            (ReportKind::Interval, Role::Receive) => ("interval", "received"),
            (ReportKind::Summary, Role::Send) => ("summary", "sent"),
            (ReportKind::Summary, Role::Receive) => ("summary", "received"),
        };
        write!(
            f,
            "{} {:.2}s: {} {} packets ({} bytes), {:.0} pkt/s, {} goodput, {} on the wire",
            label,
            self.duration,
            verb,
            self.packets,
            self.bytes,
            self.packets_per_second,
            format_bits(self.goodput_bits_per_second),
            format_bits(self.wire_bits_per_second),
        )?;
        if self.sends_blocked > 0 {
            write!(f, ", {} sends deferred", self.sends_blocked)?;
        }
        Ok(())
    }
}

/// drains every worker's counters into interval and whole-run reports
pub struct Aggregator {
    cfg: Configuration,
    counters: Vec<Arc<WorkerCounters>>,
    started: Instant,
    last: Instant,
    total: CounterSnapshot,
}

impl Aggregator {
    pub fn new(cfg: &Configuration, counters: Vec<Arc<WorkerCounters>>) -> Aggregator {
        let now = Instant::now();
        Aggregator {
            cfg: cfg.clone(),
            counters,
            started: now,
            last: now,
            total: CounterSnapshot::default(),
        }
    }

    fn drain(&mut self) -> CounterSnapshot {
        let drained = self
            .counters
            .iter()
            .fold(CounterSnapshot::default(), |sum, counters| sum + counters.take());
        self.total += drained;
        drained
    }

    /// what was counted since the previous collection
    pub fn collect(&mut self) -> Report {
        let drained = self.drain();
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        Report::new(ReportKind::Interval, &self.cfg, drained, elapsed)
    }

    /// everything counted since the aggregator was created, including anything not yet collected
    pub fn summary(&mut self) -> Report {
        self.drain();
        Report::new(ReportKind::Summary, &self.cfg, self.total, self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::Tally;

    #[test]
    fn test_report_rates() {
        let cfg = Configuration::default();
        let counts = CounterSnapshot {
            packets: 312_500,
            bytes: 10_000_000,
            blocked: 0,
        };
        let report = Report::new(ReportKind::Interval, &cfg, counts, Duration::from_secs(10));
        assert_eq!(report.packets_per_second, 31_250.0);
        assert_eq!(report.goodput_bits_per_second, 8_000_000.0);
        assert_eq!(report.wire_bytes, 10_000_000 + 312_500 * 42);
        assert_eq!(report.wire_bits_per_second, (10_000_000.0 + 312_500.0 * 42.0) * 8.0 / 10.0);

        let text = report.to_string();
        assert!(text.starts_with("interval 10.00s: sent 312500 packets"), "{}", text);
        assert!(text.contains("8.000 Mbit/s goodput"), "{}", text);
        assert!(!text.contains("deferred"));
    }

    #[test]
    fn test_zero_elapsed_reports_zero_rates() {
        let cfg = Configuration::default();
        let counts = CounterSnapshot {
            packets: 1,
            bytes: 32,
            blocked: 2,
        };
        let report = Report::new(ReportKind::Summary, &cfg, counts, Duration::ZERO);
        assert_eq!(report.packets_per_second, 0.0);
        assert!(report.to_string().ends_with("2 sends deferred"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "summary");
        assert_eq!(json["sends_blocked"], 2);
        assert_eq!(json["run_id"], cfg.run_id.to_string());
    }

    #[test]
    fn test_aggregator_sums_workers_and_keeps_totals() {
        let cfg = Configuration::default();
        let counters = vec![Arc::new(WorkerCounters::default()), Arc::new(WorkerCounters::default())];
        let mut aggregator = Aggregator::new(&cfg, counters.clone());

        let tally = Tally {
            packets: 10,
            bytes: 320,
            blocked: 1,
        };
        counters[0].record(&tally);
        counters[1].record(&tally);
        let first = aggregator.collect();
        assert_eq!(first.packets, 20);
        assert_eq!(first.sends_blocked, 2);

        counters[1].record(&tally);
        let second = aggregator.collect();
        assert_eq!(second.packets, 10);
        assert_eq!(second.bytes, 320);

        counters[0].record(&tally);
        let summary = aggregator.summary();
        assert_eq!(summary.kind, ReportKind::Summary);
        assert_eq!(summary.packets, 40);
        assert_eq!(summary.bytes, 1280);
        assert_eq!(summary.sends_blocked, 4);
    }

    #[test]
    fn test_format_bits_units() {
        assert_eq!(format_bits(512.0), "512 bit/s");
        assert_eq!(format_bits(64_000.0), "64.000 kbit/s");
        assert_eq!(format_bits(2.5e9), "2.500 Gbit/s");
    }
}
