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

//! Process-level orchestration: spawns the workers, reports on an interval and
//! tears everything down when the run ends or a worker fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crate::{
    config::{Configuration, Role},
    stats::{Aggregator, Report},
    utils::cpu_affinity::CpuAffinityManager,
    worker::{Worker, WorkerCounters},
    Error, Result,
};

/// the longest the reporting loop waits for worker news before re-checking the clock
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// shared run state; lowered once to stop every worker
#[derive(Clone, Debug)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> StopFlag {
        StopFlag(Arc::new(AtomicBool::new(true)))
    }

    /// lowers the flag, returning whether it was still raised
    pub fn stop(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        StopFlag::new()
    }
}

/// a Ctrl-C handler: the first call lowers `stop`, any later one calls `force`
///
/// Always returns `false`, which keeps the signal handler installed so a second
/// Ctrl-C can reach `force`.
pub fn interrupt_handler<F: FnMut()>(stop: StopFlag, mut force: F) -> impl FnMut() -> bool {
    move || {
        if stop.stop() {
            log::warn!("shutdown requested; finishing the run...");
        } else {
            log::warn!("forcing shutdown immediately");
            force();
        }
        false
    }
}

/// stops the run if the worker thread unwinds, so the others do not run on unattended
struct WorkerThreadMonitor {
    index: usize,
    stop: StopFlag,
}

impl Drop for WorkerThreadMonitor {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("worker {} panicked; stopping the run", self.index);
            self.stop.stop();
        }
    }
}

/// runs `cfg` to completion
///
/// Returns once `stop` is lowered (by the caller, by the run-time limit or by a
/// failing worker) and every worker has exited. The summary is emitted either
/// way; a worker's failure is returned in its place.
pub fn run(cfg: &Configuration, stop: &StopFlag) -> Result<Report> {
    cfg.validate()?;
    match serde_json::to_string(cfg) {
        Ok(json) => log::debug!("configuration: {}", json),
        Err(e) => log::debug!("configuration could not be serialised: {}", e),
    }
    let mut affinity = CpuAffinityManager::new(&cfg.affinity)?;

    match cfg.role {
        Role::Send => log::info!(
            "run {}: sending {} streams to {}:{}.. at {} bit/s each, {} workers, {:?} policy",
            cfg.run_id,
            cfg.stream_count,
            cfg.address,
            cfg.start_port,
            cfg.rate_bits_per_sec,
            cfg.worker_count,
            cfg.policy
        ),
        Role::Receive => log::info!(
            "run {}: receiving {} streams on {}:{}.., {} workers",
            cfg.run_id,
            cfg.stream_count,
            cfg.address,
            cfg.start_port,
            cfg.worker_count
        ),
    }

    let counters: Vec<Arc<WorkerCounters>> = (0..cfg.worker_count).map(|_| Arc::default()).collect();
    let mut aggregator = Aggregator::new(cfg, counters.clone());
    let (results_tx, results_rx) = mpsc::channel::<(usize, Result<()>)>();

    let mut first_error: Option<Error> = None;
    let mut handles = Vec::with_capacity(cfg.worker_count);
    for (index, stream_ids) in cfg.partition().into_iter().enumerate() {
        let worker = Worker::new(index, cfg, stream_ids, counters[index].clone(), stop.clone())
            .pinned_to(affinity.next_core());
        let c_results_tx = results_tx.clone();
        let c_stop = stop.clone();
        let spawned = thread::Builder::new().name(format!("worker-{}", index)).spawn(move || {
            let _monitor = WorkerThreadMonitor {
                index,
                stop: c_stop.clone(),
            };
            let outcome = worker.run();
            if outcome.is_err() {
                c_stop.stop();
            }
            if c_results_tx.send((index, outcome)).is_err() {
                log::trace!("worker {} finished after the reporter went away", index);
            }
        });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                log::error!("unable to start worker {}: {}", index, e);
                stop.stop();
                first_error = Some(e.into());
                break;
            }
        }
    }
    drop(results_tx);

    let started = Instant::now();
    let end = cfg.duration.map(|limit| started + limit);
    let mut next_report = started + cfg.stats_interval;
    let mut finished = 0;
    while finished < handles.len() {
        let now = Instant::now();
        if let Some(end) = end {
            if now >= end && stop.stop() {
                log::info!("run time elapsed; stopping");
            }
        }
        if now >= next_report {
            if stop.is_alive() {
                aggregator.collect().emit(cfg.format);
            }
            while next_report <= now {
                next_report += cfg.stats_interval;
            }
        }

        // once stopped, only worker results matter
        let timeout = if stop.is_alive() {
            let wake = end.map_or(next_report, |end| end.min(next_report));
            wake.saturating_duration_since(now).min(POLL_TIMEOUT)
        } else {
            POLL_TIMEOUT
        };
        match results_rx.recv_timeout(timeout) {
            Ok((index, Ok(()))) => {
                log::debug!("worker {} finished", index);
                finished += 1;
            }
            Ok((index, Err(e))) => {
                log::error!("worker {} failed: {}", index, e);
                finished += 1;
                stop.stop();
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            // every worker has exited, some without reporting
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("waiting for all workers to end");
    for (index, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() && first_error.is_none() {
            first_error = Some(Error::WorkerPanicked(index));
        }
    }

    let summary = aggregator.summary();
    summary.emit(cfg.format);
    match first_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
