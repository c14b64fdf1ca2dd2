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

use core_affinity::CoreId;

use crate::{error_gen, Result};

/// hands out the configured CPU cores to workers, round-robin
pub struct CpuAffinityManager {
    enabled_cores: Vec<CoreId>,
    last_core_pointer: usize,
}

impl CpuAffinityManager {
    /// `cores` is a comma-separated list of core ids; an empty list disables pinning
    pub fn new(cores: &str) -> Result<CpuAffinityManager> {
        let available = core_affinity::get_core_ids().unwrap_or_default();
        Self::from_available(cores, &available)
    }

    fn from_available(cores: &str, available: &[CoreId]) -> Result<CpuAffinityManager> {
        log::debug!(
            "enumerated CPU cores: {:?}",
            available.iter().map(|c| c.id).collect::<Vec<usize>>()
        );

        let mut enabled_cores = Vec::new();
        for core in cores.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let id = core
                .parse::<usize>()
                .map_err(|_| error_gen!("invalid CPU core: {}", core))?;
            match available.iter().find(|c| c.id == id) {
                Some(core_id) => enabled_cores.push(*core_id),
                None => log::warn!("unrecognised CPU core: {}", id),
            }
        }

        if enabled_cores.is_empty() {
            log::debug!("not applying CPU core affinity");
        } else {
            log::debug!("selecting from CPU cores {:?}", cores);
        }
        Ok(CpuAffinityManager {
            enabled_cores,
            last_core_pointer: 0,
        })
    }

    /// the core the next worker should be pinned to, if pinning is enabled
    pub fn next_core(&mut self) -> Option<CoreId> {
        let core = *self.enabled_cores.get(self.last_core_pointer)?;
        self.last_core_pointer = (self.last_core_pointer + 1) % self.enabled_cores.len();
        Some(core)
    }
}
