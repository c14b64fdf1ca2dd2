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

pub mod args;
pub mod config;
pub mod engine;
mod error;
pub mod net;
pub mod pacing;
pub mod sink;
pub mod stats;
pub mod stream;
pub(crate) mod utils;
pub mod worker;

pub use error::{Error, Result};
