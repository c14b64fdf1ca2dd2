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

use clap::Parser;

use rpacer::{args::Args, config::Configuration, engine, engine::StopFlag};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();

    let cfg = match Configuration::from_args(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };

    let stop = StopFlag::new();
    let _signal_handler = ctrlc2::set_handler(engine::interrupt_handler(stop.clone(), || std::process::exit(3)))?;

    match engine::run(&cfg, &stop) {
        Ok(_) => Ok(()),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(if e.is_config() { 2 } else { 1 });
        }
    }
}
