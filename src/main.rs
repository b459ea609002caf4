// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;
mod inventory;

use args::Args;
use clap::Parser;
use edgefirst_camera_base::{CameraManager, Object, Thread};
use inventory::JsonInventory;
use std::{
    error::Error,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, Layer, Registry};

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level);

    let journald = if args.journald {
        Some(tracing_journald::layer()?.with_filter(level))
    } else {
        None
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(level))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let main_thread = Thread::adopt("main");
    let manager = CameraManager::new()?;

    // Hot-plug notifications are emitted from the manager's thread and
    // queued to this one.
    let app = Object::new()?;
    manager.camera_added().connect(&app, |camera| {
        info!(camera = camera.id(), devnums = ?camera.devnums(), "camera plugged");
    });
    manager.camera_removed().connect(&app, |camera| {
        info!(camera = camera.id(), "camera unplugged");
    });

    manager.start(JsonInventory::new(&args.devices))?;
    info!(
        version = CameraManager::version(),
        cameras = manager.cameras().len(),
        "camera manager started"
    );

    let interval = Duration::from_millis(args.rescan_interval.max(1));
    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    let mut next_rescan = Instant::now() + interval;

    loop {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            break;
        }

        if now >= next_rescan {
            manager.devices_changed();
            next_rescan = now + interval;
        }

        let wake = deadline.map_or(next_rescan, |deadline| deadline.min(next_rescan));
        main_thread.process_events(wake.saturating_duration_since(Instant::now()))?;
    }

    manager.stop()?;
    info!("camera manager stopped");

    Ok(())
}
