// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the EdgeFirst camera manager service.
///
/// The service enumerates the cameras listed in an inventory file, then
/// rescans it periodically to emulate hot-plug notifications. Arguments can
/// be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-camera-base --devices cameras.json --rescan-interval 500
///
/// # Via environment variables
/// export DEVICES=cameras.json
/// export VERBOSE=true
/// edgefirst-camera-base
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera inventory file (JSON) enumerated by the camera manager
    #[arg(long, env = "DEVICES", default_value = "/etc/edgefirst/cameras.json")]
    pub devices: PathBuf,

    /// Interval between hot-plug rescans of the inventory, in milliseconds
    #[arg(long, env = "RESCAN_INTERVAL", default_value = "1000")]
    pub rescan_interval: u64,

    /// Run duration in seconds (0 runs until interrupted)
    #[arg(long, env = "DURATION", default_value = "0")]
    pub duration: u64,

    /// Enable verbose debug logging
    #[arg(short, long, env = "VERBOSE")]
    pub verbose: bool,

    /// Also send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}
