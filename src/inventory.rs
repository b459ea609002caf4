// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_camera_base::{DeviceEnumerator, DeviceInfo};
use serde_json::Value;
use std::{
    fs::File,
    io::{self, BufReader},
    path::PathBuf,
};
use tracing::debug;

/// Enumerates the cameras listed in a JSON inventory file.
///
/// The file is read again on every enumeration, so editing it while the
/// service runs emulates plugging and unplugging cameras.
///
/// ```json
/// { "cameras": [ { "id": "isp0", "devnums": [20739] } ] }
/// ```
pub struct JsonInventory {
    path: PathBuf,
}

impl JsonInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DeviceEnumerator for JsonInventory {
    fn enumerate(&mut self) -> io::Result<Vec<DeviceInfo>> {
        let file = File::open(&self.path)?;
        let json: Value = serde_json::from_reader(BufReader::new(file))?;
        let devices = parse_inventory(&json)?;
        debug!(path = %self.path.display(), devices = devices.len(), "inventory read");
        Ok(devices)
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

pub fn parse_inventory(json: &Value) -> io::Result<Vec<DeviceInfo>> {
    let cameras = json["cameras"]
        .as_array()
        .ok_or_else(|| invalid("Did not find cameras as an array".to_owned()))?;

    cameras
        .iter()
        .enumerate()
        .map(|(index, camera)| {
            let id = camera["id"]
                .as_str()
                .ok_or_else(|| invalid(format!("Camera {index} has no string id")))?;
            let devnums = match camera["devnums"].as_array() {
                Some(v) => v.iter().filter_map(|x| x.as_u64()).collect(),
                None => Vec::new(),
            };
            Ok(DeviceInfo {
                id: id.to_owned(),
                devnums,
            })
        })
        .collect()
}
