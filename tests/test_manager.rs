// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_camera_base::{
    CameraManager, DeviceEnumerator, DeviceInfo, Error, Object, Thread,
};
use serial_test::serial;
use std::{
    error::Error as StdError,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn device(id: &str, devnums: &[u64]) -> DeviceInfo {
    DeviceInfo {
        id: id.to_owned(),
        devnums: devnums.to_vec(),
    }
}

/// Enumerator backed by a device list the test edits to emulate hot-plug.
#[derive(Clone, Default)]
struct MockEnumerator {
    devices: Arc<Mutex<Option<Vec<DeviceInfo>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockEnumerator {
    fn with(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(Some(devices))),
            calls: Arc::default(),
        }
    }

    fn set(&self, devices: Vec<DeviceInfo>) {
        *self.devices.lock().unwrap() = Some(devices);
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn enumerate(&mut self) -> io::Result<Vec<DeviceInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.devices
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no media devices"))
    }
}

#[test]
#[serial]
fn test_single_instance() -> Result<(), Box<dyn StdError>> {
    let first = CameraManager::new()?;
    assert!(matches!(
        CameraManager::new(),
        Err(Error::PreconditionViolation(_))
    ));

    drop(first);
    let _second = CameraManager::new()?;
    Ok(())
}

#[test]
#[serial]
fn test_start_enumerates() -> Result<(), Box<dyn StdError>> {
    let manager = CameraManager::new()?;
    let (tx, rx) = kanal::unbounded();
    manager
        .camera_added()
        .connect_fn(move |camera| tx.send(camera.id().to_owned()).unwrap());

    manager.start(MockEnumerator::with(vec![
        device("isp0", &[0x5100, 0x5101]),
        device("usb0", &[0x5102]),
    ]))?;
    assert!(manager.thread().is_running());

    // Reported before start() returned.
    assert_eq!(rx.len(), 2);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "isp0");
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "usb0");

    let ids: Vec<String> = manager
        .cameras()
        .iter()
        .map(|camera| camera.id().to_owned())
        .collect();
    assert_eq!(ids, ["isp0", "usb0"]);

    assert_eq!(
        manager.get("usb0").map(|camera| camera.devnums().to_vec()),
        Some(vec![0x5102])
    );
    assert!(manager.get("missing").is_none());
    assert_eq!(
        manager.get_by_devnum(0x5101).map(|camera| camera.id().to_owned()),
        Some("isp0".to_owned())
    );
    assert!(manager.get_by_devnum(0x9999).is_none());

    assert!(matches!(
        manager.start(MockEnumerator::default()),
        Err(Error::PreconditionViolation(_))
    ));

    manager.stop()?;
    assert!(!manager.thread().is_running());
    assert!(manager.cameras().is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_start_failure() -> Result<(), Box<dyn StdError>> {
    let manager = CameraManager::new()?;

    let err = manager.start(MockEnumerator::default()).unwrap_err();
    assert!(matches!(err, Error::InitializationFailed { .. }));
    assert_eq!(err.code(), -libc::ENODEV);
    assert!(!manager.thread().is_running());
    assert!(manager.cameras().is_empty());

    // A failed start leaves the manager ready for another attempt.
    manager.start(MockEnumerator::with(vec![device("isp0", &[])]))?;
    assert_eq!(manager.cameras().len(), 1);
    Ok(())
}

#[test]
#[serial]
fn test_duplicate_ids() -> Result<(), Box<dyn StdError>> {
    let manager = CameraManager::new()?;
    let added = Arc::new(AtomicUsize::new(0));
    {
        let added = added.clone();
        manager.camera_added().connect_fn(move |_| {
            added.fetch_add(1, Ordering::SeqCst);
        });
    }

    manager.start(MockEnumerator::with(vec![
        device("isp0", &[1]),
        device("isp0", &[2]),
        device("usb0", &[3]),
    ]))?;

    // The first device wins, the second is rejected and never reported.
    assert_eq!(manager.rejected_cameras(), 1);
    assert_eq!(added.load(Ordering::SeqCst), 2);
    assert_eq!(manager.cameras().len(), 2);
    assert_eq!(
        manager.get("isp0").map(|camera| camera.devnums().to_vec()),
        Some(vec![1])
    );
    assert!(manager.get_by_devnum(1).is_some());
    assert!(manager.get_by_devnum(2).is_none());

    // Cameras already registered aren't reported again on a rescan.
    let marker = Object::new_in(manager.thread());
    manager.devices_changed();
    assert_eq!(marker.invoke_method_blocking(|| ()), Some(()));
    assert_eq!(manager.rejected_cameras(), 1);
    assert_eq!(added.load(Ordering::SeqCst), 2);

    manager.stop()?;
    drop(marker);
    Ok(())
}

#[test]
#[serial]
fn test_hotplug() -> Result<(), Box<dyn StdError>> {
    let main = Thread::adopt("main");
    let app = Object::new()?;
    let events = Arc::new(Mutex::new(Vec::new()));

    let manager = CameraManager::new()?;
    {
        let events = events.clone();
        manager.camera_added().connect(&app, move |camera| {
            assert!(Thread::current().is_some_and(|t| t.name() == "main"));
            events.lock().unwrap().push(format!("+{}", camera.id()));
        });
    }
    {
        let events = events.clone();
        manager.camera_removed().connect(&app, move |camera| {
            events.lock().unwrap().push(format!("-{}", camera.id()));
        });
    }

    let enumerator = MockEnumerator::with(vec![device("isp0", &[10])]);
    manager.start(enumerator.clone())?;

    // Emitted from the manager thread, queued to this one.
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(main.dispatch_messages(None)?, 1);
    assert_eq!(*events.lock().unwrap(), ["+isp0"]);

    enumerator.set(vec![device("usb0", &[11])]);
    manager.devices_changed();

    let deadline = Instant::now() + TIMEOUT;
    while events.lock().unwrap().len() < 3 && Instant::now() < deadline {
        main.process_events(Duration::from_millis(10))?;
    }
    assert_eq!(*events.lock().unwrap(), ["+isp0", "-isp0", "+usb0"]);
    assert!(manager.get("isp0").is_none());
    assert!(manager.get_by_devnum(10).is_none());
    assert!(manager.get_by_devnum(11).is_some());

    // A failed rescan leaves the camera set untouched. The marker runs on
    // the manager thread after the rescan, in queue order.
    let marker = Object::new_in(manager.thread());
    let calls = enumerator.calls.load(Ordering::SeqCst);
    enumerator.devices.lock().unwrap().take();
    manager.devices_changed();
    assert_eq!(marker.invoke_method_blocking(|| ()), Some(()));
    assert_eq!(enumerator.calls.load(Ordering::SeqCst), calls + 1);

    assert_eq!(main.process_events(Duration::from_millis(20))?, 0);
    assert_eq!(*events.lock().unwrap(), ["+isp0", "-isp0", "+usb0"]);
    assert_eq!(
        manager
            .cameras()
            .iter()
            .map(|camera| camera.id().to_owned())
            .collect::<Vec<_>>(),
        ["usb0"]
    );
    assert!(manager.get_by_devnum(11).is_some());

    manager.stop()?;
    drop(marker);
    Ok(())
}

#[test]
#[serial]
fn test_released_after_removal() -> Result<(), Box<dyn StdError>> {
    let manager = CameraManager::new()?;
    let enumerator = MockEnumerator::with(vec![device("isp0", &[])]);
    let (tx, rx) = kanal::unbounded();
    manager
        .camera_removed()
        .connect_fn(move |camera| tx.send(Arc::downgrade(&camera)).unwrap());

    manager.start(enumerator.clone())?;
    let camera = manager.get("isp0").map(|camera| Arc::downgrade(&camera));
    assert!(camera.is_some_and(|camera| camera.upgrade().is_some()));

    enumerator.set(Vec::new());
    manager.devices_changed();
    let removed = rx.recv_timeout(TIMEOUT).unwrap();

    // The manager's last reference is dropped from its own event loop.
    manager.stop()?;
    assert!(removed.upgrade().is_none());
    Ok(())
}
