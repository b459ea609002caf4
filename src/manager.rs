// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera discovery and hot-plug tracking on a dedicated worker.

use crate::{
    error::{Error, Result},
    message::MessageType,
    object::Object,
    signal::Signal,
    sync::lock,
    thread::Thread,
};
use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
};
use tracing::{debug, error, info, warn};

/// A device reported by a [`DeviceEnumerator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable camera identifier, unique in the system.
    pub id: String,
    /// Device numbers of the nodes backing the camera.
    pub devnums: Vec<u64>,
}

/// Source of the devices present in the system.
///
/// Called from the camera manager's worker, at start-up and again on every
/// hot-plug notification.
pub trait DeviceEnumerator: Send + 'static {
    fn enumerate(&mut self) -> io::Result<Vec<DeviceInfo>>;
}

/// A camera registered with the [`CameraManager`].
#[derive(Debug)]
pub struct Camera {
    id: String,
    devnums: Vec<u64>,
}

impl Camera {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn devnums(&self) -> &[u64] {
        &self.devnums
    }
}

impl From<DeviceInfo> for Camera {
    fn from(device: DeviceInfo) -> Self {
        Self {
            id: device.id,
            devnums: device.devnums,
        }
    }
}

static INSTANCE: AtomicBool = AtomicBool::new(false);

struct Private {
    object: Object,
    cameras: Mutex<Vec<Arc<Camera>>>,
    by_devnum: Mutex<HashMap<u64, Weak<Camera>>>,
    enumerator: Mutex<Option<Box<dyn DeviceEnumerator>>>,
    rejected: AtomicUsize,
    camera_added: Signal<Arc<Camera>>,
    camera_removed: Signal<Arc<Camera>>,
    devices_changed: Signal<()>,
}

impl Private {
    fn init(self: &Arc<Self>) -> std::result::Result<(), i32> {
        debug!("starting camera manager");

        let devices = self.enumerate().ok_or(-libc::ENODEV)?;
        self.update_cameras(devices);

        let d = Arc::downgrade(self);
        self.devices_changed.connect(&self.object, move |()| {
            if let Some(d) = d.upgrade() {
                d.rescan();
            }
        });

        Ok(())
    }

    fn enumerate(&self) -> Option<Vec<DeviceInfo>> {
        let mut enumerator = lock(&self.enumerator);
        let enumerator = enumerator.as_mut()?;
        match enumerator.enumerate() {
            Ok(devices) => Some(devices),
            Err(err) => {
                warn!(%err, "device enumeration failed");
                None
            }
        }
    }

    fn rescan(&self) {
        debug!("devices changed, rescanning");
        if let Some(devices) = self.enumerate() {
            self.update_cameras(devices);
        }
    }

    fn update_cameras(&self, devices: Vec<DeviceInfo>) {
        let gone: Vec<Arc<Camera>> = lock(&self.cameras)
            .iter()
            .filter(|camera| !devices.iter().any(|device| device.id == camera.id))
            .cloned()
            .collect();
        for camera in gone {
            self.remove_camera(&camera);
        }

        let known: Vec<String> = lock(&self.cameras)
            .iter()
            .map(|camera| camera.id.clone())
            .collect();
        for device in devices {
            if !known.contains(&device.id) {
                self.add_camera(Arc::new(Camera::from(device)));
            }
        }
    }

    fn find(&self, id: &str) -> Option<Arc<Camera>> {
        lock(&self.cameras)
            .iter()
            .find(|camera| camera.id == id)
            .cloned()
    }

    /// Registers `camera` and reports it through `camera_added`. Must run
    /// in the manager's thread.
    fn add_camera(&self, camera: Arc<Camera>) {
        if !self.object.thread().is_current() {
            error!(camera = %camera.id, "camera added outside of the manager thread");
            return;
        }

        {
            let mut cameras = lock(&self.cameras);
            if cameras.iter().any(|c| c.id == camera.id) {
                error!(camera = %camera.id,
                    "trying to register a camera with a duplicated ID");
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
            cameras.push(camera.clone());

            let mut by_devnum = lock(&self.by_devnum);
            for devnum in &camera.devnums {
                by_devnum.insert(*devnum, Arc::downgrade(&camera));
            }
        }

        info!(camera = %camera.id, "camera added");
        self.camera_added.emit(camera);
    }

    /// Unregisters `camera` and reports it through `camera_removed`. Must
    /// run in the manager's thread.
    fn remove_camera(&self, camera: &Arc<Camera>) {
        if !self.object.thread().is_current() {
            error!(camera = %camera.id, "camera removed outside of the manager thread");
            return;
        }

        {
            let mut cameras = lock(&self.cameras);
            let Some(index) = cameras.iter().position(|c| Arc::ptr_eq(c, camera)) else {
                return;
            };
            cameras.remove(index);
            lock(&self.by_devnum).retain(|_, c| !std::ptr::eq(c.as_ptr(), Arc::as_ptr(camera)));
        }

        info!(camera = %camera.id, "camera removed");
        self.camera_removed.emit(camera.clone());

        // The manager's reference goes away from its own event loop.
        self.object.delete_later(camera.clone());
    }

    fn cleanup(&self, thread: &Thread) {
        self.devices_changed.disconnect(&self.object);

        lock(&self.cameras).clear();
        lock(&self.by_devnum).clear();

        match thread.dispatch_messages(Some(MessageType::DeferredDelete)) {
            Ok(count) => debug!(count, "processed deferred deletions"),
            Err(err) => warn!(%err, "unable to process deferred deletions"),
        }

        lock(&self.enumerator).take();
        debug!("camera manager cleaned up");
    }
}

/// Owns the cameras present in the system and tracks hot-plug events.
///
/// Enumeration and camera bookkeeping run on a private worker thread. The
/// [`CameraManager::camera_added`] and [`CameraManager::camera_removed`]
/// signals are emitted from that worker; slots connected on behalf of
/// objects living elsewhere run in their own threads.
///
/// Only one manager may exist at a time in a process.
///
/// # Example
///
/// ```no_run
/// use edgefirst_camera_base::{CameraManager, DeviceEnumerator, DeviceInfo};
///
/// struct Fixed;
///
/// impl DeviceEnumerator for Fixed {
///     fn enumerate(&mut self) -> std::io::Result<Vec<DeviceInfo>> {
///         Ok(vec![DeviceInfo { id: "imx8mp-isp0".into(), devnums: vec![0x5103] }])
///     }
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = CameraManager::new()?;
/// manager.camera_added().connect_fn(|camera| println!("added {}", camera.id()));
/// manager.start(Fixed)?;
/// assert!(manager.get("imx8mp-isp0").is_some());
/// manager.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct CameraManager {
    thread: Thread,
    d: Arc<Private>,
}

impl CameraManager {
    /// Creates the process-wide camera manager, initially stopped.
    ///
    /// # Errors
    ///
    /// [`Error::PreconditionViolation`] if another manager is alive.
    pub fn new() -> Result<Self> {
        if INSTANCE.swap(true, Ordering::AcqRel) {
            error!("multiple CameraManager objects are not allowed");
            return Err(Error::PreconditionViolation(
                "multiple CameraManager objects are not allowed".to_owned(),
            ));
        }

        let thread = Thread::new("CameraManager");
        let d = Arc::new(Private {
            object: Object::new_in(&thread),
            cameras: Mutex::new(Vec::new()),
            by_devnum: Mutex::new(HashMap::new()),
            enumerator: Mutex::new(None),
            rejected: AtomicUsize::new(0),
            camera_added: Signal::new(),
            camera_removed: Signal::new(),
            devices_changed: Signal::new(),
        });

        Ok(Self { thread, d })
    }

    /// The runtime version string.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Starts the manager's worker and enumerates the cameras present,
    /// blocking until enumeration is complete.
    ///
    /// # Errors
    ///
    /// [`Error::InitializationFailed`] with `-ENODEV` when enumeration
    /// fails, [`Error::PreconditionViolation`] if already running, or any
    /// error from [`Thread::run_init_and_wait`].
    pub fn start<E: DeviceEnumerator>(&self, enumerator: E) -> Result<()> {
        info!(version = Self::version(), "starting camera manager");

        if self.thread.is_running() {
            error!("camera manager already started");
            return Err(Error::PreconditionViolation(
                "camera manager already started".to_owned(),
            ));
        }

        *lock(&self.d.enumerator) = Some(Box::new(enumerator));

        let d = self.d.clone();
        let cleanup = self.d.clone();
        self.thread
            .run_init_and_wait_with_cleanup(move || d.init(), move |thread| cleanup.cleanup(thread))
            .inspect_err(|err| {
                lock(&self.d.enumerator).take();
                error!(%err, "failed to start camera manager");
            })
    }

    /// Stops the manager's worker and waits for it to terminate.
    ///
    /// Callers should release the cameras they hold beforehand; cameras
    /// still referenced stay allocated but are no longer tracked.
    pub fn stop(&self) -> Result<()> {
        self.thread.stop();
        self.thread.join()
    }

    /// Notifies the manager that devices were plugged or unplugged.
    ///
    /// Callable from any thread. The rescan runs asynchronously on the
    /// manager's worker and reports changes through the camera signals.
    pub fn devices_changed(&self) {
        self.d.devices_changed.emit(());
    }

    /// Snapshot of the registered cameras.
    pub fn cameras(&self) -> Vec<Arc<Camera>> {
        lock(&self.d.cameras).clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Camera>> {
        self.d.find(id)
    }

    /// Looks a camera up by the device number of one of its nodes.
    pub fn get_by_devnum(&self, devnum: u64) -> Option<Arc<Camera>> {
        lock(&self.d.by_devnum).get(&devnum).and_then(Weak::upgrade)
    }

    /// Number of devices rejected because their id was already registered.
    pub fn rejected_cameras(&self) -> usize {
        self.d.rejected.load(Ordering::Relaxed)
    }

    /// Emitted from the manager's worker when a camera is registered. The
    /// camera is already listed by [`CameraManager::cameras`].
    pub fn camera_added(&self) -> &Signal<Arc<Camera>> {
        &self.d.camera_added
    }

    /// Emitted from the manager's worker when a camera is unregistered. The
    /// camera is no longer listed by [`CameraManager::cameras`].
    pub fn camera_removed(&self) -> &Signal<Arc<Camera>> {
        &self.d.camera_removed
    }

    /// The manager's worker.
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(%err, "failed to stop camera manager");
        }
        INSTANCE.store(false, Ordering::Release);
    }
}

impl fmt::Debug for CameraManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraManager")
            .field("thread", &self.thread)
            .field("cameras", &lock(&self.d.cameras).len())
            .finish()
    }
}
