// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! UDisks2: drives, the block devices on them, and mount jobs.

mod device;
mod drive;
mod job;

use async_trait::async_trait;
use log::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;

use self::{
    device::Device,
    drive::{Drive, DriveEvent},
    job::Job,
};
use crate::{
    alert::{Alerts, NotificationSink},
    bus::{ObjectId, Transport, TransportError},
    event::{Event, InterfaceMap, Signal, SignalKind, SourceId},
    monitor::Monitor,
    object::{added, refresh, removed, Remote},
    registry::{Announcer, Registry},
};

pub(crate) const UDISKS: &str = "org.freedesktop.UDisks2";
const UDISKS_PATH: &str = "/org/freedesktop/UDisks2";

pub(crate) const BLOCK: &str = "org.freedesktop.UDisks2.Block";
pub(crate) const DRIVE: &str = "org.freedesktop.UDisks2.Drive";
pub(crate) const ENCRYPTED: &str = "org.freedesktop.UDisks2.Encrypted";
pub(crate) const FILESYSTEM: &str = "org.freedesktop.UDisks2.Filesystem";
pub(crate) const JOB: &str = "org.freedesktop.UDisks2.Job";
pub(crate) const PARTITION: &str = "org.freedesktop.UDisks2.Partition";
pub(crate) const PARTITION_TABLE: &str = "org.freedesktop.UDisks2.PartitionTable";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StorageClass {
    Drive,
    Device,
    Job,
}

impl StorageClass {
    /// The interface an object of this class can't exist without.
    const fn defining_interface(self) -> &'static str {
        match self {
            Self::Drive => DRIVE,
            Self::Device => BLOCK,
            Self::Job => JOB,
        }
    }
}

/// Decides what an announced interface set is. A drive wins over a device,
/// which wins over a job.
pub(crate) fn classify<'a>(interfaces: impl IntoIterator<Item = &'a str>) -> Option<StorageClass> {
    let (mut drive, mut device, mut job) = (false, false, false);
    for interface in interfaces {
        match interface {
            DRIVE => drive = true,
            BLOCK | ENCRYPTED | FILESYSTEM | PARTITION | PARTITION_TABLE => device = true,
            JOB => job = true,
            _ => {}
        }
    }
    if drive {
        Some(StorageClass::Drive)
    } else if device {
        Some(StorageClass::Device)
    } else if job {
        Some(StorageClass::Job)
    } else {
        None
    }
}

pub(crate) struct StorageMonitor<T, S> {
    transport: T,
    alerts: Alerts<S>,
    announcer: Announcer,
    drives: Registry<Drive>,
    devices: Registry<Device>,
    jobs: Registry<Job>,
    /// Off while the initial enumeration is applied, so start-up doesn't
    /// alert about every drive already plugged in.
    announce: bool,
}

impl<T: Transport, S: NotificationSink> StorageMonitor<T, S> {
    pub(crate) async fn new(transport: T, sink: S) -> Result<Self, TransportError> {
        let root = ObjectId::parse(UDISKS, UDISKS_PATH)?;
        let (announcer, objects) = Announcer::object_manager(&transport, root).await?;
        let mut monitor = Self {
            transport,
            alerts: Alerts::new(sink),
            announcer,
            drives: Registry::default(),
            devices: Registry::default(),
            jobs: Registry::default(),
            announce: false,
        };
        for (path, interfaces) in objects {
            monitor.interfaces_added(path, interfaces).await;
        }
        monitor.announce = true;
        info!(
            "Found {} drives with {} block devices",
            monitor.drives.len(),
            monitor.devices.len()
        );
        Ok(monitor)
    }

    fn class_of(&self, path: &OwnedObjectPath) -> Option<StorageClass> {
        if self.drives.contains(path) {
            Some(StorageClass::Drive)
        } else if self.devices.contains(path) {
            Some(StorageClass::Device)
        } else if self.jobs.contains(path) {
            Some(StorageClass::Job)
        } else {
            None
        }
    }

    async fn interfaces_added(&mut self, path: OwnedObjectPath, mut interfaces: InterfaceMap) {
        let Some(class) = classify(interfaces.keys().map(String::as_str)) else {
            warn!(
                "Ignoring unclassified object {} with interfaces {:?}",
                path.as_str(),
                interfaces.keys().collect::<Vec<_>>()
            );
            return;
        };

        match (self.class_of(&path), class) {
            (Some(known), _) if known != class => {
                warn!(
                    "{} announced as a {:?}, but it is known as a {:?}; ignoring",
                    path.as_str(),
                    class,
                    known
                );
            }
            (Some(_), StorageClass::Device) => {
                if let Some(device) = self.devices.get_mut(&path) {
                    device.add_interfaces(interfaces.keys().map(String::as_str));
                    let _ = refresh(device, &self.transport).await;
                }
                self.link(&path).await;
            }
            (Some(_), StorageClass::Drive | StorageClass::Job) => {
                debug!("Ignoring duplicate announcement of {}", path.as_str());
            }
            (None, StorageClass::Drive) => self.drive_added(path).await,
            (None, StorageClass::Device) => {
                let mut device = Device::new(path.clone());
                device.add_interfaces(interfaces.keys().map(String::as_str));
                let _ = added(&mut device, &self.transport).await;
                if self.devices.insert(device) {
                    self.link(&path).await;
                }
            }
            (None, StorageClass::Job) => {
                let properties = interfaces.remove(JOB).unwrap_or_default();
                self.job_added(Job::from_announcement(path, properties))
                    .await;
            }
        }
    }

    async fn drive_added(&mut self, path: OwnedObjectPath) {
        let mut drive = Drive::new(path.clone());
        let _ = added(&mut drive, &self.transport).await;
        if !self.drives.insert(drive) {
            return;
        }

        for device_path in self.devices.paths() {
            if let Some(device) = self.devices.get_mut(&device_path) {
                let _ = refresh(device, &self.transport).await;
            }
            if let (Some(left), _) = self.attach(&device_path) {
                self.show_drive(&left, DriveEvent::Changed).await;
            }
        }
        self.show_drive(&path, DriveEvent::Added).await;
    }

    async fn job_added(&mut self, mut job: Job) {
        match self
            .transport
            .subscribe_bus_signal(job.object().id(), SignalKind::JobCompleted)
            .await
        {
            Ok(subscription) => job.watch(subscription),
            Err(e) => warn!(
                "Unable to watch {} for completion: {:#}",
                job.object().id(),
                anyhow::Error::new(e)
            ),
        }
        job.object_mut().mark_initialized();

        info!(
            "Job {} started: {} on {:?} (cancelable: {}, progress: {:?})",
            job.object().path().as_str(),
            job.operation_name(),
            job.objects(),
            job.is_cancelable(),
            job.progress()
        );
        if let Some((key, alert)) = job.started_alert(&self.devices) {
            self.alerts.show(&key, alert).await;
        }
        let _ = self.jobs.insert(job);
    }

    async fn interfaces_removed(&mut self, path: OwnedObjectPath, interfaces: Vec<String>) {
        let Some(class) = self.class_of(&path) else {
            debug!("Ignoring removal from unknown object {}", path.as_str());
            return;
        };
        let defining = interfaces
            .iter()
            .any(|interface| interface == class.defining_interface());

        match class {
            StorageClass::Drive if defining => self.drive_removed(&path).await,
            StorageClass::Job if defining => self.job_removed(&path),
            StorageClass::Device => {
                let vanished = match self.devices.get_mut(&path) {
                    Some(device) => {
                        device.remove_interfaces(interfaces.iter().map(String::as_str));
                        defining || device.facets().is_empty()
                    }
                    None => false,
                };
                if vanished {
                    self.device_removed(&path).await;
                } else {
                    if let Some(device) = self.devices.get_mut(&path) {
                        let _ = refresh(device, &self.transport).await;
                    }
                    self.link(&path).await;
                }
            }
            StorageClass::Drive | StorageClass::Job => {
                debug!(
                    "Ignoring removal of {:?} from {}",
                    interfaces,
                    path.as_str()
                );
            }
        }
    }

    async fn drive_removed(&mut self, path: &OwnedObjectPath) {
        let Some(mut drive) = self.drives.evict(path) else {
            return;
        };
        removed(&mut drive, &self.transport);

        if self.announce && drive.object().is_initialized() && drive.is_removable() {
            let alert = drive.alert(DriveEvent::Removed, &self.devices);
            self.alerts.show(&drive.alert_key(), alert).await;
        }
        self.alerts.forget(&drive.alert_key());
        for device_path in drive.take_devices() {
            if let Some(device) = self.devices.get_mut(&device_path) {
                debug!("Orphaning {}", device.label());
                let _ = device.detach();
            }
        }
    }

    async fn device_removed(&mut self, path: &OwnedObjectPath) {
        let Some(mut device) = self.devices.evict(path) else {
            return;
        };
        removed(&mut device, &self.transport);

        if let Some(drive) = device.detach() {
            if let Some(owner) = self.drives.get_mut(&drive) {
                let _ = owner.detach(path);
            }
            self.show_drive(&drive, DriveEvent::Changed).await;
        }
    }

    fn job_removed(&mut self, path: &OwnedObjectPath) {
        let Some(mut job) = self.jobs.evict(path) else {
            return;
        };
        removed(&mut job, &self.transport);
        job.release(&self.transport);
        if let Some(key) = job.alert_key() {
            self.alerts.forget(&key);
        }
    }

    /// Brings a device's attachment in line with its `Drive` property.
    /// Returns the drive it left, if that drive is still around, and the
    /// drive it ends up attached to.
    fn attach(
        &mut self,
        path: &OwnedObjectPath,
    ) -> (Option<OwnedObjectPath>, Option<OwnedObjectPath>) {
        let Some(device) = self.devices.get_mut(path) else {
            return (None, None);
        };

        let mut left = None;
        let stale = device.drive().map_or(false, |drive| {
            !self.drives.contains(drive) || device.drive_ref() != Some(drive)
        });
        if stale {
            if let Some(drive) = device.detach() {
                debug!("{} left its drive {}", device.label(), drive.as_str());
                if let Some(owner) = self.drives.get_mut(&drive) {
                    let _ = owner.detach(path);
                    left = Some(drive);
                }
            }
        }

        if device.drive().is_none() {
            let owner = device
                .drive_ref()
                .and_then(|drive| self.drives.get_mut(drive));
            if let Some(owner) = owner {
                let drive = owner.object().path().clone();
                if owner.attach(path.clone()) {
                    debug!("Attached {} to {}", device.label(), drive.as_str());
                }
                device.attach(drive);
            }
        }
        (left, device.drive().cloned())
    }

    /// Attaches the device if possible and lets the drives involved
    /// re-render.
    async fn link(&mut self, path: &OwnedObjectPath) {
        let (left, drive) = self.attach(path);
        if let Some(left) = left {
            self.show_drive(&left, DriveEvent::Changed).await;
        }
        if let Some(drive) = drive {
            self.show_drive(&drive, DriveEvent::Changed).await;
        }
    }

    async fn show_drive(&mut self, path: &OwnedObjectPath, event: DriveEvent) {
        let Some(drive) = self.drives.get(path) else {
            return;
        };
        if !self.announce || !drive.object().is_initialized() || !drive.is_removable() {
            return;
        }
        let alert = drive.alert(event, &self.devices);
        self.alerts.show(&drive.alert_key(), alert).await;
    }

    async fn properties_changed(
        &mut self,
        path: &OwnedObjectPath,
        source: SourceId,
        interface: &str,
    ) {
        if let Some(drive) = self.drives.route(path, source) {
            if !drive.object().watches(interface) {
                return;
            }
            if let Some(event) = refresh(drive, &self.transport).await.change {
                self.show_drive(path, event).await;
            }
        } else if let Some(device) = self.devices.route(path, source) {
            if !device.object().watches(interface) {
                return;
            }
            let _ = refresh(device, &self.transport).await;
            self.link(path).await;
        }
    }

    async fn job_completed(
        &mut self,
        path: &OwnedObjectPath,
        source: SourceId,
        success: bool,
        message: &str,
    ) {
        let Some(job) = self.jobs.route(path, source) else {
            return;
        };
        info!(
            "Job {} ({}) completed: {} {}",
            path.as_str(),
            job.operation_name(),
            if success { "success" } else { "failure" },
            message
        );
        if let Some((key, alert)) = job.completed_alert(success, message, &self.devices) {
            self.alerts.show(&key, alert).await;
        }
        self.job_removed(path);
    }
}

#[async_trait]
impl<T: Transport, S: NotificationSink> Monitor for StorageMonitor<T, S> {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn handle(&mut self, event: Event) {
        match event.signal {
            Signal::InterfacesAdded { object, interfaces }
                if self.announcer.owns(event.source) =>
            {
                self.interfaces_added(object, interfaces).await;
            }
            Signal::InterfacesRemoved { object, interfaces }
                if self.announcer.owns(event.source) =>
            {
                self.interfaces_removed(object, interfaces).await;
            }
            Signal::PropertiesChanged { ref interface, .. } => {
                self.properties_changed(&event.path, event.source, interface)
                    .await;
            }
            Signal::JobCompleted { success, ref message } => {
                self.job_completed(&event.path, event.source, success, message)
                    .await;
            }
            Signal::InterfacesAdded { .. }
            | Signal::InterfacesRemoved { .. }
            | Signal::DeviceAdded(_)
            | Signal::DeviceChanged(_)
            | Signal::DeviceRemoved(_)
            | Signal::Tick => {
                debug!("Ignoring {:?} from {}", event.signal, event.source);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.announcer.close(&self.transport);
        for (_, mut job) in self.jobs.drain() {
            removed(&mut job, &self.transport);
            job.release(&self.transport);
        }
        for (_, mut device) in self.devices.drain() {
            removed(&mut device, &self.transport);
        }
        for (_, mut drive) in self.drives.drain() {
            removed(&mut drive, &self.transport);
        }
    }
}
