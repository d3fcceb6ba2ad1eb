// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashSet, fmt::Write, time::Duration};

use async_trait::async_trait;
use zbus::zvariant::OwnedObjectPath;

use super::{device::Device, DRIVE, UDISKS};
use crate::{
    alert::{Alert, Urgency},
    object::{PropertyReader, Remote, RemoteObject},
    registry::Registry,
};

const ALERT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DriveEvent {
    Added,
    Changed,
    Removed,
    MediumChanged,
    MediumRemoved,
}

impl DriveEvent {
    const fn summary(self) -> &'static str {
        match self {
            Self::Added => "Drive added",
            Self::Changed => "Drive changed",
            Self::Removed => "Drive removed",
            Self::MediumChanged => "Medium changed",
            Self::MediumRemoved => "Medium removed",
        }
    }
}

#[derive(Debug)]
pub(crate) struct Drive {
    object: RemoteObject,
    vendor: String,
    model: String,
    serial: String,
    connection_bus: String,
    size: u64,
    removable: bool,
    ejectable: bool,
    media_removable: bool,
    media_available: bool,
    media: String,
    devices: HashSet<OwnedObjectPath>,
}

impl Drive {
    pub(crate) fn new(path: OwnedObjectPath) -> Self {
        Self {
            object: RemoteObject::new(UDISKS, path, &[DRIVE]),
            vendor: String::new(),
            model: String::new(),
            serial: String::new(),
            connection_bus: String::new(),
            size: 0,
            removable: false,
            ejectable: false,
            media_removable: false,
            media_available: false,
            media: String::new(),
            devices: HashSet::new(),
        }
    }

    /// Only drives the user can plug or eject are worth an alert.
    pub(crate) const fn is_removable(&self) -> bool {
        self.removable || self.ejectable || self.media_removable
    }

    /// Returns `false` if the device was already attached.
    pub(crate) fn attach(&mut self, device: OwnedObjectPath) -> bool {
        self.devices.insert(device)
    }

    pub(crate) fn detach(&mut self, device: &OwnedObjectPath) -> bool {
        self.devices.remove(device)
    }

    pub(crate) fn take_devices(&mut self) -> HashSet<OwnedObjectPath> {
        std::mem::take(&mut self.devices)
    }

    pub(crate) fn alert_key(&self) -> String {
        format!("drive-{}", self.object.path().as_str())
    }

    pub(crate) fn alert(&self, event: DriveEvent, devices: &Registry<Device>) -> Alert {
        let mut body = format!("Drive {} {}", self.vendor.trim(), self.model.trim());
        if !self.connection_bus.is_empty() {
            _ = write!(body, " ({})", self.connection_bus);
        }
        if !self.serial.trim().is_empty() {
            _ = write!(body, ", serial {}", self.serial.trim());
        }
        if self.size > 0 {
            _ = write!(body, ", {} bytes", self.size);
        }
        if self.media_removable {
            if !self.media_available {
                body.push_str("\nMedium none");
            } else if !self.media.is_empty() {
                _ = write!(body, "\nMedium {}", self.media);
            }
        }

        let mut attached: Vec<&Device> = self
            .devices
            .iter()
            .filter_map(|path| devices.get(path))
            .collect();
        attached.sort_by(|a, b| a.label().cmp(b.label()));
        for device in attached {
            _ = write!(body, "\nDevice {}", device.label());
            let (label, fs_type, _) = device.id();
            if !label.is_empty() {
                _ = write!(body, " \"{}\"", label);
            }
            if !fs_type.is_empty() {
                _ = write!(body, " [{}]", fs_type);
            }
            if device.is_read_only() {
                body.push_str(" read-only");
            }
            for facet in device.facets().describe() {
                _ = write!(body, "\n  {}", facet);
            }
            if device.facets().partition_table && !device.table_type().is_empty() {
                _ = write!(body, " ({})", device.table_type());
            }
        }

        Alert::new(event.summary())
            .body(body)
            .urgency(Urgency::Low)
            .timeout(ALERT_TIMEOUT)
    }
}

#[async_trait]
impl Remote for Drive {
    type Snapshot = (String, bool);
    type Change = Option<DriveEvent>;

    fn object(&self) -> &RemoteObject {
        &self.object
    }

    fn object_mut(&mut self) -> &mut RemoteObject {
        &mut self.object
    }

    fn snapshot(&self) -> (String, bool) {
        (self.media.clone(), self.media_available)
    }

    async fn read(&mut self, reader: &mut PropertyReader<'_>) {
        reader.read(DRIVE, "Vendor", &mut self.vendor).await;
        reader.read(DRIVE, "Model", &mut self.model).await;
        reader.read(DRIVE, "Serial", &mut self.serial).await;
        reader
            .read(DRIVE, "ConnectionBus", &mut self.connection_bus)
            .await;
        reader.read(DRIVE, "Size", &mut self.size).await;
        reader.read(DRIVE, "Removable", &mut self.removable).await;
        reader.read(DRIVE, "Ejectable", &mut self.ejectable).await;
        reader
            .read(DRIVE, "MediaRemovable", &mut self.media_removable)
            .await;
        reader
            .read(DRIVE, "MediaAvailable", &mut self.media_available)
            .await;
        reader.read(DRIVE, "Media", &mut self.media).await;
    }

    fn transitions(&mut self, (media, media_available): (String, bool)) -> Option<DriveEvent> {
        if media == self.media && media_available == self.media_available {
            None
        } else if self.media_available {
            Some(DriveEvent::MediumChanged)
        } else {
            Some(DriveEvent::MediumRemoved)
        }
    }
}
