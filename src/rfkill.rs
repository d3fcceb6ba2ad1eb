// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! URfkill: radio kill switches.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use zbus::zvariant::OwnedObjectPath;

use crate::{
    alert::{Alert, Alerts, NotificationSink, Urgency},
    bus::{ObjectId, Transport, TransportError},
    event::{Event, Signal, SignalKind, SourceId},
    monitor::Monitor,
    object::{added, refresh, removed, PropertyReader, Remote, RemoteObject},
    registry::{Announcer, Registry},
};

const URFKILL: &str = "org.freedesktop.URfkill";
const URFKILL_PATH: &str = "/org/freedesktop/URfkill";
const URFKILL_DEVICE: &str = "org.freedesktop.URfkill.Device";

#[derive(Debug)]
struct RfkillDevice {
    object: RemoteObject,
    name: String,
    soft: bool,
    hard: bool,
}

impl RfkillDevice {
    fn new(path: OwnedObjectPath) -> Self {
        Self {
            object: RemoteObject::new(URFKILL, path, &[URFKILL_DEVICE]),
            name: String::from("<unknown>"),
            soft: false,
            hard: false,
        }
    }

    const fn is_blocked(&self) -> bool {
        self.soft || self.hard
    }

    fn alert_key(&self) -> String {
        format!("rfkill-{}", self.object.path().as_str())
    }

    fn alert(&self) -> Alert {
        let alert = if self.is_blocked() {
            Alert::new(format!("Blocked radio {}", self.name))
        } else {
            Alert::new(format!("Unblocked radio {}", self.name))
        };
        let alert = alert
            .urgency(Urgency::Low)
            .timeout(Duration::from_millis(2000));
        if self.hard {
            alert.body("Blocked by the hardware switch")
        } else {
            alert
        }
    }
}

#[async_trait]
impl Remote for RfkillDevice {
    type Snapshot = bool;
    /// Whether the blocked state flipped.
    type Change = bool;

    fn object(&self) -> &RemoteObject {
        &self.object
    }

    fn object_mut(&mut self) -> &mut RemoteObject {
        &mut self.object
    }

    fn snapshot(&self) -> bool {
        self.is_blocked()
    }

    async fn read(&mut self, reader: &mut PropertyReader<'_>) {
        reader.read(URFKILL_DEVICE, "name", &mut self.name).await;
        reader.read(URFKILL_DEVICE, "soft", &mut self.soft).await;
        reader.read(URFKILL_DEVICE, "hard", &mut self.hard).await;
    }

    fn transitions(&mut self, was_blocked: bool) -> bool {
        was_blocked != self.is_blocked()
    }
}

pub(crate) struct RfkillMonitor<T, S> {
    transport: T,
    alerts: Alerts<S>,
    announcer: Announcer,
    devices: Registry<RfkillDevice>,
}

impl<T: Transport, S: NotificationSink> RfkillMonitor<T, S> {
    pub(crate) async fn new(transport: T, sink: S) -> Result<Self, TransportError> {
        let (announcer, paths) = Announcer::device_list(
            &transport,
            ObjectId::parse(URFKILL, URFKILL_PATH)?,
            URFKILL,
            &[
                SignalKind::DeviceAdded(URFKILL),
                SignalKind::DeviceChanged(URFKILL),
                SignalKind::DeviceRemoved(URFKILL),
            ],
        )
        .await?;

        let mut monitor = Self {
            transport,
            alerts: Alerts::new(sink),
            announcer,
            devices: Registry::default(),
        };
        for path in paths {
            monitor.device_added_or_changed(path).await;
        }
        Ok(monitor)
    }

    async fn device_added_or_changed(&mut self, path: OwnedObjectPath) {
        if let Some(device) = self.devices.get_mut(&path) {
            Self::refresh_and_alert(&self.transport, &mut self.alerts, device).await;
            return;
        }
        let mut device = RfkillDevice::new(path);
        let _ = added(&mut device, &self.transport).await;
        info!(
            "Found radio {} ({})",
            device.name,
            if device.is_blocked() {
                "blocked"
            } else {
                "unblocked"
            }
        );
        let _ = self.devices.insert(device);
    }

    fn device_removed(&mut self, path: &OwnedObjectPath) {
        let Some(mut device) = self.devices.evict(path) else {
            debug!("Ignoring removal of unknown radio {}", path.as_str());
            return;
        };
        removed(&mut device, &self.transport);
        self.alerts.forget(&device.alert_key());
        info!("Lost radio {}", device.name);
    }

    async fn properties_changed(
        &mut self,
        path: &OwnedObjectPath,
        source: SourceId,
        interface: &str,
    ) {
        let Some(device) = self.devices.route(path, source) else {
            return;
        };
        if device.object().watches(interface) {
            Self::refresh_and_alert(&self.transport, &mut self.alerts, device).await;
        }
    }

    async fn refresh_and_alert(
        transport: &T,
        alerts: &mut Alerts<S>,
        device: &mut RfkillDevice,
    ) {
        if refresh(device, transport).await.change {
            info!(
                "Radio {} is now {}",
                device.name,
                if device.is_blocked() {
                    "blocked"
                } else {
                    "unblocked"
                }
            );
            alerts.show(&device.alert_key(), device.alert()).await;
        }
    }
}

#[async_trait]
impl<T: Transport, S: NotificationSink> Monitor for RfkillMonitor<T, S> {
    fn name(&self) -> &'static str {
        "rfkill"
    }

    async fn handle(&mut self, event: Event) {
        match event.signal {
            Signal::DeviceAdded(path) | Signal::DeviceChanged(path)
                if self.announcer.owns(event.source) =>
            {
                self.device_added_or_changed(path).await;
            }
            Signal::DeviceRemoved(path) if self.announcer.owns(event.source) => {
                self.device_removed(&path);
            }
            Signal::PropertiesChanged { ref interface, .. } => {
                self.properties_changed(&event.path, event.source, interface)
                    .await;
            }
            Signal::DeviceAdded(_)
            | Signal::DeviceChanged(_)
            | Signal::DeviceRemoved(_)
            | Signal::InterfacesAdded { .. }
            | Signal::InterfacesRemoved { .. }
            | Signal::JobCompleted { .. }
            | Signal::Tick => {
                debug!("Ignoring {:?} from {}", event.signal, event.source);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.announcer.close(&self.transport);
        for (_, mut device) in self.devices.drain() {
            removed(&mut device, &self.transport);
        }
    }
}
