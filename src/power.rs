// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! UPower: the on-battery flag and battery charge levels.

mod device;

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use zbus::zvariant::OwnedObjectPath;

use self::device::{Kind, PowerDevice};
use crate::{
    alert::{Alert, Alerts, NotificationSink, Urgency},
    bus::{ObjectId, Transport, TransportError},
    event::{Event, EventSender, Signal, SignalKind, SourceId},
    monitor::Monitor,
    object::{added, refresh, removed, PropertyReader, Remote, RemoteObject},
    poll::PollTimer,
    registry::{Announcer, Registry},
};

pub(crate) const UPOWER: &str = "org.freedesktop.UPower";
const UPOWER_PATH: &str = "/org/freedesktop/UPower";
pub(crate) const UPOWER_DEVICE: &str = "org.freedesktop.UPower.Device";

/// Batteries don't always announce level changes, so they are also polled.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// The UPower root object, for its `OnBattery` flag.
#[derive(Debug)]
struct PowerDaemon {
    object: RemoteObject,
    on_battery: bool,
}

impl PowerDaemon {
    const fn new(path: OwnedObjectPath) -> Self {
        Self {
            object: RemoteObject::new(UPOWER, path, &[UPOWER]),
            on_battery: false,
        }
    }

    fn alert(&self) -> Alert {
        let summary = if self.on_battery {
            "Now on battery power"
        } else {
            "Now on external power"
        };
        Alert::new(summary)
            .urgency(Urgency::Normal)
            .timeout(Duration::from_millis(2000))
    }
}

#[async_trait]
impl Remote for PowerDaemon {
    type Snapshot = bool;
    /// Whether `OnBattery` flipped.
    type Change = bool;

    fn object(&self) -> &RemoteObject {
        &self.object
    }

    fn object_mut(&mut self) -> &mut RemoteObject {
        &mut self.object
    }

    fn snapshot(&self) -> bool {
        self.on_battery
    }

    async fn read(&mut self, reader: &mut PropertyReader<'_>) {
        reader.read(UPOWER, "OnBattery", &mut self.on_battery).await;
    }

    fn transitions(&mut self, before: bool) -> bool {
        before != self.on_battery
    }
}

pub(crate) struct PowerMonitor<T, S> {
    transport: T,
    alerts: Alerts<S>,
    events: EventSender,
    daemon: PowerDaemon,
    announcer: Announcer,
    devices: Registry<PowerDevice>,
}

impl<T: Transport, S: NotificationSink> PowerMonitor<T, S> {
    /// `events` is the queue poll ticks go to; it should be the one the
    /// transport delivers to.
    pub(crate) async fn new(
        transport: T,
        sink: S,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        let root = ObjectId::parse(UPOWER, UPOWER_PATH)?;
        let mut daemon = PowerDaemon::new(root.path.clone());
        let (announcer, paths) = Announcer::device_list(
            &transport,
            root,
            UPOWER,
            &[
                SignalKind::DeviceAdded(UPOWER),
                SignalKind::DeviceRemoved(UPOWER),
            ],
        )
        .await?;
        let _ = added(&mut daemon, &transport).await;
        info!(
            "Running on {} power",
            if daemon.on_battery {
                "battery"
            } else {
                "external"
            }
        );

        let mut monitor = Self {
            transport,
            alerts: Alerts::new(sink),
            events,
            daemon,
            announcer,
            devices: Registry::default(),
        };
        for path in paths {
            monitor.device_added(path).await;
        }
        Ok(monitor)
    }

    async fn device_added(&mut self, path: OwnedObjectPath) {
        if self.devices.contains(&path) {
            debug!("Ignoring duplicate power device {}", path.as_str());
            return;
        }
        let mut device = PowerDevice::new(path.clone());
        let refreshed = added(&mut device, &self.transport).await;
        // Until the type has been read it may still turn out to be a battery.
        if device.kind() == Kind::Battery || !refreshed.failures.is_empty() {
            device.poll(PollTimer::start(path, POLL_INTERVAL, self.events.clone()));
        }
        info!(
            "Found {} {} ({:?}, power supply: {}, online: {}, polled: {})",
            device.kind(),
            device.model(),
            device.state(),
            device.is_power_supply(),
            device.is_online(),
            device.is_polled()
        );
        let _ = self.devices.insert(device);
    }

    async fn device_removed(&mut self, path: &OwnedObjectPath) {
        let Some(mut device) = self.devices.evict(path) else {
            debug!("Ignoring removal of unknown power device {}", path.as_str());
            return;
        };
        removed(&mut device, &self.transport);
        device.stop_polling();
        info!("Lost {} {}", device.kind(), device.model());
        self.alerts.cancel(&device.progress_key()).await;
        self.alerts.cancel(&device.state_key()).await;
    }

    async fn daemon_changed(&mut self, interface: &str) {
        if !self.daemon.object().watches(interface) {
            return;
        }
        if refresh(&mut self.daemon, &self.transport).await.change {
            info!("On battery: {}", self.daemon.on_battery);
            self.alerts.show("on-battery", self.daemon.alert()).await;
        }
    }

    /// Property changes and poll ticks both end up here; `interface` is
    /// `None` for ticks.
    async fn device_changed(
        &mut self,
        path: &OwnedObjectPath,
        source: SourceId,
        interface: Option<&str>,
    ) {
        let Some(device) = self.devices.route(path, source) else {
            return;
        };
        if let Some(interface) = interface {
            if !device.object().watches(interface) {
                return;
            }
        }
        for notice in refresh(device, &self.transport).await.change {
            debug!("{}: {:?}", path.as_str(), notice);
            self.alerts.apply(device.alert_update(notice)).await;
        }
    }
}

#[async_trait]
impl<T: Transport, S: NotificationSink> Monitor for PowerMonitor<T, S> {
    fn name(&self) -> &'static str {
        "power"
    }

    async fn handle(&mut self, event: Event) {
        match event.signal {
            Signal::DeviceAdded(path) if self.announcer.owns(event.source) => {
                self.device_added(path).await;
            }
            Signal::DeviceRemoved(path) if self.announcer.owns(event.source) => {
                self.device_removed(&path).await;
            }
            Signal::PropertiesChanged { ref interface, .. }
                if self.daemon.accepts(event.source) =>
            {
                self.daemon_changed(interface).await;
            }
            Signal::PropertiesChanged { ref interface, .. } => {
                self.device_changed(&event.path, event.source, Some(interface.as_str()))
                    .await;
            }
            Signal::Tick => self.device_changed(&event.path, event.source, None).await,
            Signal::DeviceAdded(_)
            | Signal::DeviceRemoved(_)
            | Signal::DeviceChanged(_)
            | Signal::InterfacesAdded { .. }
            | Signal::InterfacesRemoved { .. }
            | Signal::JobCompleted { .. } => {
                debug!("Ignoring {:?} from {}", event.signal, event.source);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.announcer.close(&self.transport);
        removed(&mut self.daemon, &self.transport);
        for (_, mut device) in self.devices.drain() {
            removed(&mut device, &self.transport);
            device.stop_polling();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        device::tests::{battery, set_level, set_state, BAT0},
        *,
    };
    use crate::{
        event::{self, EventReceiver},
        testing::{path, value, FakeSink, FakeTransport},
    };

    const DISCHARGING: u32 = 2;
    const CHARGING: u32 = 1;

    fn fixture() -> (FakeTransport, FakeSink) {
        let fake = FakeTransport::new();
        fake.set_property(UPOWER_PATH, UPOWER, "OnBattery", value(true));
        (fake, FakeSink::default())
    }

    async fn start(
        fake: &FakeTransport,
        sink: &FakeSink,
    ) -> (PowerMonitor<FakeTransport, FakeSink>, EventReceiver) {
        let (tx, rx) = event::channel();
        let monitor = PowerMonitor::new(fake.clone(), sink.clone(), tx)
            .await
            .unwrap();
        (monitor, rx)
    }

    fn plug(fake: &FakeTransport, object: &str) -> Event {
        fake.event(
            UPOWER_PATH,
            SignalKind::DeviceAdded(UPOWER),
            Signal::DeviceAdded(path(object)),
        )
    }

    fn unplug(fake: &FakeTransport, object: &str) -> Event {
        fake.event(
            UPOWER_PATH,
            SignalKind::DeviceRemoved(UPOWER),
            Signal::DeviceRemoved(path(object)),
        )
    }

    #[tokio::test]
    async fn subscribes_before_enumerating_devices() {
        let (fake, sink) = fixture();
        battery(&fake, BAT0, DISCHARGING, 80.0);
        fake.add_device(BAT0);

        let (monitor, _rx) = start(&fake, &sink).await;

        let calls = fake.calls();
        let enumerate = calls
            .iter()
            .position(|call| call.starts_with("enumerate-devices"))
            .unwrap();
        let subscribed = calls
            .iter()
            .filter(|call| call.starts_with("subscribe /org/freedesktop/UPower Device"))
            .count();
        assert_eq!(subscribed, 2);
        assert!(calls[..enumerate]
            .iter()
            .all(|call| !call.contains("battery_BAT0")));
        assert_eq!(monitor.devices.len(), 1);
        assert!(sink.history().is_empty());
    }

    #[tokio::test]
    async fn on_battery_flips_alert() {
        let (fake, sink) = fixture();
        let (mut monitor, _rx) = start(&fake, &sink).await;

        fake.set_property(UPOWER_PATH, UPOWER, "OnBattery", value(false));
        monitor
            .handle(fake.properties_changed(UPOWER_PATH, UPOWER))
            .await;
        monitor
            .handle(fake.properties_changed(UPOWER_PATH, UPOWER))
            .await;

        assert_eq!(sink.summaries(), vec!["Now on external power"]);
        let alert = sink.visible().pop().unwrap();
        assert_eq!(alert.urgency, Urgency::Normal);
        assert_eq!(alert.timeout, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn level_alerts_replace_each_other() {
        let (fake, sink) = fixture();
        battery(&fake, BAT0, DISCHARGING, 47.0);
        let (mut monitor, _rx) = start(&fake, &sink).await;
        monitor.handle(plug(&fake, BAT0)).await;

        for level in [40.0, 18.0, 9.0] {
            set_level(&fake, BAT0, level);
            monitor
                .handle(fake.properties_changed(BAT0, UPOWER_DEVICE))
                .await;
        }

        assert_eq!(
            sink.summaries(),
            vec!["Battery 40%", "Battery 18%", "Battery 9%"]
        );
        assert_eq!(sink.visible().len(), 1);
    }

    #[tokio::test]
    async fn plugging_in_cancels_the_level_alert() {
        let (fake, sink) = fixture();
        battery(&fake, BAT0, DISCHARGING, 47.0);
        fake.add_device(BAT0);
        let (mut monitor, _rx) = start(&fake, &sink).await;
        set_level(&fake, BAT0, 40.0);
        monitor
            .handle(fake.properties_changed(BAT0, UPOWER_DEVICE))
            .await;
        assert_eq!(sink.visible().len(), 1);

        set_state(&fake, BAT0, CHARGING);
        monitor
            .handle(fake.properties_changed(BAT0, UPOWER_DEVICE))
            .await;

        assert!(sink.visible().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn batteries_are_polled() {
        let (fake, sink) = fixture();
        battery(&fake, BAT0, DISCHARGING, 47.0);
        fake.add_device(BAT0);
        let (mut monitor, mut rx) = start(&fake, &sink).await;

        set_level(&fake, BAT0, 40.0);
        let tick = rx.recv().await.unwrap();
        assert!(matches!(tick.signal, Signal::Tick));
        monitor.handle(tick).await;

        assert_eq!(sink.summaries(), vec!["Battery 40%"]);
    }

    #[tokio::test]
    async fn unplugging_releases_and_cancels() {
        let (fake, sink) = fixture();
        battery(&fake, BAT0, DISCHARGING, 47.0);
        let (mut monitor, _rx) = start(&fake, &sink).await;
        monitor.handle(plug(&fake, BAT0)).await;
        monitor.handle(plug(&fake, BAT0)).await;
        set_level(&fake, BAT0, 40.0);
        monitor
            .handle(fake.properties_changed(BAT0, UPOWER_DEVICE))
            .await;
        assert_eq!(sink.visible().len(), 1);

        monitor.handle(unplug(&fake, BAT0)).await;
        monitor.handle(unplug(&fake, BAT0)).await;

        assert!(sink.visible().is_empty());
        assert_eq!(monitor.devices.len(), 0);
        assert_eq!(
            fake.active_subscriptions(BAT0, SignalKind::PropertiesChanged),
            0
        );

        fake.clear_calls();
        monitor
            .handle(fake.properties_changed(BAT0, UPOWER_DEVICE))
            .await;
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn devices_of_unknown_type_are_polled() {
        let (fake, sink) = fixture();
        battery(&fake, BAT0, DISCHARGING, 47.0);
        fake.fail_property(BAT0, UPOWER_DEVICE, "Type");
        battery(&fake, "/ac", DISCHARGING, 0.0);
        fake.set_property("/ac", UPOWER_DEVICE, "Type", value(1_u32));
        fake.add_device(BAT0);
        fake.add_device("/ac");

        let (monitor, _rx) = start(&fake, &sink).await;

        assert!(monitor.devices.get(&path(BAT0)).unwrap().is_polled());
        assert!(!monitor.devices.get(&path("/ac")).unwrap().is_polled());
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let (fake, sink) = fixture();
        battery(&fake, BAT0, DISCHARGING, 47.0);
        fake.add_device(BAT0);
        let (mut monitor, _rx) = start(&fake, &sink).await;
        assert_eq!(fake.total_active_subscriptions(), 4);

        monitor.shutdown().await;

        assert_eq!(fake.total_active_subscriptions(), 0);
    }
}
