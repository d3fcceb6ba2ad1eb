// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-ins for the bus and the notification service.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::{
    alert::{Alert, NotificationSink},
    bus::{ManagedObjects, ObjectId, Transport, TransportError},
    event::{Event, InterfaceMap, Signal, SignalKind, SourceId, Subscription},
};

pub(crate) fn path(path: &str) -> OwnedObjectPath {
    OwnedObjectPath::try_from(path).unwrap()
}

pub(crate) fn value<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
    OwnedValue::from(value.into())
}

/// An interface map announcing `interfaces` with no properties.
pub(crate) fn interfaces(interfaces: &[&str]) -> InterfaceMap {
    interfaces
        .iter()
        .map(|interface| ((*interface).to_owned(), HashMap::new()))
        .collect()
}

type PropertyKey = (String, String, String);

fn key(path: &str, interface: &str, name: &str) -> PropertyKey {
    (path.to_owned(), interface.to_owned(), name.to_owned())
}

#[derive(Debug)]
struct FakeSubscription {
    source: SourceId,
    path: String,
    kind: SignalKind,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct FakeBus {
    properties: HashMap<PropertyKey, OwnedValue>,
    failing: HashSet<PropertyKey>,
    managed: ManagedObjects,
    devices: Vec<OwnedObjectPath>,
    unavailable: bool,
    enumeration_fails: bool,
    subscriptions: Vec<FakeSubscription>,
    unsubscribed: usize,
    calls: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct FakeTransport {
    bus: Arc<Mutex<FakeBus>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_property(&self, path: &str, interface: &str, name: &str, value: OwnedValue) {
        let mut bus = self.bus.lock().unwrap();
        let key = key(path, interface, name);
        _ = bus.failing.remove(&key);
        _ = bus.properties.insert(key, value);
    }

    pub(crate) fn fail_property(&self, path: &str, interface: &str, name: &str) {
        _ = self
            .bus
            .lock()
            .unwrap()
            .failing
            .insert(key(path, interface, name));
    }

    pub(crate) fn add_managed_object(&self, object: &str, announced: InterfaceMap) {
        _ = self
            .bus
            .lock()
            .unwrap()
            .managed
            .insert(path(object), announced);
    }

    pub(crate) fn add_device(&self, object: &str) {
        self.bus.lock().unwrap().devices.push(path(object));
    }

    /// Every bus call fails from now on.
    pub(crate) fn go_away(&self) {
        self.bus.lock().unwrap().unavailable = true;
    }

    /// Only enumeration calls fail from now on.
    pub(crate) fn fail_enumeration(&self) {
        self.bus.lock().unwrap().enumeration_fails = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.bus.lock().unwrap().calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.bus.lock().unwrap().calls.clear();
    }

    pub(crate) fn unsubscribed(&self) -> usize {
        self.bus.lock().unwrap().unsubscribed
    }

    /// Subscriptions that were neither unsubscribed nor dropped.
    pub(crate) fn active_subscriptions(&self, object: &str, kind: SignalKind) -> usize {
        self.bus
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.path == object && s.kind == kind && !s.token.is_cancelled())
            .count()
    }

    pub(crate) fn total_active_subscriptions(&self) -> usize {
        self.bus
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| !s.token.is_cancelled())
            .count()
    }

    /// The source of the most recent subscription to `kind` on `object`.
    pub(crate) fn source_of(&self, object: &str, kind: SignalKind) -> SourceId {
        self.bus
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .rev()
            .find(|s| s.path == object && s.kind == kind)
            .map(|s| s.source)
            .unwrap()
    }

    /// Builds the event the bus would deliver for `signal` on the most recent
    /// subscription to `kind` on `object`.
    pub(crate) fn event(&self, object: &str, kind: SignalKind, signal: Signal) -> Event {
        Event {
            source: self.source_of(object, kind),
            path: path(object),
            signal,
        }
    }

    pub(crate) fn properties_changed(&self, object: &str, interface: &str) -> Event {
        self.event(
            object,
            SignalKind::PropertiesChanged,
            Signal::PropertiesChanged {
                interface: interface.to_owned(),
            },
        )
    }

    fn record(&self, call: String) -> Result<(), TransportError> {
        let mut bus = self.bus.lock().unwrap();
        bus.calls.push(call);
        if bus.unavailable {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

fn unavailable() -> TransportError {
    TransportError::Bus(zbus::Error::Failure(String::from("service unavailable")))
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_property(
        &self,
        object: &ObjectId,
        interface: &str,
        name: &str,
    ) -> Result<OwnedValue, TransportError> {
        self.record(format!("get {} {}.{}", object.path.as_str(), interface, name))?;
        let bus = self.bus.lock().unwrap();
        let key = key(object.path.as_str(), interface, name);
        if bus.failing.contains(&key) {
            return Err(unavailable());
        }
        bus.properties.get(&key).cloned().ok_or_else(|| {
            TransportError::Bus(zbus::Error::Failure(format!("no property {}", name)))
        })
    }

    async fn subscribe_bus_signal(
        &self,
        object: &ObjectId,
        kind: SignalKind,
    ) -> Result<Subscription, TransportError> {
        self.record(format!("subscribe {} {}", object.path.as_str(), kind.member()))?;
        let source = SourceId::next();
        let token = CancellationToken::new();
        self.bus.lock().unwrap().subscriptions.push(FakeSubscription {
            source,
            path: object.path.as_str().to_owned(),
            kind,
            token: token.clone(),
        });
        Ok(Subscription::new(source, token))
    }

    fn unsubscribe(&self, subscription: Subscription) {
        self.bus.lock().unwrap().unsubscribed += 1;
        drop(subscription);
    }

    async fn enumerate_managed_objects(
        &self,
        object: &ObjectId,
    ) -> Result<ManagedObjects, TransportError> {
        self.record(format!("enumerate {}", object.path.as_str()))?;
        let bus = self.bus.lock().unwrap();
        if bus.enumeration_fails {
            return Err(unavailable());
        }
        Ok(bus.managed.clone())
    }

    async fn enumerate_devices(
        &self,
        object: &ObjectId,
        interface: &'static str,
    ) -> Result<Vec<OwnedObjectPath>, TransportError> {
        self.record(format!(
            "enumerate-devices {} {}",
            object.path.as_str(),
            interface
        ))?;
        let bus = self.bus.lock().unwrap();
        if bus.enumeration_fails {
            return Err(unavailable());
        }
        Ok(bus.devices.clone())
    }
}

#[derive(Debug, Default)]
struct FakeDesktop {
    next_id: u32,
    visible: BTreeMap<u32, Alert>,
    history: Vec<Alert>,
    failing: bool,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct FakeSink {
    desktop: Arc<Mutex<FakeDesktop>>,
}

impl FakeSink {
    /// Currently displayed alerts, oldest first.
    pub(crate) fn visible(&self) -> Vec<Alert> {
        self.desktop.lock().unwrap().visible.values().cloned().collect()
    }

    /// Every alert ever shown or updated.
    pub(crate) fn history(&self) -> Vec<Alert> {
        self.desktop.lock().unwrap().history.clone()
    }

    pub(crate) fn summaries(&self) -> Vec<String> {
        self.history()
            .into_iter()
            .map(|alert| alert.summary)
            .collect()
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.desktop.lock().unwrap().failing = failing;
    }

    /// The user closes everything.
    pub(crate) fn dismiss_all(&self) {
        self.desktop.lock().unwrap().visible.clear();
    }
}

#[async_trait]
impl NotificationSink for FakeSink {
    async fn notify(&self, replaces: Option<u32>, alert: &Alert) -> Result<u32> {
        let mut desktop = self.desktop.lock().unwrap();
        if desktop.failing {
            return Err(anyhow!("notification service unavailable"));
        }
        let id = match replaces {
            Some(id) if desktop.visible.contains_key(&id) => id,
            _ => {
                desktop.next_id += 1;
                desktop.next_id
            }
        };
        _ = desktop.visible.insert(id, alert.clone());
        desktop.history.push(alert.clone());
        Ok(id)
    }

    async fn close(&self, id: u32) -> Result<()> {
        _ = self.desktop.lock().unwrap().visible.remove(&id);
        Ok(())
    }
}
