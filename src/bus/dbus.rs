// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;
use zbus::{
    zvariant::{OwnedObjectPath, OwnedValue},
    CacheProperties, Connection, Message,
};

use super::{ManagedObjects, ObjectId, Transport, TransportError};
use crate::event::{Event, EventSender, InterfaceMap, Signal, SignalKind, SourceId, Subscription};

/// A [`Transport`] speaking to a real bus through zbus.
#[derive(Debug)]
pub(crate) struct DbusTransport {
    connection: Connection,
    events: EventSender,
}

impl DbusTransport {
    pub(crate) fn new(connection: Connection, events: EventSender) -> Self {
        Self { connection, events }
    }

    async fn signal_proxy(
        &self,
        object: &ObjectId,
        interface: &'static str,
    ) -> zbus::Result<zbus::Proxy<'static>> {
        zbus::ProxyBuilder::new_bare(&self.connection)
            .destination(object.service)?
            .path(object.path.clone().into_inner())?
            .interface(interface)?
            .cache_properties(CacheProperties::No)
            .build()
            .await
    }
}

fn decode(kind: SignalKind, message: &Message) -> zbus::Result<Signal> {
    let signal = match kind {
        SignalKind::PropertiesChanged => {
            // Monitors re-read everything they watch, so only the interface
            // matters.
            let (interface, _changed, _invalidated): (
                String,
                HashMap<String, OwnedValue>,
                Vec<String>,
            ) = message.body()?;
            Signal::PropertiesChanged { interface }
        }
        SignalKind::InterfacesAdded => {
            let (object, interfaces): (OwnedObjectPath, InterfaceMap) = message.body()?;
            Signal::InterfacesAdded { object, interfaces }
        }
        SignalKind::InterfacesRemoved => {
            let (object, interfaces): (OwnedObjectPath, Vec<String>) = message.body()?;
            Signal::InterfacesRemoved { object, interfaces }
        }
        SignalKind::DeviceAdded(_) => Signal::DeviceAdded(message.body()?),
        SignalKind::DeviceChanged(_) => Signal::DeviceChanged(message.body()?),
        SignalKind::DeviceRemoved(_) => Signal::DeviceRemoved(message.body()?),
        SignalKind::JobCompleted => {
            let (success, message): (bool, String) = message.body()?;
            Signal::JobCompleted { success, message }
        }
    };
    Ok(signal)
}

#[async_trait]
impl Transport for DbusTransport {
    async fn get_property(
        &self,
        object: &ObjectId,
        interface: &str,
        name: &str,
    ) -> Result<OwnedValue, TransportError> {
        let proxy = crate::api::PropertiesProxy::builder(&self.connection)
            .destination(object.service)?
            .path(object.path.clone().into_inner())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(proxy.get(interface, name).await?)
    }

    async fn subscribe_bus_signal(
        &self,
        object: &ObjectId,
        kind: SignalKind,
    ) -> Result<Subscription, TransportError> {
        let proxy = self.signal_proxy(object, kind.interface()).await?;
        // The match rule is in place once this returns, so nothing emitted
        // afterwards can be missed.
        let mut stream = Box::pin(proxy.receive_signal(kind.member()).await?);

        let source = SourceId::next();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events.clone();
        let path = object.path.clone();
        debug!(
            "Subscribed {} to {} on {}",
            source,
            kind.member(),
            object
        );

        let _task = tokio::spawn(async move {
            let _proxy = proxy;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    maybe_message = stream.next() => match maybe_message {
                        None => break,
                        Some(message) => match decode(kind, &message) {
                            Ok(signal) => {
                                let event = Event {
                                    source,
                                    path: path.clone(),
                                    signal,
                                };
                                if events.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(
                                "Discarding malformed {} signal from {}: {}",
                                kind.member(),
                                path.as_str(),
                                e
                            ),
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(source, token))
    }

    fn unsubscribe(&self, subscription: Subscription) {
        debug!("Unsubscribing {}", subscription.source());
        drop(subscription);
    }

    async fn enumerate_managed_objects(
        &self,
        object: &ObjectId,
    ) -> Result<ManagedObjects, TransportError> {
        let proxy = crate::api::ObjectManagerProxy::builder(&self.connection)
            .destination(object.service)?
            .path(object.path.clone().into_inner())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(proxy.get_managed_objects().await?)
    }

    async fn enumerate_devices(
        &self,
        object: &ObjectId,
        interface: &'static str,
    ) -> Result<Vec<OwnedObjectPath>, TransportError> {
        let proxy = crate::api::DeviceListProxy::builder(&self.connection)
            .destination(object.service)?
            .path(object.path.clone().into_inner())?
            .interface(interface)?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(proxy.enumerate_devices().await?)
    }
}

#[cfg(test)]
mod tests {
    use zbus::zvariant::Value;

    use super::*;

    #[test]
    fn properties_changed_keeps_only_the_interface() {
        let changed = HashMap::from([("Percentage", Value::from(42.0))]);
        let message = Message::signal(
            None::<&str>,
            None::<&str>,
            "/org/freedesktop/UPower/devices/battery_BAT0",
            "org.freedesktop.DBus.Properties",
            "PropertiesChanged",
            &("org.freedesktop.UPower.Device", changed, vec!["State"]),
        )
        .unwrap();

        let signal = decode(SignalKind::PropertiesChanged, &message).unwrap();

        assert!(matches!(
            signal,
            Signal::PropertiesChanged { ref interface }
                if interface == "org.freedesktop.UPower.Device"
        ));
    }
}
