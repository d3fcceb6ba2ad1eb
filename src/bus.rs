// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod dbus;

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use thiserror::Error;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use crate::event::{InterfaceMap, SignalKind, Subscription};

pub(crate) type ManagedObjects = HashMap<OwnedObjectPath, InterfaceMap>;

/// A bus object: the service that owns it and its path.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct ObjectId {
    pub(crate) service: &'static str,
    pub(crate) path: OwnedObjectPath,
}

impl ObjectId {
    pub(crate) const fn new(service: &'static str, path: OwnedObjectPath) -> Self {
        Self { service, path }
    }

    /// For well-known paths written out in the source.
    pub(crate) fn parse(service: &'static str, path: &str) -> Result<Self, TransportError> {
        let path = OwnedObjectPath::try_from(path).map_err(zbus::Error::from)?;
        Ok(Self::new(service, path))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.path.as_str())
    }
}

#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("bus error: {0}")]
    Bus(#[from] zbus::Error),
}

/// What the monitors need from the system bus.
///
/// Subscriptions deliver their signals as [`crate::event::Event`]s on the
/// queue the transport was created with.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    async fn get_property(
        &self,
        object: &ObjectId,
        interface: &str,
        name: &str,
    ) -> Result<OwnedValue, TransportError>;

    async fn subscribe_property_changed(
        &self,
        object: &ObjectId,
    ) -> Result<Subscription, TransportError> {
        self.subscribe_bus_signal(object, SignalKind::PropertiesChanged)
            .await
    }

    async fn subscribe_bus_signal(
        &self,
        object: &ObjectId,
        signal: SignalKind,
    ) -> Result<Subscription, TransportError>;

    /// Stops forwarding; the subscription is consumed so this can't run twice.
    fn unsubscribe(&self, subscription: Subscription);

    async fn enumerate_managed_objects(
        &self,
        object: &ObjectId,
    ) -> Result<ManagedObjects, TransportError>;

    async fn enumerate_devices(
        &self,
        object: &ObjectId,
        interface: &'static str,
    ) -> Result<Vec<OwnedObjectPath>, TransportError>;
}
