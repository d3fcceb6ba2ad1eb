// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{hash_map, HashMap};

use log::debug;
use zbus::zvariant::OwnedObjectPath;

use crate::{
    bus::{ManagedObjects, ObjectId, Transport, TransportError},
    event::{SignalKind, SourceId, Subscription},
    object::Remote,
};

/// The live objects of one class, by path.
#[derive(Debug)]
pub(crate) struct Registry<O> {
    objects: HashMap<OwnedObjectPath, O>,
}

impl<O> Default for Registry<O> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }
}

impl<O: Remote> Registry<O> {
    pub(crate) fn contains(&self, path: &OwnedObjectPath) -> bool {
        self.objects.contains_key(path)
    }

    pub(crate) fn get(&self, path: &OwnedObjectPath) -> Option<&O> {
        self.objects.get(path)
    }

    pub(crate) fn get_mut(&mut self, path: &OwnedObjectPath) -> Option<&mut O> {
        self.objects.get_mut(path)
    }

    /// Returns `false`, leaving the registry untouched, if the path is
    /// already known.
    pub(crate) fn insert(&mut self, object: O) -> bool {
        match self.objects.entry(object.object().path().clone()) {
            hash_map::Entry::Occupied(_) => {
                debug!("Ignoring duplicate {}", object.object().id());
                false
            }
            hash_map::Entry::Vacant(entry) => {
                _ = entry.insert(object);
                true
            }
        }
    }

    pub(crate) fn evict(&mut self, path: &OwnedObjectPath) -> Option<O> {
        self.objects.remove(path)
    }

    /// The object an event from `source` on `path` is meant for, if it is
    /// still around.
    pub(crate) fn route(&mut self, path: &OwnedObjectPath, source: SourceId) -> Option<&mut O> {
        match self.objects.get_mut(path) {
            Some(object) if object.accepts(source) => Some(object),
            Some(_) => {
                debug!("Discarding stale event {} for {}", source, path.as_str());
                None
            }
            None => None,
        }
    }

    pub(crate) fn paths(&self) -> Vec<OwnedObjectPath> {
        self.objects.keys().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> hash_map::Drain<'_, OwnedObjectPath, O> {
        self.objects.drain()
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}

/// Subscriptions to the signals a service announces its objects with.
#[derive(Debug)]
pub(crate) struct Announcer {
    root: ObjectId,
    subscriptions: Vec<Subscription>,
}

impl Announcer {
    async fn subscribe(
        transport: &dyn Transport,
        root: ObjectId,
        kinds: &[SignalKind],
    ) -> Result<Self, TransportError> {
        let mut subscriptions = Vec::with_capacity(kinds.len());
        for kind in kinds {
            subscriptions.push(transport.subscribe_bus_signal(&root, *kind).await?);
        }
        Ok(Self {
            root,
            subscriptions,
        })
    }

    /// Watches an object manager and returns its current objects.
    ///
    /// The subscriptions are made before enumerating: an object announced in
    /// between shows up in both, and it is up to the caller's registry to
    /// absorb the duplicate.
    pub(crate) async fn object_manager(
        transport: &dyn Transport,
        root: ObjectId,
    ) -> Result<(Self, ManagedObjects), TransportError> {
        let announcer = Self::subscribe(
            transport,
            root,
            &[SignalKind::InterfacesAdded, SignalKind::InterfacesRemoved],
        )
        .await?;
        let objects = transport.enumerate_managed_objects(&announcer.root).await?;
        debug!(
            "{} manages {} objects",
            announcer.root,
            objects.len()
        );
        Ok((announcer, objects))
    }

    /// Like [`Announcer::object_manager`], for services with an
    /// `EnumerateDevices` method and `DeviceAdded`-style signals.
    pub(crate) async fn device_list(
        transport: &dyn Transport,
        root: ObjectId,
        interface: &'static str,
        kinds: &[SignalKind],
    ) -> Result<(Self, Vec<OwnedObjectPath>), TransportError> {
        let announcer = Self::subscribe(transport, root, kinds).await?;
        let devices = transport
            .enumerate_devices(&announcer.root, interface)
            .await?;
        debug!("{} lists {} devices", announcer.root, devices.len());
        Ok((announcer, devices))
    }

    /// Whether an event came from one of these subscriptions.
    pub(crate) fn owns(&self, source: SourceId) -> bool {
        self.subscriptions
            .iter()
            .any(|subscription| subscription.source() == source)
    }

    pub(crate) fn close(&mut self, transport: &dyn Transport) {
        for subscription in self.subscriptions.drain(..) {
            transport.unsubscribe(subscription);
        }
    }
}
