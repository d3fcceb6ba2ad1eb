// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use async_trait::async_trait;
use log::{debug, trace, warn};
use thiserror::Error;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use crate::{
    bus::{ObjectId, Transport, TransportError},
    event::{SourceId, Subscription},
};

#[derive(Debug, Error)]
pub(crate) enum PropertyError {
    #[error("couldn't read {interface}.{name} of {object}")]
    Transport {
        object: ObjectId,
        interface: &'static str,
        name: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("{interface}.{name} of {object} has an unexpected value: {reason}")]
    Conversion {
        object: ObjectId,
        interface: &'static str,
        name: &'static str,
        reason: String,
    },
}

/// Identity and subscription bookkeeping shared by every remote object.
#[derive(Debug)]
pub(crate) struct RemoteObject {
    id: ObjectId,
    interfaces: &'static [&'static str],
    initialized: bool,
    subscription: Option<Subscription>,
}

impl RemoteObject {
    pub(crate) const fn new(
        service: &'static str,
        path: OwnedObjectPath,
        interfaces: &'static [&'static str],
    ) -> Self {
        Self {
            id: ObjectId::new(service, path),
            interfaces,
            initialized: false,
            subscription: None,
        }
    }

    pub(crate) const fn id(&self) -> &ObjectId {
        &self.id
    }

    pub(crate) const fn path(&self) -> &OwnedObjectPath {
        &self.id.path
    }

    pub(crate) const fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[cfg(test)]
    pub(crate) const fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Whether a property change on `interface` concerns this object.
    pub(crate) fn watches(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|watched| *watched == interface)
    }

    /// Whether events from `source` are addressed to the current incarnation
    /// of this object.
    pub(crate) fn owns(&self, source: SourceId) -> bool {
        self.subscription
            .as_ref()
            .map_or(false, |subscription| subscription.source() == source)
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    async fn subscribe(&mut self, transport: &dyn Transport) {
        if self.subscription.is_some() {
            return;
        }
        match transport.subscribe_property_changed(&self.id).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => warn!(
                "Unable to watch {} for property changes: {:#}",
                self.id,
                anyhow::Error::new(e)
            ),
        }
    }

    /// Safe to call when never subscribed or already unsubscribed.
    pub(crate) fn unsubscribe(&mut self, transport: &dyn Transport) {
        if let Some(subscription) = self.subscription.take() {
            transport.unsubscribe(subscription);
        }
    }
}

/// Reads properties of one object, collecting the failures instead of
/// stopping at the first one.
pub(crate) struct PropertyReader<'a> {
    transport: &'a dyn Transport,
    object: ObjectId,
    failures: Vec<PropertyError>,
}

impl<'a> PropertyReader<'a> {
    pub(crate) fn new(transport: &'a dyn Transport, object: ObjectId) -> Self {
        Self {
            transport,
            object,
            failures: Vec::new(),
        }
    }

    /// Stores the converted value in `slot`; on failure `slot` keeps its
    /// previous value.
    pub(crate) async fn read<V>(
        &mut self,
        interface: &'static str,
        name: &'static str,
        slot: &mut V,
    ) where
        V: TryFrom<OwnedValue> + Send,
        V::Error: fmt::Display,
    {
        let raw = match self
            .transport
            .get_property(&self.object, interface, name)
            .await
        {
            Ok(raw) => raw,
            Err(source) => {
                self.failures.push(PropertyError::Transport {
                    object: self.object.clone(),
                    interface,
                    name,
                    source,
                });
                return;
            }
        };
        match V::try_from(raw) {
            Ok(value) => *slot = value,
            Err(e) => self.failures.push(PropertyError::Conversion {
                object: self.object.clone(),
                interface,
                name,
                reason: e.to_string(),
            }),
        }
    }

    fn finish(self) -> Vec<PropertyError> {
        self.failures
    }
}

/// A typed view of one bus object.
#[async_trait]
pub(crate) trait Remote: Send {
    /// The part of the cache transitions are detected against.
    type Snapshot: Send;
    /// What a refresh reports to the monitor.
    type Change: Send + Default;

    fn object(&self) -> &RemoteObject;
    fn object_mut(&mut self) -> &mut RemoteObject;

    /// Whether an event from `source` is meant for this object.
    fn accepts(&self, source: SourceId) -> bool {
        self.object().owns(source)
    }

    fn snapshot(&self) -> Self::Snapshot;

    /// Reads every declared property into the typed cache.
    async fn read(&mut self, reader: &mut PropertyReader<'_>);

    /// Compares the cache with `before`. Only called once the object was
    /// initialized before the refresh that is being evaluated.
    fn transitions(&mut self, before: Self::Snapshot) -> Self::Change;

    /// Called instead of [`Remote::transitions`] for refreshes of an
    /// uninitialized object.
    fn settle(&mut self) {}
}

#[derive(Debug)]
pub(crate) struct Refreshed<C> {
    pub(crate) change: C,
    pub(crate) failures: Vec<PropertyError>,
}

pub(crate) async fn refresh<O: Remote>(
    object: &mut O,
    transport: &dyn Transport,
) -> Refreshed<O::Change> {
    let was_initialized = object.object().is_initialized();
    let before = object.snapshot();

    let mut reader = PropertyReader::new(transport, object.object().id().clone());
    object.read(&mut reader).await;
    let failures = reader.finish();

    for failure in &failures {
        match *failure {
            PropertyError::Transport { ref source, .. } => {
                warn!("{}: {}", failure, source);
            }
            PropertyError::Conversion { .. } => warn!("{}", failure),
        }
    }
    if failures.is_empty() {
        object.object_mut().mark_initialized();
    } else {
        debug!(
            "Refresh of {} was partial ({} failures)",
            object.object().id(),
            failures.len()
        );
    }

    let change = if was_initialized {
        object.transitions(before)
    } else {
        object.settle();
        O::Change::default()
    };
    trace!("Refreshed {}", object.object().id());
    Refreshed { change, failures }
}

/// Refreshes, then starts watching for property changes.
pub(crate) async fn added<O: Remote>(
    object: &mut O,
    transport: &dyn Transport,
) -> Refreshed<O::Change> {
    let refreshed = refresh(object, transport).await;
    object.object_mut().subscribe(transport).await;
    refreshed
}

/// Stops watching; subtype teardown is up to the caller and runs after this.
pub(crate) fn removed<O: Remote>(object: &mut O, transport: &dyn Transport) {
    object.object_mut().unsubscribe(transport);
}
