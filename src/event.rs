// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

/// Interface name → property name → raw value, as carried by
/// `InterfacesAdded` and `GetManagedObjects`.
pub(crate) type InterfaceMap = HashMap<String, HashMap<String, OwnedValue>>;

pub(crate) type EventSender = mpsc::UnboundedSender<Event>;
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<Event>;

pub(crate) fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Identifies whatever produced an event: a bus subscription or a poll timer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct SourceId(u64);

impl SourceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A live signal subscription. Forwarding stops when this is dropped.
#[derive(Debug)]
pub(crate) struct Subscription {
    source: SourceId,
    _guard: DropGuard,
}

impl Subscription {
    pub(crate) fn new(source: SourceId, token: CancellationToken) -> Self {
        Self {
            source,
            _guard: token.drop_guard(),
        }
    }

    pub(crate) const fn source(&self) -> SourceId {
        self.source
    }
}

/// The bus signals the monitors react to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SignalKind {
    PropertiesChanged,
    InterfacesAdded,
    InterfacesRemoved,
    DeviceAdded(&'static str),
    DeviceChanged(&'static str),
    DeviceRemoved(&'static str),
    JobCompleted,
}

impl SignalKind {
    pub(crate) const fn interface(self) -> &'static str {
        match self {
            Self::PropertiesChanged => "org.freedesktop.DBus.Properties",
            Self::InterfacesAdded | Self::InterfacesRemoved => "org.freedesktop.DBus.ObjectManager",
            Self::DeviceAdded(interface)
            | Self::DeviceChanged(interface)
            | Self::DeviceRemoved(interface) => interface,
            Self::JobCompleted => "org.freedesktop.UDisks2.Job",
        }
    }

    pub(crate) const fn member(self) -> &'static str {
        match self {
            Self::PropertiesChanged => "PropertiesChanged",
            Self::InterfacesAdded => "InterfacesAdded",
            Self::InterfacesRemoved => "InterfacesRemoved",
            Self::DeviceAdded(_) => "DeviceAdded",
            Self::DeviceChanged(_) => "DeviceChanged",
            Self::DeviceRemoved(_) => "DeviceRemoved",
            Self::JobCompleted => "Completed",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Signal {
    PropertiesChanged {
        interface: String,
    },
    InterfacesAdded {
        object: OwnedObjectPath,
        interfaces: InterfaceMap,
    },
    InterfacesRemoved {
        object: OwnedObjectPath,
        interfaces: Vec<String>,
    },
    DeviceAdded(OwnedObjectPath),
    DeviceChanged(OwnedObjectPath),
    DeviceRemoved(OwnedObjectPath),
    JobCompleted {
        success: bool,
        message: String,
    },
    /// A poll timer expired.
    Tick,
}

/// One queued unit of work for a monitor.
#[derive(Debug)]
pub(crate) struct Event {
    pub(crate) source: SourceId,
    /// The object the signal was emitted by (or the polled object).
    pub(crate) path: OwnedObjectPath,
    pub(crate) signal: Signal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_are_unique() {
        let first = SourceId::next();
        let second = SourceId::next();
        assert_ne!(first, second);
    }

    #[test]
    fn dropping_a_subscription_cancels_its_token() {
        let token = CancellationToken::new();
        let subscription = Subscription::new(SourceId::next(), token.clone());
        assert!(!token.is_cancelled());
        drop(subscription);
        assert!(token.is_cancelled());
    }

    #[test]
    fn device_signals_carry_their_interface() {
        let kind = SignalKind::DeviceAdded("org.freedesktop.UPower");
        assert_eq!(kind.interface(), "org.freedesktop.UPower");
        assert_eq!(kind.member(), "DeviceAdded");
        assert_eq!(
            SignalKind::JobCompleted.interface(),
            "org.freedesktop.UDisks2.Job"
        );
    }
}
