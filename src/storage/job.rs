// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use log::warn;
use zbus::zvariant::{self, OwnedObjectPath, OwnedValue, Value};

use super::{device::Device, JOB, UDISKS};
use crate::{
    alert::{Alert, Urgency},
    bus::Transport,
    event::{SourceId, Subscription},
    object::{PropertyReader, Remote, RemoteObject},
    registry::Registry,
};

/// An object path array property (`ao`).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ObjectPaths(pub(crate) Vec<OwnedObjectPath>);

impl TryFrom<OwnedValue> for ObjectPaths {
    type Error = zvariant::Error;

    fn try_from(value: OwnedValue) -> Result<Self, Self::Error> {
        let Value::Array(ref array) = *value else {
            return Err(zvariant::Error::IncorrectType);
        };
        array
            .get()
            .iter()
            .map(|element| match *element {
                Value::ObjectPath(ref path) => OwnedObjectPath::try_from(path.as_str()),
                _ => Err(zvariant::Error::IncorrectType),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Operation {
    Mount,
    Unmount,
    Other,
}

impl Operation {
    fn parse(name: &str) -> Self {
        match name {
            "filesystem-mount" => Self::Mount,
            "filesystem-unmount" => Self::Unmount,
            _ => Self::Other,
        }
    }

    /// Alert key prefix and progress wording, for operations the user cares
    /// about.
    const fn wording(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Mount => Some(("mount", "Mounting")),
            Self::Unmount => Some(("unmount", "Unmounting")),
            Self::Other => None,
        }
    }
}

/// A running storage operation. Its properties come with the announcement
/// and are never re-read; the only update is the `Completed` signal.
#[derive(Debug)]
pub(crate) struct Job {
    object: RemoteObject,
    operation_name: String,
    operation: Operation,
    cancelable: bool,
    progress: f64,
    progress_valid: bool,
    objects: ObjectPaths,
    completed: Option<Subscription>,
}

fn take<V>(properties: &mut HashMap<String, OwnedValue>, job: &OwnedObjectPath, name: &str) -> V
where
    V: TryFrom<OwnedValue> + Default,
    V::Error: fmt::Display,
{
    let Some(raw) = properties.remove(name) else {
        return V::default();
    };
    V::try_from(raw).unwrap_or_else(|e| {
        warn!("Job {} has an unexpected {}: {}", job.as_str(), name, e);
        V::default()
    })
}

impl Job {
    pub(crate) fn from_announcement(
        path: OwnedObjectPath,
        mut properties: HashMap<String, OwnedValue>,
    ) -> Self {
        let operation_name: String = take(&mut properties, &path, "Operation");
        Self {
            operation: Operation::parse(&operation_name),
            operation_name,
            cancelable: take(&mut properties, &path, "Cancelable"),
            progress: take(&mut properties, &path, "Progress"),
            progress_valid: take(&mut properties, &path, "ProgressValid"),
            objects: take(&mut properties, &path, "Objects"),
            object: RemoteObject::new(UDISKS, path, &[JOB]),
            completed: None,
        }
    }

    pub(crate) fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub(crate) fn objects(&self) -> &[OwnedObjectPath] {
        &self.objects.0
    }

    pub(crate) const fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    pub(crate) fn progress(&self) -> Option<f64> {
        self.progress_valid.then_some(self.progress)
    }

    pub(crate) fn watch(&mut self, completed: Subscription) {
        self.completed = Some(completed);
    }

    pub(crate) fn release(&mut self, transport: &dyn Transport) {
        if let Some(subscription) = self.completed.take() {
            transport.unsubscribe(subscription);
        }
    }

    /// The key of this job's alerts, if it is worth any.
    pub(crate) fn alert_key(&self) -> Option<String> {
        let (prefix, _) = self.operation.wording()?;
        let target = self.objects.0.first()?;
        Some(format!("{}-{}", prefix, target.as_str()))
    }

    /// Key, wording and affected device of a job worth an alert.
    fn subject(&self, devices: &Registry<Device>) -> Option<(String, &'static str, String)> {
        let key = self.alert_key()?;
        let (_, wording) = self.operation.wording()?;
        let target = self.objects.0.first()?;
        let label = devices.get(target).map_or_else(
            || target.as_str().to_owned(),
            |device| device.label().to_owned(),
        );
        Some((key, wording, label))
    }

    pub(crate) fn started_alert(&self, devices: &Registry<Device>) -> Option<(String, Alert)> {
        let (key, wording, label) = self.subject(devices)?;
        let alert = Alert::new(format!("{} {}...", wording, label))
            .urgency(Urgency::Low)
            .timeout(Duration::from_millis(5000));
        Some((key, alert))
    }

    pub(crate) fn completed_alert(
        &self,
        success: bool,
        message: &str,
        devices: &Registry<Device>,
    ) -> Option<(String, Alert)> {
        let (key, wording, label) = self.subject(devices)?;
        let alert = if success {
            Alert::new(format!("{} {}...done.", wording, label))
                .urgency(Urgency::Low)
                .timeout(Duration::from_millis(1000))
        } else {
            Alert::new(format!("{} {}...failed", wording, label))
                .body(message)
                .urgency(Urgency::Normal)
                .timeout(Duration::from_millis(5000))
        };
        Some((key, alert))
    }
}

#[async_trait]
impl Remote for Job {
    type Snapshot = ();
    type Change = ();

    fn object(&self) -> &RemoteObject {
        &self.object
    }

    fn object_mut(&mut self) -> &mut RemoteObject {
        &mut self.object
    }

    fn accepts(&self, source: SourceId) -> bool {
        self.completed
            .as_ref()
            .map_or(false, |subscription| subscription.source() == source)
    }

    fn snapshot(&self) {}

    async fn read(&mut self, _reader: &mut PropertyReader<'_>) {}

    fn transitions(&mut self, _before: ()) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use zbus::zvariant::ObjectPath;

    use super::*;
    use crate::testing::{path, value};

    pub(crate) const JOB_PATH: &str = "/org/freedesktop/UDisks2/jobs/7";

    pub(crate) fn job_properties(operation: &str, target: &str) -> HashMap<String, OwnedValue> {
        HashMap::from([
            (String::from("Operation"), value(operation)),
            (String::from("Cancelable"), value(true)),
            (String::from("Progress"), value(0.0_f64)),
            (String::from("ProgressValid"), value(false)),
            (
                String::from("Objects"),
                value(vec![ObjectPath::try_from(target).unwrap()]),
            ),
        ])
    }

    #[test]
    fn reads_the_announced_properties() {
        let job = Job::from_announcement(
            path(JOB_PATH),
            job_properties(
                "filesystem-mount",
                "/org/freedesktop/UDisks2/block_devices/sdb1",
            ),
        );

        assert_eq!(job.operation_name(), "filesystem-mount");
        let (key, started) = job.started_alert(&Registry::default()).unwrap();
        assert_eq!(key, "mount-/org/freedesktop/UDisks2/block_devices/sdb1");
        assert_eq!(
            started.summary,
            "Mounting /org/freedesktop/UDisks2/block_devices/sdb1..."
        );
        assert!(job.is_cancelable());
        assert_eq!(job.progress(), None);
        assert_eq!(
            job.objects(),
            [path("/org/freedesktop/UDisks2/block_devices/sdb1")]
        );
    }

    #[test]
    fn malformed_properties_fall_back_to_defaults() {
        let mut properties = job_properties("format-mkfs", "/x");
        _ = properties.insert(String::from("Objects"), value("not paths"));
        _ = properties.remove("Cancelable");

        let job = Job::from_announcement(path(JOB_PATH), properties);

        assert_eq!(job.operation_name(), "format-mkfs");
        assert!(!job.is_cancelable());
        assert!(job.objects().is_empty());
        assert!(job.started_alert(&Registry::default()).is_none());
    }

    #[test]
    fn unmount_wording() {
        let job = Job::from_announcement(
            path(JOB_PATH),
            job_properties("filesystem-unmount", "/x"),
        );
        let devices = Registry::default();

        let (key, started) = job.started_alert(&devices).unwrap();
        assert_eq!(key, "unmount-/x");
        assert_eq!(started.summary, "Unmounting /x...");

        let (_, failed) = job.completed_alert(false, "target is busy", &devices).unwrap();
        assert_eq!(failed.summary, "Unmounting /x...failed");
        assert_eq!(failed.body, "target is busy");
        assert_eq!(failed.urgency, Urgency::Normal);
        assert_eq!(failed.timeout, Duration::from_millis(5000));
    }
}
