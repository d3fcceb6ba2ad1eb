// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use zbus::zvariant::{self, OwnedObjectPath, OwnedValue, Value};

use super::{BLOCK, ENCRYPTED, FILESYSTEM, PARTITION, PARTITION_TABLE, UDISKS};
use crate::object::{PropertyReader, Remote, RemoteObject};

/// A NUL-terminated byte string property (`ay`), such as a device node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ByteString(pub(crate) String);

impl TryFrom<OwnedValue> for ByteString {
    type Error = zvariant::Error;

    fn try_from(value: OwnedValue) -> Result<Self, Self::Error> {
        let Value::Array(ref array) = *value else {
            return Err(zvariant::Error::IncorrectType);
        };
        let mut bytes = array
            .get()
            .iter()
            .map(|element| match *element {
                Value::U8(byte) => Ok(byte),
                _ => Err(zvariant::Error::IncorrectType),
            })
            .collect::<Result<Vec<u8>, _>>()?;
        if let Some(end) = bytes.iter().position(|byte| *byte == 0) {
            bytes.truncate(end);
        }
        Ok(Self(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// An object path property where `/` stands for "none".
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ObjectRef(pub(crate) Option<OwnedObjectPath>);

impl TryFrom<OwnedValue> for ObjectRef {
    type Error = zvariant::Error;

    fn try_from(value: OwnedValue) -> Result<Self, Self::Error> {
        let Value::ObjectPath(ref path) = *value else {
            return Err(zvariant::Error::IncorrectType);
        };
        if path.as_str() == "/" {
            return Ok(Self(None));
        }
        Ok(Self(Some(OwnedObjectPath::try_from(path.as_str())?)))
    }
}

/// Which of the block-level interfaces an object announced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Facets {
    pub(crate) block: bool,
    pub(crate) encrypted: bool,
    pub(crate) filesystem: bool,
    pub(crate) partition: bool,
    pub(crate) partition_table: bool,
}

impl Facets {
    fn set(&mut self, interface: &str, present: bool) {
        let facet = match interface {
            BLOCK => &mut self.block,
            ENCRYPTED => &mut self.encrypted,
            FILESYSTEM => &mut self.filesystem,
            PARTITION => &mut self.partition,
            PARTITION_TABLE => &mut self.partition_table,
            _ => return,
        };
        *facet = present;
    }

    pub(crate) const fn is_empty(self) -> bool {
        !(self.block || self.encrypted || self.filesystem || self.partition || self.partition_table)
    }

    /// How the facets read in a drive alert.
    pub(crate) fn describe(self) -> Vec<&'static str> {
        [
            (self.encrypted, "encrypted"),
            (self.filesystem, "filesystem"),
            (self.partition, "partition"),
            (self.partition_table, "partitioned"),
        ]
        .into_iter()
        .filter_map(|(present, name)| present.then_some(name))
        .collect()
    }
}

/// A block device, attached to the drive it lives on once that is known.
#[derive(Debug)]
pub(crate) struct Device {
    object: RemoteObject,
    facets: Facets,
    node: ByteString,
    drive_ref: ObjectRef,
    drive: Option<OwnedObjectPath>,
    read_only: bool,
    id_label: String,
    id_type: String,
    id_usage: String,
    table_type: String,
}

impl Device {
    pub(crate) const fn new(path: OwnedObjectPath) -> Self {
        Self {
            object: RemoteObject::new(UDISKS, path, &[BLOCK, PARTITION_TABLE]),
            facets: Facets {
                block: false,
                encrypted: false,
                filesystem: false,
                partition: false,
                partition_table: false,
            },
            node: ByteString(String::new()),
            drive_ref: ObjectRef(None),
            drive: None,
            read_only: false,
            id_label: String::new(),
            id_type: String::new(),
            id_usage: String::new(),
            table_type: String::new(),
        }
    }

    pub(crate) fn add_interfaces<'a>(&mut self, interfaces: impl IntoIterator<Item = &'a str>) {
        for interface in interfaces {
            self.facets.set(interface, true);
        }
    }

    pub(crate) fn remove_interfaces<'a>(
        &mut self,
        interfaces: impl IntoIterator<Item = &'a str>,
    ) {
        for interface in interfaces {
            self.facets.set(interface, false);
        }
    }

    pub(crate) const fn facets(&self) -> Facets {
        self.facets
    }

    /// The device node, or the object path until the node is known.
    pub(crate) fn label(&self) -> &str {
        if self.node.0.is_empty() {
            self.object.path().as_str()
        } else {
            &self.node.0
        }
    }

    /// The drive the service says this device belongs to.
    pub(crate) const fn drive_ref(&self) -> Option<&OwnedObjectPath> {
        self.drive_ref.0.as_ref()
    }

    /// The drive this device is attached to.
    pub(crate) const fn drive(&self) -> Option<&OwnedObjectPath> {
        self.drive.as_ref()
    }

    pub(crate) fn attach(&mut self, drive: OwnedObjectPath) {
        self.drive = Some(drive);
    }

    pub(crate) fn detach(&mut self) -> Option<OwnedObjectPath> {
        self.drive.take()
    }

    pub(crate) const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Filesystem label and type as udev reported them, e.g. `("DATA", "vfat")`.
    pub(crate) fn id(&self) -> (&str, &str, &str) {
        (&self.id_label, &self.id_type, &self.id_usage)
    }

    pub(crate) fn table_type(&self) -> &str {
        &self.table_type
    }
}

#[async_trait]
impl Remote for Device {
    type Snapshot = ();
    type Change = ();

    fn object(&self) -> &RemoteObject {
        &self.object
    }

    fn object_mut(&mut self) -> &mut RemoteObject {
        &mut self.object
    }

    fn snapshot(&self) {}

    async fn read(&mut self, reader: &mut PropertyReader<'_>) {
        if self.facets.block {
            reader.read(BLOCK, "Device", &mut self.node).await;
            reader.read(BLOCK, "Drive", &mut self.drive_ref).await;
            reader.read(BLOCK, "ReadOnly", &mut self.read_only).await;
            reader.read(BLOCK, "IdLabel", &mut self.id_label).await;
            reader.read(BLOCK, "IdType", &mut self.id_type).await;
            reader.read(BLOCK, "IdUsage", &mut self.id_usage).await;
        }
        if self.facets.partition_table {
            reader
                .read(PARTITION_TABLE, "Type", &mut self.table_type)
                .await;
        }
    }

    fn transitions(&mut self, _before: ()) {}
}
