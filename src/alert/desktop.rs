// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use zbus::{zvariant::Value, Connection};

use super::{Alert, NotificationSink};

const APP_NAME: &str = "nebel";

/// Desktop notifications through `org.freedesktop.Notifications`.
#[derive(Clone, Debug)]
pub(crate) struct DesktopNotifications {
    proxy: crate::api::NotificationsProxy<'static>,
}

impl DesktopNotifications {
    pub(crate) async fn new(connection: &Connection) -> zbus::Result<Self> {
        let proxy = crate::api::NotificationsProxy::new(connection).await?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl NotificationSink for DesktopNotifications {
    async fn notify(&self, replaces: Option<u32>, alert: &Alert) -> Result<u32> {
        let mut hints = HashMap::new();
        _ = hints.insert("urgency", Value::U8(alert.urgency.level()));
        let timeout = i32::try_from(alert.timeout.as_millis()).unwrap_or(i32::MAX);

        self.proxy
            .notify(
                APP_NAME,
                replaces.unwrap_or(0),
                "",
                &alert.summary,
                &alert.body,
                &[],
                hints,
                timeout,
            )
            .await
            .context("Notification service error")
    }

    async fn close(&self, id: u32) -> Result<()> {
        self.proxy
            .close_notification(id)
            .await
            .context("Notification service error")
    }
}
