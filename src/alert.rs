// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod desktop;

use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    /// The value of the `urgency` notification hint.
    pub(crate) const fn level(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::Critical => 2,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Alert {
    pub(crate) summary: String,
    pub(crate) body: String,
    pub(crate) urgency: Urgency,
    pub(crate) timeout: Duration,
}

impl Alert {
    pub(crate) fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            body: String::new(),
            urgency: Urgency::Low,
            timeout: Duration::from_millis(1000),
        }
    }

    pub(crate) fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub(crate) const fn urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub(crate) const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What a monitor wants done with one keyed alert.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum AlertUpdate {
    Show(String, Alert),
    Cancel(String),
}

/// Whatever finally puts an alert in front of the user.
#[async_trait]
pub(crate) trait NotificationSink: Send + Sync {
    /// Shows `alert`, replacing the notification `replaces` if it is still
    /// displayed. Returns the id of the displayed notification.
    async fn notify(&self, replaces: Option<u32>, alert: &Alert) -> Result<u32>;

    async fn close(&self, id: u32) -> Result<()>;
}

/// Alerts keyed by a stable name, so a repeated alert replaces the previous
/// one instead of stacking up.
#[derive(Debug)]
pub(crate) struct Alerts<S> {
    sink: S,
    shown: HashMap<String, u32>,
}

impl<S: NotificationSink> Alerts<S> {
    pub(crate) fn new(sink: S) -> Self {
        Self {
            sink,
            shown: HashMap::new(),
        }
    }

    pub(crate) async fn show(&mut self, key: &str, alert: Alert) {
        let replaces = self.shown.get(key).copied();
        match self.sink.notify(replaces, &alert).await {
            Ok(id) => {
                debug!("Alert {} ({}): {}", key, id, alert.summary);
                _ = self.shown.insert(key.to_owned(), id);
            }
            Err(e) => warn!("Unable to show alert {}: {:#}", key, e),
        }
    }

    pub(crate) async fn cancel(&mut self, key: &str) {
        let Some(id) = self.shown.remove(key) else {
            return;
        };
        debug!("Cancelling alert {} ({})", key, id);
        if let Err(e) = self.sink.close(id).await {
            warn!("Unable to close alert {}: {:#}", key, e);
        }
    }

    /// Stops tracking `key` once its subject is gone. The notification is
    /// left to time out.
    pub(crate) fn forget(&mut self, key: &str) {
        if let Some(id) = self.shown.remove(key) {
            debug!("Forgetting alert {} ({})", key, id);
        }
    }

    pub(crate) async fn apply(&mut self, update: AlertUpdate) {
        match update {
            AlertUpdate::Show(key, alert) => self.show(&key, alert).await,
            AlertUpdate::Cancel(key) => self.cancel(&key).await,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_shown(&self, key: &str) -> bool {
        self.shown.contains_key(key)
    }
}
