// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use log::trace;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::zvariant::OwnedObjectPath;

use crate::event::{Event, EventSender, Signal, SourceId};

/// Periodically queues a [`Signal::Tick`] for one object, for services whose
/// change signals can't be relied on. Stops when dropped.
#[derive(Debug)]
pub(crate) struct PollTimer {
    source: SourceId,
    _guard: DropGuard,
}

impl PollTimer {
    pub(crate) fn start(path: OwnedObjectPath, period: Duration, events: EventSender) -> Self {
        let source = SourceId::next();
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let _task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        trace!("Polling {}", path.as_str());
                        let event = Event {
                            source,
                            path: path.clone(),
                            signal: Signal::Tick,
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            source,
            _guard: token.drop_guard(),
        }
    }

    pub(crate) const fn source(&self) -> SourceId {
        self.source
    }
}
