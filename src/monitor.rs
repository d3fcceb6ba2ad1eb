// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use log::{debug, info, trace};
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventReceiver};

/// One service's state machine, fed from its own event queue.
#[async_trait]
pub(crate) trait Monitor: Send {
    fn name(&self) -> &'static str;

    /// Handles one event to completion.
    async fn handle(&mut self, event: Event);

    /// Releases every subscription and timer.
    async fn shutdown(&mut self);
}

pub(crate) async fn run<M: Monitor>(
    mut monitor: M,
    mut events: EventReceiver,
    cancel: CancellationToken,
) {
    info!("Monitoring {}", monitor.name());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_event = events.recv() => match maybe_event {
                None => break,
                Some(event) => {
                    trace!(
                        "{}: {:?} from {} on {}",
                        monitor.name(),
                        event.signal,
                        event.source,
                        event.path.as_str()
                    );
                    monitor.handle(event).await;
                }
            }
        }
    }
    debug!("Shutting down {} monitor", monitor.name());
    monitor.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        event::{self, Signal, SourceId},
        testing::path,
    };

    #[derive(Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Monitor for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&mut self, event: Event) {
            self.log
                .lock()
                .unwrap()
                .push(event.path.as_str().to_owned());
        }

        async fn shutdown(&mut self) {
            self.log.lock().unwrap().push(String::from("shutdown"));
        }
    }

    fn tick(object: &str) -> Event {
        Event {
            source: SourceId::next(),
            path: path(object),
            signal: Signal::Tick,
        }
    }

    #[tokio::test]
    async fn handles_events_in_order_then_shuts_down() {
        let recorder = Recorder::default();
        let log = Arc::clone(&recorder.log);
        let (tx, rx) = event::channel();
        tx.send(tick("/a")).unwrap();
        tx.send(tick("/b")).unwrap();
        drop(tx);

        run(recorder, rx, CancellationToken::new()).await;

        assert_eq!(*log.lock().unwrap(), vec!["/a", "/b", "shutdown"]);
    }

    #[tokio::test]
    async fn cancellation_stops_a_waiting_monitor() {
        let recorder = Recorder::default();
        let log = Arc::clone(&recorder.log);
        let (tx, rx) = event::channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(recorder, rx, cancel.clone()));
        tx.send(tick("/a")).unwrap();
        tokio::task::yield_now().await;
        cancel.cancel();
        task.await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.last().map(String::as_str), Some("shutdown"));
        drop(tx);
    }
}
