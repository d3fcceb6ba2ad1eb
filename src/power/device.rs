// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, time::Duration};

use async_trait::async_trait;
use zbus::zvariant::{self, OwnedObjectPath, OwnedValue};

use super::{UPOWER, UPOWER_DEVICE};
use crate::{
    alert::{Alert, AlertUpdate, Urgency},
    event::SourceId,
    object::{PropertyReader, Remote, RemoteObject},
    poll::PollTimer,
    threshold::{self, Direction, Ladder},
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum Kind {
    #[default]
    Unknown,
    LinePower,
    Battery,
}

impl TryFrom<OwnedValue> for Kind {
    type Error = zvariant::Error;

    fn try_from(value: OwnedValue) -> Result<Self, Self::Error> {
        Ok(match u32::try_from(value)? {
            1 => Self::LinePower,
            2 => Self::Battery,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Unknown => "power device",
            Self::LinePower => "line power",
            Self::Battery => "battery",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum ChargeState {
    #[default]
    Unknown,
    Charging,
    Discharging,
    Empty,
    FullyCharged,
    PendingCharge,
    PendingDischarge,
}

impl ChargeState {
    const fn direction(self) -> Option<Direction> {
        match self {
            Self::Charging => Some(Direction::Charging),
            Self::Discharging => Some(Direction::Discharging),
            Self::Unknown
            | Self::Empty
            | Self::FullyCharged
            | Self::PendingCharge
            | Self::PendingDischarge => None,
        }
    }
}

impl TryFrom<OwnedValue> for ChargeState {
    type Error = zvariant::Error;

    fn try_from(value: OwnedValue) -> Result<Self, Self::Error> {
        Ok(match u32::try_from(value)? {
            1 => Self::Charging,
            2 => Self::Discharging,
            3 => Self::Empty,
            4 => Self::FullyCharged,
            5 => Self::PendingCharge,
            6 => Self::PendingDischarge,
            _ => Self::Unknown,
        })
    }
}

/// Something a refresh of a power device found worth telling the user.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum PowerNotice {
    Level {
        direction: Direction,
        percentage: f64,
    },
    FullyCharged,
    Empty,
    /// Charging or discharging started over; the previous level alert is
    /// stale.
    LadderReset,
}

/// `1:05`, for a number of seconds.
fn hours_minutes(seconds: i64) -> String {
    let minutes = seconds / 60;
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

#[derive(Debug)]
pub(crate) struct PowerDevice {
    object: RemoteObject,
    kind: Kind,
    power_supply: bool,
    online: bool,
    state: ChargeState,
    percentage: f64,
    time_to_empty: i64,
    time_to_full: i64,
    model: String,
    ladder: Ladder,
    poll: Option<PollTimer>,
}

impl PowerDevice {
    pub(crate) fn new(path: OwnedObjectPath) -> Self {
        Self {
            object: RemoteObject::new(UPOWER, path, &[UPOWER_DEVICE]),
            kind: Kind::Unknown,
            power_supply: false,
            online: false,
            state: ChargeState::Unknown,
            percentage: 0.0,
            time_to_empty: 0,
            time_to_full: 0,
            model: String::new(),
            ladder: Ladder::default(),
            poll: None,
        }
    }

    pub(crate) const fn kind(&self) -> Kind {
        self.kind
    }

    pub(crate) const fn state(&self) -> ChargeState {
        self.state
    }

    pub(crate) const fn is_power_supply(&self) -> bool {
        self.power_supply
    }

    pub(crate) const fn is_online(&self) -> bool {
        self.online
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn poll(&mut self, timer: PollTimer) {
        self.poll = Some(timer);
    }

    pub(crate) fn stop_polling(&mut self) {
        self.poll = None;
    }

    pub(crate) const fn is_polled(&self) -> bool {
        self.poll.is_some()
    }

    pub(crate) fn progress_key(&self) -> String {
        format!("progress-{}", self.object.path().as_str())
    }

    pub(crate) fn state_key(&self) -> String {
        format!("state-{}", self.object.path().as_str())
    }

    fn level_alert(&self, direction: Direction, percentage: f64) -> Alert {
        let summary = format!("Battery {:.0}%", percentage);
        match direction {
            Direction::Charging => {
                let mut alert = Alert::new(summary)
                    .urgency(Urgency::Low)
                    .timeout(Duration::from_millis(2000));
                if self.time_to_full > 0 {
                    let until_full = hours_minutes(self.time_to_full);
                    alert = alert.body(format!("{} until full", until_full));
                }
                alert
            }
            Direction::Discharging => {
                let mut alert = Alert::new(summary)
                    .urgency(threshold::discharge_urgency(percentage))
                    .timeout(threshold::discharge_timeout(percentage));
                if self.time_to_empty > 0 {
                    let remaining = hours_minutes(self.time_to_empty);
                    alert = alert.body(format!("{} remaining", remaining));
                }
                alert
            }
        }
    }

    pub(crate) fn alert_update(&self, notice: PowerNotice) -> AlertUpdate {
        match notice {
            PowerNotice::Level {
                direction,
                percentage,
            } => AlertUpdate::Show(
                self.progress_key(),
                self.level_alert(direction, percentage),
            ),
            PowerNotice::FullyCharged => AlertUpdate::Show(
                self.state_key(),
                Alert::new("Battery fully charged")
                    .body(self.model.clone())
                    .urgency(Urgency::Low)
                    .timeout(Duration::from_millis(2000)),
            ),
            PowerNotice::Empty => AlertUpdate::Show(
                self.state_key(),
                Alert::new("Battery empty")
                    .body(self.model.clone())
                    .urgency(Urgency::Critical)
                    .timeout(Duration::from_millis(10_000)),
            ),
            PowerNotice::LadderReset => AlertUpdate::Cancel(self.progress_key()),
        }
    }
}

#[async_trait]
impl Remote for PowerDevice {
    type Snapshot = ChargeState;
    type Change = Vec<PowerNotice>;

    fn object(&self) -> &RemoteObject {
        &self.object
    }

    fn object_mut(&mut self) -> &mut RemoteObject {
        &mut self.object
    }

    fn accepts(&self, source: SourceId) -> bool {
        self.object.owns(source)
            || self
                .poll
                .as_ref()
                .map_or(false, |timer| timer.source() == source)
    }

    fn snapshot(&self) -> ChargeState {
        self.state
    }

    async fn read(&mut self, reader: &mut PropertyReader<'_>) {
        reader.read(UPOWER_DEVICE, "Type", &mut self.kind).await;
        reader
            .read(UPOWER_DEVICE, "PowerSupply", &mut self.power_supply)
            .await;
        reader.read(UPOWER_DEVICE, "Online", &mut self.online).await;
        reader.read(UPOWER_DEVICE, "State", &mut self.state).await;
        reader
            .read(UPOWER_DEVICE, "Percentage", &mut self.percentage)
            .await;
        reader
            .read(UPOWER_DEVICE, "TimeToEmpty", &mut self.time_to_empty)
            .await;
        reader
            .read(UPOWER_DEVICE, "TimeToFull", &mut self.time_to_full)
            .await;
        reader.read(UPOWER_DEVICE, "Model", &mut self.model).await;
    }

    fn transitions(&mut self, before: ChargeState) -> Vec<PowerNotice> {
        if self.kind != Kind::Battery {
            return Vec::new();
        }
        if before != self.state {
            return match self.state {
                ChargeState::FullyCharged if before == ChargeState::Charging => {
                    vec![PowerNotice::FullyCharged]
                }
                ChargeState::Empty => vec![PowerNotice::Empty],
                ChargeState::Charging | ChargeState::Discharging => {
                    if let Some(direction) = self.state.direction() {
                        self.ladder.reset(direction, self.percentage);
                    }
                    vec![PowerNotice::LadderReset]
                }
                ChargeState::Unknown
                | ChargeState::FullyCharged
                | ChargeState::PendingCharge
                | ChargeState::PendingDischarge => Vec::new(),
            };
        }
        match self.state.direction() {
            Some(direction) if self.ladder.step(direction, self.percentage) => {
                vec![PowerNotice::Level {
                    direction,
                    percentage: self.percentage,
                }]
            }
            _ => Vec::new(),
        }
    }

    /// Until the first complete refresh, just follow the level.
    fn settle(&mut self) {
        if let Some(direction) = self.state.direction() {
            self.ladder.reset(direction, self.percentage);
        }
    }
}
