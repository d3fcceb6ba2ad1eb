// SPDX-FileCopyrightText: 2022 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Hysteresis ladders for battery level alerts.
//!
//! While charging, an alert is due roughly every 10 percentage points, on
//! what looks like a decade boundary. While discharging, every 10 points
//! down to 25 % and every 5 points below that.

use std::time::Duration;

use crate::alert::Urgency;

/// Below this level the discharge ladder uses the finer step.
const FINE_STEP_BELOW: f64 = 25.0;

/// The level the charge must exceed before the next charging alert.
pub(crate) fn charge_threshold(last_notified: f64) -> f64 {
    (((last_notified + 1.0) / 10.0).ceil() * 10.0 - 1.0).max(0.0)
}

/// The level the charge must drop below before the next discharging alert.
pub(crate) fn discharge_threshold(last_notified: f64, current: f64) -> f64 {
    let step = if current <= FINE_STEP_BELOW { 5.0 } else { 10.0 };
    (((last_notified - 1.0) / step).floor() * step + 1.0).min(100.0)
}

pub(crate) fn charge_alert_due(last_notified: f64, current: f64) -> bool {
    current > charge_threshold(last_notified)
}

pub(crate) fn discharge_alert_due(last_notified: f64, current: f64) -> bool {
    current < discharge_threshold(last_notified, current)
}

pub(crate) fn discharge_urgency(current: f64) -> Urgency {
    if current <= 20.0 {
        Urgency::Critical
    } else {
        Urgency::Normal
    }
}

/// The lower the charge, the longer a discharging alert stays up.
pub(crate) fn discharge_timeout(current: f64) -> Duration {
    if current <= 10.0 {
        Duration::from_millis(10_000)
    } else if current <= 20.0 {
        Duration::from_millis(5_000)
    } else {
        Duration::from_millis(2_000)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Direction {
    Charging,
    Discharging,
}

/// The level each direction last alerted at.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Ladder {
    charge: Option<f64>,
    discharge: Option<f64>,
}

impl Ladder {
    /// Restarts the ladder of `direction` at `current`.
    pub(crate) fn reset(&mut self, direction: Direction, current: f64) {
        match direction {
            Direction::Charging => self.charge = Some(current),
            Direction::Discharging => self.discharge = Some(current),
        }
    }

    pub(crate) const fn last_notified(&self, direction: Direction) -> Option<f64> {
        match direction {
            Direction::Charging => self.charge,
            Direction::Discharging => self.discharge,
        }
    }

    /// Whether `current` is worth an alert; if so the ladder advances to it.
    /// A direction without a baseline takes `current` as its baseline.
    pub(crate) fn step(&mut self, direction: Direction, current: f64) -> bool {
        let Some(last) = self.last_notified(direction) else {
            self.reset(direction, current);
            return false;
        };
        let due = match direction {
            Direction::Charging => charge_alert_due(last, current),
            Direction::Discharging => discharge_alert_due(last, current),
        };
        if due {
            self.reset(direction, current);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        ladder: &mut Ladder,
        direction: Direction,
        levels: impl IntoIterator<Item = u32>,
    ) -> Vec<u32> {
        levels
            .into_iter()
            .filter(|level| ladder.step(direction, f64::from(*level)))
            .collect()
    }

    #[test]
    fn charge_thresholds_sit_below_decades() {
        assert_eq!(charge_threshold(47.0), 49.0);
        assert_eq!(charge_threshold(49.0), 49.0);
        assert_eq!(charge_threshold(50.0), 59.0);
        assert_eq!(charge_threshold(0.0), 9.0);
        assert_eq!(charge_threshold(-5.0), 0.0);
    }

    #[test]
    fn discharge_thresholds_tighten_below_25() {
        assert_eq!(discharge_threshold(47.0, 40.0), 41.0);
        assert_eq!(discharge_threshold(100.0, 95.0), 91.0);
        assert_eq!(discharge_threshold(40.0, 18.0), 36.0);
        assert_eq!(discharge_threshold(18.0, 9.0), 16.0);
        assert_eq!(discharge_threshold(150.0, 90.0), 100.0);
    }

    #[test]
    fn charging_alerts_once_per_decade_crossed() {
        for start in 0..100_u32 {
            let mut ladder = Ladder::default();
            ladder.reset(Direction::Charging, f64::from(start));
            let mut last = f64::from(start);

            let alerts = run(&mut ladder, Direction::Charging, start + 1..=100);

            let decades = (start / 10 + 1..=10).count();
            assert_eq!(alerts.len(), decades, "starting at {}", start);
            for level in alerts {
                assert!(f64::from(level) >= charge_threshold(last));
                assert_eq!(level % 10, 0);
                last = f64::from(level);
            }
        }
    }

    #[test]
    fn discharging_spacing_narrows_at_25() {
        let mut ladder = Ladder::default();
        ladder.reset(Direction::Discharging, 100.0);

        let alerts = run(&mut ladder, Direction::Discharging, (0..100).rev());

        assert_eq!(
            alerts,
            vec![90, 80, 70, 60, 50, 40, 30, 25, 20, 15, 10, 5, 0]
        );
        for level in alerts {
            let expected = if level <= 20 {
                Urgency::Critical
            } else {
                Urgency::Normal
            };
            assert_eq!(discharge_urgency(f64::from(level)), expected);
        }
    }

    #[test]
    fn discharging_from_47() {
        let mut ladder = Ladder::default();
        ladder.reset(Direction::Discharging, 47.0);

        assert!(ladder.step(Direction::Discharging, 40.0));
        assert_eq!(discharge_urgency(40.0), Urgency::Normal);
        assert_eq!(discharge_timeout(40.0), Duration::from_millis(2000));

        assert!(ladder.step(Direction::Discharging, 18.0));
        assert_eq!(discharge_urgency(18.0), Urgency::Critical);
        assert_eq!(discharge_timeout(18.0), Duration::from_millis(5000));

        assert!(ladder.step(Direction::Discharging, 9.0));
        assert_eq!(discharge_urgency(9.0), Urgency::Critical);
        assert_eq!(discharge_timeout(9.0), Duration::from_millis(10000));
    }

    #[test]
    fn oscillation_does_not_chatter() {
        let mut ladder = Ladder::default();
        ladder.reset(Direction::Discharging, 47.0);
        assert!(ladder.step(Direction::Discharging, 40.0));

        let repeats = run(&mut ladder, Direction::Discharging, [41, 40, 41, 40, 39, 40]);

        assert!(repeats.is_empty());
    }

    #[test]
    fn missing_baseline_is_taken_from_the_first_level() {
        let mut ladder = Ladder::default();
        assert!(!ladder.step(Direction::Discharging, 63.0));
        assert_eq!(ladder.last_notified(Direction::Discharging), Some(63.0));
        assert_eq!(ladder.last_notified(Direction::Charging), None);
    }

    #[test]
    fn a_reset_never_alerts_by_itself() {
        for level in 0..=100_u32 {
            let level = f64::from(level);
            assert!(!charge_alert_due(level, level));
            assert!(!discharge_alert_due(level, level));
        }
    }
}
