//! Decoded activity model
//!
//! An [`Activity`] owns its [`Lap`]s, which own their [`Trackpoint`]s in file
//! order. Summary statistics are computed once, when the activity is built.

use chrono::{DateTime, Utc};
use strum::{Display, EnumString};

use crate::measure::{Meters, MetersPerSecond, Seconds, SecondsPerKilometer};

/// Canonical sport classification.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, EnumString, serde::Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivitySport {
    Run,
    Cycling,
    Swimming,
    Walk,
    CrossTraining,
    Other,
}

impl ActivitySport {
    /// Classifies a free-form sport label such as TCX's `Sport` attribute or a
    /// Strava activity type.
    pub fn classify(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase().replace(['_', ' ', '-'], "");
        match label.as_str() {
            "run" | "running" | "trailrun" | "virtualrun" | "treadmill" => Self::Run,
            "biking" | "cycling" | "ride" | "virtualride" | "ebikeride" | "mountainbikeride"
            | "gravelride" => Self::Cycling,
            "swim" | "swimming" => Self::Swimming,
            "walk" | "walking" | "hike" | "hiking" => Self::Walk,
            "crosstraining" | "workout" | "weighttraining" | "crossfit" | "elliptical" => {
                Self::CrossTraining
            }
            _ => Self::Other,
        }
    }
}

/// A TCX lap's intensity label.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, EnumString)]
pub enum Intensity {
    Active,
    Resting,
}

/// What ended a TCX lap.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, EnumString)]
pub enum TriggerMethod {
    Manual,
    Distance,
    Location,
    Time,
    HeartRate,
}

/// A position in degrees.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// A single sample along an activity.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Trackpoint {
    pub time: Option<DateTime<Utc>>,
    /// Absent for indoor activities.
    pub position: Option<Position>,
    pub altitude: Option<Meters<f64>>,
    /// Cumulative distance from the start of the activity.
    pub distance: Option<Meters<f64>>,
    /// Beats per minute. Zero readings are dropped.
    pub heart_rate: Option<u16>,
    /// Steps or revolutions per minute.
    pub cadence: Option<u16>,
    pub speed: Option<MetersPerSecond<f64>>,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct Lap {
    pub start_time: Option<DateTime<Utc>>,
    pub total_time: Seconds<f64>,
    pub distance: Meters<f64>,
    pub maximum_speed: Option<MetersPerSecond<f64>>,
    pub calories: u32,
    pub average_heart_rate: Option<u16>,
    pub maximum_heart_rate: Option<u16>,
    pub cadence: Option<u16>,
    pub intensity: Option<Intensity>,
    pub trigger_method: Option<TriggerMethod>,
    pub trackpoints: Vec<Trackpoint>,
}

/// Summary statistics derived from an activity's laps and trackpoints.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct ActivityStats {
    /// Sum of lap times.
    pub total_time: Seconds<f64>,
    /// Sum of lap distances.
    pub distance: Meters<f64>,
    /// Sum of lap calories.
    pub calories: u32,
    /// Mean of the laps reporting an average heart rate.
    pub average_heart_rate: Option<f64>,
    pub maximum_heart_rate: Option<u16>,
    /// Mean of the laps reporting a cadence.
    pub average_cadence: Option<f64>,
    /// Distance over time, zero when no time was recorded.
    pub average_speed: MetersPerSecond<f64>,
    pub average_pace: Option<SecondsPerKilometer<u32>>,
    /// Pace at the highest instantaneous trackpoint speed.
    pub best_pace: Option<SecondsPerKilometer<u32>>,
    pub elevation_gain: Option<Meters<f64>>,
    pub elevation_loss: Option<Meters<f64>>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn rounded_pace(speed: MetersPerSecond<f64>) -> Option<SecondsPerKilometer<u32>> {
    speed
        .to_pace()
        .and_then(|pace| SecondsPerKilometer(pace.0.round()).cast::<u32>())
}

/// Accumulated climb and descent between consecutive known altitudes.
///
/// Samples without an altitude are skipped without resetting the previous
/// altitude.
pub fn elevation_change<'a>(
    trackpoints: impl IntoIterator<Item = &'a Trackpoint>,
) -> (Meters<f64>, Meters<f64>) {
    let mut gain = Meters(0.0);
    let mut loss = Meters(0.0);
    let mut previous: Option<Meters<f64>> = None;
    for altitude in trackpoints.into_iter().filter_map(|p| p.altitude) {
        if let Some(prev) = previous {
            let delta = altitude - prev;
            if delta.0 > 0.0 {
                gain += delta;
            } else {
                loss += Meters(-delta.0);
            }
        }
        previous = Some(altitude);
    }
    (gain, loss)
}

impl ActivityStats {
    pub fn from_laps(laps: &[Lap]) -> Self {
        let total_time = laps.iter().fold(Seconds(0.0), |t, l| t + l.total_time);
        let distance = laps.iter().fold(Meters(0.0), |d, l| d + l.distance);
        let calories = laps.iter().map(|l| l.calories).fold(0u32, u32::saturating_add);

        let average_speed = if total_time.0 > 0.0 {
            distance / total_time
        } else {
            MetersPerSecond(0.0)
        };

        let max_speed = laps
            .iter()
            .flat_map(|l| &l.trackpoints)
            .filter_map(|p| p.speed)
            .filter(|s| s.0 > 0.0)
            .fold(None, |best: Option<MetersPerSecond<f64>>, s| match best {
                Some(b) if b.0 >= s.0 => Some(b),
                _ => Some(s),
            });

        let (gain, loss) = elevation_change(laps.iter().flat_map(|l| &l.trackpoints));

        Self {
            total_time,
            distance,
            calories,
            average_heart_rate: mean(
                laps.iter()
                    .filter_map(|l| l.average_heart_rate)
                    .map(f64::from),
            ),
            maximum_heart_rate: laps.iter().filter_map(|l| l.maximum_heart_rate).max(),
            average_cadence: mean(laps.iter().filter_map(|l| l.cadence).map(f64::from)),
            average_speed,
            average_pace: rounded_pace(average_speed),
            best_pace: max_speed.and_then(rounded_pace),
            elevation_gain: (gain.0 > 0.0).then_some(gain),
            elevation_loss: (loss.0 > 0.0).then_some(loss),
        }
    }
}

/// A decoded activity.
#[derive(Clone, PartialEq, Debug)]
pub struct Activity {
    pub sport: ActivitySport,
    /// The source's activity id, normally its start time.
    pub id: String,
    pub notes: Option<String>,
    pub device_name: Option<String>,
    laps: Vec<Lap>,
    stats: ActivityStats,
}

impl Activity {
    /// Builds an activity from its laps, or `None` if there are no laps.
    pub fn new(sport: ActivitySport, id: impl Into<String>, laps: Vec<Lap>) -> Option<Self> {
        if laps.is_empty() {
            return None;
        }
        let stats = ActivityStats::from_laps(&laps);
        Some(Self {
            sport,
            id: id.into(),
            notes: None,
            device_name: None,
            laps,
            stats,
        })
    }

    pub fn laps(&self) -> &[Lap] {
        &self.laps
    }

    pub fn stats(&self) -> &ActivityStats {
        &self.stats
    }

    /// All trackpoints of all laps, in file order.
    pub fn trackpoints(&self) -> impl Iterator<Item = &Trackpoint> {
        self.laps.iter().flat_map(|l| l.trackpoints.iter())
    }

    /// The activity's start: its id when that is a timestamp, else the first
    /// lap's start time.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.id.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| self.laps.first().and_then(|l| l.start_time))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn lap(seconds: f64, meters: f64) -> Lap {
        Lap {
            total_time: Seconds(seconds),
            distance: Meters(meters),
            ..Default::default()
        }
    }

    fn altitude(m: Option<f64>) -> Trackpoint {
        Trackpoint {
            altitude: m.map(Meters),
            ..Default::default()
        }
    }

    #[test]
    fn test_lap_sums() {
        let laps = vec![lap(300.0, 1000.0), lap(280.0, 1000.0), lap(310.0, 1000.0)];
        let stats = ActivityStats::from_laps(&laps);
        assert_eq!(stats.total_time, Seconds(890.0));
        assert_eq!(stats.distance, Meters(3000.0));
        assert_relative_eq!(stats.average_speed, MetersPerSecond(3000.0 / 890.0));
        assert_eq!(stats.average_pace, Some(SecondsPerKilometer(297)));
    }

    #[test]
    fn test_heart_rate_excludes_missing() {
        let mut laps = vec![lap(60.0, 200.0), lap(60.0, 200.0), lap(60.0, 200.0)];
        laps[0].average_heart_rate = Some(150);
        laps[2].average_heart_rate = Some(160);
        laps[0].maximum_heart_rate = Some(171);
        laps[1].maximum_heart_rate = Some(178);
        let stats = ActivityStats::from_laps(&laps);
        assert_eq!(stats.average_heart_rate, Some(155.0));
        assert_eq!(stats.maximum_heart_rate, Some(178));
        assert_eq!(stats.average_cadence, None);
    }

    #[test]
    fn test_elevation_skips_gaps() {
        let points = [
            altitude(Some(100.0)),
            altitude(None),
            altitude(Some(105.0)),
            altitude(Some(95.0)),
        ];
        let (gain, loss) = elevation_change(&points);
        assert_eq!(gain, Meters(5.0));
        assert_eq!(loss, Meters(10.0));
    }

    #[test]
    fn test_elevation_across_laps() {
        let mut first = lap(60.0, 100.0);
        first.trackpoints = vec![altitude(Some(10.0)), altitude(Some(12.0))];
        let mut second = lap(60.0, 100.0);
        second.trackpoints = vec![altitude(None), altitude(Some(9.0))];
        let stats = ActivityStats::from_laps(&[first, second]);
        assert_eq!(stats.elevation_gain, Some(Meters(2.0)));
        assert_eq!(stats.elevation_loss, Some(Meters(3.0)));
    }

    #[test]
    fn test_flat_activity_has_no_elevation() {
        let mut only = lap(60.0, 100.0);
        only.trackpoints = vec![altitude(Some(10.0)), altitude(Some(10.0))];
        let stats = ActivityStats::from_laps(&[only]);
        assert_eq!(stats.elevation_gain, None);
        assert_eq!(stats.elevation_loss, None);
    }

    #[test]
    fn test_best_pace() {
        let mut first = lap(60.0, 100.0);
        first.trackpoints = vec![
            Trackpoint {
                speed: Some(MetersPerSecond(3.0)),
                ..Default::default()
            },
            Trackpoint {
                speed: Some(MetersPerSecond(-1.0)),
                ..Default::default()
            },
        ];
        let mut second = lap(60.0, 100.0);
        second.trackpoints = vec![Trackpoint {
            speed: Some(MetersPerSecond(4.0)),
            ..Default::default()
        }];
        let stats = ActivityStats::from_laps(&[first, second]);
        assert_eq!(stats.best_pace, Some(SecondsPerKilometer(250)));
    }

    #[test]
    fn test_zero_time() {
        let stats = ActivityStats::from_laps(&[lap(0.0, 0.0)]);
        assert_eq!(stats.average_speed, MetersPerSecond(0.0));
        assert_eq!(stats.average_pace, None);
        assert_eq!(stats.best_pace, None);
    }

    #[test]
    fn test_activity_requires_laps() {
        assert!(Activity::new(ActivitySport::Run, "x", vec![]).is_none());
        let activity =
            Activity::new(ActivitySport::Run, "2024-03-01T07:00:00Z", vec![lap(1.0, 1.0)]);
        assert_eq!(
            activity.and_then(|a| a.start_time()).map(|t| t.timestamp()),
            Some(1_709_276_400)
        );
    }

    #[test]
    fn test_classify_sport() {
        assert_eq!(ActivitySport::classify("Running"), ActivitySport::Run);
        assert_eq!(ActivitySport::classify("Biking"), ActivitySport::Cycling);
        assert_eq!(ActivitySport::classify("VirtualRide"), ActivitySport::Cycling);
        assert_eq!(ActivitySport::classify("Weight Training"), ActivitySport::CrossTraining);
        assert_eq!(ActivitySport::classify("Other"), ActivitySport::Other);
        assert_eq!(ActivitySport::CrossTraining.to_string(), "cross_training");
    }
}
