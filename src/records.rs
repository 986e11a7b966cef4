//! Best efforts over standard distances
//!
//! A best effort is the shortest elapsed time over any run of consecutive
//! splits whose combined distance reaches the target. Splits are coarse (laps
//! are typically a kilometer or a mile), so the winning window may overshoot
//! the target distance; its time is reported as recorded, not prorated.

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::activity::Activity;
use crate::measure::{Meters, Seconds, SecondsPerKilometer};

/// One contiguous piece of an activity.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Split {
    pub distance: Meters<f64>,
    pub elapsed: Seconds<f64>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter)]
pub enum StandardDistance {
    #[strum(serialize = "1k")]
    OneKilometer,
    #[strum(serialize = "5k")]
    FiveKilometers,
    #[strum(serialize = "10k")]
    TenKilometers,
    #[strum(serialize = "half marathon")]
    HalfMarathon,
    #[strum(serialize = "marathon")]
    Marathon,
}

impl StandardDistance {
    pub fn meters(self) -> Meters<f64> {
        Meters(match self {
            Self::OneKilometer => 1000.0,
            Self::FiveKilometers => 5000.0,
            Self::TenKilometers => 10_000.0,
            Self::HalfMarathon => 21_097.5,
            Self::Marathon => 42_195.0,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PersonalRecord {
    pub distance: StandardDistance,
    pub time: Seconds<f64>,
    /// Pace over the distance actually covered by the winning window.
    pub pace: Option<SecondsPerKilometer<u32>>,
}

/// The best effort over `target`, or `None` if the splits never cover it.
pub fn best_effort(splits: &[Split], target: Meters<f64>) -> Option<Split> {
    let valid = |s: &&Split| {
        s.distance.0.is_finite()
            && s.distance.0 >= 0.0
            && s.elapsed.0.is_finite()
            && s.elapsed.0 >= 0.0
    };
    let splits: Vec<Split> = splits.iter().filter(valid).copied().collect();
    if target.0.is_nan() || target.0 <= 0.0 {
        return None;
    }

    let mut best: Option<Split> = None;
    let mut window = Split {
        distance: Meters(0.0),
        elapsed: Seconds(0.0),
    };
    let mut left = 0;
    for right in &splits {
        window.distance += right.distance;
        window.elapsed += right.elapsed;

        // Drop leading splits while the window still covers the target.
        while left < splits.len() && (window.distance - splits[left].distance).0 >= target.0 {
            window.distance = window.distance - splits[left].distance;
            window.elapsed = window.elapsed - splits[left].elapsed;
            left += 1;
        }

        if window.distance.0 >= target.0 && best.is_none_or(|b| window.elapsed.0 < b.elapsed.0) {
            best = Some(window);
        }
    }
    best
}

/// Splits from an activity's laps.
pub fn lap_splits(activity: &Activity) -> Vec<Split> {
    activity
        .laps()
        .iter()
        .map(|l| Split {
            distance: l.distance,
            elapsed: l.total_time,
        })
        .collect()
}

/// Best efforts for each standard distance the activity covers.
pub fn personal_records(activity: &Activity) -> Vec<PersonalRecord> {
    let splits = lap_splits(activity);
    StandardDistance::iter()
        .filter_map(|distance| {
            let effort = best_effort(&splits, distance.meters())?;
            let pace = (effort.distance / effort.elapsed)
                .to_pace()
                .and_then(|p| SecondsPerKilometer(p.0.round()).cast::<u32>());
            Some(PersonalRecord {
                distance,
                time: effort.elapsed,
                pace,
            })
        })
        .collect()
}
