//! Canonical activity shape
//!
//! Activities reach the application from two places: decoded TCX uploads and
//! Strava's activity API. Both are mapped into [`CanonicalActivity`], which is
//! what the rest of the application stores and renders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivitySport, Lap, Trackpoint};
use crate::measure::{MetersPerSecond, SecondsPerKilometer};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    Tcx,
    Strava,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTrackpoint {
    pub time: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_meters: Option<f64>,
    pub distance_meters: Option<f64>,
    pub heart_rate_bpm: Option<u16>,
    pub cadence: Option<u16>,
    pub speed: Option<f64>,
}

impl From<&Trackpoint> for CanonicalTrackpoint {
    fn from(p: &Trackpoint) -> Self {
        Self {
            time: p.time,
            latitude: p.position.map(|pos| pos.latitude),
            longitude: p.position.map(|pos| pos.longitude),
            altitude_meters: p.altitude.map(|a| a.0),
            distance_meters: p.distance.map(|d| d.0),
            heart_rate_bpm: p.heart_rate,
            cadence: p.cadence,
            speed: p.speed.map(|s| s.0),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalLap {
    pub start_time: Option<DateTime<Utc>>,
    pub total_time_seconds: f64,
    pub distance_meters: f64,
    pub maximum_speed: Option<f64>,
    pub calories: u32,
    pub average_heart_rate_bpm: Option<u16>,
    pub maximum_heart_rate_bpm: Option<u16>,
    pub cadence: Option<u16>,
    pub intensity: Option<String>,
    pub trigger_method: Option<String>,
}

impl From<&Lap> for CanonicalLap {
    fn from(lap: &Lap) -> Self {
        Self {
            start_time: lap.start_time,
            total_time_seconds: lap.total_time.0,
            distance_meters: lap.distance.0,
            maximum_speed: lap.maximum_speed.map(|s| s.0),
            calories: lap.calories,
            average_heart_rate_bpm: lap.average_heart_rate,
            maximum_heart_rate_bpm: lap.maximum_heart_rate,
            cadence: lap.cadence,
            intensity: lap.intensity.map(|i| i.to_string()),
            trigger_method: lap.trigger_method.map(|t| t.to_string()),
        }
    }
}

/// The single activity shape consumed by the application.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalActivity {
    pub source: ActivitySource,
    pub source_id: String,
    pub name: Option<String>,
    pub sport: ActivitySport,
    pub start_time: Option<DateTime<Utc>>,
    pub total_time_seconds: f64,
    pub distance_meters: f64,
    pub calories: Option<u32>,
    pub average_heart_rate_bpm: Option<f64>,
    pub maximum_heart_rate_bpm: Option<f64>,
    pub average_cadence: Option<f64>,
    pub average_speed: f64,
    pub average_pace_sec_per_km: Option<u32>,
    pub best_pace_sec_per_km: Option<u32>,
    pub elevation_gain_meters: Option<f64>,
    pub elevation_loss_meters: Option<f64>,
    pub device_name: Option<String>,
    pub notes: Option<String>,
    pub laps: Vec<CanonicalLap>,
    pub trackpoints: Vec<CanonicalTrackpoint>,
}

impl From<&Activity> for CanonicalActivity {
    fn from(activity: &Activity) -> Self {
        let stats = activity.stats();
        Self {
            source: ActivitySource::Tcx,
            source_id: activity.id.clone(),
            name: None,
            sport: activity.sport,
            start_time: activity.start_time(),
            total_time_seconds: stats.total_time.0,
            distance_meters: stats.distance.0,
            calories: Some(stats.calories),
            average_heart_rate_bpm: stats.average_heart_rate,
            maximum_heart_rate_bpm: stats.maximum_heart_rate.map(f64::from),
            average_cadence: stats.average_cadence,
            average_speed: stats.average_speed.0,
            average_pace_sec_per_km: stats.average_pace.map(|p| p.0),
            best_pace_sec_per_km: stats.best_pace.map(|p| p.0),
            elevation_gain_meters: stats.elevation_gain.map(|e| e.0),
            elevation_loss_meters: stats.elevation_loss.map(|e| e.0),
            device_name: activity.device_name.clone(),
            notes: activity.notes.clone(),
            laps: activity.laps().iter().map(CanonicalLap::from).collect(),
            trackpoints: activity.trackpoints().map(CanonicalTrackpoint::from).collect(),
        }
    }
}

/// The subset of Strava's `DetailedActivity` payload that we use.
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StravaActivity {
    pub id: u64,
    pub name: String,
    /// Deprecated by Strava in favor of `sport_type`, but still sent.
    #[serde(rename = "type")]
    pub activity_type: Option<String>,
    pub sport_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    /// Meters
    pub distance: f64,
    /// Seconds
    pub moving_time: f64,
    /// Seconds
    pub elapsed_time: f64,
    pub total_elevation_gain: Option<f64>,
    /// Meters per second
    pub average_speed: Option<f64>,
    /// Meters per second
    pub max_speed: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    /// Strides per minute for runs, revolutions per minute for rides.
    pub average_cadence: Option<f64>,
    pub calories: Option<f64>,
    pub device_name: Option<String>,
    pub description: Option<String>,
}

fn pace_of(speed: f64) -> Option<u32> {
    MetersPerSecond(speed)
        .to_pace()
        .and_then(|p| SecondsPerKilometer(p.0.round()).cast::<u32>())
        .map(|p| p.0)
}

impl From<StravaActivity> for CanonicalActivity {
    fn from(s: StravaActivity) -> Self {
        let sport = s
            .sport_type
            .as_deref()
            .or(s.activity_type.as_deref())
            .map(ActivitySport::classify)
            .unwrap_or(ActivitySport::Other);
        let total_time = if s.moving_time > 0.0 {
            s.moving_time
        } else {
            s.elapsed_time
        };
        let average_speed = s
            .average_speed
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or_else(|| {
                if total_time > 0.0 {
                    s.distance / total_time
                } else {
                    0.0
                }
            });
        // Strava reports run cadence per leg.
        let cadence_factor = if sport == ActivitySport::Run { 2.0 } else { 1.0 };
        let positive = |v: Option<f64>| v.filter(|v| v.is_finite() && *v > 0.0);

        Self {
            source: ActivitySource::Strava,
            source_id: s.id.to_string(),
            name: Some(s.name).filter(|n| !n.is_empty()),
            sport,
            start_time: s.start_date,
            total_time_seconds: total_time,
            distance_meters: s.distance,
            calories: positive(s.calories).map(|c| c.round() as u32),
            average_heart_rate_bpm: positive(s.average_heartrate),
            maximum_heart_rate_bpm: positive(s.max_heartrate),
            average_cadence: positive(s.average_cadence).map(|c| c * cadence_factor),
            average_speed,
            average_pace_sec_per_km: pace_of(average_speed),
            best_pace_sec_per_km: positive(s.max_speed).and_then(pace_of),
            elevation_gain_meters: positive(s.total_elevation_gain),
            elevation_loss_meters: None,
            device_name: s.device_name,
            notes: s.description.filter(|d| !d.is_empty()),
            laps: vec![],
            trackpoints: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{ActivitySource, CanonicalActivity, StravaActivity};
    use crate::activity::{Activity, ActivitySport, Lap, Trackpoint};
    use crate::measure::{Meters, MetersPerSecond, Seconds};

    #[test]
    fn test_from_decoded_activity() -> Result<()> {
        let lap = Lap {
            total_time: Seconds(600.0),
            distance: Meters(2000.0),
            calories: 120,
            average_heart_rate: Some(150),
            trackpoints: vec![Trackpoint {
                speed: Some(MetersPerSecond(4.0)),
                ..Default::default()
            }],
            ..Default::default()
        };
        let activity = Activity::new(ActivitySport::Run, "2024-03-01T07:00:00Z", vec![lap])
            .ok_or_else(|| anyhow::anyhow!("activity has a lap"))?;

        let canonical = CanonicalActivity::from(&activity);
        assert_eq!(canonical.source, ActivitySource::Tcx);
        assert_eq!(canonical.total_time_seconds, 600.0);
        assert_eq!(canonical.average_pace_sec_per_km, Some(300));
        assert_eq!(canonical.best_pace_sec_per_km, Some(250));
        assert_eq!(canonical.trackpoints.len(), 1);
        assert_eq!(canonical.start_time.map(|t| t.timestamp()), Some(1_709_276_400));

        let json = serde_json::to_value(&canonical)?;
        assert_eq!(json["sport"], "run");
        assert_eq!(json["totalTimeSeconds"], 600.0);
        assert_eq!(json["averageHeartRateBpm"], 150.0);
        assert_eq!(json["laps"][0]["distanceMeters"], 2000.0);
        Ok(())
    }

    #[test]
    fn test_from_strava_run() -> Result<()> {
        let payload = r#"{
            "id": 12345678987654321,
            "name": "Morning Run",
            "type": "Run",
            "sport_type": "TrailRun",
            "start_date": "2024-03-01T07:00:00Z",
            "distance": 10000.0,
            "moving_time": 2500,
            "elapsed_time": 2600,
            "total_elevation_gain": 120.5,
            "average_speed": 4.0,
            "max_speed": 5.0,
            "average_heartrate": 152.3,
            "max_heartrate": 181.0,
            "average_cadence": 86.0,
            "calories": 701.6,
            "device_name": "Garmin Forerunner 965",
            "athlete": { "id": 1 }
        }"#;
        let strava: StravaActivity = serde_json::from_str(payload)?;
        let canonical = CanonicalActivity::from(strava);
        assert_eq!(canonical.source, ActivitySource::Strava);
        assert_eq!(canonical.source_id, "12345678987654321");
        assert_eq!(canonical.sport, ActivitySport::Run);
        assert_eq!(canonical.total_time_seconds, 2500.0);
        assert_eq!(canonical.average_cadence, Some(172.0));
        assert_eq!(canonical.calories, Some(702));
        assert_eq!(canonical.average_pace_sec_per_km, Some(250));
        assert_eq!(canonical.best_pace_sec_per_km, Some(200));
        assert_eq!(canonical.elevation_gain_meters, Some(120.5));
        assert_eq!(canonical.name.as_deref(), Some("Morning Run"));
        Ok(())
    }

    #[test]
    fn test_from_sparse_strava_ride() -> Result<()> {
        let payload = r#"{ "id": 7, "type": "Ride", "distance": 3000, "elapsed_time": 600,
                           "average_cadence": 85, "average_heartrate": null }"#;
        let strava: StravaActivity = serde_json::from_str(payload)?;
        let canonical = CanonicalActivity::from(strava);
        assert_eq!(canonical.sport, ActivitySport::Cycling);
        assert_eq!(canonical.total_time_seconds, 600.0);
        assert_eq!(canonical.average_speed, 5.0);
        assert_eq!(canonical.average_cadence, Some(85.0));
        assert_eq!(canonical.average_heart_rate_bpm, None);
        assert_eq!(canonical.best_pace_sec_per_km, None);
        assert_eq!(canonical.name, None);
        Ok(())
    }
}
