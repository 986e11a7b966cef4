//! A library and CLI tool for converting between wearable activity formats.
//!
//! Decodes Garmin Training Center XML (TCX) activities into a canonical
//! activity model with lap and activity summary statistics, and encodes
//! structured workouts as binary FIT workout files that can be loaded onto a
//! Garmin watch.
//!
//! See [`decode_tcx`] and [`encode_workout`], which are used by the CLI, for
//! the main entry points into the library.
//!
//! Both directions are pure transformations: they do no I/O beyond the reader
//! they're given, hold no shared state, and produce identical output for
//! identical input, so they can be called concurrently from any number of
//! threads.
//!
//! # Feature flags
//!
//! - `cli` enables the additional dependencies needed by the CLI
//! - `rayon` lets the CLI decode multiple input files in parallel

pub mod activity;
pub mod canonical;
pub mod fit;
pub mod measure;
pub mod records;
pub mod tcx;
#[cfg(test)]
mod testonly;
pub mod workout;
pub mod writer;

use std::io::BufRead;

use thiserror::Error;
use tracing::debug;

pub use crate::activity::{Activity, ActivitySport, ActivityStats, Lap, Trackpoint};
pub use crate::canonical::{CanonicalActivity, StravaActivity};
pub use crate::fit::{FitEncodeError, FitWorkoutOptions, Sport, SubSport, WorkoutFile};
pub use crate::tcx::{TcxError, TcxReader, XmlError};
pub use crate::workout::{Workout, WorkoutError, plan_steps, workout_filename};

#[derive(Error, Debug)]
pub enum TcxFitError {
    #[error("TCX decoding error")]
    Tcx(#[from] TcxError),
    #[error("Workout description error")]
    Workout(#[from] WorkoutError),
    #[error("FIT encoding error")]
    FitEncode(#[from] FitEncodeError),
}

pub type Result<T> = std::result::Result<T, TcxFitError>;

/// Decode every activity in a TCX document.
///
/// The result is never empty. The `BufRead` bound is required internally by
/// quick_xml.
pub fn decode_tcx_activities<R: BufRead>(tcx_input: R) -> Result<Vec<Activity>> {
    Ok(TcxReader::from_reader(tcx_input).read_activities()?)
}

/// Decode the first activity in a TCX document.
///
/// TCX files exported by devices and services hold a single activity; use
/// [`decode_tcx_activities`] for documents that may hold more.
pub fn decode_tcx<R: BufRead>(tcx_input: R) -> Result<Activity> {
    let activities = decode_tcx_activities(tcx_input)?;
    if activities.len() > 1 {
        debug!(
            "Document has {} activities; returning the first",
            activities.len()
        );
    }
    // read_activities never returns an empty list
    activities
        .into_iter()
        .next()
        .ok_or(TcxFitError::Tcx(TcxError::NoActivitiesFound))
}

/// Encode a workout as a complete FIT workout file.
///
/// Never fails: defects in the workout degrade to open steps.
pub fn encode_workout(workout: &Workout, options: FitWorkoutOptions) -> Vec<u8> {
    WorkoutFile::new(workout, options).to_bytes()
}

/// Parse a JSON workout description and encode it as a FIT workout file.
pub fn encode_workout_json(json: &str, options: FitWorkoutOptions) -> Result<Vec<u8>> {
    let workout = Workout::from_json(json)?;
    Ok(encode_workout(&workout, options))
}
