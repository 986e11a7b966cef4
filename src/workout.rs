//! Structured workout descriptions
//!
//! A [`Workout`] carries an optional tree of [`Segment`]s: plain steps
//! (warmup, interval, recovery, ...) and repeat blocks containing further
//! segments. Workouts usually arrive as JSON authored elsewhere, so
//! [`RawWorkout`] accepts a loose shape and coerces it into the typed tree.
//! Defects in the description (missing durations, unknown target kinds, empty
//! repeat blocks) degrade to open steps instead of failing. The only thing
//! rejected at this boundary is repeat nesting deeper than
//! [`MAX_REPEAT_DEPTH`].
//!
//! [`plan_steps`] flattens a workout into the ordered sequence of steps that
//! the FIT encoder writes.

use serde::Deserialize;
use serde_json::Value;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, warn};

use crate::measure::{Kilometers, Meters, Minutes, Seconds, SecondsPerKilometer};

/// Maximum depth of nested repeat blocks accepted from a description.
pub const MAX_REPEAT_DEPTH: usize = 8;

/// Maximum number of steps in a plan.
///
/// FIT step indices are 16-bit and 0xFFFF is the invalid sentinel.
pub const MAX_STEPS: usize = u16::MAX as usize;

#[derive(Error, Debug)]
pub enum WorkoutError {
    #[error("Workout description is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("Repeat blocks are nested deeper than {MAX_REPEAT_DEPTH} levels")]
    NestingTooDeep,
}

type Result<T> = std::result::Result<T, WorkoutError>;

/// The role a step plays in a workout.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StepKind {
    #[strum(serialize = "warmup", serialize = "warm_up")]
    Warmup,
    Interval,
    Recovery,
    #[strum(serialize = "cooldown", serialize = "cool_down")]
    Cooldown,
    Steady,
    Rest,
}

impl StepKind {
    /// A short label suitable for a device's step list.
    pub fn label(self) -> &'static str {
        match self {
            Self::Warmup => "Warm up",
            Self::Interval => "Interval",
            Self::Recovery => "Recovery",
            Self::Cooldown => "Cool down",
            Self::Steady => "Steady",
            Self::Rest => "Rest",
        }
    }
}

/// How long a step lasts.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum StepDuration {
    Time(Seconds<f64>),
    Distance(Meters<f64>),
    /// Until the athlete presses lap.
    Open,
}

impl StepDuration {
    /// A time duration, or `Open` if `seconds` isn't a positive finite value.
    pub fn time(seconds: f64) -> Self {
        if seconds.is_finite() && seconds > 0.0 {
            Self::Time(Seconds(seconds))
        } else {
            Self::Open
        }
    }

    /// A distance duration, or `Open` if `meters` isn't a positive finite
    /// value.
    pub fn distance(meters: f64) -> Self {
        if meters.is_finite() && meters > 0.0 {
            Self::Distance(Meters(meters))
        } else {
            Self::Open
        }
    }
}

/// A pace range in seconds per kilometer.
///
/// The bounds are ordered on construction, so `fastest` is never slower than
/// `slowest` regardless of the order they were supplied in.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PaceRange {
    fastest: SecondsPerKilometer<f64>,
    slowest: SecondsPerKilometer<f64>,
}

impl PaceRange {
    /// Returns `None` unless both bounds are positive and finite.
    pub fn new(a: SecondsPerKilometer<f64>, b: SecondsPerKilometer<f64>) -> Option<Self> {
        let valid = |p: SecondsPerKilometer<f64>| p.0.is_finite() && p.0 > 0.0;
        if !valid(a) || !valid(b) {
            return None;
        }
        if a.0 > b.0 {
            debug!("Pace bounds given slowest first; reordering {a} / {b}");
            Some(Self {
                fastest: b,
                slowest: a,
            })
        } else {
            Some(Self {
                fastest: a,
                slowest: b,
            })
        }
    }

    pub fn fastest(&self) -> SecondsPerKilometer<f64> {
        self.fastest
    }

    pub fn slowest(&self) -> SecondsPerKilometer<f64> {
        self.slowest
    }
}

/// A heart rate training zone, 1 through 5.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeartRateZone(u8);

impl HeartRateZone {
    pub fn new(zone: u8) -> Option<Self> {
        (1..=5).contains(&zone).then_some(Self(zone))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// The zone's bounds as percentages of maximum heart rate.
    pub fn percent_of_max(self) -> (u8, u8) {
        match self.0 {
            1 => (50, 60),
            2 => (60, 70),
            3 => (70, 80),
            4 => (80, 90),
            _ => (90, 100),
        }
    }
}

/// What the athlete should aim for during a step.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum StepTarget {
    Pace(PaceRange),
    HeartRateZone(HeartRateZone),
    Open,
}

/// A single instructed step.
#[derive(Clone, PartialEq, Debug)]
pub struct Step {
    pub kind: StepKind,
    pub duration: StepDuration,
    pub target: StepTarget,
    /// Free-text coaching note.
    pub note: Option<String>,
}

impl Step {
    pub fn new(kind: StepKind, duration: StepDuration, target: StepTarget) -> Self {
        Self {
            kind,
            duration,
            target,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A block of segments performed `count` times.
#[derive(Clone, PartialEq, Debug)]
pub struct Repeat {
    count: u32,
    children: Vec<Segment>,
}

impl Repeat {
    /// Creates a repeat block.
    ///
    /// A `count` of zero is raised to one. Returns `None` for a block without
    /// children, which has nothing to repeat.
    pub fn new(count: u32, children: Vec<Segment>) -> Option<Self> {
        if children.is_empty() {
            return None;
        }
        Some(Self {
            count: count.max(1),
            children,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn children(&self) -> &[Segment] {
        &self.children
    }
}

/// A node of a workout's segment tree.
#[derive(Clone, PartialEq, Debug)]
pub enum Segment {
    Step(Step),
    Repeat(Repeat),
}

impl Segment {
    /// Depth of repeat nesting beneath and including this segment.
    pub fn repeat_depth(&self) -> usize {
        match self {
            Self::Step(_) => 0,
            Self::Repeat(r) => 1 + r.children.iter().map(Self::repeat_depth).max().unwrap_or(0),
        }
    }
}

/// A workout as stored by the application.
#[derive(Clone, PartialEq, Debug)]
pub struct Workout {
    pub title: String,
    /// Passed through untouched; the encoder doesn't interpret it.
    pub workout_type: String,
    /// The authored segment tree, if any.
    pub structure: Option<Vec<Segment>>,
    pub target_duration: Option<Minutes<f64>>,
    pub target_distance: Option<Kilometers<f64>>,
}

impl Workout {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            workout_type: String::new(),
            structure: None,
            target_duration: None,
            target_distance: None,
        }
    }

    pub fn with_structure(mut self, segments: Vec<Segment>) -> Self {
        self.structure = Some(segments);
        self
    }

    pub fn with_target_duration(mut self, duration: Minutes<f64>) -> Self {
        self.target_duration = Some(duration);
        self
    }

    /// Parses a JSON workout description. See [`RawWorkout`].
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawWorkout = serde_json::from_str(json)?;
        raw.into_workout()
    }
}

/// A workout description as it arrives from outside the codec.
///
/// Every field is optional, and numbers may be given as JSON numbers or
/// numeric strings.
#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct RawWorkout {
    pub title: String,
    pub workout_type: String,
    pub structure: Option<RawStructure>,
    pub target_duration_minutes: Option<Value>,
    pub target_distance_km: Option<Value>,
}

/// A segment list, either bare or wrapped in an object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum RawStructure {
    Segments(Vec<RawSegment>),
    Wrapped { segments: Vec<RawSegment> },
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct RawSegment {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub duration: Option<RawDuration>,
    pub target: Option<RawTarget>,
    pub repeat_count: Option<Value>,
    #[serde(alias = "children", alias = "steps")]
    pub segments: Vec<RawSegment>,
    #[serde(alias = "note")]
    pub notes: Option<String>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct RawDuration {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub value: Option<Value>,
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
pub struct RawTarget {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(alias = "min")]
    pub low: Option<Value>,
    #[serde(alias = "max")]
    pub high: Option<Value>,
    pub zone: Option<Value>,
}

/// Reads a JSON number or numeric string.
fn number(value: &Option<Value>) -> Option<f64> {
    let n = match value.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

impl RawWorkout {
    /// Coerces the description into a [`Workout`].
    pub fn into_workout(self) -> Result<Workout> {
        let structure = match self.structure {
            None => None,
            Some(RawStructure::Segments(segments)) | Some(RawStructure::Wrapped { segments }) => {
                if segments.iter().any(|s| s.repeat_depth() > MAX_REPEAT_DEPTH) {
                    return Err(WorkoutError::NestingTooDeep);
                }
                Some(
                    segments
                        .into_iter()
                        .filter_map(RawSegment::into_segment)
                        .collect(),
                )
            }
        };

        Ok(Workout {
            title: self.title,
            workout_type: self.workout_type,
            structure,
            target_duration: number(&self.target_duration_minutes)
                .filter(|m| *m > 0.0)
                .map(Minutes),
            target_distance: number(&self.target_distance_km)
                .filter(|km| *km > 0.0)
                .map(Kilometers),
        })
    }
}

impl RawSegment {
    fn repeat_depth(&self) -> usize {
        let nested = self.segments.iter().map(Self::repeat_depth).max().unwrap_or(0);
        if self.is_repeat() { 1 + nested } else { nested }
    }

    fn is_repeat(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.eq_ignore_ascii_case("repeat"))
    }

    fn into_segment(self) -> Option<Segment> {
        if self.is_repeat() {
            let count = number(&self.repeat_count)
                .map(|c| c.floor().clamp(0.0, u32::MAX as f64) as u32)
                .unwrap_or(1);
            let children: Vec<Segment> = self
                .segments
                .into_iter()
                .filter_map(RawSegment::into_segment)
                .collect();
            let repeat = Repeat::new(count, children);
            if repeat.is_none() {
                warn!("Dropping repeat block without any steps");
            }
            return repeat.map(Segment::Repeat);
        }

        let kind = match self.kind.as_deref() {
            Some(k) => k.parse::<StepKind>().unwrap_or_else(|_| {
                debug!("Unknown segment type {k:?}, treating as steady");
                StepKind::Steady
            }),
            None => StepKind::Steady,
        };

        Some(Segment::Step(Step {
            kind,
            duration: self
                .duration
                .map(RawDuration::into_duration)
                .unwrap_or(StepDuration::Open),
            target: self
                .target
                .map(RawTarget::into_target)
                .unwrap_or(StepTarget::Open),
            note: self.notes.filter(|n| !n.trim().is_empty()),
        }))
    }
}

impl RawDuration {
    fn into_duration(self) -> StepDuration {
        let value = number(&self.value).unwrap_or(0.0);
        match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("time" | "time_seconds" | "seconds") => StepDuration::time(value),
            Some("distance" | "distance_meters" | "meters") => StepDuration::distance(value),
            _ => StepDuration::Open,
        }
    }
}

impl RawTarget {
    fn into_target(self) -> StepTarget {
        match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("pace" | "pace_range") => {
                match (number(&self.low), number(&self.high)) {
                    (Some(low), Some(high)) => {
                        PaceRange::new(SecondsPerKilometer(low), SecondsPerKilometer(high))
                            .map(StepTarget::Pace)
                            .unwrap_or(StepTarget::Open)
                    }
                    _ => StepTarget::Open,
                }
            }
            Some("heart_rate" | "heart_rate_zone" | "hr_zone") => number(&self.zone)
                .filter(|z| z.fract() == 0.0 && (1.0..=5.0).contains(z))
                .and_then(|z| HeartRateZone::new(z as u8))
                .map(StepTarget::HeartRateZone)
                .unwrap_or(StepTarget::Open),
            _ => StepTarget::Open,
        }
    }
}

/// One entry of a flattened workout.
#[derive(Clone, PartialEq, Debug)]
pub enum PlannedStep {
    Step(Step),
    /// Loop back to the step at `from_index`, `count` times.
    RepeatUntil { from_index: usize, count: u32 },
}

struct StepPlanner {
    steps: Vec<PlannedStep>,
    truncated: bool,
}

impl StepPlanner {
    fn push(&mut self, step: PlannedStep) {
        if self.steps.len() >= MAX_STEPS {
            self.truncated = true;
        } else {
            self.steps.push(step);
        }
    }

    fn walk(&mut self, segments: &[Segment]) {
        for segment in segments {
            if self.truncated {
                return;
            }
            match segment {
                Segment::Step(step) => self.push(PlannedStep::Step(step.clone())),
                Segment::Repeat(repeat) => {
                    let from_index = self.steps.len();
                    for _ in 0..repeat.count() {
                        if self.truncated {
                            break;
                        }
                        self.walk(repeat.children());
                    }
                    if !self.truncated {
                        self.push(PlannedStep::RepeatUntil {
                            from_index,
                            count: repeat.count(),
                        });
                    }
                }
            }
        }
    }
}

/// Flattens a workout into the ordered steps written to a FIT file.
///
/// Steps are numbered depth-first. Each repeat block writes its children
/// `count` times over, followed by a loop-control step that refers back to the
/// index of the block's first step. A workout without any segments gets a
/// warmup / main set / cooldown split of its target duration (10% / 80% / 10%)
/// so that the exported file is always playable.
pub fn plan_steps(workout: &Workout) -> Vec<PlannedStep> {
    let segments = workout.structure.as_deref().unwrap_or_default();
    if segments.is_empty() {
        debug!("Workout has no segments; using the default three-step plan");
        return default_plan(workout.target_duration);
    }

    let mut planner = StepPlanner {
        steps: Vec::new(),
        truncated: false,
    };
    planner.walk(segments);
    if planner.truncated {
        warn!("Workout plan truncated at {MAX_STEPS} steps");
    }
    debug!("Planned {} workout steps", planner.steps.len());
    planner.steps
}

fn default_plan(target_duration: Option<Minutes<f64>>) -> Vec<PlannedStep> {
    let total = target_duration.map(|m| Seconds::from(m).0).unwrap_or(0.0);
    [
        (StepKind::Warmup, 0.1),
        (StepKind::Steady, 0.8),
        (StepKind::Cooldown, 0.1),
    ]
    .into_iter()
    .map(|(kind, share)| {
        PlannedStep::Step(Step::new(
            kind,
            StepDuration::time(total * share),
            StepTarget::Open,
        ))
    })
    .collect()
}

/// Suggested download filename for a workout: `<slug>.fit`.
pub fn workout_filename(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "workout.fit".to_owned()
    } else {
        format!("{slug}.fit")
    }
}
