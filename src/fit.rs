//! FIT workout encoding
//!
//! Messages are written through a [`MessageEncoder`], which emits each local
//! message type's definition the first time a message of that type is
//! written. The message layouts follow the FIT global profile.

use std::io::Write;

use chrono::{DateTime, TimeZone, Utc};
use strum::EnumString;
use thiserror::Error;
use tracing::debug;

use crate::measure::{
    Centimeters, Milliseconds, MillimetersPerSecond, Seconds, SecondsPerKilometer,
};
use crate::workout::{
    PaceRange, PlannedStep, Step, StepDuration, StepKind, StepTarget, Workout, plan_steps,
};
use crate::writer::FitWriter;

pub use crate::writer::PROFILE_VERSION;

/// An error when writing an encoded FIT file
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FitEncodeError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, FitEncodeError>;

/// Seconds between the Unix epoch and the Garmin epoch of
/// 1989-12-31T00:00:00Z.
const GARMIN_EPOCH_OFFSET: i64 = 631_065_600;

// The minimum value of a date_time as per the FIT global profile.  Values lower
// than this are to be interpreted as relative offsets rather than absolute
// times since the Garmin epoch.
const GARMIN_DATE_TIME_MIN: u32 = 0x10000000;

const INVALID_UINT32: u32 = u32::MAX;

/// A date_time value as represented in a FIT file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitDateTime {
    value: u32,
}

impl FitDateTime {
    pub fn value(self) -> u32 {
        self.value
    }
}

impl From<DateTime<Utc>> for FitDateTime {
    /// Times before 1998 can't be written as absolute FIT timestamps, and map
    /// to the invalid sentinel.
    fn from(value: DateTime<Utc>) -> Self {
        let value = u32::try_from(value.timestamp() - GARMIN_EPOCH_OFFSET)
            .ok()
            .filter(|ts| *ts >= GARMIN_DATE_TIME_MIN)
            .unwrap_or(INVALID_UINT32);
        Self { value }
    }
}

/// FIT base types used by the workout profile
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseType {
    Enum = 0x00,
    String = 0x07,
    UInt16 = 0x84,
    UInt32 = 0x86,
    UInt32z = 0x8C,
}

/// One field of a definition message.
#[derive(Clone, Copy, Debug)]
pub struct FieldDefinition {
    field_number: u8,
    size: u8,
    base_type: BaseType,
}

impl FieldDefinition {
    pub const fn new(field_number: u8, size: u8, base_type: BaseType) -> Self {
        Self {
            field_number,
            size,
            base_type,
        }
    }

    fn encode(&self, w: &mut FitWriter) {
        w.write_byte(self.field_number);
        w.write_byte(self.size);
        w.write_byte(self.base_type as u8);
    }
}

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalMessage {
    FileId = 0u16,
    Workout = 26u16,
    WorkoutStep = 27u16,
}

/// A 4-bit local message type, 0 through 15.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalMessageType(u8);

impl LocalMessageType {
    pub const fn new(value: u8) -> Option<Self> {
        if value < 16 { Some(Self(value)) } else { None }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    fn definition_header(self) -> u8 {
        0b01000000 | self.0
    }

    fn data_header(self) -> u8 {
        self.0
    }
}

const LOCAL_FILE_ID: LocalMessageType = LocalMessageType(0);
const LOCAL_WORKOUT: LocalMessageType = LocalMessageType(1);
const LOCAL_WORKOUT_STEP: LocalMessageType = LocalMessageType(2);

pub struct DefinitionFrame {
    global_message: GlobalMessage,
    local_message_type: LocalMessageType,
    field_definitions: &'static [FieldDefinition],
}

impl DefinitionFrame {
    pub fn new(
        global_message: GlobalMessage,
        local_message_type: LocalMessageType,
        field_definitions: &'static [FieldDefinition],
    ) -> Self {
        Self {
            global_message,
            local_message_type,
            field_definitions,
        }
    }

    fn encode(&self, w: &mut FitWriter) {
        w.write_byte(self.local_message_type.definition_header());
        w.write_byte(0x00); // reserved
        w.write_byte(0x00); // architecture = little endian
        w.write_u16_le(self.global_message as u16);
        // Message field tables are static and far below 255 entries.
        w.write_byte(self.field_definitions.len() as u8);

        for def in self.field_definitions {
            def.encode(w);
        }
        debug!(
            "Wrote definition frame for {:?} with local type {}",
            self.global_message, self.local_message_type.0
        );
    }
}

/// A FIT data message with a fixed layout.
pub trait FitMessage {
    const GLOBAL_MESSAGE: GlobalMessage;
    const LOCAL_MESSAGE_TYPE: LocalMessageType;
    const FIELDS: &'static [FieldDefinition];

    /// Writes field values in the order and widths given by `FIELDS`.
    fn encode_fields(&self, w: &mut FitWriter);
}

/// Writes definition and data messages, defining each local message type once.
pub struct MessageEncoder {
    writer: FitWriter,
    defined: [Option<GlobalMessage>; 16],
}

#[allow(clippy::new_without_default)]
impl MessageEncoder {
    pub fn new() -> Self {
        Self {
            writer: FitWriter::new(),
            defined: [None; 16],
        }
    }

    /// Writes a data message, preceded by its definition if this is the first
    /// message of its local type.
    ///
    /// # Panics
    ///
    /// If the message's local type already carries a different global message.
    pub fn write<M: FitMessage>(&mut self, message: &M) {
        let slot = M::LOCAL_MESSAGE_TYPE.0 as usize;
        match self.defined[slot] {
            None => {
                DefinitionFrame::new(M::GLOBAL_MESSAGE, M::LOCAL_MESSAGE_TYPE, M::FIELDS)
                    .encode(&mut self.writer);
                self.defined[slot] = Some(M::GLOBAL_MESSAGE);
            }
            Some(global) if global == M::GLOBAL_MESSAGE => {}
            Some(global) => panic!(
                "local message type {} is already defined as {:?}, not {:?}",
                slot,
                global,
                M::GLOBAL_MESSAGE
            ),
        }

        self.writer.write_byte(M::LOCAL_MESSAGE_TYPE.data_header());
        let start = self.writer.position();
        message.encode_fields(&mut self.writer);
        debug_assert_eq!(
            self.writer.position() - start,
            M::FIELDS.iter().map(|f| f.size as usize).sum::<usize>()
        );
    }

    /// Finalize the file. See [`FitWriter::finish`].
    pub fn finish(self) -> Vec<u8> {
        self.writer.finish()
    }
}

/// Sport types
///
/// Names and numeric values manually copied from Profile.xlsx in FIT SDK
/// 21.171.00.
#[repr(u8)]
#[cfg_attr(feature = "cli", derive(strum::Display, clap::ValueEnum))]
#[derive(Clone, Copy, PartialEq, EnumString, Debug)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "cli", clap(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum Sport {
    Generic = 0u8,
    Running = 1u8,
    Cycling = 2u8,
    FitnessEquipment = 4u8,
    Swimming = 5u8,
    Training = 10u8,
    Walking = 11u8,
    CrossCountrySkiing = 12u8,
    Rowing = 15u8,
    Hiking = 17u8,
}

/// Sub-sport types, restricted to those relevant to workouts
#[repr(u8)]
#[cfg_attr(feature = "cli", derive(strum::Display, clap::ValueEnum))]
#[derive(Clone, Copy, PartialEq, EnumString, Debug)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "cli", clap(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum SubSport {
    Generic = 0u8,
    Treadmill = 1u8,
    Street = 2u8,
    Trail = 3u8,
    Track = 4u8,
    Spin = 5u8,
    IndoorCycling = 6u8,
    Road = 7u8,
    Mountain = 8u8,
    IndoorRowing = 14u8,
    LapSwimming = 17u8,
    OpenWater = 18u8,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug)]
enum FileType {
    Workout = 5,
}

#[repr(u16)]
#[derive(Clone, Copy, Debug)]
enum FileManufacturer {
    Development = 255,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DurationType {
    Time = 0,
    Distance = 1,
    Open = 5,
    RepeatUntilStepsCmplt = 6,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TargetType {
    Speed = 0,
    HeartRate = 1,
    Open = 2,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepIntensity {
    Active = 0,
    Rest = 1,
    Warmup = 2,
    Cooldown = 3,
    Recovery = 4,
    Interval = 5,
}

impl From<StepKind> for StepIntensity {
    fn from(kind: StepKind) -> Self {
        match kind {
            StepKind::Warmup => Self::Warmup,
            StepKind::Interval => Self::Interval,
            StepKind::Recovery => Self::Recovery,
            StepKind::Cooldown => Self::Cooldown,
            StepKind::Rest => Self::Rest,
            StepKind::Steady => Self::Active,
        }
    }
}

/// Heart rate zone bounds are written as percent of max HR plus 100. The FIT
/// profile reads custom values up to 100 as percent of max and larger values
/// as bpm plus 100.
const HEART_RATE_PERCENT_OFFSET: u32 = 100;

const STEP_NAME_SIZE: u8 = 16;
const NOTES_SIZE: u8 = 64;
const WORKOUT_NAME_SIZE: u8 = 64;

struct FileIdMessage {
    time_created: FitDateTime,
    product: u16,
    serial_number: u32,
}

impl FitMessage for FileIdMessage {
    const GLOBAL_MESSAGE: GlobalMessage = GlobalMessage::FileId;
    const LOCAL_MESSAGE_TYPE: LocalMessageType = LOCAL_FILE_ID;
    const FIELDS: &'static [FieldDefinition] = &[
        FieldDefinition::new(0, 1, BaseType::Enum), // type
        FieldDefinition::new(1, 2, BaseType::UInt16), // manufacturer
        FieldDefinition::new(2, 2, BaseType::UInt16), // product
        FieldDefinition::new(3, 4, BaseType::UInt32z), // serial_number
        FieldDefinition::new(4, 4, BaseType::UInt32), // time_created
    ];

    fn encode_fields(&self, w: &mut FitWriter) {
        w.write_byte(FileType::Workout as u8);
        w.write_u16_le(FileManufacturer::Development as u16);
        w.write_u16_le(self.product);
        w.write_u32_le(self.serial_number);
        w.write_u32_le(self.time_created.value);
    }
}

struct WorkoutMessage<'a> {
    name: &'a str,
    sport: Sport,
    sub_sport: SubSport,
    num_valid_steps: u16,
}

impl FitMessage for WorkoutMessage<'_> {
    const GLOBAL_MESSAGE: GlobalMessage = GlobalMessage::Workout;
    const LOCAL_MESSAGE_TYPE: LocalMessageType = LOCAL_WORKOUT;
    const FIELDS: &'static [FieldDefinition] = &[
        FieldDefinition::new(4, 1, BaseType::Enum), // sport
        FieldDefinition::new(11, 1, BaseType::Enum), // sub_sport
        FieldDefinition::new(6, 2, BaseType::UInt16), // num_valid_steps
        FieldDefinition::new(8, WORKOUT_NAME_SIZE, BaseType::String), // wkt_name
    ];

    fn encode_fields(&self, w: &mut FitWriter) {
        w.write_byte(self.sport as u8);
        w.write_byte(self.sub_sport as u8);
        w.write_u16_le(self.num_valid_steps);
        w.write_fixed_string(self.name, WORKOUT_NAME_SIZE as usize);
    }
}

struct WorkoutStepMessage<'a> {
    message_index: u16,
    name: &'a str,
    duration_type: DurationType,
    duration_value: u32,
    target_type: TargetType,
    target_value: u32,
    custom_target_low: u32,
    custom_target_high: u32,
    intensity: StepIntensity,
    notes: &'a str,
}

impl FitMessage for WorkoutStepMessage<'_> {
    const GLOBAL_MESSAGE: GlobalMessage = GlobalMessage::WorkoutStep;
    const LOCAL_MESSAGE_TYPE: LocalMessageType = LOCAL_WORKOUT_STEP;
    const FIELDS: &'static [FieldDefinition] = &[
        FieldDefinition::new(254, 2, BaseType::UInt16), // message_index
        FieldDefinition::new(0, STEP_NAME_SIZE, BaseType::String), // wkt_step_name
        FieldDefinition::new(1, 1, BaseType::Enum), // duration_type
        FieldDefinition::new(2, 4, BaseType::UInt32), // duration_value
        FieldDefinition::new(3, 1, BaseType::Enum), // target_type
        FieldDefinition::new(4, 4, BaseType::UInt32), // target_value
        FieldDefinition::new(5, 4, BaseType::UInt32), // custom_target_value_low
        FieldDefinition::new(6, 4, BaseType::UInt32), // custom_target_value_high
        FieldDefinition::new(7, 1, BaseType::Enum), // intensity
        FieldDefinition::new(8, NOTES_SIZE, BaseType::String), // notes
    ];

    fn encode_fields(&self, w: &mut FitWriter) {
        w.write_u16_le(self.message_index);
        w.write_fixed_string(self.name, STEP_NAME_SIZE as usize);
        w.write_byte(self.duration_type as u8);
        w.write_u32_le(self.duration_value);
        w.write_byte(self.target_type as u8);
        w.write_u32_le(self.target_value);
        w.write_u32_le(self.custom_target_low);
        w.write_u32_le(self.custom_target_high);
        w.write_byte(self.intensity as u8);
        w.write_fixed_string(self.notes, NOTES_SIZE as usize);
    }
}

/// Rounds a non-negative quantity to a u32, or `None` if it can't be
/// represented.
fn round_u32(value: f64) -> Option<u32> {
    if value.is_finite() && value >= 0.0 && value <= u32::MAX as f64 {
        Some(value.round() as u32)
    } else {
        None
    }
}

fn encode_duration(duration: StepDuration) -> (DurationType, u32) {
    let encoded = match duration {
        StepDuration::Time(seconds) => round_u32(Milliseconds::<f64>::from(seconds).0)
            .map(|ms| (DurationType::Time, ms)),
        StepDuration::Distance(meters) => round_u32(Centimeters::<f64>::from(meters).0)
            .map(|cm| (DurationType::Distance, cm)),
        StepDuration::Open => None,
    };
    encoded.unwrap_or((DurationType::Open, 0))
}

/// Speed in FIT's 1/1000 m/s scale for a pace.
fn pace_to_fit_speed(pace: SecondsPerKilometer<f64>) -> Option<u32> {
    pace.to_speed()
        .map(MillimetersPerSecond::<f64>::from)
        .and_then(|speed| round_u32(speed.0))
}

fn encode_pace_target(range: PaceRange) -> Option<(u32, u32)> {
    // FIT speed ranges ascend, so the slower pace is the low bound.
    let low = pace_to_fit_speed(range.slowest())?;
    let high = pace_to_fit_speed(range.fastest())?;
    Some((low, high))
}

/// Returns (target_type, target_value, custom_low, custom_high)
fn encode_target(target: StepTarget) -> (TargetType, u32, u32, u32) {
    match target {
        StepTarget::Pace(range) => match encode_pace_target(range) {
            Some((low, high)) => (TargetType::Speed, 0, low, high),
            None => (TargetType::Open, 0, 0, 0),
        },
        StepTarget::HeartRateZone(zone) => {
            let (low, high) = zone.percent_of_max();
            (
                TargetType::HeartRate,
                0,
                low as u32 + HEART_RATE_PERCENT_OFFSET,
                high as u32 + HEART_RATE_PERCENT_OFFSET,
            )
        }
        StepTarget::Open => (TargetType::Open, 0, 0, 0),
    }
}

fn step_message(message_index: u16, step: &Step) -> WorkoutStepMessage<'_> {
    let (duration_type, duration_value) = encode_duration(step.duration);
    let (target_type, target_value, custom_target_low, custom_target_high) =
        encode_target(step.target);
    WorkoutStepMessage {
        message_index,
        name: step.kind.label(),
        duration_type,
        duration_value,
        target_type,
        target_value,
        custom_target_low,
        custom_target_high,
        intensity: step.kind.into(),
        notes: step.note.as_deref().unwrap_or_default(),
    }
}

fn repeat_message(
    message_index: u16,
    from_index: usize,
    count: u32,
) -> WorkoutStepMessage<'static> {
    WorkoutStepMessage {
        message_index,
        name: "Repeat",
        duration_type: DurationType::RepeatUntilStepsCmplt,
        // Plans are capped well below u32::MAX steps.
        duration_value: from_index as u32,
        target_type: TargetType::Open,
        target_value: count,
        custom_target_low: 0,
        custom_target_high: count,
        intensity: StepIntensity::Active,
        notes: "",
    }
}

/// Options for writing a FIT workout
#[derive(Clone, Debug)]
pub struct FitWorkoutOptions {
    time_created: DateTime<Utc>,
    sport: Sport,
    sub_sport: SubSport,
    product: u16,
    serial_number: u32,
}

impl FitWorkoutOptions {
    /// Set the file's creation time
    ///
    /// An arbitrary, but consistent and reproducible, time will be used if
    /// left unset.
    pub fn with_time_created(mut self, time_created: DateTime<Utc>) -> Self {
        self.time_created = time_created;
        self
    }

    /// Set the workout's sport
    ///
    /// Defaults to `running` if unset.
    pub fn with_sport(mut self, sport: Sport) -> Self {
        self.sport = sport;
        self
    }

    /// Set the workout's sub-sport
    ///
    /// Defaults to `generic` if unset.
    pub fn with_sub_sport(mut self, sub_sport: SubSport) -> Self {
        self.sub_sport = sub_sport;
        self
    }

    /// Set the product number in the `file_id` message. Zero by default.
    pub fn with_product(mut self, product: u16) -> Self {
        self.product = product;
        self
    }

    /// Set the serial number in the `file_id` message
    ///
    /// Zero, FIT's invalid value for this field, by default.
    pub fn with_serial_number(mut self, serial_number: u32) -> Self {
        self.serial_number = serial_number;
        self
    }
}

impl Default for FitWorkoutOptions {
    fn default() -> Self {
        Self {
            time_created: Utc
                .with_ymd_and_hms(2019, 11, 23, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            sport: Sport::Running,
            sub_sport: SubSport::Generic,
            product: 0,
            serial_number: 0,
        }
    }
}

/// A write-only Garmin FIT workout file
pub struct WorkoutFile<'a> {
    workout: &'a Workout,
    options: FitWorkoutOptions,
}

impl<'a> WorkoutFile<'a> {
    pub fn new(workout: &'a Workout, options: FitWorkoutOptions) -> Self {
        Self { workout, options }
    }

    /// Encode the workout file into a new buffer
    #[tracing::instrument(name = "encode_fit", level = "debug", skip_all)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let plan = plan_steps(self.workout);
        // plan_steps caps the plan at u16::MAX steps.
        let num_valid_steps = u16::try_from(plan.len()).unwrap_or(u16::MAX);

        let mut encoder = MessageEncoder::new();
        encoder.write(&FileIdMessage {
            time_created: self.options.time_created.into(),
            product: self.options.product,
            serial_number: self.options.serial_number,
        });

        let name = if self.workout.title.trim().is_empty() {
            "Untitled workout"
        } else {
            self.workout.title.as_str()
        };
        encoder.write(&WorkoutMessage {
            name,
            sport: self.options.sport,
            sub_sport: self.options.sub_sport,
            num_valid_steps,
        });

        for (i, planned) in plan.iter().enumerate() {
            let message_index = u16::try_from(i).unwrap_or(u16::MAX);
            match planned {
                PlannedStep::Step(step) => encoder.write(&step_message(message_index, step)),
                PlannedStep::RepeatUntil { from_index, count } => {
                    encoder.write(&repeat_message(message_index, *from_index, *count))
                }
            }
        }
        debug!("Encoded {} workout step messages", plan.len());

        let bytes = encoder.finish();
        debug!(
            "Encoded workout {:?} ({:.0} planned) into {} bytes",
            name,
            Seconds(planned_seconds(&plan)),
            bytes.len()
        );
        bytes
    }

    /// Encode and write the workout file
    pub fn encode<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&self.to_bytes())?;
        w.flush()?;
        Ok(())
    }
}

/// Sum of the timed steps in a plan.
fn planned_seconds(plan: &[PlannedStep]) -> f64 {
    plan.iter()
        .map(|s| match s {
            PlannedStep::Step(Step {
                duration: StepDuration::Time(t),
                ..
            }) => t.0,
            _ => 0.0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use fitparser::profile::MesgNum;
    use quickcheck_macros::quickcheck;

    use super::{
        BaseType, FieldDefinition, FitDateTime, FitMessage, FitWorkoutOptions, GlobalMessage,
        LocalMessageType, MessageEncoder, WorkoutFile,
    };
    use crate::measure::{Meters, Minutes, SecondsPerKilometer};
    use crate::testonly::{decode, definitions, messages, number, text, timestamp};
    use crate::workout::{
        HeartRateZone, PaceRange, Repeat, Segment, Step, StepDuration, StepKind, StepTarget,
        Workout,
    };
    use crate::writer::{FitWriter, HEADER_SIZE, crc16};

    fn interval_workout() -> Result<Workout> {
        let warmup = Step::new(StepKind::Warmup, StepDuration::time(600.0), StepTarget::Open);
        let pace = PaceRange::new(SecondsPerKilometer(250.0), SecondsPerKilometer(240.0))
            .ok_or_else(|| anyhow::anyhow!("valid pace range"))?;
        let work = Step::new(
            StepKind::Interval,
            StepDuration::distance(1000.0),
            StepTarget::Pace(pace),
        )
        .with_note("Controlled effort");
        let zone = HeartRateZone::new(2).ok_or_else(|| anyhow::anyhow!("valid zone"))?;
        let rest = Step::new(
            StepKind::Recovery,
            StepDuration::time(90.0),
            StepTarget::HeartRateZone(zone),
        );
        let repeat = Repeat::new(4, vec![Segment::Step(work), Segment::Step(rest)])
            .ok_or_else(|| anyhow::anyhow!("valid repeat"))?;
        let cooldown = Step::new(StepKind::Cooldown, StepDuration::Open, StepTarget::Open);
        Ok(Workout::new("4 x 1km").with_structure(vec![
            Segment::Step(warmup),
            Segment::Repeat(repeat),
            Segment::Step(cooldown),
        ]))
    }

    #[test]
    fn test_file_structure() -> Result<()> {
        let workout = interval_workout()?;
        let bytes = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        let records = decode(&bytes)?;

        let data_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(data_size as usize, bytes.len() - HEADER_SIZE - 2);

        // Each local type is defined exactly once.
        assert_eq!(definitions(&bytes), vec![(0, 0), (1, 26), (2, 27)]);

        let kinds: Vec<MesgNum> = records.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds[0], MesgNum::FileId);
        assert_eq!(kinds[1], MesgNum::Workout);
        assert_eq!(kinds.len(), 2 + 11);
        assert!(kinds[2..].iter().all(|k| *k == MesgNum::WorkoutStep));

        let file_id = &records[0];
        assert_eq!(text(file_id, "type"), Some("workout"));
        assert_eq!(text(file_id, "manufacturer"), Some("development"));

        let workout_msg = &records[1];
        assert_eq!(text(workout_msg, "sport"), Some("running"));
        assert_eq!(text(workout_msg, "sub_sport"), Some("generic"));
        assert_eq!(number(workout_msg, "num_valid_steps"), Some(11.0));
        assert_eq!(text(workout_msg, "wkt_name"), Some("4 x 1km"));
        Ok(())
    }

    #[test]
    fn test_step_encoding() -> Result<()> {
        let workout = interval_workout()?;
        let bytes = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        let records = decode(&bytes)?;
        let steps = messages(&records, MesgNum::WorkoutStep);
        assert_eq!(steps.len(), 11);

        for (i, step) in steps.iter().enumerate() {
            assert_eq!(number(step, "message_index"), Some(i as f64));
        }

        // Warmup: 600 s, open target
        let warmup = steps[0];
        assert_eq!(text(warmup, "wkt_step_name"), Some("Warm up"));
        assert_eq!(text(warmup, "duration_type"), Some("time"));
        assert_eq!(number(warmup, "duration_time"), Some(600.0));
        assert_eq!(text(warmup, "target_type"), Some("open"));
        assert_eq!(text(warmup, "intensity"), Some("warmup"));

        // Interval: 1 km, speed target with the slower pace low
        let work = steps[1];
        assert_eq!(text(work, "duration_type"), Some("distance"));
        assert_eq!(number(work, "duration_distance"), Some(1000.0));
        assert_eq!(text(work, "target_type"), Some("speed"));
        let low = number(work, "custom_target_speed_low").unwrap_or_default();
        let high = number(work, "custom_target_speed_high").unwrap_or_default();
        assert_relative_eq!(low, 4.0, epsilon = 1e-9);
        assert_relative_eq!(high, 4.167, epsilon = 1e-9);
        assert_eq!(text(work, "intensity"), Some("interval"));
        assert_eq!(text(work, "notes"), Some("Controlled effort"));

        // Recovery: zone 2 is 60-70% of max, offset by 100
        let rest = steps[2];
        assert_eq!(text(rest, "target_type"), Some("heart_rate"));
        assert_eq!(number(rest, "custom_target_heart_rate_low"), Some(160.0));
        assert_eq!(number(rest, "custom_target_heart_rate_high"), Some(170.0));
        assert_eq!(text(rest, "intensity"), Some("recovery"));

        // Loop control after the four unrolled pairs
        let repeat = steps[9];
        assert_eq!(text(repeat, "duration_type"), Some("repeat_until_steps_cmplt"));
        assert_eq!(number(repeat, "duration_step"), Some(1.0));
        assert_eq!(number(repeat, "repeat_steps"), Some(4.0));
        assert_eq!(number(repeat, "custom_target_value_high"), Some(4.0));

        // Cooldown with an open duration
        let cooldown = steps[10];
        assert_eq!(text(cooldown, "duration_type"), Some("open"));
        assert_eq!(text(cooldown, "intensity"), Some("cooldown"));
        Ok(())
    }

    #[test]
    fn test_nested_repeats() -> Result<()> {
        let stride = Segment::Step(Step::new(
            StepKind::Interval,
            StepDuration::time(20.0),
            StepTarget::Open,
        ));
        let jog = Segment::Step(Step::new(
            StepKind::Recovery,
            StepDuration::time(120.0),
            StepTarget::Open,
        ));
        let inner = Repeat::new(3, vec![stride]).ok_or_else(|| anyhow::anyhow!("valid repeat"))?;
        let outer = Repeat::new(2, vec![Segment::Repeat(inner), jog])
            .ok_or_else(|| anyhow::anyhow!("valid repeat"))?;
        let workout = Workout::new("Stride sets").with_structure(vec![Segment::Repeat(outer)]);

        let bytes = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        let records = decode(&bytes)?;
        let steps = messages(&records, MesgNum::WorkoutStep);

        // Per outer pass: 3 strides, inner loop, jog. Then the outer loop.
        let loops: Vec<(usize, Option<f64>, Option<f64>)> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| text(s, "duration_type") == Some("repeat_until_steps_cmplt"))
            .map(|(i, s)| (i, number(s, "duration_step"), number(s, "repeat_steps")))
            .collect();
        assert_eq!(steps.len(), 2 * 5 + 1);
        assert_eq!(
            loops,
            vec![
                (3, Some(0.0), Some(3.0)),
                (8, Some(5.0), Some(3.0)),
                (10, Some(0.0), Some(2.0)),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_fallback_workout() -> Result<()> {
        let workout = Workout::new("").with_target_duration(Minutes(30.0));
        let bytes = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        let records = decode(&bytes)?;

        let workouts = messages(&records, MesgNum::Workout);
        assert_eq!(text(workouts[0], "wkt_name"), Some("Untitled workout"));

        let steps: Vec<_> = messages(&records, MesgNum::WorkoutStep)
            .into_iter()
            .map(|s| {
                (
                    number(s, "duration_time"),
                    text(s, "target_type"),
                    text(s, "intensity"),
                )
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                (Some(180.0), Some("open"), Some("warmup")),
                (Some(1440.0), Some("open"), Some("active")),
                (Some(180.0), Some("open"), Some("cooldown")),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_deterministic_output() -> Result<()> {
        let workout = interval_workout()?;
        let a = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        let b = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        assert_eq!(a, b);

        let mut streamed = vec![];
        WorkoutFile::new(&workout, FitWorkoutOptions::default()).encode(&mut streamed)?;
        assert_eq!(a, streamed);
        Ok(())
    }

    #[test]
    fn test_time_created() -> Result<()> {
        let t = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("valid time"))?;
        assert_eq!(FitDateTime::from(t).value(), 1_709_294_400 - 631_065_600);

        let early = Utc
            .with_ymd_and_hms(1990, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("valid time"))?;
        assert_eq!(FitDateTime::from(early).value(), u32::MAX);

        let workout = Workout::new("Timed");
        let bytes = WorkoutFile::new(&workout, FitWorkoutOptions::default().with_time_created(t))
            .to_bytes();
        let records = decode(&bytes)?;
        let file_id = messages(&records, MesgNum::FileId);
        assert_eq!(timestamp(file_id[0], "time_created"), Some(1_709_294_400));
        Ok(())
    }

    #[test]
    fn test_out_of_range_duration_is_open() -> Result<()> {
        let step = Step::new(
            StepKind::Steady,
            StepDuration::Distance(Meters(1e12)),
            StepTarget::Open,
        );
        let workout = Workout::new("Far").with_structure(vec![Segment::Step(step)]);
        let bytes = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        let records = decode(&bytes)?;
        let steps = messages(&records, MesgNum::WorkoutStep);
        assert_eq!(text(steps[0], "duration_type"), Some("open"));
        assert_eq!(number(steps[0], "duration_distance"), None);
        Ok(())
    }

    struct Dummy;

    impl FitMessage for Dummy {
        const GLOBAL_MESSAGE: GlobalMessage = GlobalMessage::Workout;
        const LOCAL_MESSAGE_TYPE: LocalMessageType = super::LOCAL_FILE_ID;
        const FIELDS: &'static [FieldDefinition] = &[FieldDefinition::new(4, 1, BaseType::Enum)];

        fn encode_fields(&self, w: &mut FitWriter) {
            w.write_byte(0);
        }
    }

    #[test]
    #[should_panic(expected = "already defined")]
    fn test_conflicting_local_type_panics() {
        let mut encoder = MessageEncoder::new();
        encoder.write(&super::FileIdMessage {
            time_created: FitDateTime { value: 0 },
            product: 0,
            serial_number: 0,
        });
        encoder.write(&Dummy);
    }

    #[test]
    fn test_local_message_type_range() {
        assert!(LocalMessageType::new(15).is_some());
        assert!(LocalMessageType::new(16).is_none());
    }

    #[quickcheck]
    fn qc_encoded_file_is_valid(title: String, minutes: u16, repeats: u8) -> bool {
        let step = Step::new(
            StepKind::Interval,
            StepDuration::time(minutes as f64),
            StepTarget::Open,
        );
        let mut workout = Workout::new(title).with_target_duration(Minutes(minutes as f64));
        if repeats % 2 == 0 {
            if let Some(repeat) = Repeat::new(repeats as u32, vec![Segment::Step(step)]) {
                workout = workout.with_structure(vec![Segment::Repeat(repeat)]);
            }
        }

        let bytes = WorkoutFile::new(&workout, FitWorkoutOptions::default()).to_bytes();
        let n = bytes.len();
        let header_ok = crc16(&bytes[..12]) == u16::from_le_bytes([bytes[12], bytes[13]]);
        let file_ok = crc16(&bytes[..n - 2]) == u16::from_le_bytes([bytes[n - 2], bytes[n - 1]]);
        let size_ok =
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize == n - 14 - 2;
        header_ok && file_ok && size_ok && decode(&bytes).is_ok()
    }
}
