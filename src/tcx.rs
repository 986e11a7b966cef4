//! TCX activity reader
//!
//! # Usage
//!
//! Reads the activities from a Training Center XML document. Create a
//! [`TcxReader`] with [`TcxReader::from_reader`] and call
//! [`TcxReader::read_activities`].
//!
//! Elements are matched by local name, so documents using a default namespace,
//! prefixed namespaces, or none at all are treated alike. Vendor extension
//! values (`LX` on laps, `TPX` on trackpoints) may appear under several
//! namespace prefixes; the unprefixed element wins, then `ns3:`, then any
//! other prefix.

use std::io::BufRead;
use std::{mem, str};

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;
use tracing::{debug, warn};

use crate::activity::{
    Activity, ActivitySport, Intensity, Lap, Position, Trackpoint, TriggerMethod,
};
use crate::measure::{Meters, MetersPerSecond, Seconds};

/// An error reading a TCX document.
#[derive(Error, Debug)]
pub enum TcxError {
    #[error("Document root is not a TrainingCenterDatabase element")]
    MissingRootElement,
    #[error("Document has no Activities element")]
    MissingActivitiesElement,
    #[error("Document contains no activities")]
    NoActivitiesFound,
    #[error("Document is not well-formed XML")]
    MalformedXml(#[from] XmlError),
}

/// Why a document isn't well-formed.
#[derive(Error, Debug)]
pub enum XmlError {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),
    #[error("UTF-8 decoding error")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Element {0} is not closed")]
    UnclosedElement(String),
    #[error("Undefined entity &{0};")]
    UndefinedEntity(String),
}

impl From<quick_xml::Error> for TcxError {
    fn from(e: quick_xml::Error) -> Self {
        Self::MalformedXml(e.into())
    }
}

impl From<str::Utf8Error> for TcxError {
    fn from(e: str::Utf8Error) -> Self {
        Self::MalformedXml(e.into())
    }
}

impl TcxError {
    /// Whether the document isn't well-formed XML, as opposed to being a
    /// well-formed document without the activity data we need.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedXml(_))
    }
}

type Result<T> = std::result::Result<T, TcxError>;

#[derive(Copy, Clone, PartialEq, Debug)]
enum Tag {
    TrainingCenterDatabase,
    Activities,
    Activity,
    Id,
    Notes,
    Creator,
    Name,
    Lap,
    TotalTimeSeconds,
    DistanceMeters,
    MaximumSpeed,
    Calories,
    AverageHeartRateBpm,
    MaximumHeartRateBpm,
    Value,
    Intensity,
    Cadence,
    TriggerMethod,
    Track,
    Trackpoint,
    Time,
    Position,
    LatitudeDegrees,
    LongitudeDegrees,
    AltitudeMeters,
    HeartRateBpm,
    Extensions,
    Lx,
    Tpx,
    AvgRunCadence,
    RunCadence,
    Speed,
    Unknown,
}

fn get_tag(local_name: &[u8]) -> Tag {
    match local_name {
        b"TrainingCenterDatabase" => Tag::TrainingCenterDatabase,
        b"Activities" => Tag::Activities,
        b"Activity" => Tag::Activity,
        b"Id" => Tag::Id,
        b"Notes" => Tag::Notes,
        b"Creator" => Tag::Creator,
        b"Name" => Tag::Name,
        b"Lap" => Tag::Lap,
        b"TotalTimeSeconds" => Tag::TotalTimeSeconds,
        b"DistanceMeters" => Tag::DistanceMeters,
        b"MaximumSpeed" => Tag::MaximumSpeed,
        b"Calories" => Tag::Calories,
        b"AverageHeartRateBpm" => Tag::AverageHeartRateBpm,
        b"MaximumHeartRateBpm" => Tag::MaximumHeartRateBpm,
        b"Value" => Tag::Value,
        b"Intensity" => Tag::Intensity,
        b"Cadence" => Tag::Cadence,
        b"TriggerMethod" => Tag::TriggerMethod,
        b"Track" => Tag::Track,
        b"Trackpoint" => Tag::Trackpoint,
        b"Time" => Tag::Time,
        b"Position" => Tag::Position,
        b"LatitudeDegrees" => Tag::LatitudeDegrees,
        b"LongitudeDegrees" => Tag::LongitudeDegrees,
        b"AltitudeMeters" => Tag::AltitudeMeters,
        b"HeartRateBpm" => Tag::HeartRateBpm,
        b"Extensions" => Tag::Extensions,
        b"LX" => Tag::Lx,
        b"TPX" => Tag::Tpx,
        b"AvgRunCadence" => Tag::AvgRunCadence,
        b"RunCadence" => Tag::RunCadence,
        b"Speed" => Tag::Speed,
        _ => Tag::Unknown,
    }
}

/// Precedence of an extension container's namespace prefix, lower wins.
fn prefix_rank(elt: &BytesStart) -> u8 {
    match elt.name().prefix() {
        None => 0,
        Some(p) if p.as_ref() == b"ns3" => 1,
        Some(_) => 2,
    }
}

/// A value that may be supplied by several extension candidates.
#[derive(Clone, Copy, Debug, Default)]
struct Candidate<T> {
    best: Option<(u8, T)>,
}

impl<T: Copy> Candidate<T> {
    fn offer(&mut self, rank: u8, value: Option<T>) {
        let Some(value) = value else { return };
        match self.best {
            Some((best_rank, _)) if best_rank <= rank => {}
            _ => self.best = Some((rank, value)),
        }
    }

    fn get(&self) -> Option<T> {
        self.best.map(|(_, v)| v)
    }
}

#[derive(Default)]
struct NextTrackpointFields {
    time: Option<DateTime<Utc>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    distance: Option<f64>,
    heart_rate: Option<u16>,
    cadence: Option<u16>,
    ext_cadence: Candidate<u16>,
    ext_speed: Candidate<f64>,
}

impl From<NextTrackpointFields> for Trackpoint {
    fn from(f: NextTrackpointFields) -> Self {
        let position = match (f.latitude, f.longitude) {
            (Some(latitude), Some(longitude)) => Some(Position {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self {
            time: f.time,
            position,
            altitude: f.altitude.map(Meters),
            distance: f.distance.map(Meters),
            heart_rate: f.heart_rate,
            cadence: f.cadence.or(f.ext_cadence.get()),
            speed: f.ext_speed.get().map(MetersPerSecond),
        }
    }
}

#[derive(Default)]
struct NextLapFields {
    start_time: Option<DateTime<Utc>>,
    total_time: Option<f64>,
    distance: Option<f64>,
    maximum_speed: Option<f64>,
    calories: Option<u32>,
    average_heart_rate: Option<u16>,
    maximum_heart_rate: Option<u16>,
    cadence: Option<u16>,
    ext_cadence: Candidate<u16>,
    intensity: Option<Intensity>,
    trigger_method: Option<TriggerMethod>,
    trackpoints: Vec<Trackpoint>,
}

impl From<NextLapFields> for Lap {
    fn from(f: NextLapFields) -> Self {
        Self {
            start_time: f.start_time,
            total_time: Seconds(f.total_time.unwrap_or(0.0)),
            distance: Meters(f.distance.unwrap_or(0.0)),
            maximum_speed: f.maximum_speed.map(MetersPerSecond),
            calories: f.calories.unwrap_or(0),
            average_heart_rate: f.average_heart_rate,
            maximum_heart_rate: f.maximum_heart_rate,
            // The extension is consulted only when the lap lacks the element.
            cadence: f.cadence.or(f.ext_cadence.get()),
            intensity: f.intensity,
            trigger_method: f.trigger_method,
            trackpoints: f.trackpoints,
        }
    }
}

#[derive(Default)]
struct NextActivityFields {
    sport: Option<String>,
    id: Option<String>,
    notes: Option<String>,
    device_name: Option<String>,
    laps: Vec<Lap>,
}

impl NextActivityFields {
    fn build(self) -> Option<Activity> {
        let sport = self
            .sport
            .as_deref()
            .map(ActivitySport::classify)
            .unwrap_or(ActivitySport::Other);
        let id = self.id.unwrap_or_default();
        let mut activity = Activity::new(sport, id, self.laps)?;
        activity.notes = self.notes;
        activity.device_name = self.device_name;
        Some(activity)
    }
}

fn parse_number<T: str::FromStr>(field: &str, text: &str) -> Option<T> {
    match text.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparseable {field} value {text:?}");
            None
        }
    }
}

fn parse_float(field: &str, text: &str) -> Option<f64> {
    parse_number::<f64>(field, text).filter(|v| v.is_finite())
}

/// Integer fields are sometimes written with a fractional part.
fn parse_count<T: TryFrom<u64>>(field: &str, text: &str) -> Option<T> {
    parse_float(field, text)
        .filter(|v| *v >= 0.0 && *v <= u64::MAX as f64)
        .and_then(|v| T::try_from(v.round() as u64).ok())
}

/// Heart rate readings of zero are treated as absent.
fn parse_heart_rate(text: &str) -> Option<u16> {
    parse_count::<u16>("heart rate", text).filter(|bpm| *bpm > 0)
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            warn!("Ignoring unparseable timestamp {text:?}");
            None
        }
    }
}

fn parse_enum<T: str::FromStr>(field: &str, text: &str) -> Option<T> {
    let parsed = text.parse::<T>().ok();
    if parsed.is_none() {
        debug!("Unrecognized {field} {text:?}");
    }
    parsed
}

fn decode_general_ref(name: &[u8]) -> Option<char> {
    match name {
        b"amp" => Some('&'),
        b"lt" => Some('<'),
        b"gt" => Some('>'),
        b"quot" => Some('"'),
        b"apos" => Some('\''),
        [b'#', b'x' | b'X', hex @ ..] => str::from_utf8(hex)
            .ok()
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .and_then(char::from_u32),
        [b'#', dec @ ..] => str::from_utf8(dec)
            .ok()
            .and_then(|d| d.parse::<u32>().ok())
            .and_then(char::from_u32),
        _ => None,
    }
}

/// A reader for TCX activity files
pub struct TcxReader<R>
where
    R: BufRead,
{
    reader: Reader<R>,
    tag_path: Vec<Tag>,
    open_elements: Vec<String>,
    /// Namespace rank of the innermost open LX or TPX element.
    extension_rank: u8,
    text: String,
    seen_root: bool,
    seen_activities: bool,
    num_activity_elements: usize,
    next_trackpoint: NextTrackpointFields,
    next_lap: NextLapFields,
    next_activity: NextActivityFields,
    activities: Vec<Activity>,
}

impl<R: BufRead> TcxReader<R> {
    pub fn from_reader(reader: R) -> TcxReader<R> {
        let mut reader = Reader::from_reader(reader);
        // Keeps the tag path balanced for self-closing elements.
        reader.config_mut().expand_empty_elements = true;

        Self {
            reader,
            tag_path: vec![],
            open_elements: vec![],
            extension_rank: 0,
            text: String::new(),
            seen_root: false,
            seen_activities: false,
            num_activity_elements: 0,
            next_trackpoint: NextTrackpointFields::default(),
            next_lap: NextLapFields::default(),
            next_activity: NextActivityFields::default(),
            activities: vec![],
        }
    }

    /// Reads every activity in the document.
    ///
    /// The result is never empty: a document without activities is an error.
    #[tracing::instrument(name = "decode_tcx", level = "debug", skip_all)]
    pub fn read_activities(mut self) -> Result<Vec<Activity>> {
        let mut buf = Vec::new();
        loop {
            match self.reader.read_event_into(&mut buf)? {
                Event::Eof => break,

                Event::Start(elt) => self.start_element(&elt)?,

                Event::Text(text) => self.text.push_str(str::from_utf8(&text)?),

                Event::CData(data) => self.text.push_str(str::from_utf8(&data)?),

                Event::GeneralRef(reference) => match decode_general_ref(&reference) {
                    Some(c) => self.text.push(c),
                    None => {
                        let name = String::from_utf8_lossy(&reference).into_owned();
                        return Err(XmlError::UndefinedEntity(name).into());
                    }
                },

                Event::End(_) => self.end_element(),

                _ => (),
            }
            buf.clear();
        }

        if let Some(name) = self.open_elements.pop() {
            return Err(XmlError::UnclosedElement(name).into());
        }
        if !self.seen_root {
            return Err(TcxError::MissingRootElement);
        }
        if !self.seen_activities {
            return Err(TcxError::MissingActivitiesElement);
        }
        debug!(
            "Read {} activities from {} Activity elements",
            self.activities.len(),
            self.num_activity_elements
        );
        if self.activities.is_empty() {
            return Err(TcxError::NoActivitiesFound);
        }
        Ok(self.activities)
    }

    fn start_element(&mut self, elt: &BytesStart) -> Result<()> {
        let tag = get_tag(elt.local_name().as_ref());
        if !self.seen_root {
            if tag != Tag::TrainingCenterDatabase {
                return Err(TcxError::MissingRootElement);
            }
            self.seen_root = true;
        }

        self.tag_path.push(tag);
        self.open_elements
            .push(str::from_utf8(elt.name().as_ref())?.to_owned());
        self.text.clear();

        match self.tag_path.as_slice() {
            [Tag::TrainingCenterDatabase, Tag::Activities] => self.seen_activities = true,

            [Tag::TrainingCenterDatabase, Tag::Activities, Tag::Activity] => {
                self.num_activity_elements += 1;
                self.next_activity = NextActivityFields::default();
                for attr in elt.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"Sport" {
                        self.next_activity.sport = Some(str::from_utf8(&attr.value)?.to_owned());
                    }
                }
            }

            [Tag::TrainingCenterDatabase, Tag::Activities, Tag::Activity, Tag::Lap] => {
                self.next_lap = NextLapFields::default();
                for attr in elt.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"StartTime" {
                        self.next_lap.start_time = parse_time(str::from_utf8(&attr.value)?.trim());
                    }
                }
            }

            [.., Tag::Lap, Tag::Track, Tag::Trackpoint] => {
                self.next_trackpoint = NextTrackpointFields::default();
            }

            [.., Tag::Extensions, Tag::Lx] | [.., Tag::Extensions, Tag::Tpx] => {
                self.extension_rank = prefix_rank(elt);
            }

            _ => (),
        }
        Ok(())
    }

    fn end_element(&mut self) {
        let text = mem::take(&mut self.text);
        let text = text.trim();
        let rank = self.extension_rank;

        match self.tag_path.as_slice() {
            [Tag::TrainingCenterDatabase, Tag::Activities, Tag::Activity, rest @ ..] => {
                match rest {
                    [] => {
                        let fields = mem::take(&mut self.next_activity);
                        match fields.build() {
                            Some(activity) => self.activities.push(activity),
                            None => debug!("Skipping activity without laps"),
                        }
                    }

                    [Tag::Id] => self.next_activity.id = Some(text.to_owned()),
                    [Tag::Notes] if !text.is_empty() => {
                        self.next_activity.notes = Some(text.to_owned())
                    }
                    [Tag::Creator, Tag::Name] if !text.is_empty() => {
                        self.next_activity.device_name = Some(text.to_owned())
                    }

                    [Tag::Lap] => {
                        let lap = Lap::from(mem::take(&mut self.next_lap));
                        self.next_activity.laps.push(lap);
                    }

                    [Tag::Lap, field] => {
                        let lap = &mut self.next_lap;
                        match field {
                            Tag::TotalTimeSeconds => {
                                lap.total_time = parse_float("lap time", text)
                            }
                            Tag::DistanceMeters => {
                                lap.distance = parse_float("lap distance", text)
                            }
                            Tag::MaximumSpeed => {
                                lap.maximum_speed = parse_float("lap maximum speed", text)
                            }
                            Tag::Calories => lap.calories = parse_count("lap calories", text),
                            Tag::Cadence => lap.cadence = parse_count("lap cadence", text),
                            Tag::Intensity => lap.intensity = parse_enum("intensity", text),
                            Tag::TriggerMethod => {
                                lap.trigger_method = parse_enum("trigger method", text)
                            }
                            _ => (),
                        }
                    }

                    [Tag::Lap, Tag::AverageHeartRateBpm, Tag::Value] => {
                        self.next_lap.average_heart_rate = parse_heart_rate(text)
                    }
                    [Tag::Lap, Tag::MaximumHeartRateBpm, Tag::Value] => {
                        self.next_lap.maximum_heart_rate = parse_heart_rate(text)
                    }
                    [Tag::Lap, Tag::Extensions, Tag::Lx, Tag::AvgRunCadence] => self
                        .next_lap
                        .ext_cadence
                        .offer(rank, parse_count("lap run cadence", text)),

                    [Tag::Lap, Tag::Track, Tag::Trackpoint] => {
                        let point = Trackpoint::from(mem::take(&mut self.next_trackpoint));
                        self.next_lap.trackpoints.push(point);
                    }

                    [Tag::Lap, Tag::Track, Tag::Trackpoint, point_field @ ..] => {
                        let p = &mut self.next_trackpoint;
                        match point_field {
                            [Tag::Time] => p.time = parse_time(text),
                            [Tag::Position, Tag::LatitudeDegrees] => {
                                p.latitude = parse_float("latitude", text)
                            }
                            [Tag::Position, Tag::LongitudeDegrees] => {
                                p.longitude = parse_float("longitude", text)
                            }
                            [Tag::AltitudeMeters] => p.altitude = parse_float("altitude", text),
                            [Tag::DistanceMeters] => p.distance = parse_float("distance", text),
                            [Tag::HeartRateBpm, Tag::Value] => {
                                p.heart_rate = parse_heart_rate(text)
                            }
                            [Tag::Cadence] => p.cadence = parse_count("cadence", text),
                            [Tag::Extensions, Tag::Tpx, Tag::Speed] => p
                                .ext_speed
                                .offer(rank, parse_float("speed", text)),
                            [Tag::Extensions, Tag::Tpx, Tag::RunCadence] => p
                                .ext_cadence
                                .offer(rank, parse_count("run cadence", text)),
                            _ => (),
                        }
                    }

                    _ => (),
                }
            }
            _ => (),
        }

        self.tag_path.pop();
        self.open_elements.pop();
    }
}
