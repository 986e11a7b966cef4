use std::fmt::{Display, Write};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf, absolute};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use clap::builder::styling::Styles;
use clap::{Args, ColorChoice, Parser, Subcommand, ValueEnum, crate_version};
use clap_cargo::style::{ERROR, HEADER, INVALID, LITERAL, PLACEHOLDER, USAGE, VALID};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use regex::{Match, Regex};
use sys_locale::get_locale;
use tcxfit::measure::{Kilometers, Meters, Miles};
use tcxfit::records::personal_records;
use tcxfit::workout::{PlannedStep, StepDuration};
use tcxfit::{
    Activity, CanonicalActivity, FitEncodeError, FitWorkoutOptions, Sport, SubSport, TcxError,
    TcxFitError, Workout, WorkoutError, WorkoutFile, plan_steps, workout_filename,
};
use tracing::level_filters::LevelFilter;
use tracing::{Level, debug, enabled, error, info, instrument, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry, fmt};

pub const CLAP_STYLING: Styles = Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} (rustc {}, FIT profile {})",
        crate_version!(),
        env!("RUSTC_VERSION"),
        tcxfit::fit::PROFILE_VERSION,
    )
});

/// Decode TCX activities and encode FIT workouts
///
/// Summarizes activities recorded in Garmin Training Center XML files, and
/// converts structured workout descriptions into FIT workout files that can
/// be loaded onto a Garmin watch.
#[derive(Parser)]
#[command(
    name = "tcxfit",
    version,
    long_version = LONG_VERSION.as_str(),
    about,
    color = ColorChoice::Auto,
    styles = CLAP_STYLING,
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,

    /// Configure diagnostic logging level
    ///
    /// Set to DEBUG to see a performance summary following execution, but be
    /// aware this has a non-negligible performance impact on debug builds.
    #[clap(long, short = 'L', default_value_t = Level::ERROR)]
    log_level: Level,

    /// Log to a file
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// The unit of distance used in output on the command line.
    ///
    /// If unspecified, this will default to either km or mi based on your
    /// system locale.
    #[clap(long, short = 'u', default_value_t = DistUnit::Autodetect)]
    distance_unit: DistUnit,
}

#[derive(Copy, Clone, strum::Display, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
#[clap(rename_all = "kebab-case")]
enum DistUnit {
    Autodetect,
    M,
    Km,
    Mi,
}

impl DistUnit {
    fn get(self) -> DistUnit {
        match self {
            Self::Autodetect => Self::auto_detect(),
            _ => self,
        }
    }

    fn auto_detect() -> DistUnit {
        let locale = get_locale().unwrap_or_else(|| String::from("en-US"));
        match locale.as_str() {
            "en-US" | "en-GB" => Self::Mi,
            _ => Self::Km,
        }
    }
}

/// Encode a version number for FIT
///
/// Encodes the crate's version number at compilation into a 16-bit unsigned
/// integer that can be stashed in the FIT file_id message's product field.
/// Since this can store values up to 65,534, we can segment it as base-10
/// digits with:
///
/// - Most significant digit for crate major version number
/// - Next two for minor version number
/// - Final two for patch
fn encode_version_number() -> Result<u16> {
    let re = Regex::new(r"^(\d+)\.(\d+)\.(\d+)")?;

    fn part(s: Option<Match>) -> Result<u16> {
        let val = s
            .ok_or_else(|| anyhow!("Did not get a version part match"))?
            .as_str()
            .parse::<u16>()
            .map_err(|e| anyhow!("Couldn't parse version part as u16: {e}"))?;
        if val > 99 {
            bail!("Can't encode version part with more than two digits");
        }
        Ok(val)
    }

    match re.captures(crate_version!()) {
        Some(caps) => {
            let major = part(caps.get(1))?;
            let minor = part(caps.get(2))?;
            let patch = part(caps.get(3))?;
            Ok(10000 * major + 100 * minor + patch)
        }
        None => Err(anyhow!("Crate version string didn't match regex")),
    }
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// TCX input paths
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Print the canonical activities as JSON instead of a summary
    #[clap(long, action)]
    json: bool,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Workout description (JSON) input path
    input: PathBuf,

    /// FIT file output path
    ///
    /// If unspecified, defaults to a name derived from the workout's title, in
    /// the same directory as the input file.
    #[clap(long, short)]
    output: Option<PathBuf>,

    /// Force overwriting the output file, if it already exists.
    #[clap(long, short, action)]
    force: bool,

    /// Sport to be designated for the workout.
    #[clap(long, short = 'p', default_value = "running")]
    sport: Sport,

    /// Sub-sport to be designated for the workout.
    #[clap(long, short = 's', default_value = "generic")]
    sub_sport: SubSport,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the activities in one or more TCX files
    Decode(DecodeArgs),

    /// Convert a JSON workout description to a FIT workout file
    ///
    /// Repeat blocks are unrolled, and steps without a usable duration or
    /// target become open steps, so the result is always a playable workout.
    Encode(EncodeArgs),
}

fn decode_file(input: &Path) -> Result<Vec<Activity>> {
    let tcx_file = BufReader::new(File::open(input).with_context(|| {
        format!("Opening the TCX input {input:?}. Check that it exists and can be accessed.")
    })?);
    let res = tcxfit::decode_tcx_activities(tcx_file);
    match &res {
        Err(TcxFitError::Tcx(e)) if e.is_malformed() => res.with_context(|| {
            format!("{input:?} is not a valid XML file. Check that it is correct.")
        }),

        Err(TcxFitError::Tcx(
            TcxError::MissingRootElement | TcxError::MissingActivitiesElement,
        )) => res.with_context(|| format!("{input:?} does not look like a TCX activity file.")),

        Err(TcxFitError::Tcx(TcxError::NoActivitiesFound)) => res.with_context(|| {
            format!("No activity with at least one lap was found in {input:?}.")
        }),

        _ => res.map_err(anyhow::Error::from),
    }
}

#[instrument(level = "trace", skip_all)]
fn decode_cmd(args: &Cli, sub_args: &DecodeArgs) -> Result<String> {
    debug!("decode args: {:?}", sub_args);

    #[cfg(feature = "rayon")]
    let results: Vec<Result<Vec<Activity>>> =
        sub_args.inputs.par_iter().map(|p| decode_file(p)).collect();
    #[cfg(not(feature = "rayon"))]
    let results: Vec<Result<Vec<Activity>>> =
        sub_args.inputs.iter().map(|p| decode_file(p)).collect();

    let mut decoded: Vec<(&Path, Vec<Activity>)> = Vec::with_capacity(results.len());
    for (input, result) in sub_args.inputs.iter().zip(results) {
        let activities = result?;
        info!("Decoded {} activities from {:?}", activities.len(), input);
        decoded.push((input.as_path(), activities));
    }

    if sub_args.json {
        let canonical: Vec<CanonicalActivity> = decoded
            .iter()
            .flat_map(|(_, activities)| activities.iter().map(CanonicalActivity::from))
            .collect();
        let mut r = serde_json::to_string_pretty(&canonical)?;
        r.push('\n');
        return Ok(r);
    }

    let mut r = String::new();
    for (input, activities) in &decoded {
        for activity in activities {
            let report = match args.distance_unit.get() {
                DistUnit::M => activity_report::<Meters<f64>>(activity),
                DistUnit::Km => activity_report::<Kilometers<f64>>(activity),
                DistUnit::Mi => activity_report::<Miles<f64>>(activity),
                DistUnit::Autodetect => {
                    error!(
                        "Failed to detect distance unit for report: {}",
                        args.distance_unit
                    );
                    Ok(String::new())
                }
            }?;
            writeln!(&mut r, "{}", input.to_string_lossy())?;
            r.push_str(&report);
            r.push('\n');
        }
    }
    Ok(r)
}

fn format_pace(seconds_per_km: u32) -> String {
    format!("{}:{:02}/km", seconds_per_km / 60, seconds_per_km % 60)
}

fn activity_report<T>(activity: &Activity) -> Result<String>
where
    T: From<Meters<f64>> + Display,
{
    let stats = activity.stats();
    let mut r = String::new();
    writeln!(&mut r, "  Activity:  {} ({})", activity.id, activity.sport)?;
    if let Some(device) = &activity.device_name {
        writeln!(&mut r, "  Device:    {device}")?;
    }
    writeln!(
        &mut r,
        "  Laps:      {} ({} trackpoints)",
        activity.laps().len(),
        activity.trackpoints().count()
    )?;
    writeln!(&mut r, "  Distance:  {:.2}", T::from(stats.distance))?;
    writeln!(&mut r, "  Time:      {:.0}", stats.total_time)?;
    if let Some(pace) = stats.average_pace {
        writeln!(&mut r, "  Avg pace:  {}", format_pace(pace.0))?;
    }
    if let Some(pace) = stats.best_pace {
        writeln!(&mut r, "  Best pace: {}", format_pace(pace.0))?;
    }
    if let Some(hr) = stats.average_heart_rate {
        let max = stats
            .maximum_heart_rate
            .map(|m| format!(", max {m}"))
            .unwrap_or_default();
        writeln!(&mut r, "  Heart rate: {hr:.0} bpm{max}")?;
    }
    if let Some(cadence) = stats.average_cadence {
        writeln!(&mut r, "  Cadence:   {cadence:.0}")?;
    }
    let gain = stats.elevation_gain.unwrap_or_default();
    let loss = stats.elevation_loss.unwrap_or_default();
    if gain.0 > 0.0 || loss.0 > 0.0 {
        writeln!(&mut r, "  Elevation: +{gain:.0} / -{loss:.0}")?;
    }
    writeln!(&mut r, "  Calories:  {}", stats.calories)?;

    let records = personal_records(activity);
    if !records.is_empty() {
        writeln!(&mut r, "  Best efforts:")?;
        for record in records {
            let pace = record.pace.map(|p| format_pace(p.0)).unwrap_or_default();
            writeln!(
                &mut r,
                "    {:<14} {:.0}  {}",
                record.distance.to_string(),
                record.time,
                pace
            )?;
        }
    }
    Ok(r)
}

#[instrument(level = "trace", skip_all)]
fn encode_cmd(sub_args: &EncodeArgs) -> Result<String> {
    debug!("encode args: {:?}", sub_args);

    let json = std::fs::read_to_string(&sub_args.input).context(
        "Opening the workout <INPUT> file. Check that it exists and can be accessed.",
    )?;
    info!("Read workout input file: {:?}", absolute(&sub_args.input)?);

    let workout = match Workout::from_json(&json) {
        Err(e @ WorkoutError::Json(_)) => Err(e).context(
            "The <INPUT> is not a valid workout description. Check that it is valid JSON.",
        ),
        res => res.map_err(anyhow::Error::from),
    }?;

    let output = match &sub_args.output {
        Some(p) => p.clone(),
        None => sub_args
            .input
            .with_file_name(workout_filename(&workout.title)),
    };

    if ((sub_args.force && enabled!(Level::WARN)) || (!sub_args.force && enabled!(Level::ERROR)))
        && output.exists()
    {
        if sub_args.force {
            warn!("Output file exists and will be overwritten: {:?}", output);
        } else {
            error!(
                "Output file already exists and may not be overwritten: {:?}",
                output
            );
        }
    }
    let mut fit_file = BufWriter::new(
        if sub_args.force {
            File::create(&output)
        } else {
            File::create_new(&output)
        }
        .context("Creating the <OUTPUT> file")?,
    );
    info!("Created FIT output file: {:?}", absolute(&output)?);

    let fit_options = FitWorkoutOptions::default()
        .with_time_created(chrono::Utc::now())
        .with_sport(sub_args.sport)
        .with_sub_sport(sub_args.sub_sport)
        .with_product(encode_version_number().unwrap_or_else(|e| {
            warn!("Unable to encode version number to FIT: {e}");
            0u16
        }));

    let res = WorkoutFile::new(&workout, fit_options)
        .encode(&mut fit_file)
        .map_err(TcxFitError::from);
    match &res {
        Err(TcxFitError::FitEncode(FitEncodeError::Io(_))) => res.context(concat!(
            "Writing the FIT output to the filesystem. Ensure the output path exists and ",
            "that you have access permissions to write there."
        )),
        _ => res.map_err(anyhow::Error::from),
    }?;
    fit_file.flush().context("Flushing the <OUTPUT> file")?;

    workout_report(&workout, &output)
}

fn workout_report(workout: &Workout, output: &Path) -> Result<String> {
    let plan = plan_steps(workout);
    let mut r = String::new();
    writeln!(&mut r, "Encoded {:?} with {} steps:", workout.title, plan.len())?;
    for (i, step) in plan.iter().enumerate() {
        match step {
            PlannedStep::Step(step) => {
                let duration = match step.duration {
                    StepDuration::Time(t) => format!("{t:.0}"),
                    StepDuration::Distance(d) => format!("{d:.0}"),
                    StepDuration::Open => "open".to_owned(),
                };
                writeln!(&mut r, "  {i:>3}  {:<10} {duration}", step.kind.label())?;
            }
            PlannedStep::RepeatUntil { from_index, count } => {
                writeln!(&mut r, "  {i:>3}  repeat from step {from_index}, {count} times")?;
            }
        }
    }
    writeln!(
        &mut r,
        "\nOutput is in {}",
        absolute(output)
            .unwrap_or(output.to_path_buf())
            .to_string_lossy()
    )?;
    Ok(r)
}

fn main() -> Result<()> {
    // Intentionally avoid wrapping argument parsing errors in anyhow::Result so
    // we preserve Clap's pretty formatting of usage info.
    let args = Cli::parse();

    let log_w: Box<dyn std::io::Write + Send> = match &args.log_file {
        Some(path) => Box::new(File::create(path).context("Creating the log file")?),
        None => Box::new(std::io::stderr()),
    };
    let (appender, _guard) = tracing_appender::non_blocking(log_w);

    // Enable the TRACE-level span tree layer for fmt logging level DEBUG.
    let fmt_layer = fmt::Layer::new()
        .with_writer(appender)
        .with_ansi(args.log_file.is_none())
        .with_target(false)
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .with_filter(LevelFilter::from_level(args.log_level));
    if args.log_level >= Level::DEBUG {
        let span_tree_layer = tracing_span_tree::SpanTree::default().aggregate(true);
        tracing::subscriber::set_global_default(
            Registry::default().with(fmt_layer).with(span_tree_layer),
        )?;
    } else {
        tracing::subscriber::set_global_default(Registry::default().with(fmt_layer))?;
    }

    debug!("tcxfit {}", clap::crate_version!());

    let report = match &args.cmd {
        Commands::Decode(sub_args) => decode_cmd(&args, sub_args),
        Commands::Encode(sub_args) => encode_cmd(sub_args),
    }?;

    print!("{report}");
    Ok(())
}
