use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use fitparser::profile::MesgNum;
use tcxfit::writer::{CRC_SIZE, HEADER_SIZE};

/// Dumps the messages of a FIT file
///
/// Decodes the file with fitparser, which rejects bad header and file CRCs,
/// checks the header's data size against the file length, and prints each
/// message with its named fields. Useful for comparing encoder output against
/// files produced by other tools.
#[derive(Parser)]
struct Cli {
    /// FIT file to dump
    input: PathBuf,

    /// Print only messages of this kind, e.g. workout_step
    #[clap(long, short)]
    kind: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let bytes = std::fs::read(&args.input).context("Reading the FIT input")?;

    if bytes.len() < HEADER_SIZE + CRC_SIZE {
        bail!("File is too short to be a FIT file");
    }
    let data_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_size = usize::from(bytes[0]);
    let expected_size = bytes.len().saturating_sub(header_size + CRC_SIZE);
    if data_size != expected_size {
        bail!("Header data size is {data_size} but the file holds {expected_size} data bytes");
    }

    let records = fitparser::from_bytes(&bytes).map_err(|e| anyhow!("Decoding FIT: {e}"))?;
    for record in &records {
        let kind = record.kind();
        if args.kind.as_deref().is_some_and(|k| k != kind.to_string()) {
            continue;
        }
        println!("{kind}");
        for field in record.fields() {
            println!("    {:<28} {} {}", field.name(), field.value(), field.units());
        }
    }

    let steps = records
        .iter()
        .filter(|r| r.kind() == MesgNum::WorkoutStep)
        .count();
    println!("{} messages, {} workout steps, CRCs ok", records.len(), steps);
    Ok(())
}
