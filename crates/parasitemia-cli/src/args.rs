use anyhow::{bail, Context, Result};
use calibration_store::{CompensationOptions, Dataset};
use parasitemia_core::{ClassCounts, Units};
use std::path::PathBuf;

pub const DEFAULT_THRESHOLD: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Compensate,
    Deskew,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub command: Command,
    pub model_id: String,
    pub threshold: f64,
    pub skip: bool,
    pub options: CompensationOptions,
    pub units: Units,
    pub data_dir: Option<PathBuf>,
    pub counts: ClassCounts,
}

pub const USAGE: &str = "\
Usage:
  parasitemia compensate --model ID --counts h,r,t,s,g,w,m [options]
  parasitemia deskew     --model ID --counts h,r,t,s,g,w,m [options]

Options:
  --threshold T      Confidence threshold selecting the fit row (default: 0.90)
  --skip             Report raw statistics without compensation
  --cultured         Use the cultured-sample compensation table
  --heatmaps         Use the heatmap-corrected compensation table
  --units U          percent | ul | fraction (default: percent)
  --data-dir DIR     Calibration data directory (default: $PARASITEMIA_DATA_DIR or data_files)";

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Parse `h,r,t,s,g,w,m` into validated class counts
pub fn parse_counts(raw: &str) -> Result<ClassCounts> {
    let values = raw
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .with_context(|| format!("'{}' is not an integer count", v.trim()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ClassCounts::try_from_slice(&values)?)
}

impl CliArgs {
    /// Parse arguments, excluding the program name
    pub fn parse(args: &[String]) -> Result<Self> {
        let command = match args.first().map(|s| s.as_str()) {
            Some("compensate") => Command::Compensate,
            Some("deskew") => Command::Deskew,
            Some(other) => bail!("unknown command '{}'", other),
            None => bail!("missing command"),
        };

        let model_id = flag_value(args, "--model")
            .context("--model is required")?
            .to_string();

        let counts = parse_counts(flag_value(args, "--counts").context("--counts is required")?)?;

        let threshold = match flag_value(args, "--threshold") {
            Some(v) => v
                .parse()
                .with_context(|| format!("invalid --threshold '{}'", v))?,
            None => DEFAULT_THRESHOLD,
        };

        let units = match flag_value(args, "--units") {
            Some(v) => v.parse::<Units>().map_err(anyhow::Error::msg)?,
            None => Units::Percent,
        };

        let options = CompensationOptions {
            dataset: if args.iter().any(|a| a == "--cultured") {
                Dataset::Cultured
            } else {
                Dataset::Clinical
            },
            heatmaps: args.iter().any(|a| a == "--heatmaps"),
        };

        Ok(Self {
            command,
            model_id,
            threshold,
            skip: args.iter().any(|a| a == "--skip"),
            options,
            units,
            data_dir: flag_value(args, "--data-dir").map(PathBuf::from),
            counts,
        })
    }
}
