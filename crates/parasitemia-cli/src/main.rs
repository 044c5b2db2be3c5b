//! parasitemia: corrected parasitemia estimates from raw classifier counts.
//!
//! Usage:
//!   parasitemia compensate --model frightful-wendigo-1931 --counts 100000,60,40,20,10,150,200
//!   parasitemia compensate --model frightful-wendigo-1931 --counts ... --skip --units ul
//!   parasitemia deskew --model frightful-wendigo-1931 --counts ...

mod args;

use anyhow::{Context, Result};
use args::{CliArgs, Command, USAGE};
use calibration_store::DataStoreConfig;
use count_corrector::{CompensatorConfig, CountCompensator, CountDeskewer};
use parasitemia_core::{DeskewedCounts, ParasitemiaResult};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct CompensateOutput<'a> {
    model_id: &'a str,
    confidence_threshold: f64,
    skipped: bool,
    raw_parasitemia: f64,
    result: ParasitemiaResult,
}

#[derive(Debug, Serialize)]
struct DeskewOutput<'a> {
    model_id: &'a str,
    deskewed_counts: DeskewedCounts,
    result: ParasitemiaResult,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parasitemia=info,calibration_store=info,count_corrector=info".into());

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run(args: &CliArgs) -> Result<String> {
    let store = match &args.data_dir {
        Some(dir) => DataStoreConfig::new(dir),
        None => DataStoreConfig::from_env(),
    };
    tracing::debug!(root = %store.root.display(), "Using calibration data store");

    let output = match args.command {
        Command::Compensate => {
            let config = CompensatorConfig {
                confidence_threshold: args.threshold,
                skip: args.skip,
                options: args.options,
                ..CompensatorConfig::default()
            };
            let compensator = CountCompensator::from_store(&store, &args.model_id, config)
                .with_context(|| format!("Failed to build compensator for {}", args.model_id))?;

            let raw_parasitemia = compensator.calc_parasitemia(&args.counts)?;
            let result = compensator.get_res_from_counts(&args.counts, args.units)?;
            tracing::info!("{}: {}", args.model_id, result);

            serde_json::to_string_pretty(&CompensateOutput {
                model_id: &args.model_id,
                confidence_threshold: compensator.confidence_threshold(),
                skipped: compensator.is_skipped(),
                raw_parasitemia,
                result,
            })?
        }
        Command::Deskew => {
            let deskewer = CountDeskewer::from_store(&store, &args.model_id)
                .with_context(|| format!("Failed to build deskewer for {}", args.model_id))?;

            let (deskewed_counts, result) = deskewer.deskew_with_interval(&args.counts, args.units)?;
            tracing::info!("{} (deskewed): {}", args.model_id, result);

            serde_json::to_string_pretty(&DeskewOutput {
                model_id: &args.model_id,
                deskewed_counts,
                result,
            })?
        }
    };

    Ok(output)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match CliArgs::parse(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {:#}", e);
            eprintln!();
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let output = run(&args)?;
    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use count_corrector::CalibrationError;
    use std::fs;
    use std::path::Path;

    const MODEL: &str = "frightful-wendigo-1931";

    fn parse(line: &str) -> CliArgs {
        let argv: Vec<String> = line.split_whitespace().map(String::from).collect();
        CliArgs::parse(&argv).unwrap()
    }

    fn seed_store(dir: &Path) {
        let model_dir = dir.join(MODEL);
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(
            model_dir.join(format!("{MODEL}-clinical-compensation-no-heatmaps.csv")),
            "conf_val,fit_m,fit_b,cov_m,cov_b\n0.9,1.12,410.0,0.05,120.0\n",
        )
        .unwrap();
        let identity: String = (0..7)
            .map(|r| {
                (0..7)
                    .map(|c| if r == c { "1" } else { "0" })
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(model_dir.join(format!("{MODEL}-cmatrix-mean.csv")), &identity).unwrap();
        fs::write(model_dir.join(format!("{MODEL}-inv-cmatrix-std.csv")), "0,0,0,0,0,0,0\n".repeat(7))
            .unwrap();
    }

    #[test]
    fn test_run_compensate_outputs_json() {
        let dir = tempfile::TempDir::new().unwrap();
        seed_store(dir.path());

        let args = parse(&format!(
            "compensate --model {MODEL} --counts 100000,60,40,20,10,150,200 --data-dir {}",
            dir.path().display()
        ));
        let json: serde_json::Value = serde_json::from_str(&run(&args).unwrap()).unwrap();

        assert_eq!(json["model_id"], MODEL);
        assert_eq!(json["skipped"], false);
        assert_eq!(json["result"]["units"], "percent");
        let estimate = json["result"]["estimate"].as_f64().unwrap();
        let lower = json["result"]["lower"].as_f64().unwrap();
        let upper = json["result"]["upper"].as_f64().unwrap();
        assert!(lower <= estimate && estimate <= upper);
    }

    #[test]
    fn test_run_deskew_outputs_counts() {
        let dir = tempfile::TempDir::new().unwrap();
        seed_store(dir.path());

        let args = parse(&format!(
            "deskew --model {MODEL} --counts 500,5,0,0,0,1,0 --units fraction --data-dir {}",
            dir.path().display()
        ));
        let json: serde_json::Value = serde_json::from_str(&run(&args).unwrap()).unwrap();

        assert_eq!(json["deskewed_counts"][0].as_f64(), Some(500.0));
        assert_eq!(json["result"]["units"], "fraction");
    }

    #[test]
    fn test_run_unknown_model() {
        let dir = tempfile::TempDir::new().unwrap();
        let args = parse(&format!(
            "compensate --model ghost-1 --counts 1,0,0,0,0,0,0 --data-dir {}",
            dir.path().display()
        ));

        let err = run(&args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CalibrationError>(),
            Some(CalibrationError::CalibrationNotFound { .. })
        ));
    }
}
