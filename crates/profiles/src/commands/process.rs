use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use comfy_table::Table;
use profiles_core::legs::Leg;
use profiles_core::profile_set::FlightFailure;
use profiles_core::{
    CoefficientCache, CoefficientTables, Flight, ProcessingConfig, Profile, ProfileOptions, ProfileSet,
};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Flight directories holding raw.csv and optional header.csv / flight.csv.
    pub flights: Vec<PathBuf>,
    /// Glob selecting further flight directories, e.g. "data/2020-*".
    #[arg(long)]
    pub glob: Option<String>,
    /// Directory the gridded profiles are written to.
    #[arg(short, long, default_value = "profiles_out")]
    pub out: PathBuf,
    /// Overrides the configured flight leg.
    #[arg(long, value_parser = parse_leg)]
    pub leg: Option<Leg>,
}

fn parse_leg(value: &str) -> Result<Leg, String> {
    match value.to_ascii_lowercase().as_str() {
        "ascent" => Ok(Leg::Ascent),
        "descent" => Ok(Leg::Descent),
        "full" => Ok(Leg::Full),
        other => Err(format!("unknown leg '{other}' (expected ascent, descent or full)")),
    }
}

fn flight_dirs(args: &ProcessArgs) -> Result<Vec<PathBuf>> {
    let mut dirs = args.flights.clone();
    if let Some(pattern) = &args.glob {
        for entry in glob::glob(pattern).with_context(|| format!("invalid glob '{pattern}'"))? {
            match entry {
                Ok(path) if path.is_dir() => dirs.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "could not read path from glob pattern"),
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

/// Result of one `process` run.
#[derive(Debug)]
pub struct ProcessSummary {
    /// Profile CSVs, each followed by its public metadata CSV.
    pub written: Vec<PathBuf>,
    pub built: usize,
    pub failures: Vec<FlightFailure>,
    pub report: String,
}

fn output_stem(profile: &Profile, leg: Leg) -> String {
    let platform = profile
        .meta
        .platform_name()
        .map(str::to_string)
        .unwrap_or_else(|| profile.platform_id.to_string());
    let date = profile
        .meta
        .flight_date()
        .map(|date| date.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "undated".to_string());
    let id = profile.id.simple().to_string();
    format!("{platform}_{date}_{}_{}", &id[..8], leg.as_str())
}

/// Reads, builds and writes every selected flight. Unreadable or unresolvable
/// flights land in `failures`; only output I/O errors abort the run.
pub fn process(tables: &CoefficientTables, config: &ProcessingConfig, args: &ProcessArgs) -> Result<ProcessSummary> {
    let dirs = flight_dirs(args)?;
    if dirs.is_empty() {
        bail!("no flight directories given");
    }

    let mut options = ProfileOptions::from(config);
    if let Some(leg) = args.leg {
        options.leg = leg;
    }

    let mut flights = Vec::with_capacity(dirs.len());
    let mut failures = Vec::new();
    for dir in &dirs {
        match Flight::from_dir(dir) {
            Ok(flight) => flights.push(flight),
            Err(error) => {
                warn!(dir = %dir.display(), %error, "could not read flight");
                failures.push(FlightFailure {
                    source: dir.display().to_string(),
                    error,
                });
            }
        }
    }

    let outcome = ProfileSet::build(flights, tables, &options);
    failures.extend(outcome.failures);
    let set = outcome.set;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating output directory {}", args.out.display()))?;

    let mut written = Vec::with_capacity(set.len() * 2);
    let mut summary = Table::new();
    summary.set_header(vec![
        "Flight", "Platform", "Scoop", "Samples", "Levels", "QC removed", "Downgrades", "Output",
    ]);
    for profile in set.iter() {
        let label = profile
            .meta
            .get("timestamp")
            .or_else(|| profile.meta.get("date_utc"))
            .unwrap_or("unknown")
            .to_string();
        let stem = output_stem(profile, options.leg);
        let path = args.out.join(format!("{stem}.csv"));
        profile
            .write_csv(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        let meta_path = args.out.join(format!("{stem}_meta.csv"));
        profile
            .meta
            .write_public_csv(&meta_path)
            .with_context(|| format!("writing {}", meta_path.display()))?;

        for downgrade in &profile.report.downgrades {
            warn!(flight = %label, %downgrade, "default coefficients used");
        }
        for warning in &profile.report.regrid_warnings {
            warn!(flight = %label, %warning, "grid restricted");
        }
        summary.add_row(vec![
            label,
            profile.platform_id.to_string(),
            profile.resolution.scoop_id.to_string(),
            profile.report.samples.to_string(),
            profile.levels().len().to_string(),
            profile.report.qc.total_removed().to_string(),
            profile.report.downgrades.len().to_string(),
            path.display().to_string(),
        ]);
        written.push(path);
        written.push(meta_path);
    }
    let mut report = summary.to_string();

    if !failures.is_empty() {
        let mut failed = Table::new();
        failed.set_header(vec!["Flight", "Error"]);
        for failure in &failures {
            failed.add_row(vec![failure.source.clone(), failure.error.to_string()]);
        }
        report.push_str(&format!("\n\nFailed flights:\n{failed}"));
    }

    info!(built = set.len(), failed = failures.len(), "processing finished");
    Ok(ProcessSummary {
        written,
        built: set.len(),
        failures,
        report,
    })
}

pub async fn run(cache: &CoefficientCache, config: &ProcessingConfig, args: ProcessArgs) -> Result<()> {
    let tables = cache.snapshot().await;
    let summary = process(&tables, config, &args)?;
    println!("{}", summary.report);
    if summary.built == 0 {
        bail!("no flight produced a profile");
    }
    Ok(())
}
