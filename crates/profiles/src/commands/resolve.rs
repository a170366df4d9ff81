use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use comfy_table::Table;
use profiles_core::meta::FlightMeta;
use profiles_core::model::{PlatformId, SensorRecord};
use profiles_core::{CoefficientCache, CoefficientTables, Resolver, ValidityRule};

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Numeric platform id from the copter table.
    #[arg(long)]
    pub platform: PlatformId,
    /// Flight date (UTC), e.g. 2020-06-15.
    #[arg(long)]
    pub date: NaiveDate,
    /// Scoop named in the flight metadata, used when none is fixed to the platform.
    #[arg(long)]
    pub scoop: Option<String>,
    /// Also resolve the platform wind coefficients.
    #[arg(long)]
    pub wind: bool,
}

fn coefficient_summary(record: &SensorRecord) -> String {
    record
        .equation
        .required_coefficients()
        .iter()
        .map(|coefficient| match record.coefficients.get(*coefficient) {
            Some(value) => format!("{}={value}", coefficient.column()),
            None => format!("{}=?", coefficient.column()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scoop, per-slot coefficients and downgrade warnings for one platform and date.
pub fn render(tables: &CoefficientTables, validity: ValidityRule, args: &ResolveArgs) -> Result<String> {
    let resolver = Resolver::new(tables).with_rule(validity);

    let mut meta = FlightMeta::new();
    if let Some(scoop) = &args.scoop {
        meta.set("scoop_id", scoop);
    }
    let resolution = resolver
        .resolve_flight(args.platform, &meta, &[args.date], args.wind)
        .with_context(|| format!("resolving platform {} on {}", args.platform, args.date))?;

    let mut out = format!(
        "Platform {} ({}) flies scoop {} on {} ({:?})\n",
        resolution.platform_id,
        resolution.platform_name.as_deref().unwrap_or("unnamed"),
        resolution.scoop_id,
        args.date,
        resolution.scoop_source,
    );

    let mut table = Table::new();
    table.set_header(vec!["Slot", "Serial", "Record", "Equation", "Coefficients", "Valid from"]);
    for segment in resolution.segments.values() {
        for sensor in segment.sensors.values() {
            let record = &sensor.resolution.record;
            table.add_row(vec![
                sensor.slot.to_string(),
                sensor.serial.to_string(),
                record.serial_number.to_string(),
                record.equation.as_str().to_string(),
                coefficient_summary(record),
                record
                    .valid_from
                    .map(|date| date.to_string())
                    .unwrap_or_else(|| "always".to_string()),
            ]);
        }
    }
    out.push_str(&table.to_string());

    for downgrade in resolution.downgrades() {
        out.push_str(&format!("\nWARNING: {downgrade}"));
    }
    Ok(out)
}

pub async fn run(cache: &CoefficientCache, validity: ValidityRule, args: ResolveArgs) -> Result<()> {
    let tables = cache.snapshot().await;
    println!("{}", render(&tables, validity, &args)?);
    Ok(())
}
