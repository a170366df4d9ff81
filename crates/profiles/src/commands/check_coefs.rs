use anyhow::Result;
use comfy_table::Table;
use profiles_core::{CoefficientCache, CoefficientTables};

/// Counts table, skipped rows (when any) and the load time of `tables`.
pub fn render(tables: &CoefficientTables) -> String {
    let report = tables.report();

    let mut counts = Table::new();
    counts.set_header(vec!["Backend", "Platforms", "Scoops", "Assignments", "Sensor records", "Skipped rows"]);
    counts.add_row(vec![
        report.backend.clone(),
        report.platforms.to_string(),
        report.scoops.to_string(),
        report.assignments.to_string(),
        report.sensor_records.to_string(),
        report.skipped.len().to_string(),
    ]);
    let mut out = counts.to_string();

    if !report.is_clean() {
        let mut skipped = Table::new();
        skipped.set_header(vec!["Source", "Row", "Reason"]);
        for record in &report.skipped {
            skipped.add_row(vec![
                record.source.clone(),
                record.row.to_string(),
                record.reason.clone(),
            ]);
        }
        out.push_str(&format!("\n\nSkipped rows:\n{skipped}"));
    }

    out.push_str(&format!("\n\nTables loaded at {}", tables.loaded_at().to_rfc3339()));
    out
}

pub async fn run(cache: &CoefficientCache) -> Result<()> {
    let tables = cache.snapshot().await;
    println!("{}", render(&tables));
    Ok(())
}
