use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::aggregate::RateRecord;
use crate::analysis::CorrelationResult;
use crate::incidents::dedup::DuplicateReport;
use crate::pipeline::StageCounts;

const SIGNIFICANCE: f64 = 0.05;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn render_rates_table(rates: &[RateRecord]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Tract",
        "Year",
        "Incidents",
        "Population",
        "Rate / 1,000",
        "MOE",
    ]);
    for r in rates {
        let rate_cell = match r.crime_rate {
            Some(v) => Cell::new(format!("{v:.2}")),
            None => Cell::new("-").fg(Color::DarkGrey),
        };
        table.add_row(Row::from(vec![
            Cell::new(&r.geoid),
            Cell::new(r.year),
            Cell::new(r.incident_count),
            Cell::new(format!("{:.0} ± {:.0}", r.population, r.population_moe)),
            rate_cell,
            Cell::new(
                r.crime_rate_moe
                    .map(|m| format!("±{m:.2}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]));
    }
    table.to_string()
}

pub fn render_duplicates_table(report: &DuplicateReport) -> String {
    let mut table = new_table();
    table.set_header(vec!["Group", "Rows", "Row ids", "Record"]);
    for (idx, group) in report.groups.iter().enumerate() {
        table.add_row(vec![
            (idx + 1).to_string(),
            group.count().to_string(),
            group
                .row_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            group.fields.join(" | "),
        ]);
    }
    let mut out = table.to_string();
    out.push_str(&format!(
        "\n{} duplicate groups, {} redundant rows (kept for review)",
        report.groups.len(),
        report.redundant_rows()
    ));
    out
}

pub fn render_correlation_table(result: &CorrelationResult) -> String {
    let mut table = new_table();
    table.set_header(vec!["Statistic", "Value"]);
    let p_cell = if result.p_value < SIGNIFICANCE {
        Cell::new(format!("{:.4}", result.p_value)).fg(Color::Green)
    } else {
        Cell::new(format!("{:.4}", result.p_value)).fg(Color::Yellow)
    };
    table.add_row(vec![Cell::new("tracts (n)"), Cell::new(result.n)]);
    table.add_row(vec![Cell::new("pearson r"), Cell::new(format!("{:.4}", result.r))]);
    table.add_row(vec![Cell::new("p-value (two-sided)"), p_cell]);
    table.add_row(vec![
        Cell::new("slope"),
        Cell::new(format!("{:.4}", result.slope)),
    ]);
    table.add_row(vec![
        Cell::new("intercept"),
        Cell::new(format!("{:.4}", result.intercept)),
    ]);
    table.to_string()
}

pub fn render_counts_table(counts: &StageCounts) -> String {
    let mut table = new_table();
    table.set_header(vec!["Stage", "Rows"]);
    let rows = [
        ("read", counts.rows_read),
        ("rejected (bad date)", counts.rows_rejected),
        ("in date range", counts.in_date_range),
        ("duplicate groups", counts.duplicate_groups),
        ("duplicate rows", counts.duplicate_rows),
        ("property crimes", counts.property_crimes),
        ("located", counts.located),
        ("missing coordinates", counts.missing_coordinates),
        ("invalid coordinates", counts.invalid_coordinates),
        ("tracts", counts.tracts),
        ("joined to tracts", counts.joined),
        ("tract-years", counts.tract_years),
        ("rates", counts.rates),
    ];
    for (stage, count) in rows {
        table.add_row(vec![stage.to_string(), count.to_string()]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use crate::aggregate::RateRecord;
    use crate::output::table::{render_counts_table, render_rates_table};
    use crate::pipeline::StageCounts;

    #[test]
    fn rates_table_shows_missing_rate_as_dash() {
        let rates = vec![RateRecord {
            geoid: "24510280500".to_string(),
            year: 2018,
            incident_count: 7,
            population: 0.0,
            population_moe: 11.0,
            crime_rate: None,
            crime_rate_moe: None,
        }];
        let rendered = render_rates_table(&rates);
        assert!(rendered.contains("24510280500"));
        assert!(rendered.contains("Rate / 1,000"));
        assert!(rendered.contains(" - "));
    }

    #[test]
    fn counts_table_lists_every_stage() {
        let counts = StageCounts {
            rows_read: 10,
            located: 4,
            ..StageCounts::default()
        };
        let rendered = render_counts_table(&counts);
        assert!(rendered.contains("property crimes"));
        assert!(rendered.contains("10"));
    }
}
