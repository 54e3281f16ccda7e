use anyhow::Result;

use crate::aggregate::RateRecord;
use crate::analysis::CorrelationPair;
use crate::incidents::dedup::DuplicateReport;

fn optional(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{v:.precision$}"))
        .unwrap_or_default()
}

pub fn rates_to_csv(rates: &[RateRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "geoid",
        "year",
        "incident_count",
        "population",
        "population_moe",
        "crime_rate",
        "crime_rate_moe",
    ])?;
    for rate in rates {
        writer.write_record([
            rate.geoid.clone(),
            rate.year.to_string(),
            rate.incident_count.to_string(),
            format!("{:.0}", rate.population),
            format!("{:.0}", rate.population_moe),
            optional(rate.crime_rate, 4),
            optional(rate.crime_rate_moe, 4),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn duplicates_to_csv(report: &DuplicateReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["group", "count", "row_ids", "fields"])?;
    for (idx, group) in report.groups.iter().enumerate() {
        writer.write_record([
            (idx + 1).to_string(),
            group.count().to_string(),
            group
                .row_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            group.fields.join("|"),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn pairs_to_csv(pairs: &[CorrelationPair]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["geoid", "unemployment_rate", "crime_rate"])?;
    for pair in pairs {
        writer.write_record([
            pair.geoid.clone(),
            format!("{:.4}", pair.unemployment_rate),
            format!("{:.4}", pair.crime_rate),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use crate::aggregate::RateRecord;
    use crate::incidents::dedup::{DuplicateGroup, DuplicateReport};
    use crate::output::csv::{duplicates_to_csv, rates_to_csv};

    #[test]
    fn missing_rates_are_blank() {
        let rates = vec![RateRecord {
            geoid: "24510010100".to_string(),
            year: 2018,
            incident_count: 2,
            population: 0.0,
            population_moe: 12.0,
            crime_rate: None,
            crime_rate_moe: None,
        }];
        let csv = rates_to_csv(&rates).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("geoid,year,incident_count,population,population_moe,crime_rate,crime_rate_moe")
        );
        assert_eq!(lines.next(), Some("24510010100,2018,2,0,12,,"));
    }

    #[test]
    fn duplicate_groups_list_row_ids() {
        let report = DuplicateReport {
            groups: vec![DuplicateGroup {
                fields: vec!["06/01/2018".to_string(), "BURGLARY".to_string()],
                row_ids: vec![3, 9],
            }],
        };
        let csv = duplicates_to_csv(&report).unwrap();
        assert!(csv.contains("1,2,3 9,06/01/2018|BURGLARY"));
    }
}
