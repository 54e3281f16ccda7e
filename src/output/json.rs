use anyhow::Result;
use serde::Serialize;

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use crate::aggregate::RateRecord;
    use crate::output::json::render_json;

    #[test]
    fn missing_rate_serializes_as_null() {
        let rendered = render_json(&[RateRecord {
            geoid: "24510151000".to_string(),
            year: 2018,
            incident_count: 0,
            population: 0.0,
            population_moe: 0.0,
            crime_rate: None,
            crime_rate_moe: None,
        }])
        .unwrap();
        assert!(rendered.contains("\"crime_rate\": null"));
    }
}
