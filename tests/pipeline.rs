use std::fs;
use std::path::Path;

use crime_atlas::aggregate::RateOptions;
use crime_atlas::analysis::{join_unemployment, pearson};
use crime_atlas::census::{
    CensusQuery, GeoJsonFileProvider, StaticPopulationProvider, TractPopulation,
};
use crime_atlas::geometry::Crs;
use crime_atlas::incidents::filters::{default_categories, DateRange};
use crime_atlas::output::map::MapOptions;
use crime_atlas::output::scatter::ScatterOptions;
use crime_atlas::pipeline::{run_pipeline, write_artifacts, ArtifactPaths, PipelineParams};
use crime_atlas::unemployment::UnemploymentRecord;
use geo::{polygon, MultiPolygon};

const HEADER: &str = "CrimeDate,CrimeTime,CrimeCode,Location,Description,Inside/Outside,Weapon,Post,District,Neighborhood,Longitude,Latitude,Location 1,Premise,Total Incidents";

fn tract(geoid: &str, x0: f64, x1: f64, population: f64, moe: f64) -> TractPopulation {
    TractPopulation {
        geoid: geoid.to_string(),
        name: format!("Census Tract {geoid}"),
        population,
        population_moe: moe,
        geometry: MultiPolygon(vec![polygon![
            (x: x0, y: 39.25),
            (x: x1, y: 39.25),
            (x: x1, y: 39.35),
            (x: x0, y: 39.35),
        ]]),
        crs: Crs::Wgs84,
    }
}

fn row(date: &str, description: &str, lon: &str, lat: &str) -> String {
    format!("{date},12:00:00,5A,100 N CHARLES ST,{description},I,NA,111,CENTRAL,DOWNTOWN,{lon},{lat},\"({lat},{lon})\",ROW/TOWNHOUSE,1")
}

fn write_incidents(dir: &Path, rows: &[String]) -> std::path::PathBuf {
    let path = dir.join("incidents.csv");
    let mut body = String::from(HEADER);
    for r in rows {
        body.push('\n');
        body.push_str(r);
    }
    body.push('\n');
    fs::write(&path, body).unwrap();
    path
}

fn params(incidents_path: std::path::PathBuf) -> PipelineParams {
    PipelineParams {
        incidents_path,
        date_range: DateRange::default(),
        categories: default_categories(),
        query: CensusQuery::default(),
        target_year: 2018,
        rate_options: RateOptions::default(),
        working_crs: Crs::MarylandStatePlane,
    }
}

#[tokio::test]
async fn property_crimes_become_one_tract_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_incidents(
        dir.path(),
        &[
            row("06/01/2018", "BURGLARY", "-76.61", "39.29"),
            row("07/01/2018", "BURGLARY", "-76.60", "39.30"),
            row("07/02/2018", "COMMON ASSAULT", "-76.60", "39.30"),
        ],
    );
    let provider =
        StaticPopulationProvider::new(vec![tract("24510000100", -76.7, -76.5, 2000.0, 50.0)]);

    let output = run_pipeline(&params(path), &provider).await.unwrap();

    assert_eq!(output.counts.rows_read, 3);
    assert_eq!(output.counts.property_crimes, 2);
    assert_eq!(output.rates.len(), 1);
    let rate = &output.rates[0];
    assert_eq!(rate.geoid, "24510000100");
    assert_eq!(rate.year, 2018);
    assert_eq!(rate.incident_count, 2);
    assert!((rate.crime_rate.unwrap() - 1.0).abs() < 1e-12);
    let moe = rate.crime_rate_moe.unwrap();
    assert!(moe.is_finite() && moe > 0.0);
    assert!((moe - 0.025).abs() < 1e-9);
    assert_eq!(output.incidents_sha256.len(), 64);
}

#[tokio::test]
async fn duplicates_are_reported_but_still_counted() {
    let dir = tempfile::tempdir().unwrap();
    let larceny = row("03/14/2017", "LARCENY", "-76.61", "39.29");
    let path = write_incidents(
        dir.path(),
        &[
            larceny.clone(),
            larceny,
            row("13/40/2017", "LARCENY", "-76.61", "39.29"),
            row("03/15/2017", "LARCENY", "NA", "NA"),
            row("03/16/2012", "LARCENY", "-76.61", "39.29"),
        ],
    );
    let provider =
        StaticPopulationProvider::new(vec![tract("24510000100", -76.7, -76.5, 1000.0, 40.0)]);
    let mut params = params(path);
    params.target_year = 2017;

    let output = run_pipeline(&params, &provider).await.unwrap();

    assert_eq!(output.counts.rows_read, 5);
    assert_eq!(output.counts.rows_rejected, 1);
    assert_eq!(output.counts.in_date_range, 3);
    assert_eq!(output.duplicates.groups.len(), 1);
    assert_eq!(output.duplicates.groups[0].count(), 2);
    assert_eq!(output.counts.missing_coordinates, 1);
    assert_eq!(output.rates[0].incident_count, 2);
}

#[tokio::test]
async fn boundary_incident_joins_both_tracts() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_incidents(
        dir.path(),
        &[row("01/05/2018", "AUTO THEFT", "-76.6", "39.25")],
    );
    let provider = StaticPopulationProvider::new(vec![
        tract("24510000100", -76.7, -76.6, 1000.0, 40.0),
        tract("24510000200", -76.6, -76.5, 0.0, 0.0),
    ]);

    let output = run_pipeline(&params(path), &provider).await.unwrap();

    let summary = output
        .rates
        .iter()
        .map(|r| (r.geoid.as_str(), r.incident_count, r.crime_rate.is_some()))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![("24510000100", 1, true), ("24510000200", 1, false)]
    );
}

#[tokio::test]
async fn geojson_provider_feeds_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_incidents(
        dir.path(),
        &[
            row("02/01/2018", "LARCENY FROM AUTO", "-76.65", "39.30"),
            row("02/02/2018", "LARCENY FROM AUTO", "-76.55", "39.30"),
            row("02/03/2018", "LARCENY FROM AUTO", "-76.55", "39.31"),
            row("02/04/2018", "ARSON", "-76.45", "39.30"),
        ],
    );
    let boundaries = dir.path().join("tracts.geojson");
    fs::write(
        &boundaries,
        r#"{"type":"FeatureCollection","features":[
{"type":"Feature","properties":{"GEOID":"24510000100","NAME":"Tract 1","population":1000,"population_moe":30},
 "geometry":{"type":"Polygon","coordinates":[[[-76.7,39.25],[-76.6,39.25],[-76.6,39.35],[-76.7,39.35],[-76.7,39.25]]]}},
{"type":"Feature","properties":{"GEOID":"24510000200","NAME":"Tract 2","population":2000,"population_moe":45},
 "geometry":{"type":"Polygon","coordinates":[[[-76.6,39.25],[-76.5,39.25],[-76.5,39.35],[-76.6,39.35],[-76.6,39.25]]]}},
{"type":"Feature","properties":{"GEOID":"24510000300","NAME":"Tract 3","population":500,"population_moe":20},
 "geometry":{"type":"Polygon","coordinates":[[[-76.5,39.25],[-76.4,39.25],[-76.4,39.35],[-76.5,39.35],[-76.5,39.25]]]}}
]}"#,
    )
    .unwrap();
    let provider = GeoJsonFileProvider::new(&boundaries);
    let params = params(path);

    let output = run_pipeline(&params, &provider).await.unwrap();
    assert_eq!(output.rates.len(), 3);
    assert_eq!(output.provider, "geojson-file");

    let unemployment = [("24510000100", 4.0), ("24510000200", 6.5), ("24510000300", 9.0)]
        .iter()
        .map(|(geoid, rate)| UnemploymentRecord {
            geoid: geoid.to_string(),
            unemployment_rate: *rate,
        })
        .collect::<Vec<_>>();
    let pairs = join_unemployment(&output.rates, &unemployment);
    let correlation = pearson(&pairs).unwrap();
    assert_eq!(correlation.n, 3);

    let out_dir = dir.path().join("out");
    let paths = ArtifactPaths::in_dir(&out_dir);
    let summary = write_artifacts(
        &params,
        &output,
        Some(&correlation),
        &paths,
        &MapOptions::default(),
        &ScatterOptions::default(),
    )
    .unwrap();

    assert_eq!(summary.artifacts.len(), 4);
    let html = fs::read_to_string(&paths.map).unwrap();
    assert!(html.contains("Property crime rate, 2018"));
    assert!(fs::read_to_string(&paths.scatter).unwrap().contains("r = "));
    let csv = fs::read_to_string(&paths.rates).unwrap();
    assert_eq!(csv.lines().count(), 4);
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&paths.summary).unwrap()).unwrap();
    assert_eq!(json["counts"]["property_crimes"], 4);
    assert_eq!(json["incidents_sha256"].as_str().map(str::len), Some(64));
}
