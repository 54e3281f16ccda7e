use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geo::{BoundingRect, LineString, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

use crate::aggregate::{RateRecord, RATE_SCALE};
use crate::census::TractPopulation;
use crate::geometry::projection::{reproject, Crs};

/// Five-stop viridis, a perceptually uniform sequential scale.
pub const VIRIDIS_5: [&str; 5] = ["#440154", "#3b528b", "#21918c", "#5ec962", "#fde725"];
pub const NO_DATA_COLOR: &str = "#bdbdbd";
const BASE_FILL: &str = "#f2efe9";
const BASE_TRACT_FILL: &str = "#e4e0d8";
const CANVAS_WIDTH: f64 = 960.0;
const CANVAS_PADDING: f64 = 16.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapOptions {
    pub bins: usize,
    pub fill_opacity: f64,
    pub line_color: String,
    pub line_weight: f64,
    pub metric_name: String,
    pub year: i32,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            bins: 4,
            fill_opacity: 0.7,
            line_color: "white".to_string(),
            line_weight: 0.5,
            metric_name: "Property crime rate".to_string(),
            year: 2018,
        }
    }
}

impl MapOptions {
    pub fn legend_title(&self) -> String {
        format!(
            "{}, {} (incidents per {} residents)",
            self.metric_name,
            self.year,
            format_thousands(RATE_SCALE)
        )
    }
}

/// Equal-interval bins spanning the observed minimum and maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorBins {
    pub edges: Vec<f64>,
    pub colors: Vec<String>,
}

impl ColorBins {
    pub fn equal_interval(values: &[f64], bins: usize, scale: &[&str]) -> Option<Self> {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;
        let bins = bins.max(1);
        let step = (max - min) / bins as f64;
        let mut edges = (0..bins).map(|i| min + step * i as f64).collect::<Vec<_>>();
        edges.push(max);
        let colors = (0..bins)
            .map(|i| {
                let t = if bins == 1 {
                    0.0
                } else {
                    i as f64 / (bins - 1) as f64
                };
                sample_scale(scale, t)
            })
            .collect();
        Some(Self { edges, colors })
    }

    pub fn bin_count(&self) -> usize {
        self.colors.len()
    }

    pub fn bin_index(&self, value: f64) -> usize {
        let last = self.bin_count().saturating_sub(1);
        // upper edges are exclusive except for the final bin
        self.edges[1..self.edges.len() - 1]
            .iter()
            .position(|edge| value < *edge)
            .unwrap_or(last)
    }

    pub fn color_for(&self, value: Option<f64>) -> &str {
        match value {
            Some(v) if v.is_finite() => &self.colors[self.bin_index(v)],
            _ => NO_DATA_COLOR,
        }
    }
}

fn sample_scale(scale: &[&str], t: f64) -> String {
    let stops = scale.iter().filter_map(|hex| parse_hex(hex)).collect::<Vec<_>>();
    match stops.len() {
        0 => NO_DATA_COLOR.to_string(),
        1 => to_hex(stops[0]),
        len => {
            let pos = t.clamp(0.0, 1.0) * (len - 1) as f64;
            let idx = (pos.floor() as usize).min(len - 2);
            let frac = pos - idx as f64;
            let (a, b) = (stops[idx], stops[idx + 1]);
            let mix = |x: u8, y: u8| (f64::from(x) + (f64::from(y) - f64::from(x)) * frac).round() as u8;
            to_hex((mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2)))
        }
    }
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn to_hex((r, g, b): (u8, u8, u8)) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

struct Viewport {
    bounds: Rect<f64>,
    scale: f64,
    height: f64,
}

impl Viewport {
    fn fit(bounds: Rect<f64>) -> Self {
        let span_x = bounds.width().max(f64::EPSILON);
        let span_y = bounds.height().max(f64::EPSILON);
        let scale = (CANVAS_WIDTH - 2.0 * CANVAS_PADDING) / span_x;
        Self {
            bounds,
            scale,
            height: span_y * scale + 2.0 * CANVAS_PADDING,
        }
    }

    fn project(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.bounds.min().x) * self.scale + CANVAS_PADDING,
            (self.bounds.max().y - y) * self.scale + CANVAS_PADDING,
        )
    }

    fn path(&self, geometry: &MultiPolygon<f64>) -> String {
        let mut d = String::new();
        for polygon in &geometry.0 {
            self.ring(&mut d, polygon.exterior());
            for interior in polygon.interiors() {
                self.ring(&mut d, interior);
            }
        }
        d
    }

    fn ring(&self, d: &mut String, ring: &LineString<f64>) {
        for (i, c) in ring.0.iter().enumerate() {
            let (x, y) = self.project(c.x, c.y);
            let cmd = if i == 0 { 'M' } else { 'L' };
            let _ = write!(d, "{cmd}{x:.1},{y:.1}");
        }
        d.push('Z');
    }
}

struct DisplayTract<'a> {
    tract: &'a TractPopulation,
    geometry: MultiPolygon<f64>,
}

/// Renders a self-contained HTML choropleth: inline SVG, styles and script,
/// no external assets.
pub fn render_choropleth(
    tracts: &[TractPopulation],
    rates: &[RateRecord],
    options: &MapOptions,
) -> Result<String> {
    let mut display = Vec::with_capacity(tracts.len());
    for tract in tracts {
        // back to geographic first, then web mercator for display
        let geographic = reproject(&tract.geometry, tract.crs, Crs::Wgs84)?;
        let geometry = reproject(&geographic, Crs::Wgs84, Crs::WebMercator)?;
        display.push(DisplayTract { tract, geometry });
    }

    let bounds = display
        .iter()
        .filter_map(|d| d.geometry.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
            )
        })
        .unwrap_or_else(|| Rect::new((0.0, 0.0), (1.0, 1.0)));
    let viewport = Viewport::fit(bounds);

    let rate_by_geoid = rates
        .iter()
        .map(|r| (r.geoid.as_str(), r))
        .collect::<BTreeMap<_, _>>();
    let values = rates.iter().filter_map(|r| r.crime_rate).collect::<Vec<_>>();
    let bins = ColorBins::equal_interval(&values, options.bins, &VIRIDIS_5);

    let mut base_layer = String::new();
    let mut rate_layer = String::new();
    for item in &display {
        let d = viewport.path(&item.geometry);
        let _ = writeln!(
            base_layer,
            r#"<path d="{d}" fill="{BASE_TRACT_FILL}" stroke="{BASE_FILL}" stroke-width="0.5"/>"#
        );
        let Some(rate) = rate_by_geoid.get(item.tract.geoid.as_str()) else {
            continue;
        };
        let fill = match &bins {
            Some(bins) => bins.color_for(rate.crime_rate).to_string(),
            None => NO_DATA_COLOR.to_string(),
        };
        let _ = writeln!(
            rate_layer,
            r#"<path d="{d}" fill="{fill}" fill-opacity="{opacity}" stroke="{stroke}" stroke-width="{weight}" fill-rule="evenodd"><title>{title}</title></path>"#,
            opacity = options.fill_opacity,
            stroke = escape_html(&options.line_color),
            weight = options.line_weight,
            title = escape_html(&tooltip(item.tract, rate)),
        );
    }

    let legend = render_legend(bins.as_ref(), options);
    let title = escape_html(&options.legend_title());
    let height = viewport.height;
    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ margin: 0; font-family: Helvetica, Arial, sans-serif; background: {BASE_FILL}; }}
#map {{ position: relative; width: {CANVAS_WIDTH}px; margin: 0 auto; }}
#map svg {{ display: block; }}
.legend {{ position: absolute; top: 12px; right: 12px; background: rgba(255,255,255,0.9); padding: 8px 10px; border-radius: 4px; font-size: 12px; box-shadow: 0 1px 4px rgba(0,0,0,0.3); }}
.legend .swatch {{ display: inline-block; width: 18px; height: 12px; margin-right: 6px; vertical-align: middle; opacity: {opacity}; }}
.layers {{ position: absolute; top: 12px; left: 12px; background: rgba(255,255,255,0.9); padding: 6px 8px; border-radius: 4px; font-size: 12px; }}
</style>
</head>
<body>
<div id="map">
<svg xmlns="http://www.w3.org/2000/svg" width="{CANVAS_WIDTH}" height="{height:.0}" viewBox="0 0 {CANVAS_WIDTH} {height:.1}">
<g id="layer-base"><rect width="100%" height="100%" fill="{BASE_FILL}"/>
{base_layer}</g>
<g id="layer-crime-rate">
{rate_layer}</g>
</svg>
<div class="layers"><label><input type="checkbox" id="toggle-crime-rate" checked> {metric}</label></div>
{legend}
</div>
<script>
document.getElementById("toggle-crime-rate").addEventListener("change", function (e) {{
  document.getElementById("layer-crime-rate").style.display = e.target.checked ? "" : "none";
}});
</script>
</body>
</html>
"#,
        opacity = options.fill_opacity,
        metric = escape_html(&options.metric_name),
    ))
}

fn render_legend(bins: Option<&ColorBins>, options: &MapOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        r#"<div class="legend"><div><strong>{}</strong></div>"#,
        escape_html(&options.legend_title())
    );
    if let Some(bins) = bins {
        for (i, color) in bins.colors.iter().enumerate() {
            let _ = writeln!(
                out,
                r#"<div><span class="swatch" style="background:{color}"></span>{:.2} - {:.2}</div>"#,
                bins.edges[i],
                bins.edges[i + 1]
            );
        }
    }
    let _ = writeln!(
        out,
        r#"<div><span class="swatch" style="background:{NO_DATA_COLOR}"></span>No data</div></div>"#
    );
    out
}

fn tooltip(tract: &TractPopulation, rate: &RateRecord) -> String {
    let value = match (rate.crime_rate, rate.crime_rate_moe) {
        (Some(v), Some(moe)) => format!("{v:.2} ± {moe:.2}"),
        (Some(v), None) => format!("{v:.2}"),
        _ => "no data".to_string(),
    };
    format!(
        "{} ({}): {} per {} residents, {} incidents, population {:.0}",
        tract.name,
        tract.geoid,
        value,
        format_thousands(RATE_SCALE),
        rate.incident_count,
        rate.population
    )
}

fn format_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0.0 {
        out.insert(0, '-');
    }
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

pub fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating output directory: {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed writing {}", path.display()))
}
