use std::fmt::Write as _;

use anyhow::Result;

use crate::analysis::{CorrelationResult, DEFAULT_CONFIDENCE};
use crate::output::map::escape_html;

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 480.0;
const MARGIN_LEFT: f64 = 64.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 56.0;
const TICKS: usize = 5;
const BAND_STEPS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterOptions {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub confidence: f64,
}

impl Default for ScatterOptions {
    fn default() -> Self {
        Self {
            title: "Unemployment vs. property crime by census tract".to_string(),
            x_label: "Unemployment rate (%)".to_string(),
            y_label: "Property crime rate (per 1,000 residents)".to_string(),
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

struct Axis {
    min: f64,
    max: f64,
}

impl Axis {
    fn spanning(values: impl Iterator<Item = f64>) -> Self {
        let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if !lo.is_finite() || !hi.is_finite() {
            return Self { min: 0.0, max: 1.0 };
        }
        let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
        Self {
            min: lo - pad,
            max: hi + pad,
        }
    }

    fn scale(&self, value: f64, from: f64, to: f64) -> f64 {
        from + (value - self.min) / (self.max - self.min) * (to - from)
    }

    fn ticks(&self) -> impl Iterator<Item = f64> + '_ {
        (0..TICKS).map(move |i| self.min + (self.max - self.min) * i as f64 / (TICKS - 1) as f64)
    }
}

/// Standalone SVG: tract points, fitted line, shaded confidence band for the
/// mean response, and the coefficient annotation.
pub fn render_scatter_svg(result: &CorrelationResult, options: &ScatterOptions) -> Result<String> {
    let band = result.confidence_band(options.confidence, BAND_STEPS)?;

    let x_axis = Axis::spanning(result.pairs.iter().map(|p| p.unemployment_rate));
    let y_axis = Axis::spanning(
        result
            .pairs
            .iter()
            .map(|p| p.crime_rate)
            .chain(band.iter().flat_map(|b| [b.lower, b.upper])),
    );
    let px = |x: f64| x_axis.scale(x, MARGIN_LEFT, WIDTH - MARGIN_RIGHT);
    let py = |y: f64| y_axis.scale(y, HEIGHT - MARGIN_BOTTOM, MARGIN_TOP);

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="Helvetica, Arial, sans-serif" font-size="12">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="24" text-anchor="middle" font-size="15">{}</text>"#,
        WIDTH / 2.0,
        escape_html(&options.title)
    );

    // axes and ticks
    let (left, right) = (MARGIN_LEFT, WIDTH - MARGIN_RIGHT);
    let (top, bottom) = (MARGIN_TOP, HEIGHT - MARGIN_BOTTOM);
    let _ = writeln!(
        svg,
        r##"<path d="M{left},{top}V{bottom}H{right}" fill="none" stroke="#333"/>"##
    );
    for tick in x_axis.ticks() {
        let x = px(tick);
        let _ = writeln!(
            svg,
            r##"<line x1="{x:.1}" y1="{bottom}" x2="{x:.1}" y2="{:.1}" stroke="#333"/><text x="{x:.1}" y="{:.1}" text-anchor="middle">{tick:.1}</text>"##,
            bottom + 5.0,
            bottom + 18.0
        );
    }
    for tick in y_axis.ticks() {
        let y = py(tick);
        let _ = writeln!(
            svg,
            r##"<line x1="{:.1}" y1="{y:.1}" x2="{left}" y2="{y:.1}" stroke="#333"/><text x="{:.1}" y="{:.1}" text-anchor="end">{tick:.1}</text>"##,
            left - 5.0,
            left - 8.0,
            y + 4.0
        );
    }
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
        (left + right) / 2.0,
        HEIGHT - 14.0,
        escape_html(&options.x_label)
    );
    let _ = writeln!(
        svg,
        r#"<text x="16" y="{:.1}" text-anchor="middle" transform="rotate(-90 16 {:.1})">{}</text>"#,
        (top + bottom) / 2.0,
        (top + bottom) / 2.0,
        escape_html(&options.y_label)
    );

    let upper = band.iter().map(|b| format!("{:.1},{:.1}", px(b.x), py(b.upper)));
    let lower = band
        .iter()
        .rev()
        .map(|b| format!("{:.1},{:.1}", px(b.x), py(b.lower)));
    let outline = upper.chain(lower).collect::<Vec<_>>().join(" ");
    let _ = writeln!(
        svg,
        r##"<polygon class="confidence-band" points="{outline}" fill="#21918c" fill-opacity="0.2" stroke="none"/>"##
    );

    for pair in &result.pairs {
        let _ = writeln!(
            svg,
            r##"<circle cx="{:.1}" cy="{:.1}" r="3" fill="#3b528b" fill-opacity="0.7"><title>{}</title></circle>"##,
            px(pair.unemployment_rate),
            py(pair.crime_rate),
            escape_html(&pair.geoid)
        );
    }

    if let (Some(first), Some(last)) = (band.first(), band.last()) {
        let _ = writeln!(
            svg,
            r##"<line class="regression" x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#440154" stroke-width="2"/>"##,
            px(first.x),
            py(first.fitted),
            px(last.x),
            py(last.fitted)
        );
    }

    let _ = writeln!(
        svg,
        r#"<text class="annotation" x="{:.1}" y="{:.1}">{}</text>"#,
        left + 10.0,
        top + 16.0,
        annotation(result)
    );
    svg.push_str("</svg>\n");
    Ok(svg)
}

pub fn annotation(result: &CorrelationResult) -> String {
    let p = if result.p_value < 1e-4 {
        format!("{:.2e}", result.p_value)
    } else {
        format!("{:.4}", result.p_value)
    };
    format!("r = {:.3}, p = {p}, n = {}", result.r, result.n)
}
