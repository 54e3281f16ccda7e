use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::RateRecord;
use crate::analysis::stats::{student_t_quantile, student_t_two_sided_p};
use crate::unemployment::UnemploymentRecord;

pub const DEFAULT_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("need at least 3 tract pairs for a correlation, got {0}")]
    InsufficientData(usize),
    #[error("{0} has zero variance; correlation is undefined")]
    ZeroVariance(&'static str),
    #[error("confidence level must be in (0, 1), got {0}")]
    InvalidConfidence(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub geoid: String,
    pub unemployment_rate: f64,
    pub crime_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub n: usize,
    pub r: f64,
    pub p_value: f64,
    pub slope: f64,
    pub intercept: f64,
    /// Residual standard error of the fitted line.
    pub residual_se: f64,
    pub mean_x: f64,
    pub sxx: f64,
    pub pairs: Vec<CorrelationPair>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPoint {
    pub x: f64,
    pub fitted: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Inner join on tract id. Tracts missing from either side, or whose crime
/// rate is undefined, are left out.
pub fn join_unemployment(
    rates: &[RateRecord],
    unemployment: &[UnemploymentRecord],
) -> Vec<CorrelationPair> {
    let mut by_geoid = BTreeMap::new();
    let mut duplicate_geoids = 0usize;
    for record in unemployment {
        if by_geoid
            .insert(record.geoid.as_str(), record.unemployment_rate)
            .is_some()
        {
            duplicate_geoids += 1;
        }
    }
    if duplicate_geoids > 0 {
        warn!("{duplicate_geoids} duplicate tract ids in unemployment table; keeping the last value");
    }

    let mut pairs = Vec::new();
    let mut undefined_rate = 0usize;
    for rate in rates {
        let Some(&unemployment_rate) = by_geoid.get(rate.geoid.as_str()) else {
            continue;
        };
        let Some(crime_rate) = rate.crime_rate else {
            undefined_rate += 1;
            continue;
        };
        pairs.push(CorrelationPair {
            geoid: rate.geoid.clone(),
            unemployment_rate,
            crime_rate,
        });
    }
    if undefined_rate > 0 {
        warn!("{undefined_rate} joined tracts have no crime rate and were excluded");
    }
    info!(
        pairs = pairs.len(),
        rates = rates.len(),
        unemployment = unemployment.len(),
        "joined crime rates to unemployment"
    );
    pairs
}

/// Pearson r between unemployment (x) and crime rate (y) with a two-sided
/// t-test on n - 2 degrees of freedom, plus the least-squares line.
pub fn pearson(pairs: &[CorrelationPair]) -> Result<CorrelationResult, AnalysisError> {
    let n = pairs.len();
    if n < 3 {
        return Err(AnalysisError::InsufficientData(n));
    }
    let nf = n as f64;
    let mean_x = pairs.iter().map(|p| p.unemployment_rate).sum::<f64>() / nf;
    let mean_y = pairs.iter().map(|p| p.crime_rate).sum::<f64>() / nf;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in pairs {
        let dx = p.unemployment_rate - mean_x;
        let dy = p.crime_rate - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx <= 0.0 {
        return Err(AnalysisError::ZeroVariance("unemployment rate"));
    }
    if syy <= 0.0 {
        return Err(AnalysisError::ZeroVariance("crime rate"));
    }

    let r = (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0);
    let df = nf - 2.0;
    let p_value = if (1.0 - r.abs()) < f64::EPSILON {
        0.0
    } else {
        let t = r * (df / (1.0 - r * r)).sqrt();
        student_t_two_sided_p(t, df)
    };

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let sse = (syy - slope * sxy).max(0.0);
    let residual_se = (sse / df).sqrt();

    Ok(CorrelationResult {
        n,
        r,
        p_value,
        slope,
        intercept,
        residual_se,
        mean_x,
        sxx,
        pairs: pairs.to_vec(),
    })
}

impl CorrelationResult {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// Confidence band for the mean response at `steps` evenly spaced x values
    /// spanning the observed range.
    pub fn confidence_band(
        &self,
        confidence: f64,
        steps: usize,
    ) -> Result<Vec<BandPoint>, AnalysisError> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(AnalysisError::InvalidConfidence(confidence));
        }
        let (min_x, max_x) = self
            .pairs
            .iter()
            .map(|p| p.unemployment_rate)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                (lo.min(x), hi.max(x))
            });
        let steps = steps.max(2);
        let nf = self.n as f64;
        let t_crit = student_t_quantile(0.5 + confidence / 2.0, nf - 2.0);

        let band = (0..steps)
            .map(|i| {
                let x = min_x + (max_x - min_x) * i as f64 / (steps - 1) as f64;
                let fitted = self.predict(x);
                let se = self.residual_se * (1.0 / nf + (x - self.mean_x).powi(2) / self.sxx).sqrt();
                BandPoint {
                    x,
                    fitted,
                    lower: fitted - t_crit * se,
                    upper: fitted + t_crit * se,
                }
            })
            .collect();
        Ok(band)
    }
}

#[cfg(test)]
mod tests {
    use crate::aggregate::RateRecord;
    use crate::analysis::correlation::{join_unemployment, pearson, AnalysisError, CorrelationPair};
    use crate::unemployment::UnemploymentRecord;

    fn pair(geoid: &str, x: f64, y: f64) -> CorrelationPair {
        CorrelationPair {
            geoid: geoid.to_string(),
            unemployment_rate: x,
            crime_rate: y,
        }
    }

    fn rate(geoid: &str, crime_rate: Option<f64>) -> RateRecord {
        RateRecord {
            geoid: geoid.to_string(),
            year: 2018,
            incident_count: 1,
            population: 1000.0,
            population_moe: 10.0,
            crime_rate,
            crime_rate_moe: crime_rate.map(|_| 0.1),
        }
    }

    #[test]
    fn inner_join_drops_unmatched_and_undefined_rates() {
        let rates = vec![
            rate("A", Some(10.0)),
            rate("B", Some(20.0)),
            rate("C", None),
            rate("D", Some(5.0)),
        ];
        let unemployment = vec![
            UnemploymentRecord {
                geoid: "A".to_string(),
                unemployment_rate: 4.0,
            },
            UnemploymentRecord {
                geoid: "C".to_string(),
                unemployment_rate: 9.0,
            },
            UnemploymentRecord {
                geoid: "D".to_string(),
                unemployment_rate: 2.0,
            },
            UnemploymentRecord {
                geoid: "Z".to_string(),
                unemployment_rate: 1.0,
            },
        ];
        let pairs = join_unemployment(&rates, &unemployment);
        let geoids = pairs.iter().map(|p| p.geoid.as_str()).collect::<Vec<_>>();
        assert_eq!(geoids, vec!["A", "D"]);
        assert_eq!(pairs[0].unemployment_rate, 4.0);
        assert_eq!(pairs[0].crime_rate, 10.0);
    }

    #[test]
    fn duplicate_unemployment_tracts_keep_the_last_value() {
        let rates = vec![rate("A", Some(10.0)), rate("B", Some(20.0))];
        let unemployment = [("A", 4.0), ("B", 6.0), ("A", 7.5)]
            .iter()
            .map(|(geoid, rate)| UnemploymentRecord {
                geoid: geoid.to_string(),
                unemployment_rate: *rate,
            })
            .collect::<Vec<_>>();
        let pairs = join_unemployment(&rates, &unemployment);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].geoid, "A");
        assert_eq!(pairs[0].unemployment_rate, 7.5);
        assert_eq!(pairs[1].unemployment_rate, 6.0);
    }

    #[test]
    fn perfectly_linear_data_has_unit_correlation() {
        let pairs = (0..6)
            .map(|i| pair(&i.to_string(), i as f64, 3.0 * i as f64 + 1.0))
            .collect::<Vec<_>>();
        let result = pearson(&pairs).unwrap();
        assert!((result.r - 1.0).abs() < 1e-12);
        assert!(result.p_value < 1e-9);
        assert!((result.slope - 3.0).abs() < 1e-12);
        assert!((result.intercept - 1.0).abs() < 1e-12);
    }

    #[test]
    fn matches_reference_correlation() {
        // r = 0.7745966692414834, p = 0.1240 (two-sided, df = 3)
        let pairs = vec![
            pair("a", 1.0, 2.0),
            pair("b", 2.0, 4.0),
            pair("c", 3.0, 5.0),
            pair("d", 4.0, 4.0),
            pair("e", 5.0, 5.0),
        ];
        let result = pearson(&pairs).unwrap();
        assert!((result.r - 0.774_596_669_241_483_4).abs() < 1e-12);
        assert!((result.p_value - 0.1240).abs() < 5e-3, "{}", result.p_value);
        assert_eq!(result.n, 5);
    }

    #[test]
    fn too_few_or_constant_pairs_are_errors() {
        let two = vec![pair("a", 1.0, 1.0), pair("b", 2.0, 3.0)];
        assert_eq!(pearson(&two), Err(AnalysisError::InsufficientData(2)));
        let flat = vec![pair("a", 1.0, 1.0), pair("b", 1.0, 3.0), pair("c", 1.0, 2.0)];
        assert_eq!(
            pearson(&flat),
            Err(AnalysisError::ZeroVariance("unemployment rate"))
        );
    }

    #[test]
    fn confidence_band_brackets_fit_and_widens_at_edges() {
        let pairs = vec![
            pair("a", 1.0, 2.1),
            pair("b", 2.0, 3.9),
            pair("c", 3.0, 6.2),
            pair("d", 4.0, 7.8),
            pair("e", 5.0, 10.1),
            pair("f", 6.0, 11.7),
        ];
        let result = pearson(&pairs).unwrap();
        let band = result.confidence_band(0.95, 11).unwrap();
        assert_eq!(band.len(), 11);
        assert_eq!(band[0].x, 1.0);
        assert_eq!(band[10].x, 6.0);
        for point in &band {
            assert!(point.lower <= point.fitted && point.fitted <= point.upper);
        }
        let width = |i: usize| band[i].upper - band[i].lower;
        assert!(width(0) > width(5));
        assert!(width(10) > width(5));
        assert!(result.confidence_band(1.5, 10).is_err());
    }
}
