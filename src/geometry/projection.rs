//! Coordinate reference systems used by the pipeline.
//!
//! EPSG:6487 is NAD83(2011) / Maryland, a Lambert Conformal Conic (2SP)
//! projection on the GRS80 ellipsoid in metres. The WGS84 to NAD83(2011)
//! datum shift is treated as the null transformation.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt::{Display, Formatter};

use geo::{Coord, MapCoords};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const GRS80_A: f64 = 6_378_137.0;
const GRS80_INV_F: f64 = 298.257_222_101;
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;
// Web Mercator is undefined at the poles
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Crs {
    Wgs84,
    MarylandStatePlane,
    WebMercator,
}

impl Crs {
    pub fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::MarylandStatePlane => 6487,
            Self::WebMercator => 3857,
        }
    }

    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        match code {
            4326 => Ok(Self::Wgs84),
            6487 => Ok(Self::MarylandStatePlane),
            3857 => Ok(Self::WebMercator),
            other => Err(CrsError::Unsupported(other)),
        }
    }

    pub fn is_geographic(self) -> bool {
        matches!(self, Self::Wgs84)
    }
}

impl Display for Crs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CrsError {
    #[error("unsupported coordinate reference system EPSG:{0}")]
    Unsupported(u32),
    #[error("coordinate ({x}, {y}) is outside the valid domain of {crs}")]
    OutOfDomain { crs: Crs, x: f64, y: f64 },
}

/// Lambert Conformal Conic with two standard parallels (Snyder, USGS PP 1395).
#[derive(Debug, Clone, Copy)]
struct LambertConformalConic {
    e: f64,
    n: f64,
    af: f64,
    rho0: f64,
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
}

impl LambertConformalConic {
    #[allow(clippy::too_many_arguments)]
    fn new(
        a: f64,
        inv_f: f64,
        lat1: f64,
        lat2: f64,
        lat0: f64,
        lon0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let f = 1.0 / inv_f;
        let e = (2.0 * f - f * f).sqrt();
        let (phi1, phi2, phi0) = (lat1.to_radians(), lat2.to_radians(), lat0.to_radians());
        let m1 = msfn(e, phi1);
        let m2 = msfn(e, phi2);
        let t1 = tsfn(e, phi1);
        let t2 = tsfn(e, phi2);
        let t0 = tsfn(e, phi0);
        let n = (m1.ln() - m2.ln()) / (t1.ln() - t2.ln());
        let big_f = m1 / (n * t1.powf(n));
        let af = a * big_f;
        Self {
            e,
            n,
            af,
            rho0: af * t0.powf(n),
            lon0: lon0.to_radians(),
            false_easting,
            false_northing,
        }
    }

    fn forward(&self, lon: f64, lat: f64) -> Result<Coord<f64>, CrsError> {
        let phi = lat.to_radians();
        if phi.abs() >= FRAC_PI_2 {
            return Err(CrsError::OutOfDomain {
                crs: Crs::MarylandStatePlane,
                x: lon,
                y: lat,
            });
        }
        let rho = self.af * tsfn(self.e, phi).powf(self.n);
        let theta = self.n * (lon.to_radians() - self.lon0);
        Ok(Coord {
            x: self.false_easting + rho * theta.sin(),
            y: self.false_northing + self.rho0 - rho * theta.cos(),
        })
    }

    fn inverse(&self, x: f64, y: f64) -> Coord<f64> {
        let dx = x - self.false_easting;
        let dy = self.rho0 - (y - self.false_northing);
        let sign = self.n.signum();
        let rho = sign * dx.hypot(dy);
        let theta = (sign * dx).atan2(sign * dy);
        let t = (rho / self.af).powf(1.0 / self.n);

        let half_e = self.e / 2.0;
        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..15 {
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(half_e)).atan();
            let converged = (next - phi).abs() < 1e-14;
            phi = next;
            if converged {
                break;
            }
        }
        Coord {
            x: (theta / self.n + self.lon0).to_degrees(),
            y: phi.to_degrees(),
        }
    }
}

fn msfn(e: f64, phi: f64) -> f64 {
    let es = e * phi.sin();
    phi.cos() / (1.0 - es * es).sqrt()
}

fn tsfn(e: f64, phi: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

static MARYLAND: Lazy<LambertConformalConic> = Lazy::new(|| {
    LambertConformalConic::new(
        GRS80_A,
        GRS80_INV_F,
        39.0 + 27.0 / 60.0,
        38.0 + 18.0 / 60.0,
        37.0 + 40.0 / 60.0,
        -77.0,
        400_000.0,
        0.0,
    )
});

fn to_geographic(crs: Crs, coord: Coord<f64>) -> Result<Coord<f64>, CrsError> {
    match crs {
        Crs::Wgs84 => Ok(coord),
        Crs::MarylandStatePlane => Ok(MARYLAND.inverse(coord.x, coord.y)),
        Crs::WebMercator => Ok(Coord {
            x: (coord.x / WEB_MERCATOR_RADIUS).to_degrees(),
            y: (2.0 * (coord.y / WEB_MERCATOR_RADIUS).exp().atan() - FRAC_PI_2).to_degrees(),
        }),
    }
}

fn from_geographic(crs: Crs, coord: Coord<f64>) -> Result<Coord<f64>, CrsError> {
    match crs {
        Crs::Wgs84 => Ok(coord),
        Crs::MarylandStatePlane => MARYLAND.forward(coord.x, coord.y),
        Crs::WebMercator => {
            if coord.y.abs() > WEB_MERCATOR_MAX_LAT {
                return Err(CrsError::OutOfDomain {
                    crs,
                    x: coord.x,
                    y: coord.y,
                });
            }
            Ok(Coord {
                x: WEB_MERCATOR_RADIUS * coord.x.to_radians(),
                y: WEB_MERCATOR_RADIUS * (FRAC_PI_4 + coord.y.to_radians() / 2.0).tan().ln(),
            })
        }
    }
}

/// Geographic coordinates are (longitude, latitude) in degrees.
pub fn transform_coord(from: Crs, to: Crs, coord: Coord<f64>) -> Result<Coord<f64>, CrsError> {
    if from == to {
        return Ok(coord);
    }
    let geographic = to_geographic(from, coord)?;
    from_geographic(to, geographic)
}

pub fn reproject<G>(geometry: &G, from: Crs, to: Crs) -> Result<G::Output, CrsError>
where
    G: MapCoords<f64, f64>,
{
    geometry.try_map_coords(|coord| transform_coord(from, to, coord))
}
