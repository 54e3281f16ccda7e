pub mod builder;
pub mod projection;

pub use builder::{locate_incidents, parse_coordinate, LocateReport, LocatedIncident};
pub use projection::{reproject, transform_coord, Crs, CrsError};
