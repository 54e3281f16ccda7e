pub mod aggregate;
pub mod analysis;
pub mod census;
pub mod config;
pub mod geometry;
pub mod incidents;
pub mod output;
pub mod pipeline;
pub mod unemployment;
