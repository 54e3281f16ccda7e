pub mod csv;
pub mod json;
pub mod map;
pub mod scatter;
pub mod table;

pub use csv::{duplicates_to_csv, pairs_to_csv, rates_to_csv};
pub use json::render_json;
