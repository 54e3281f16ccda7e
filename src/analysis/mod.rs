pub mod correlation;
pub mod stats;

pub use correlation::{
    join_unemployment, pearson, AnalysisError, BandPoint, CorrelationPair, CorrelationResult,
    DEFAULT_CONFIDENCE,
};
