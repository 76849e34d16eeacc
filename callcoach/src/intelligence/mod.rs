pub mod aggregator;
pub mod analyzer;
pub mod role;
pub mod types;

pub use aggregator::{ResultAggregator, FIVE_WINS_MAPPING_VERSION};
pub use analyzer::{AnalysisUnit, AnalyzerOutput, DimensionAnalyzer};
pub use role::{RoleDecision, RoleSelector, RoleSource};
pub use types::{parse_dimension_response, DimensionResponse};
