//! Core coastline processing modules

pub mod baseline;
pub mod certainty;
pub mod contour;
pub mod morphology;
pub mod movements;
pub mod preprocess;
pub mod regression;
pub mod rocky;
pub mod waterbody;

// Re-export main types
pub use baseline::baseline_points;
pub use certainty::ContourCertainty;
pub use contour::{ContourErrors, ContourExtractor, ContourParams};
pub use movements::{AnnualMovements, MovementCalculator, PointRow};
pub use preprocess::{ContourPreprocessor, PreprocessOutput, PreprocessParams};
pub use regression::{RegressionEngine, RegressionParams, RegressionResult};
pub use rocky::RockyShoreClipper;
pub use waterbody::WaterbodyMasker;
