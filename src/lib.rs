//! coastlines: annual shoreline contours and coastal change statistics
//!
//! Turns per-year water index composites of a study area into annual
//! shoreline contours tagged with a certainty label, and along-shore sample
//! points carrying annual distances to the baseline shoreline together with
//! robust regressions against time, tide and climate indices.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use config::StatsConfig;
pub use pipeline::{CoastlinePipeline, RunSummary};
pub use types::{
    AnnualContours, BaselinePoint, Certainty, CoastError, CoastResult, ContourSegment, GeoBox,
    GeoTransform, MaskClass, Predictor, Stage, YearlyStack,
};
