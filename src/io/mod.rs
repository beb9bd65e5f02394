//! Raster and vector input/output

pub mod export;
pub mod raster;
pub mod vector;

pub use export::Exporter;
pub use raster::{rasterize_all_touched, read_mask, write_mask, RasterStackLoader};
pub use vector::{ClimateIndices, VectorFeature, VectorReader};
