//! Run configuration for the coastline statistics stage

use crate::types::{CoastError, CoastResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Locations of every input dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    /// Directory holding `{area}_{run}` raster folders
    pub raster_root: PathBuf,
    pub waterbodies: PathBuf,
    pub waterbody_modifications: PathBuf,
    /// Points known to lie in the ocean (tide modelling points)
    pub ocean_points: PathBuf,
    pub smartline: PathBuf,
    pub study_areas: PathBuf,
    pub climate_indices: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            raster_root: PathBuf::from("output_data"),
            waterbodies: PathBuf::from("input_data/SurfaceHydrologyPolygonsRegional.gdb"),
            waterbody_modifications: PathBuf::from("input_data/estuary_mask_modifications.geojson"),
            ocean_points: PathBuf::from("input_data/tide_points_coastal.geojson"),
            smartline: PathBuf::from("input_data/Smartline.gdb"),
            study_areas: PathBuf::from("input_data/50km_albers_grid_clipped.geojson"),
            climate_indices: PathBuf::from("input_data/climate_indices.csv"),
        }
    }
}

/// Thresholds and parameters for a statistics run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub water_index: String,
    pub index_threshold: f32,
    /// Reference year for sample points; latest stack year when unset
    pub baseline_year: Option<i32>,
    pub min_vertices: usize,
    /// Along-shore spacing of sample points (metres)
    pub point_spacing: f64,
    /// Buffer applied to Smartline features (metres)
    pub rocky_buffer: f64,
    /// Coastal buffer half-width in pixels
    pub buffer_pixels: usize,
    /// Modified z-score above which a year is an outlier
    pub mad_threshold: f64,
    pub stdev_threshold: f32,
    pub lowobs_threshold: f32,
    /// Fraction of years a pixel must be noisy/low-obs to be persistent
    pub persistent_fraction: f32,
    /// Observation count above which annual values are kept over gap fill
    pub gapfill_min_count: f32,
    /// Fraction of years a pixel must be water to count as all-time ocean
    pub all_time_water_fraction: f32,
    /// Simplification tolerance for uncertainty polygons (metres)
    pub certainty_simplify: f64,
    pub inputs: InputPaths,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            water_index: "mndwi".to_string(),
            index_threshold: 0.0,
            baseline_year: None,
            min_vertices: 30,
            point_spacing: 30.0,
            rocky_buffer: 50.0,
            buffer_pixels: 33,
            mad_threshold: 3.5,
            stdev_threshold: 0.25,
            lowobs_threshold: 5.0,
            persistent_fraction: 0.5,
            gapfill_min_count: 5.0,
            all_time_water_fraction: 0.9,
            certainty_simplify: 30.0,
            inputs: InputPaths::default(),
        }
    }
}

impl StatsConfig {
    /// Load a configuration from JSON; missing keys take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CoastResult<Self> {
        log::info!("Reading configuration from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: StatsConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoastResult<()> {
        if self.water_index.is_empty() {
            return Err(CoastError::Config("water_index must not be empty".to_string()));
        }
        if !(self.point_spacing > 0.0) {
            return Err(CoastError::Config(format!(
                "point_spacing must be positive, got {}",
                self.point_spacing
            )));
        }
        if self.min_vertices < 2 {
            return Err(CoastError::Config(format!(
                "min_vertices must be at least 2, got {}",
                self.min_vertices
            )));
        }
        if self.buffer_pixels == 0 {
            return Err(CoastError::Config("buffer_pixels must be at least 1".to_string()));
        }
        if !(self.mad_threshold > 0.0) {
            return Err(CoastError::Config(format!(
                "mad_threshold must be positive, got {}",
                self.mad_threshold
            )));
        }
        Ok(())
    }

    /// `{index}_{threshold:.2}` part shared by all output names
    pub fn output_suffix(&self) -> String {
        format!("{}_{:.2}", self.water_index, self.index_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StatsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output_suffix(), "mndwi_0.00");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"index_threshold": 0.1, "baseline_year": 2018}}"#).unwrap();
        let config = StatsConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.baseline_year, Some(2018));
        assert_eq!(config.min_vertices, 30);
        assert_eq!(config.output_suffix(), "mndwi_0.10");
        assert_eq!(config.inputs.raster_root, PathBuf::from("output_data"));
    }

    #[test]
    fn test_invalid_spacing_rejected() {
        let config = StatsConfig {
            point_spacing: 0.0,
            ..StatsConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoastError::Config(_))));
    }
}
