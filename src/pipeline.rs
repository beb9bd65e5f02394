//! Per-study-area orchestration of the statistics stages
//!
//! Stages run strictly in sequence. Every failure is tagged with the study
//! area and the stage it came from. A study area without baseline points is
//! not fatal: its contours are still exported and the point outputs skipped.

use crate::config::StatsConfig;
use crate::core::baseline::baseline_points;
use crate::core::certainty::ContourCertainty;
use crate::core::contour::{ContourErrors, ContourExtractor, ContourParams};
use crate::core::movements::{AnnualMovements, MovementCalculator};
use crate::core::preprocess::{ContourPreprocessor, PreprocessOutput, PreprocessParams};
use crate::core::regression::{RegressionEngine, RegressionParams};
use crate::core::rocky::{RockyShoreClipper, PRIMARY_SUBSTRATE, SECONDARY_SUBSTRATE};
use crate::core::waterbody::WaterbodyMasker;
use crate::io::export::Exporter;
use crate::io::raster::{read_mask, study_area_dir, write_mask, RasterStackLoader, ALL_TIME_MASK_FILE};
use crate::io::vector::{ClimateIndices, VectorFeature, VectorReader};
use crate::types::{
    AnnualContours, BaselinePoint, CoastError, CoastResult, ContourSegment, GeoBox, Stage,
    YearlyStack,
};
use chrono::{DateTime, Utc};
use geo::{MultiPolygon, Point};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// Vector inputs of one study area, in GeoBox CRS
#[derive(Debug, Clone)]
pub struct StudyAreaVectors {
    pub waterbodies: Vec<VectorFeature>,
    pub waterbody_modifications: Vec<VectorFeature>,
    pub ocean_points: Vec<Point<f64>>,
    pub smartline: Vec<VectorFeature>,
    pub study_area: MultiPolygon<f64>,
    pub climate: ClimateIndices,
}

/// Contours and point statistics of one study area
#[derive(Debug, Clone)]
pub struct Measurements {
    pub contours: AnnualContours,
    pub baseline_year: i32,
    /// `None` when no baseline points survived
    pub movements: Option<AnnualMovements>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub study_area: String,
    pub run_name: String,
    pub started_at: DateTime<Utc>,
    pub years: Vec<i32>,
    pub baseline_year: i32,
    pub contour_features: usize,
    pub stats_points: Option<usize>,
    pub mask_path: PathBuf,
    pub contours_path: PathBuf,
    pub stats_path: Option<PathBuf>,
    /// Wall-clock seconds
    pub processing_time: f64,
}

/// Runs the statistics stages for study areas of one run
pub struct CoastlinePipeline {
    config: StatsConfig,
}

impl CoastlinePipeline {
    pub fn new(config: StatsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Process one study area from raster inputs to exported vectors
    pub fn run(&self, study_area: &str, run_name: &str) -> CoastResult<RunSummary> {
        let started_at = Utc::now();
        let start_time = Instant::now();
        log::info!("Processing study area {} ({})", study_area, run_name);
        self.config
            .validate()
            .map_err(|e| e.at_stage(study_area, Stage::ValidateConfig))?;

        let area_dir = study_area_dir(&self.config.inputs.raster_root, study_area, run_name);
        let stack = RasterStackLoader::new(self.config.water_index.as_str())
            .load(&area_dir, study_area)
            .map_err(|e| e.at_stage(study_area, Stage::LoadRasters))?;

        let vectors = self
            .load_vectors(&stack.geobox, study_area)
            .map_err(|e| e.at_stage(study_area, Stage::LoadVectors))?;

        let prepared = self.preprocess(study_area, &stack, &vectors)?;
        let mask_path = area_dir.join(ALL_TIME_MASK_FILE);
        write_mask(&mask_path, &prepared.all_time_mask, &stack.geobox)
            .map_err(|e| e.at_stage(study_area, Stage::Preprocess))?;

        let measurements = self.measure(study_area, &prepared, &vectors)?;

        let segments = self
            .certainty_from_file(&mask_path, &measurements.contours, &stack.geobox)
            .map_err(|e| e.at_stage(study_area, Stage::ContourCertainty))?;

        let exporter = Exporter::new(
            &area_dir,
            study_area,
            run_name,
            &self.config.output_suffix(),
            stack.geobox.crs.as_str(),
        )
        .map_err(|e| e.at_stage(study_area, Stage::Export))?;
        let contour_features = exporter
            .write_contours(&segments, &vectors.study_area)
            .map_err(|e| e.at_stage(study_area, Stage::Export))?;
        let stats_points = match &measurements.movements {
            Some(movements) => Some(
                exporter
                    .write_stats(movements, &vectors.study_area)
                    .map_err(|e| e.at_stage(study_area, Stage::Export))?,
            ),
            None => None,
        };

        let summary = RunSummary {
            study_area: study_area.to_string(),
            run_name: run_name.to_string(),
            started_at,
            years: stack.years(),
            baseline_year: measurements.baseline_year,
            contour_features,
            stats_points,
            mask_path,
            contours_path: exporter.contours_path(false),
            stats_path: stats_points.map(|_| exporter.stats_path(false)),
            processing_time: start_time.elapsed().as_secs_f64(),
        };
        log::info!(
            "Study area {} finished in {:.1} s",
            study_area,
            summary.processing_time
        );
        Ok(summary)
    }

    /// Read every vector input clipped to the GeoBox
    pub fn load_vectors(&self, geobox: &GeoBox, study_area: &str) -> CoastResult<StudyAreaVectors> {
        let inputs = &self.config.inputs;
        Ok(StudyAreaVectors {
            waterbodies: VectorReader::read_features(
                &inputs.waterbodies,
                geobox,
                &["FEATURETYPE", "PERENNIALITY"],
            )?,
            waterbody_modifications: VectorReader::read_features(
                &inputs.waterbody_modifications,
                geobox,
                &["type"],
            )?,
            ocean_points: VectorReader::read_points(&inputs.ocean_points, geobox)?,
            smartline: VectorReader::read_features(
                &inputs.smartline,
                geobox,
                &[PRIMARY_SUBSTRATE, SECONDARY_SUBSTRATE],
            )?,
            study_area: VectorReader::read_study_area(&inputs.study_areas, geobox, study_area)?,
            climate: VectorReader::read_climate_indices(&inputs.climate_indices)?,
        })
    }

    /// Waterbody mask and contour preprocessing
    pub fn preprocess(
        &self,
        study_area: &str,
        stack: &YearlyStack,
        vectors: &StudyAreaVectors,
    ) -> CoastResult<PreprocessOutput> {
        let waterbodies = WaterbodyMasker::new(&stack.geobox)
            .build(&vectors.waterbodies, &vectors.waterbody_modifications)
            .map_err(|e| e.at_stage(study_area, Stage::WaterbodyMask))?;

        let c = &self.config;
        let params = PreprocessParams {
            threshold: c.index_threshold,
            buffer_pixels: c.buffer_pixels,
            stdev_threshold: c.stdev_threshold,
            lowobs_threshold: c.lowobs_threshold,
            persistent_fraction: c.persistent_fraction,
            gapfill_min_count: c.gapfill_min_count,
            all_time_water_fraction: c.all_time_water_fraction,
            ..PreprocessParams::default()
        };
        ContourPreprocessor::with_params(params)
            .process(stack, &waterbodies, &vectors.ocean_points)
            .map_err(|e| e.at_stage(study_area, Stage::Preprocess))
    }

    /// Contours, baseline points, movements and regressions
    pub fn measure(
        &self,
        study_area: &str,
        prepared: &PreprocessOutput,
        vectors: &StudyAreaVectors,
    ) -> CoastResult<Measurements> {
        let c = &self.config;
        let geobox = &prepared.filled.geobox;
        let contours = ContourExtractor::with_params(ContourParams {
            threshold: c.index_threshold,
            min_vertices: c.min_vertices,
            errors: ContourErrors::Raise,
        })
        .extract(&prepared.masked_index, geobox)
        .map_err(|e| e.at_stage(study_area, Stage::ExtractContours))?;

        let years = prepared.filled.years();
        let baseline_year = match c.baseline_year.or_else(|| years.last().copied()) {
            Some(year) => year,
            None => {
                return Err(CoastError::MissingRasters("stack has no years".to_string())
                    .at_stage(study_area, Stage::BaselinePoints))
            }
        };

        let movements = match self.sample_points(study_area, &contours, baseline_year, vectors)? {
            Some(points) => {
                let mut movements = MovementCalculator::new(&prepared.filled, &contours, baseline_year)
                    .calculate(&points)
                    .map_err(|e| e.at_stage(study_area, Stage::AnnualMovements))?;
                RegressionEngine::with_params(RegressionParams {
                    mad_threshold: c.mad_threshold,
                })
                .calculate_regressions(&mut movements, &vectors.climate)
                .map_err(|e| e.at_stage(study_area, Stage::Regression))?;
                Some(movements)
            }
            None => None,
        };

        Ok(Measurements {
            contours,
            baseline_year,
            movements,
        })
    }

    /// Baseline points after rocky-shore clipping; `None` when nothing is left
    fn sample_points(
        &self,
        study_area: &str,
        contours: &AnnualContours,
        baseline_year: i32,
        vectors: &StudyAreaVectors,
    ) -> CoastResult<Option<Vec<BaselinePoint>>> {
        let points = match baseline_points(contours, baseline_year, self.config.point_spacing) {
            Ok(points) => points,
            Err(CoastError::EmptyBaseline(reason)) => {
                log::warn!("Study area {}: skipping point statistics, {}", study_area, reason);
                return Ok(None);
            }
            Err(e) => return Err(e.at_stage(study_area, Stage::BaselinePoints)),
        };
        log::info!("Generated {} baseline points for {}", points.len(), baseline_year);

        let clipped = RockyShoreClipper::new(self.config.rocky_buffer)
            .clip(points, &vectors.smartline)
            .map_err(|e| e.at_stage(study_area, Stage::RockyShoreClip))?;
        match clipped {
            Some(points) if !points.is_empty() => Ok(Some(points)),
            _ => {
                log::warn!(
                    "Study area {}: no baseline points remain after rocky shore clipping",
                    study_area
                );
                Ok(None)
            }
        }
    }

    fn certainty_from_file(
        &self,
        mask_path: &std::path::Path,
        contours: &AnnualContours,
        geobox: &GeoBox,
    ) -> CoastResult<Vec<ContourSegment>> {
        let (mask, mask_geobox) = read_mask(mask_path)?;
        if !mask_geobox.matches(geobox) {
            return Err(CoastError::GeoBoxMismatch(format!(
                "{} does not match the study area grid",
                mask_path.display()
            )));
        }
        Ok(ContourCertainty::new(self.config.certainty_simplify).classify(contours, &mask, geobox))
    }
}
