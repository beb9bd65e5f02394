use geo::{Coord, MultiLineString, Point};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Single-band yearly raster (rows x cols), NaN marks missing data
pub type YearBand = Array2<f32>;

/// Boolean raster aligned with a study area's GeoBox
pub type BoolMask = Array2<bool>;

/// Annual shoreline contours keyed by year, in GeoBox CRS
pub type AnnualContours = BTreeMap<i32, MultiLineString<f64>>;

/// Geospatial bounding box in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinate of a fractional (col, row) pixel position
    pub fn pixel_to_map(&self, col: f64, row: f64) -> Coord<f64> {
        Coord {
            x: self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            y: self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        }
    }

    /// Fractional (col, row) pixel position of a map coordinate
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        (col, row)
    }

    /// Ground size of one pixel diagonal
    pub fn pixel_diagonal(&self) -> f64 {
        let a = self.pixel_width.hypot(self.rotation_y);
        let b = self.rotation_x.hypot(self.pixel_height);
        a.hypot(b)
    }
}

/// Pixel grid shared by every raster of a study area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    /// Projection as WKT
    pub crs: String,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl GeoBox {
    pub fn new(crs: impl Into<String>, transform: GeoTransform, width: usize, height: usize) -> Self {
        Self {
            crs: crs.into(),
            transform,
            width,
            height,
        }
    }

    /// Array shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn bounds(&self) -> BoundingBox {
        let corners = [
            self.transform.pixel_to_map(0.0, 0.0),
            self.transform.pixel_to_map(self.width as f64, 0.0),
            self.transform.pixel_to_map(0.0, self.height as f64),
            self.transform.pixel_to_map(self.width as f64, self.height as f64),
        ];
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for c in corners {
            bbox.min_x = bbox.min_x.min(c.x);
            bbox.min_y = bbox.min_y.min(c.y);
            bbox.max_x = bbox.max_x.max(c.x);
            bbox.max_y = bbox.max_y.max(c.y);
        }
        bbox
    }

    /// Map coordinate of a pixel centre
    pub fn pixel_centre(&self, row: usize, col: usize) -> Coord<f64> {
        self.transform.pixel_to_map(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Nearest pixel (row, col) to a map coordinate, if inside the grid
    pub fn nearest_pixel(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (col, row) = self.transform.map_to_pixel(x, y);
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        (col < self.width && row < self.height).then_some((row, col))
    }

    /// Same grid; CRS strings compare exactly
    pub fn matches(&self, other: &GeoBox) -> bool {
        const EPS: f64 = 1e-6;
        let a = self.transform.to_gdal();
        let b = other.transform.to_gdal();
        self.width == other.width
            && self.height == other.height
            && self.crs == other.crs
            && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < EPS)
    }
}

/// The seven per-year measurements produced by the generation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Measurement {
    Index,
    GapfillIndex,
    GapfillTide,
    GapfillCount,
    Stdev,
    Tide,
    Count,
}

impl Measurement {
    pub const ALL: [Measurement; 7] = [
        Measurement::Index,
        Measurement::GapfillIndex,
        Measurement::GapfillTide,
        Measurement::GapfillCount,
        Measurement::Stdev,
        Measurement::Tide,
        Measurement::Count,
    ];

    /// File name part after `{YEAR}_`, without extension
    pub fn file_suffix(&self, water_index: &str) -> String {
        match self {
            Measurement::Index => water_index.to_string(),
            Measurement::GapfillIndex => format!("{}_gapfill", water_index),
            Measurement::GapfillTide => "tide_m_gapfill".to_string(),
            Measurement::GapfillCount => "count_gapfill".to_string(),
            Measurement::Stdev => "stdev".to_string(),
            Measurement::Tide => "tide_m".to_string(),
            Measurement::Count => "count".to_string(),
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Measurement::Index => write!(f, "index"),
            Measurement::GapfillIndex => write!(f, "gapfill_index"),
            Measurement::GapfillTide => write!(f, "gapfill_tide"),
            Measurement::GapfillCount => write!(f, "gapfill_count"),
            Measurement::Stdev => write!(f, "stdev"),
            Measurement::Tide => write!(f, "tide"),
            Measurement::Count => write!(f, "count"),
        }
    }
}

/// All measurements for one year
#[derive(Debug, Clone)]
pub struct YearLayers {
    pub index: YearBand,
    pub gapfill_index: YearBand,
    pub gapfill_tide: YearBand,
    pub gapfill_count: YearBand,
    pub stdev: YearBand,
    pub tide: YearBand,
    pub count: YearBand,
}

impl YearLayers {
    pub fn get(&self, measurement: Measurement) -> &YearBand {
        match measurement {
            Measurement::Index => &self.index,
            Measurement::GapfillIndex => &self.gapfill_index,
            Measurement::GapfillTide => &self.gapfill_tide,
            Measurement::GapfillCount => &self.gapfill_count,
            Measurement::Stdev => &self.stdev,
            Measurement::Tide => &self.tide,
            Measurement::Count => &self.count,
        }
    }
}

/// Yearly raster stack for one study area
#[derive(Debug, Clone)]
pub struct YearlyStack {
    pub geobox: GeoBox,
    pub water_index: String,
    years: BTreeMap<i32, YearLayers>,
}

impl YearlyStack {
    /// Build a stack, checking the year count and that every band fits the GeoBox
    pub fn new(
        geobox: GeoBox,
        water_index: impl Into<String>,
        years: BTreeMap<i32, YearLayers>,
    ) -> CoastResult<Self> {
        if years.len() < 2 {
            return Err(CoastError::MissingRasters(format!(
                "at least two years are required, found {}",
                years.len()
            )));
        }
        let shape = geobox.shape();
        for (year, layers) in &years {
            for m in Measurement::ALL {
                if layers.get(m).dim() != shape {
                    return Err(CoastError::GeoBoxMismatch(format!(
                        "{} {} has shape {:?}, expected {:?}",
                        year,
                        m,
                        layers.get(m).dim(),
                        shape
                    )));
                }
            }
        }
        Ok(Self {
            geobox,
            water_index: water_index.into(),
            years,
        })
    }

    pub fn years(&self) -> Vec<i32> {
        self.years.keys().copied().collect()
    }

    pub fn year(&self, year: i32) -> Option<&YearLayers> {
        self.years.get(&year)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i32, &YearLayers)> {
        self.years.iter()
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Copy of the stack where index and tide are replaced by their 3-year
    /// gap-fill values wherever `count > min_count` does not hold
    pub fn gapfilled(&self, min_count: f32) -> YearlyStack {
        let years = self
            .years
            .iter()
            .map(|(&year, layers)| {
                let mut filled = layers.clone();
                ndarray::Zip::from(&mut filled.index)
                    .and(&mut filled.tide)
                    .and(&layers.count)
                    .and(&layers.gapfill_index)
                    .and(&layers.gapfill_tide)
                    .for_each(|index, tide, &count, &gf_index, &gf_tide| {
                        if !(count > min_count) {
                            *index = gf_index;
                            *tide = gf_tide;
                        }
                    });
                (year, filled)
            })
            .collect();
        YearlyStack {
            geobox: self.geobox.clone(),
            water_index: self.water_index.clone(),
            years,
        }
    }
}

/// Categories of the all-time mask raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MaskClass {
    CoastalZone = 0,
    LandBuffer = 1,
    OceanBuffer = 2,
    Waterbody = 3,
    PersistentNoisy = 4,
    PersistentLowObs = 5,
}

impl MaskClass {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MaskClass::CoastalZone),
            1 => Some(MaskClass::LandBuffer),
            2 => Some(MaskClass::OceanBuffer),
            3 => Some(MaskClass::Waterbody),
            4 => Some(MaskClass::PersistentNoisy),
            5 => Some(MaskClass::PersistentLowObs),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_uncertain(self) -> bool {
        matches!(self, MaskClass::PersistentNoisy | MaskClass::PersistentLowObs)
    }
}

/// Certainty label attached to exported contour segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Certainty {
    Good,
    Uncertain,
}

impl std::fmt::Display for Certainty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Certainty::Good => write!(f, "good"),
            Certainty::Uncertain => write!(f, "uncertain"),
        }
    }
}

/// Climate indices regressed against annual movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClimateIndex {
    Soi,
    Iod,
    Sam,
    Ipo,
    Pdo,
}

impl ClimateIndex {
    pub const ALL: [ClimateIndex; 5] = [
        ClimateIndex::Soi,
        ClimateIndex::Iod,
        ClimateIndex::Sam,
        ClimateIndex::Ipo,
        ClimateIndex::Pdo,
    ];

    /// Column name in the climate index table
    pub fn column(&self) -> &'static str {
        match self {
            ClimateIndex::Soi => "SOI",
            ClimateIndex::Iod => "IOD",
            ClimateIndex::Sam => "SAM",
            ClimateIndex::Ipo => "IPO",
            ClimateIndex::Pdo => "PDO",
        }
    }
}

/// Explanatory series for the per-point regressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Predictor {
    Time,
    Climate(ClimateIndex),
    Tide,
}

impl Predictor {
    /// Export order of the statistics columns
    pub const ALL: [Predictor; 7] = [
        Predictor::Time,
        Predictor::Climate(ClimateIndex::Soi),
        Predictor::Climate(ClimateIndex::Iod),
        Predictor::Climate(ClimateIndex::Sam),
        Predictor::Climate(ClimateIndex::Ipo),
        Predictor::Climate(ClimateIndex::Pdo),
        Predictor::Tide,
    ];

    /// Suffix used in `rate_*`, `sig_*` and `outl_*` fields
    pub fn label(&self) -> &'static str {
        match self {
            Predictor::Time => "time",
            Predictor::Tide => "tide",
            Predictor::Climate(ci) => ci.column(),
        }
    }
}

/// Sample location along the baseline shoreline
#[derive(Debug, Clone, PartialEq)]
pub struct BaselinePoint {
    pub id: usize,
    pub geometry: Point<f64>,
}

/// Annual contour piece with its certainty label
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSegment {
    pub year: i32,
    pub geometry: MultiLineString<f64>,
    pub certainty: Certainty,
}

/// Pipeline stage, used to tag fatal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidateConfig,
    LoadRasters,
    LoadVectors,
    WaterbodyMask,
    Preprocess,
    ExtractContours,
    BaselinePoints,
    RockyShoreClip,
    AnnualMovements,
    Regression,
    ContourCertainty,
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::ValidateConfig => "validate config",
            Stage::LoadRasters => "load rasters",
            Stage::LoadVectors => "load vectors",
            Stage::WaterbodyMask => "waterbody mask",
            Stage::Preprocess => "preprocess",
            Stage::ExtractContours => "extract contours",
            Stage::BaselinePoints => "baseline points",
            Stage::RockyShoreClip => "rocky shore clip",
            Stage::AnnualMovements => "annual movements",
            Stage::Regression => "regression",
            Stage::ContourCertainty => "contour certainty",
            Stage::Export => "export",
        };
        write!(f, "{}", name)
    }
}

/// Error types for coastline processing
#[derive(Debug, thiserror::Error)]
pub enum CoastError {
    #[error("missing rasters: {0}")]
    MissingRasters(String),

    #[error("raster grid mismatch: {0}")]
    GeoBoxMismatch(String),

    #[error("no ocean seed point falls within a connected water region")]
    NoOceanConnectivity,

    #[error("no contours with enough vertices were extracted for any year")]
    EmptyContourSet,

    #[error("no baseline points: {0}")]
    EmptyBaseline(String),

    #[error("layer '{layer}' is missing attribute '{field}'")]
    InvalidAttribute { layer: String, field: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("study area {area}: {stage} failed ({}): {source}", .source.kind())]
    Stage {
        area: String,
        stage: Stage,
        source: Box<CoastError>,
    },
}

impl CoastError {
    /// Short name of the error kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            CoastError::MissingRasters(_) => "MissingRasters",
            CoastError::GeoBoxMismatch(_) => "GeoBoxMismatch",
            CoastError::NoOceanConnectivity => "NoOceanConnectivity",
            CoastError::EmptyContourSet => "EmptyContourSet",
            CoastError::EmptyBaseline(_) => "EmptyBaseline",
            CoastError::InvalidAttribute { .. } => "InvalidAttribute",
            CoastError::Config(_) => "Config",
            CoastError::Processing(_) => "Processing",
            CoastError::Io(_) => "Io",
            CoastError::Gdal(_) => "Gdal",
            CoastError::Json(_) => "Json",
            CoastError::Stage { source, .. } => source.kind(),
        }
    }

    /// Attach the study area and stage to an error
    pub fn at_stage(self, area: impl std::fmt::Display, stage: Stage) -> CoastError {
        match self {
            staged @ CoastError::Stage { .. } => staged,
            other => CoastError::Stage {
                area: area.to_string(),
                stage,
                source: Box::new(other),
            },
        }
    }
}

/// Result type for coastline operations
pub type CoastResult<T> = Result<T, CoastError>;
