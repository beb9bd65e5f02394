use crate::core::regression::RegressionResult;
use crate::types::{
    AnnualContours, BaselinePoint, CoastError, CoastResult, GeoBox, Predictor, YearBand,
    YearlyStack,
};
use geo::{Closest, ClosestPoint, EuclideanDistance, MultiLineString, Point};
use std::collections::BTreeMap;

/// Per-point annual measurements and, once computed, regression statistics
#[derive(Debug, Clone)]
pub struct PointRow {
    pub point: BaselinePoint,
    /// Signed distance to each year's contour (metres, 2 dp), aligned with the stack years
    pub distances: Vec<f64>,
    /// Nearest point on each year's contour
    pub nearest: Vec<Option<Point<f64>>>,
    /// Tide height at the point for each year
    pub tides: Vec<f64>,
    pub stats: BTreeMap<Predictor, RegressionResult>,
}

/// Annual movement table for all sample points
#[derive(Debug, Clone)]
pub struct AnnualMovements {
    /// Stack years, ascending; column order of every row
    pub years: Vec<i32>,
    pub rows: Vec<PointRow>,
}

impl AnnualMovements {
    pub fn year_column(&self, year: i32) -> Option<usize> {
        self.years.iter().position(|&y| y == year)
    }
}

/// Measures shoreline movement at each sample point relative to the baseline year
pub struct MovementCalculator<'a> {
    stack: &'a YearlyStack,
    contours: &'a AnnualContours,
    baseline_year: i32,
}

impl<'a> MovementCalculator<'a> {
    /// `stack` must be the gap-filled stack the contours were extracted from
    pub fn new(stack: &'a YearlyStack, contours: &'a AnnualContours, baseline_year: i32) -> Self {
        Self {
            stack,
            contours,
            baseline_year,
        }
    }

    pub fn calculate(&self, points: &[BaselinePoint]) -> CoastResult<AnnualMovements> {
        log::info!(
            "Computing annual movements for {} points against baseline {}",
            points.len(),
            self.baseline_year
        );
        let baseline = self.stack.year(self.baseline_year).ok_or_else(|| {
            CoastError::EmptyBaseline(format!(
                "baseline year {} is not in the raster stack",
                self.baseline_year
            ))
        })?;

        let years = self.stack.years();
        let rows = self.compute_rows(points, &years, &baseline.index);
        log::debug!("Computed {} movement rows over {} years", rows.len(), years.len());
        Ok(AnnualMovements { years, rows })
    }

    #[cfg(feature = "parallel")]
    fn compute_rows(&self, points: &[BaselinePoint], years: &[i32], baseline: &YearBand) -> Vec<PointRow> {
        use rayon::prelude::*;

        points
            .par_iter()
            .map(|p| self.point_row(p, years, baseline))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn compute_rows(&self, points: &[BaselinePoint], years: &[i32], baseline: &YearBand) -> Vec<PointRow> {
        points
            .iter()
            .map(|p| self.point_row(p, years, baseline))
            .collect()
    }

    fn point_row(&self, point: &BaselinePoint, years: &[i32], baseline: &YearBand) -> PointRow {
        let geobox = &self.stack.geobox;
        let p = point.geometry;
        let mut distances = Vec::with_capacity(years.len());
        let mut nearest = Vec::with_capacity(years.len());
        let mut tides = Vec::with_capacity(years.len());

        for &year in years {
            let Some(layers) = self.stack.year(year) else {
                distances.push(f64::NAN);
                nearest.push(None);
                tides.push(f64::NAN);
                continue;
            };
            tides.push(sample_bilinear(&layers.tide, geobox, p.x(), p.y()));

            let q = self.contours.get(&year).and_then(|c| nearest_point(c, &p));
            match q {
                Some(q) => {
                    let d = p.euclidean_distance(&q);
                    let index_year = sample_bilinear(&layers.index, geobox, p.x(), p.y());
                    let index_baseline = sample_bilinear(baseline, geobox, q.x(), q.y());
                    let sign = if index_baseline > index_year { 1.0 } else { -1.0 };
                    distances.push(round_to(sign * d, 2));
                    nearest.push(Some(q));
                }
                None => {
                    distances.push(f64::NAN);
                    nearest.push(None);
                }
            }
        }

        PointRow {
            point: point.clone(),
            distances,
            nearest,
            tides,
            stats: BTreeMap::new(),
        }
    }
}

/// Closest point on a contour to `p`
pub fn nearest_point(contour: &MultiLineString<f64>, p: &Point<f64>) -> Option<Point<f64>> {
    match contour.closest_point(p) {
        Closest::Intersection(q) | Closest::SinglePoint(q) => Some(q),
        Closest::Indeterminate => None,
    }
}

/// Bilinear interpolation of `band` at a map coordinate
///
/// Interpolates between pixel centres. Returns NaN outside the centre grid
/// or when any of the four neighbours is NaN.
pub fn sample_bilinear(band: &YearBand, geobox: &GeoBox, x: f64, y: f64) -> f64 {
    let (rows, cols) = band.dim();
    if rows == 0 || cols == 0 {
        return f64::NAN;
    }
    let (col, row) = geobox.transform.map_to_pixel(x, y);
    let (col, row) = (col - 0.5, row - 0.5);
    if !(col >= 0.0 && row >= 0.0 && col <= (cols - 1) as f64 && row <= (rows - 1) as f64) {
        return f64::NAN;
    }

    let c0 = col.floor() as usize;
    let r0 = row.floor() as usize;
    let c1 = (c0 + 1).min(cols - 1);
    let r1 = (r0 + 1).min(rows - 1);
    let fc = col - c0 as f64;
    let fr = row - r0 as f64;

    let v00 = band[[r0, c0]] as f64;
    let v01 = band[[r0, c1]] as f64;
    let v10 = band[[r1, c0]] as f64;
    let v11 = band[[r1, c1]] as f64;
    let top = v00 + fc * (v01 - v00);
    let bottom = v10 + fc * (v11 - v10);
    top + fr * (bottom - top)
}

/// Round half to even at `decimals` places; zero results are always `+0.0`
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let rounded = (value * scale).round_ties_even() / scale;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
